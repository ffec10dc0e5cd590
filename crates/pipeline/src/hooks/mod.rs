//! Hook registry
//!
//! Hooks observe (and, for before-events, transform the context of) every
//! operation the [`Executor`](crate::Executor) runs. There are four
//! categories, one trait each:
//!
//! | Trait | Events |
//! |-------|--------|
//! | [`ExecutionHook`] | `before_execution`, `after_execution` |
//! | [`ConnectionHook`] | `before_connect`, `after_connect`, `before_disconnect`, `after_disconnect` |
//! | [`PipelineHook`] | `before_pipeline_execution`, `after_pipeline_execution` |
//! | [`RetryHook`] | `before_retry`, `after_retry` |
//!
//! Every method has a default, so an implementor overrides only the events
//! it cares about.
//!
//! [`CompositeHook`] keeps one ordered list per category and dispatches in
//! registration order. Before-events thread the context: each hook receives
//! the context returned by the previous one. After-events hand every hook
//! the same context and outcome.
//!
//! A panicking hook is isolated: the panic is caught, logged and counted, and
//! the remaining hooks still run.

use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::warn;

use crate::context::{ExecutionContext, Operation};

pub mod logging;
pub mod metrics;

pub use logging::TracingHook;
pub use metrics::{MetricsHook, MetricsSnapshot, OperationStats};

/// What a single attempt produced, as seen by [`ExecutionHook::after_execution`]
#[derive(Clone, Copy)]
pub struct ExecutionOutcome<'a> {
    /// The successful value, if any
    pub result: Option<&'a dyn fmt::Debug>,
    /// The operation error, if any
    pub error: Option<&'a (dyn Error + 'static)>,
    /// Wall time spent inside the operation
    pub duration: Duration,
}

impl<'a> ExecutionOutcome<'a> {
    pub fn success(result: &'a dyn fmt::Debug, duration: Duration) -> Self {
        Self { result: Some(result), error: None, duration }
    }

    pub fn failure(error: &'a (dyn Error + 'static), duration: Duration) -> Self {
        Self { result: None, error: Some(error), duration }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Debug for ExecutionOutcome<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionOutcome")
            .field("result", &self.result)
            .field("error", &self.error.map(ToString::to_string))
            .field("duration", &self.duration)
            .finish()
    }
}

/// Observes each attempt of an operation
pub trait ExecutionHook: Send + Sync {
    /// Called before every attempt; the returned context is what later hooks
    /// and the operation see
    fn before_execution(&self, ctx: ExecutionContext, _op: &Operation) -> ExecutionContext {
        ctx
    }

    /// Called after every attempt
    fn after_execution(
        &self,
        _ctx: &ExecutionContext,
        _op: &Operation,
        _outcome: &ExecutionOutcome<'_>,
    ) {
    }
}

/// Observes connection lifecycle events
pub trait ConnectionHook: Send + Sync {
    fn before_connect(&self, ctx: ExecutionContext, _endpoint: &str) -> ExecutionContext {
        ctx
    }

    fn after_connect(
        &self,
        _ctx: &ExecutionContext,
        _endpoint: &str,
        _error: Option<&(dyn Error + 'static)>,
    ) {
    }

    fn before_disconnect(&self, ctx: ExecutionContext, _endpoint: &str) -> ExecutionContext {
        ctx
    }

    fn after_disconnect(
        &self,
        _ctx: &ExecutionContext,
        _endpoint: &str,
        _error: Option<&(dyn Error + 'static)>,
    ) {
    }
}

/// Observes batched executions
pub trait PipelineHook: Send + Sync {
    fn before_pipeline_execution(
        &self,
        ctx: ExecutionContext,
        _ops: &[Operation],
    ) -> ExecutionContext {
        ctx
    }

    fn after_pipeline_execution(
        &self,
        _ctx: &ExecutionContext,
        _ops: &[Operation],
        _error: Option<&(dyn Error + 'static)>,
        _duration: Duration,
    ) {
    }
}

/// Observes retry attempts
///
/// `attempt` is the zero-based attempt index, so the first retry is `1`.
pub trait RetryHook: Send + Sync {
    fn before_retry(
        &self,
        ctx: ExecutionContext,
        _attempt: u32,
        _error: Option<&(dyn Error + 'static)>,
    ) -> ExecutionContext {
        ctx
    }

    fn after_retry(
        &self,
        _ctx: &ExecutionContext,
        _attempt: u32,
        _success: bool,
        _error: Option<&(dyn Error + 'static)>,
    ) {
    }
}

type HookList<H> = RwLock<Arc<Vec<Arc<H>>>>;

fn register<H: ?Sized>(list: &HookList<H>, hook: Arc<H>) {
    let mut guard = list.write();
    let mut hooks = Vec::with_capacity(guard.len() + 1);
    hooks.extend(guard.iter().cloned());
    hooks.push(hook);
    *guard = Arc::new(hooks);
}

fn snapshot<H: ?Sized>(list: &HookList<H>) -> Arc<Vec<Arc<H>>> {
    Arc::clone(&list.read())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Ordered, thread-safe registry of hooks
///
/// Registration may happen at any time; dispatch iterates a snapshot taken
/// when the event starts, so a hook registered mid-dispatch first sees the
/// next event.
///
/// ```rust
/// use steadfast_pipeline::{CompositeHook, ExecutionContext, Operation};
///
/// let hooks = CompositeHook::new();
/// let ctx = ExecutionContext::background();
/// let op = Operation::new("GET").with_arg("user:1");
///
/// let out = hooks.dispatch_before_execution(ctx.clone(), &op);
/// assert!(out.ptr_eq(&ctx));
/// ```
#[derive(Default)]
pub struct CompositeHook {
    execution: HookList<dyn ExecutionHook>,
    connection: HookList<dyn ConnectionHook>,
    pipeline: HookList<dyn PipelineHook>,
    retry: HookList<dyn RetryHook>,
    isolated_failures: AtomicU64,
}

impl CompositeHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_execution_hook(&self, hook: Arc<dyn ExecutionHook>) {
        register(&self.execution, hook);
    }

    pub fn add_connection_hook(&self, hook: Arc<dyn ConnectionHook>) {
        register(&self.connection, hook);
    }

    pub fn add_pipeline_hook(&self, hook: Arc<dyn PipelineHook>) {
        register(&self.pipeline, hook);
    }

    pub fn add_retry_hook(&self, hook: Arc<dyn RetryHook>) {
        register(&self.retry, hook);
    }

    /// Register one value in all four categories
    pub fn add_hook<H>(&self, hook: Arc<H>)
    where
        H: ExecutionHook + ConnectionHook + PipelineHook + RetryHook + 'static,
    {
        self.add_execution_hook(hook.clone());
        self.add_connection_hook(hook.clone());
        self.add_pipeline_hook(hook.clone());
        self.add_retry_hook(hook);
    }

    pub fn execution_hook_count(&self) -> usize {
        self.execution.read().len()
    }

    pub fn connection_hook_count(&self) -> usize {
        self.connection.read().len()
    }

    pub fn pipeline_hook_count(&self) -> usize {
        self.pipeline.read().len()
    }

    pub fn retry_hook_count(&self) -> usize {
        self.retry.read().len()
    }

    /// True when no hook of any category is registered
    pub fn is_empty(&self) -> bool {
        self.execution_hook_count() == 0
            && self.connection_hook_count() == 0
            && self.pipeline_hook_count() == 0
            && self.retry_hook_count() == 0
    }

    /// Number of hook invocations that panicked and were skipped
    pub fn isolated_failures(&self) -> u64 {
        self.isolated_failures.load(Ordering::Relaxed)
    }

    fn isolate<R>(&self, event: &'static str, index: usize, f: impl FnOnce() -> R) -> Option<R> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Some(value),
            Err(payload) => {
                self.isolated_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event = event,
                    hook_index = index,
                    panic = %panic_message(payload.as_ref()),
                    "Hook panicked, skipping it"
                );
                None
            }
        }
    }

    fn thread_context<H: ?Sized>(
        &self,
        event: &'static str,
        hooks: &[Arc<H>],
        mut ctx: ExecutionContext,
        mut call: impl FnMut(&H, ExecutionContext) -> ExecutionContext,
    ) -> ExecutionContext {
        for (index, hook) in hooks.iter().enumerate() {
            let input = ctx.clone();
            if let Some(next) = self.isolate(event, index, || call(&**hook, input)) {
                ctx = next;
            }
        }
        ctx
    }

    fn broadcast<H: ?Sized>(
        &self,
        event: &'static str,
        hooks: &[Arc<H>],
        mut call: impl FnMut(&H),
    ) {
        for (index, hook) in hooks.iter().enumerate() {
            self.isolate(event, index, || call(&**hook));
        }
    }

    pub fn dispatch_before_execution(
        &self,
        ctx: ExecutionContext,
        op: &Operation,
    ) -> ExecutionContext {
        let hooks = snapshot(&self.execution);
        self.thread_context("before_execution", &hooks, ctx, |hook, ctx| {
            hook.before_execution(ctx, op)
        })
    }

    pub fn dispatch_after_execution(
        &self,
        ctx: &ExecutionContext,
        op: &Operation,
        outcome: &ExecutionOutcome<'_>,
    ) {
        let hooks = snapshot(&self.execution);
        self.broadcast("after_execution", &hooks, |hook| hook.after_execution(ctx, op, outcome));
    }

    pub fn dispatch_before_connect(
        &self,
        ctx: ExecutionContext,
        endpoint: &str,
    ) -> ExecutionContext {
        let hooks = snapshot(&self.connection);
        self.thread_context("before_connect", &hooks, ctx, |hook, ctx| {
            hook.before_connect(ctx, endpoint)
        })
    }

    pub fn dispatch_after_connect(
        &self,
        ctx: &ExecutionContext,
        endpoint: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        let hooks = snapshot(&self.connection);
        self.broadcast("after_connect", &hooks, |hook| hook.after_connect(ctx, endpoint, error));
    }

    pub fn dispatch_before_disconnect(
        &self,
        ctx: ExecutionContext,
        endpoint: &str,
    ) -> ExecutionContext {
        let hooks = snapshot(&self.connection);
        self.thread_context("before_disconnect", &hooks, ctx, |hook, ctx| {
            hook.before_disconnect(ctx, endpoint)
        })
    }

    pub fn dispatch_after_disconnect(
        &self,
        ctx: &ExecutionContext,
        endpoint: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        let hooks = snapshot(&self.connection);
        self.broadcast("after_disconnect", &hooks, |hook| {
            hook.after_disconnect(ctx, endpoint, error)
        });
    }

    pub fn dispatch_before_pipeline_execution(
        &self,
        ctx: ExecutionContext,
        ops: &[Operation],
    ) -> ExecutionContext {
        let hooks = snapshot(&self.pipeline);
        self.thread_context("before_pipeline_execution", &hooks, ctx, |hook, ctx| {
            hook.before_pipeline_execution(ctx, ops)
        })
    }

    pub fn dispatch_after_pipeline_execution(
        &self,
        ctx: &ExecutionContext,
        ops: &[Operation],
        error: Option<&(dyn Error + 'static)>,
        duration: Duration,
    ) {
        let hooks = snapshot(&self.pipeline);
        self.broadcast("after_pipeline_execution", &hooks, |hook| {
            hook.after_pipeline_execution(ctx, ops, error, duration)
        });
    }

    pub fn dispatch_before_retry(
        &self,
        ctx: ExecutionContext,
        attempt: u32,
        error: Option<&(dyn Error + 'static)>,
    ) -> ExecutionContext {
        let hooks = snapshot(&self.retry);
        self.thread_context("before_retry", &hooks, ctx, |hook, ctx| {
            hook.before_retry(ctx, attempt, error)
        })
    }

    pub fn dispatch_after_retry(
        &self,
        ctx: &ExecutionContext,
        attempt: u32,
        success: bool,
        error: Option<&(dyn Error + 'static)>,
    ) {
        let hooks = snapshot(&self.retry);
        self.broadcast("after_retry", &hooks, |hook| {
            hook.after_retry(ctx, attempt, success, error)
        });
    }
}

impl fmt::Debug for CompositeHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeHook")
            .field("execution", &self.execution_hook_count())
            .field("connection", &self.connection_hook_count())
            .field("pipeline", &self.pipeline_hook_count())
            .field("retry", &self.retry_hook_count())
            .field("isolated_failures", &self.isolated_failures())
            .finish()
    }
}

// A registry nests inside another registry as a single hook.

impl ExecutionHook for CompositeHook {
    fn before_execution(&self, ctx: ExecutionContext, op: &Operation) -> ExecutionContext {
        self.dispatch_before_execution(ctx, op)
    }

    fn after_execution(
        &self,
        ctx: &ExecutionContext,
        op: &Operation,
        outcome: &ExecutionOutcome<'_>,
    ) {
        self.dispatch_after_execution(ctx, op, outcome);
    }
}

impl ConnectionHook for CompositeHook {
    fn before_connect(&self, ctx: ExecutionContext, endpoint: &str) -> ExecutionContext {
        self.dispatch_before_connect(ctx, endpoint)
    }

    fn after_connect(
        &self,
        ctx: &ExecutionContext,
        endpoint: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        self.dispatch_after_connect(ctx, endpoint, error);
    }

    fn before_disconnect(&self, ctx: ExecutionContext, endpoint: &str) -> ExecutionContext {
        self.dispatch_before_disconnect(ctx, endpoint)
    }

    fn after_disconnect(
        &self,
        ctx: &ExecutionContext,
        endpoint: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        self.dispatch_after_disconnect(ctx, endpoint, error);
    }
}

impl PipelineHook for CompositeHook {
    fn before_pipeline_execution(
        &self,
        ctx: ExecutionContext,
        ops: &[Operation],
    ) -> ExecutionContext {
        self.dispatch_before_pipeline_execution(ctx, ops)
    }

    fn after_pipeline_execution(
        &self,
        ctx: &ExecutionContext,
        ops: &[Operation],
        error: Option<&(dyn Error + 'static)>,
        duration: Duration,
    ) {
        self.dispatch_after_pipeline_execution(ctx, ops, error, duration);
    }
}

impl RetryHook for CompositeHook {
    fn before_retry(
        &self,
        ctx: ExecutionContext,
        attempt: u32,
        error: Option<&(dyn Error + 'static)>,
    ) -> ExecutionContext {
        self.dispatch_before_retry(ctx, attempt, error)
    }

    fn after_retry(
        &self,
        ctx: &ExecutionContext,
        attempt: u32,
        success: bool,
        error: Option<&(dyn Error + 'static)>,
    ) {
        self.dispatch_after_retry(ctx, attempt, success, error);
    }
}
