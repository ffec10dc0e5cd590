//! Recording hooks and scripted operations

use std::error::Error;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::context::{ExecutionContext, Operation};
use crate::hooks::{ConnectionHook, ExecutionHook, ExecutionOutcome, PipelineHook, RetryHook};

/// Error with a caller-chosen message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TestError {
    message: String,
}

impl TestError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// An error the default classifier treats as non-retryable
    pub fn auth() -> Self {
        Self::new("NOAUTH Authentication required.")
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn status(failed: bool) -> &'static str {
    if failed {
        "err"
    } else {
        "ok"
    }
}

/// Records every hook event as a string such as `"after_retry:1:false"`
///
/// Event formats:
/// - `before_execution:{op}` / `after_execution:{op}:{ok|err}`
/// - `before_retry:{attempt}` / `after_retry:{attempt}:{success}`
/// - `before_connect:{endpoint}` / `after_connect:{endpoint}:{ok|err}`
/// - `before_disconnect:{endpoint}` / `after_disconnect:{endpoint}:{ok|err}`
/// - `before_pipeline:{len}` / `after_pipeline:{len}:{ok|err}`
#[derive(Debug, Default)]
pub struct RecordingHook {
    events: Mutex<Vec<String>>,
    durations: Mutex<Vec<Duration>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events in arrival order
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Number of events starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.events.lock().iter().filter(|event| event.starts_with(prefix)).count()
    }

    /// Durations reported to `after_execution`, in order
    pub fn durations(&self) -> Vec<Duration> {
        self.durations.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.durations.lock().clear();
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl ExecutionHook for RecordingHook {
    fn before_execution(&self, ctx: ExecutionContext, op: &Operation) -> ExecutionContext {
        self.push(format!("before_execution:{}", op.name()));
        ctx
    }

    fn after_execution(
        &self,
        _ctx: &ExecutionContext,
        op: &Operation,
        outcome: &ExecutionOutcome<'_>,
    ) {
        self.durations.lock().push(outcome.duration);
        self.push(format!("after_execution:{}:{}", op.name(), status(!outcome.is_success())));
    }
}

impl ConnectionHook for RecordingHook {
    fn before_connect(&self, ctx: ExecutionContext, endpoint: &str) -> ExecutionContext {
        self.push(format!("before_connect:{endpoint}"));
        ctx
    }

    fn after_connect(
        &self,
        _ctx: &ExecutionContext,
        endpoint: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        self.push(format!("after_connect:{endpoint}:{}", status(error.is_some())));
    }

    fn before_disconnect(&self, ctx: ExecutionContext, endpoint: &str) -> ExecutionContext {
        self.push(format!("before_disconnect:{endpoint}"));
        ctx
    }

    fn after_disconnect(
        &self,
        _ctx: &ExecutionContext,
        endpoint: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        self.push(format!("after_disconnect:{endpoint}:{}", status(error.is_some())));
    }
}

impl PipelineHook for RecordingHook {
    fn before_pipeline_execution(
        &self,
        ctx: ExecutionContext,
        ops: &[Operation],
    ) -> ExecutionContext {
        self.push(format!("before_pipeline:{}", ops.len()));
        ctx
    }

    fn after_pipeline_execution(
        &self,
        _ctx: &ExecutionContext,
        ops: &[Operation],
        error: Option<&(dyn Error + 'static)>,
        _duration: Duration,
    ) {
        self.push(format!("after_pipeline:{}:{}", ops.len(), status(error.is_some())));
    }
}

impl RetryHook for RecordingHook {
    fn before_retry(
        &self,
        ctx: ExecutionContext,
        attempt: u32,
        _error: Option<&(dyn Error + 'static)>,
    ) -> ExecutionContext {
        self.push(format!("before_retry:{attempt}"));
        ctx
    }

    fn after_retry(
        &self,
        _ctx: &ExecutionContext,
        attempt: u32,
        success: bool,
        _error: Option<&(dyn Error + 'static)>,
    ) {
        self.push(format!("after_retry:{attempt}:{success}"));
    }
}

/// Operation failing its first `failures` calls, then succeeding
///
/// A successful call yields its 1-based call number. Clones share the call
/// counter.
#[derive(Debug, Clone)]
pub struct FlakyOperation {
    failures: u32,
    error: TestError,
    calls: Arc<AtomicU32>,
}

impl FlakyOperation {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            error: TestError::new("connection reset by peer"),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Never succeeds
    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    /// Fail with `error` instead of the default transient error
    #[must_use]
    pub fn with_error(mut self, error: TestError) -> Self {
        self.error = error;
        self
    }

    /// Calls made so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call(&self, _ctx: ExecutionContext) -> Ready<Result<u32, TestError>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if call <= self.failures {
            ready(Err(self.error.clone()))
        } else {
            ready(Ok(call))
        }
    }
}
