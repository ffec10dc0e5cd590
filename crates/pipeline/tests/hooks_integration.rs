//! Integration tests for hook dispatch
//!
//! Drive the built-in hooks through an `Executor` and check ordering, context
//! threading and panic isolation against the public API only.

use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use steadfast_pipeline::testing::{FlakyOperation, RecordingHook, TestError};
use steadfast_pipeline::{
    CompositeHook, ExecutionContext, ExecutionHook, ExecutionOutcome, Executor, MetricsHook,
    Operation, RetryConfig, RetryHook, TracingHook,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("steadfast_pipeline=debug"))
        .with_test_writer()
        .try_init();
}

/// Appends its label to a shared log and tags the context
struct Labeled {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl ExecutionHook for Labeled {
    fn before_execution(&self, ctx: ExecutionContext, _op: &Operation) -> ExecutionContext {
        let seen = ctx.value::<&'static str>("last").copied().unwrap_or("-");
        self.log.lock().push(format!("{}<{}", self.label, seen));
        ctx.with_value("last", self.label)
    }

    fn after_execution(
        &self,
        ctx: &ExecutionContext,
        _op: &Operation,
        _outcome: &ExecutionOutcome<'_>,
    ) {
        let seen = ctx.value::<&'static str>("last").copied().unwrap_or("-");
        self.log.lock().push(format!("{}>{}", self.label, seen));
    }
}

struct Panicking;

impl ExecutionHook for Panicking {
    fn before_execution(&self, _ctx: ExecutionContext, _op: &Operation) -> ExecutionContext {
        panic!("hook bug");
    }

    fn after_execution(
        &self,
        _ctx: &ExecutionContext,
        _op: &Operation,
        _outcome: &ExecutionOutcome<'_>,
    ) {
        panic!("hook bug");
    }
}

impl RetryHook for Panicking {
    fn before_retry(
        &self,
        _ctx: ExecutionContext,
        _attempt: u32,
        _error: Option<&(dyn Error + 'static)>,
    ) -> ExecutionContext {
        panic!("hook bug");
    }
}

/// Validates registration order and context threading across hooks.
///
/// # Test Steps
/// 1. Register hooks A, B, C
/// 2. Execute one operation
/// 3. Verify each before-hook saw the context from its predecessor
/// 4. Verify after-hooks ran in the same order on the final context
#[tokio::test(flavor = "multi_thread")]
async fn test_hooks_run_in_registration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let hooks = Arc::new(CompositeHook::new());
    for label in ["A", "B", "C"] {
        hooks.add_execution_hook(Arc::new(Labeled { label, log: Arc::clone(&log) }));
    }
    let executor = Executor::builder().hooks(hooks).build();

    let result = executor
        .execute(&ExecutionContext::background(), &Operation::new("PING"), |ctx| async move {
            Ok::<_, TestError>(ctx.value::<&'static str>("last").copied())
        })
        .await;

    assert_eq!(result.expect("should succeed"), Some("C"));
    assert_eq!(*log.lock(), vec!["A<-", "B<A", "C<B", "A>C", "B>C", "C>C"]);
}

/// Validates that a panicking hook never breaks the execution.
///
/// # Test Steps
/// 1. Register a recorder, a panicking hook, and a second recorder
/// 2. Run an operation that fails once, then succeeds
/// 3. Verify the caller sees success and both recorders saw every event
/// 4. Verify every panic was counted
#[tokio::test(flavor = "multi_thread")]
async fn test_panicking_hook_is_isolated() {
    let first = Arc::new(RecordingHook::new());
    let last = Arc::new(RecordingHook::new());
    let hooks = Arc::new(CompositeHook::new());
    hooks.add_hook(first.clone());
    hooks.add_execution_hook(Arc::new(Panicking));
    hooks.add_retry_hook(Arc::new(Panicking));
    hooks.add_hook(last.clone());

    let executor = Executor::builder()
        .retry_policy(
            RetryConfig::fixed(3, Duration::from_millis(1)).build_policy().expect("valid"),
        )
        .hooks(Arc::clone(&hooks))
        .build();

    let flaky = FlakyOperation::new(1);
    let result = executor
        .execute(&ExecutionContext::background(), &Operation::new("GET"), |ctx| flaky.call(ctx))
        .await;

    assert_eq!(result.expect("should succeed"), 2);
    assert_eq!(first.events(), last.events());
    assert_eq!(last.count("after_execution:"), 2);
    assert_eq!(last.count("before_retry:1"), 1);
    // 2 before_execution + 2 after_execution + 1 before_retry
    assert_eq!(hooks.isolated_failures(), 5);
}

/// Validates that an empty registry passes the caller's context through.
#[tokio::test]
async fn test_empty_registry_is_transparent() {
    let hooks = Arc::new(CompositeHook::new());
    assert!(hooks.is_empty());

    let ctx = ExecutionContext::background().with_value("tenant", 7_u32);
    let executor = Executor::builder().hooks(hooks).build();
    let passed = executor
        .execute(&ctx, &Operation::new("GET"), |inner| async move { Ok::<_, TestError>(inner) })
        .await
        .expect("should succeed");

    assert!(passed.ptr_eq(&ctx));
    assert_eq!(passed.value::<u32>("tenant"), Some(&7));
}

/// Validates the built-in hooks wired through an executor together.
///
/// # Test Steps
/// 1. Register `TracingHook` and `MetricsHook` on one registry
/// 2. Run a retried operation, a pipeline and a connect/disconnect pair
/// 3. Verify the metrics snapshot reflects every event
#[tokio::test(flavor = "multi_thread")]
async fn test_builtin_hooks_through_executor() {
    init_tracing();

    let metrics = Arc::new(MetricsHook::new());
    let hooks = Arc::new(CompositeHook::new());
    let tracing_hook = TracingHook::new().with_args(true).with_slow_threshold(Duration::ZERO);
    hooks.add_hook(Arc::new(tracing_hook));
    hooks.add_hook(metrics.clone());

    let executor = Executor::builder()
        .retry_policy(
            RetryConfig::fixed(2, Duration::from_millis(1)).build_policy().expect("valid"),
        )
        .hooks(hooks)
        .build();
    let ctx = ExecutionContext::background();

    let flaky = FlakyOperation::new(1);
    let op = Operation::new("SET").with_arg("k").with_arg(1);
    assert!(executor.execute(&ctx, &op, |ctx| flaky.call(ctx)).await.is_ok());

    let batch = [Operation::new("INCR"), Operation::new("EXPIRE")];
    let pipeline: Result<Vec<u32>, _> = executor
        .execute_pipeline(&ctx, &batch, |_ctx| async { Ok::<_, TestError>(vec![1, 1]) })
        .await;
    assert_eq!(pipeline.expect("pipeline ok"), vec![1, 1]);

    let connected = executor
        .connect(&ctx, "localhost:6379", |_ctx| async {
            Err::<(), _>(TestError::new("connection refused"))
        })
        .await;
    assert!(connected.is_err());
    executor
        .disconnect(&ctx, "localhost:6379", |_ctx| async { Ok::<_, TestError>(()) })
        .await
        .expect("disconnect ok");

    let snapshot = metrics.snapshot();
    let set = snapshot.operation("SET").expect("SET recorded");
    assert_eq!(set.calls, 2);
    assert_eq!(set.errors, 1);
    assert_eq!(snapshot.operation("pipeline").map(|stats| stats.calls), Some(1));
    assert_eq!(snapshot.retries, 1);
    assert_eq!(snapshot.retry_successes, 1);
    assert_eq!(snapshot.pipelines, 1);
    assert_eq!(snapshot.pipeline_errors, 0);
    assert_eq!(snapshot.connects, 1);
    assert_eq!(snapshot.connect_errors, 1);
    assert_eq!(snapshot.disconnects, 1);
}

/// Validates that hooks registered while an execution is in flight apply
/// from the next dispatch on.
#[tokio::test(flavor = "multi_thread")]
async fn test_registration_while_executing() {
    let hooks = Arc::new(CompositeHook::new());
    let late = Arc::new(RecordingHook::new());
    let executor = Executor::builder().hooks(Arc::clone(&hooks)).build();

    let calls = AtomicU32::new(0);
    let result = executor
        .execute(&ExecutionContext::background(), &Operation::new("GET"), |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            hooks.add_hook(late.clone());
            async { Ok::<_, TestError>(()) }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(late.events(), vec!["after_execution:GET:ok".to_string()]);
}
