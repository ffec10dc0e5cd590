//! Integration tests for the circuit breaker
//!
//! Real-time transitions with the system clock and concurrent access from
//! multiple tasks.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use steadfast_pipeline::testing::TestError;
use steadfast_pipeline::{
    CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState, ExecutionError,
    MockClock,
};

type BreakerResult<T> = Result<T, ExecutionError<TestError>>;

fn failing() -> BreakerResult<()> {
    Err(ExecutionError::Operation(TestError::new("connection refused")))
}

/// Validates the full Closed -> Open -> HalfOpen -> Closed cycle with real
/// time.
///
/// # Test Steps
/// 1. Breaker with threshold 2, timeout 50ms, one trial
/// 2. First failure keeps the circuit closed
/// 3. Second failure opens it
/// 4. The next call is rejected and its function never runs
/// 5. After 60ms a successful trial closes the circuit
#[tokio::test(flavor = "multi_thread")]
async fn test_breaker_cycle_with_system_clock() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(2)
        .timeout(Duration::from_millis(50))
        .max_requests(1)
        .build()
        .expect("valid config");
    let breaker = CircuitBreaker::new(config).expect("valid config");

    let _ = breaker.execute(|| async { failing() }).await;
    assert_eq!(breaker.state().to_string(), "CLOSED");
    assert_eq!(breaker.failure_count(), 1);

    let _ = breaker.execute(|| async { failing() }).await;
    assert_eq!(breaker.state().to_string(), "OPEN");

    let invoked = AtomicU32::new(0);
    let rejected: BreakerResult<()> = breaker
        .execute(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
    let err = rejected.expect_err("should be rejected");
    assert!(err.is_circuit_open());
    assert_eq!(err.to_string(), "circuit breaker is open");
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(60)).await;

    let trial: BreakerResult<&str> = breaker.execute(|| async { Ok("pong") }).await;
    assert_eq!(trial.expect("trial admitted"), "pong");
    assert_eq!(breaker.state().to_string(), "CLOSED");
    assert_eq!(breaker.failure_count(), 0);
}

/// Validates that a breaker works with a plain caller error type.
#[test]
fn test_sync_call_with_custom_error() {
    #[derive(Debug, PartialEq)]
    enum CacheError {
        Unavailable,
        Down,
    }

    impl From<CircuitOpenError> for CacheError {
        fn from(_: CircuitOpenError) -> Self {
            CacheError::Unavailable
        }
    }

    let breaker = CircuitBreaker::builder()
        .failure_threshold(1)
        .build_with_clock(MockClock::new())
        .expect("valid config");

    assert_eq!(breaker.call(|| Err::<(), _>(CacheError::Down)), Err(CacheError::Down));
    assert_eq!(breaker.call(|| Ok::<_, CacheError>(1)), Err(CacheError::Unavailable));
}

/// Validates half-open admission under concurrent callers.
///
/// # Test Steps
/// 1. Open a breaker with `max_requests = 2`, then let the timeout elapse
/// 2. Start 10 slow calls concurrently
/// 3. Verify at most 2 ran and the rest were rejected
/// 4. Verify the two successes closed the circuit
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_half_open_limits_concurrent_trials() {
    let clock = MockClock::new();
    let breaker = Arc::new(
        CircuitBreaker::builder()
            .failure_threshold(1)
            .timeout(Duration::from_millis(10))
            .max_requests(2)
            .build_with_clock(clock.clone())
            .expect("valid config"),
    );

    let _ = breaker.execute(|| async { failing() }).await;
    assert_eq!(breaker.state(), CircuitState::Open);
    clock.advance_millis(11);

    let ran = Arc::new(AtomicU32::new(0));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let breaker = Arc::clone(&breaker);
        let ran = Arc::clone(&ran);
        handles.push(tokio::spawn(async move {
            breaker
                .execute(|| async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    BreakerResult::Ok(())
                })
                .await
        }));
    }

    let mut rejected = 0;
    for handle in handles {
        if let Err(err) = handle.await.expect("task completed") {
            assert!(err.is_circuit_open());
            rejected += 1;
        }
    }

    assert_eq!(ran.load(Ordering::SeqCst), 2);
    assert_eq!(rejected, 8);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

/// Validates that `state()` stays readable while a slow operation runs.
#[tokio::test(flavor = "multi_thread")]
async fn test_state_readable_during_slow_call() {
    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()).expect("valid"));
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let worker = {
        let breaker = Arc::clone(&breaker);
        tokio::spawn(async move {
            breaker
                .execute(|| async move {
                    let _ = started_tx.send(());
                    let _ = release_rx.await;
                    BreakerResult::Ok(())
                })
                .await
        })
    };

    started_rx.await.expect("operation started");
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.metrics().total_calls, 1);

    release_tx.send(()).expect("worker waiting");
    assert!(worker.await.expect("task completed").is_ok());
    assert_eq!(breaker.metrics().successes, 1);
}

/// Validates that `reset()` recovers an open breaker immediately.
#[test]
fn test_reset_recovers_open_breaker() {
    let breaker = CircuitBreaker::builder()
        .failure_threshold(1)
        .timeout(Duration::from_secs(3600))
        .build_with_clock(MockClock::new())
        .expect("valid config");

    let _ = breaker.call(failing);
    assert_eq!(breaker.state(), CircuitState::Open);

    breaker.reset();
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert!(breaker.call(|| BreakerResult::Ok(())).is_ok());
}
