//! Resilient execution pipeline for arbitrary operations.
//!
//! The crate wraps a caller-supplied operation with three composable
//! concerns:
//! - **Retry**: pluggable [`RetryPolicy`] variants with exponential, linear or
//!   fixed backoff and a shared non-retryable error classifier
//! - **Circuit breaking**: a process-local [`CircuitBreaker`] state machine
//! - **Hooks**: an ordered [`CompositeHook`] registry dispatching execution,
//!   connection, pipeline and retry events
//!
//! The [`Executor`] composes the three while preserving cancellation
//! semantics ([`ExecutionContext`]) and the identity of the operation error
//! ([`ExecutionError::Operation`]).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use steadfast_pipeline::{
//!     CircuitBreaker, CircuitBreakerConfig, CompositeHook, ExecutionContext, Executor,
//!     ExponentialBackoff, Operation,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = ExponentialBackoff::new(3, Duration::from_millis(100), Duration::from_secs(5))?;
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default())?;
//!
//! let executor = Executor::builder()
//!     .retry_policy(Arc::new(policy))
//!     .circuit_breaker(Arc::new(breaker))
//!     .hooks(Arc::new(CompositeHook::new()))
//!     .build();
//!
//! let ctx = ExecutionContext::background();
//! let op = Operation::new("GET").with_arg("user:42");
//! let value = executor
//!     .execute(&ctx, &op, |_ctx| async { Ok::<_, std::io::Error>("cached") })
//!     .await?;
//! assert_eq!(value, "cached");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod collections;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod hooks;
pub mod resilience;
#[cfg(any(feature = "test-utils", test))]
pub mod testing;
#[cfg(feature = "serde")]
pub mod utils;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use config::{BackoffKind, PipelineConfig, RetryConfig};
pub use context::{ExecutionContext, Operation};
pub use error::{
    CircuitOpenError, ConfigError, ConfigResult, ContextError, ErrorClassification, ErrorSeverity,
    ExecutionError, ExecutionResult,
};
pub use executor::{BreakerPlacement, Executor, ExecutorBuilder};
pub use hooks::{
    CompositeHook, ConnectionHook, ExecutionHook, ExecutionOutcome, MetricsHook, PipelineHook,
    RetryHook, TracingHook,
};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState, Clock, ErrorClassifier, ExponentialBackoff, FixedBackoff, LinearBackoff,
    MockClock, NoRetry, NonRetryableClass, RetryPolicy, SystemClock,
};
#[cfg(feature = "serde")]
pub use utils::serde::duration_millis;
