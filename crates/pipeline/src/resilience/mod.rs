//! Resilience primitives used by the [`Executor`](crate::Executor)
//!
//! - **Retry**: [`RetryPolicy`] and its backoff variants decide whether and
//!   when a failed attempt is retried
//! - **Classification**: [`ErrorClassifier`] recognises errors that retrying
//!   cannot fix
//! - **Circuit breaker**: [`CircuitBreaker`] stops calling a failing
//!   dependency for a cooldown period
//!
//! Each primitive is usable on its own; the executor only composes them.
//! Time-dependent behaviour reads through [`Clock`] so tests can drive it
//! with [`MockClock`].

pub mod circuit_breaker;
pub mod classify;
pub mod clock;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState,
};
pub use classify::{ErrorClassifier, NonRetryableClass};
pub use clock::{Clock, MockClock, SystemClock};
pub use retry::{ExponentialBackoff, FixedBackoff, LinearBackoff, NoRetry, RetryPolicy};
