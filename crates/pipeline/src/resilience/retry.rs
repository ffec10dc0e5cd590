//! Retry policies
//!
//! A [`RetryPolicy`] answers two questions for the executor: *may* attempt
//! `n` run after the last error, and *how long* to wait before it. Policies
//! are immutable after construction and shared between concurrent callers
//! behind an `Arc` without locking.
//!
//! Variants:
//! - [`ExponentialBackoff`]: `min_backoff * 2^(attempt-1)`, capped, optional
//!   jitter of up to 10%
//! - [`LinearBackoff`]: base delay plus an optional per-attempt increment
//! - [`FixedBackoff`]: constant delay
//! - [`NoRetry`]: never retries
//!
//! Every variant refuses to retry errors the [`ErrorClassifier`] recognises
//! as non-retryable.

use std::fmt;
use std::time::Duration;

use rand::Rng;

use crate::error::{ConfigError, ConfigResult};
use crate::resilience::classify::ErrorClassifier;

/// Growth factor of [`ExponentialBackoff`]
pub const EXPONENTIAL_MULTIPLIER: f64 = 2.0;

/// Upper bound of the jitter added to a delay, as a fraction of it
pub const JITTER_FRACTION: f64 = 0.10;

/// Exponent cap that keeps the delay computation finite
const MAX_BACKOFF_EXPONENT: u32 = 62;

/// Decision and timing logic for retrying a failed operation
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Retry budget
    fn max_retries(&self) -> u32;

    /// Whether attempt number `attempt` may run after `error`
    ///
    /// Returns `false` once `attempt >= max_retries()` and for
    /// non-retryable errors. `None` is treated as retry-eligible.
    fn should_retry(&self, attempt: u32, error: Option<&(dyn std::error::Error + 'static)>) -> bool;

    /// Delay to wait before attempt number `attempt`
    fn next_delay(&self, attempt: u32) -> Duration;

    /// Upper bound on the number of attempts the executor may make
    fn max_attempts(&self) -> u32 {
        self.max_retries().saturating_add(1)
    }
}

fn budget_allows(
    classifier: &ErrorClassifier,
    max_retries: u32,
    attempt: u32,
    error: Option<&(dyn std::error::Error + 'static)>,
) -> bool {
    if attempt >= max_retries {
        return false;
    }
    error.map_or(true, |err| classifier.is_retryable(err))
}

fn with_jitter(delay: Duration) -> Duration {
    let fraction = rand::thread_rng().gen::<f64>() * JITTER_FRACTION;
    delay.saturating_add(delay.mul_f64(fraction))
}

/// Exponential backoff: `min_backoff * 2^(attempt-1)` clamped to
/// `max_backoff`
///
/// ```rust
/// use std::time::Duration;
///
/// use steadfast_pipeline::{ExponentialBackoff, RetryPolicy};
///
/// let policy = ExponentialBackoff::new(3, Duration::from_millis(100), Duration::from_secs(5))
///     .unwrap()
///     .without_jitter();
///
/// assert_eq!(policy.next_delay(0), Duration::from_millis(100));
/// assert_eq!(policy.next_delay(1), Duration::from_millis(100));
/// assert_eq!(policy.next_delay(2), Duration::from_millis(200));
/// assert_eq!(policy.next_delay(10), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_retries: u32,
    min_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: bool,
    classifier: ErrorClassifier,
}

impl ExponentialBackoff {
    /// Create a jittered exponential policy
    ///
    /// Fails unless `0 < min_backoff <= max_backoff`.
    pub fn new(
        max_retries: u32,
        min_backoff: Duration,
        max_backoff: Duration,
    ) -> ConfigResult<Self> {
        if min_backoff.is_zero() {
            return Err(ConfigError::invalid("min_backoff must be greater than 0"));
        }
        if min_backoff > max_backoff {
            return Err(ConfigError::invalid(format!(
                "min_backoff ({min_backoff:?}) cannot be greater than max_backoff ({max_backoff:?})"
            )));
        }
        Ok(Self {
            max_retries,
            min_backoff,
            max_backoff,
            multiplier: EXPONENTIAL_MULTIPLIER,
            jitter: true,
            classifier: ErrorClassifier::shared().clone(),
        })
    }

    /// Disable jitter
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Use a custom classifier
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Lower delay bound
    pub fn min_backoff(&self) -> Duration {
        self.min_backoff
    }

    /// Upper delay bound before jitter
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Whether jitter is applied
    pub fn jitter_enabled(&self) -> bool {
        self.jitter
    }

    /// Delay for `attempt` before jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.min_backoff.min(self.max_backoff);
        }
        let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT) as i32;
        let secs = self.min_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn should_retry(
        &self,
        attempt: u32,
        error: Option<&(dyn std::error::Error + 'static)>,
    ) -> bool {
        budget_allows(&self.classifier, self.max_retries, attempt, error)
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if self.jitter {
            with_jitter(delay)
        } else {
            delay
        }
    }
}

/// Linear backoff: `delay + increment * attempt`, capped at `max_delay`
///
/// Without an increment the delay is constant.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    max_retries: u32,
    delay: Duration,
    increment: Duration,
    max_delay: Duration,
    classifier: ErrorClassifier,
}

impl LinearBackoff {
    /// Constant-delay linear policy
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            increment: Duration::ZERO,
            max_delay: Duration::MAX,
            classifier: ErrorClassifier::shared().clone(),
        }
    }

    /// Grow the delay by `increment` per attempt, never beyond `max_delay`
    pub fn with_increment(
        mut self,
        increment: Duration,
        max_delay: Duration,
    ) -> ConfigResult<Self> {
        if max_delay < self.delay {
            return Err(ConfigError::invalid(format!(
                "max_delay ({max_delay:?}) cannot be less than delay ({:?})",
                self.delay
            )));
        }
        self.increment = increment;
        self.max_delay = max_delay;
        Ok(self)
    }

    /// Use a custom classifier
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }
}

impl RetryPolicy for LinearBackoff {
    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn should_retry(
        &self,
        attempt: u32,
        error: Option<&(dyn std::error::Error + 'static)>,
    ) -> bool {
        budget_allows(&self.classifier, self.max_retries, attempt, error)
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        self.delay.saturating_add(self.increment.saturating_mul(attempt)).min(self.max_delay)
    }
}

/// Constant delay between attempts
#[derive(Debug, Clone)]
pub struct FixedBackoff {
    max_retries: u32,
    delay: Duration,
    classifier: ErrorClassifier,
}

impl FixedBackoff {
    /// Fixed policy waiting `delay` before every retry
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay, classifier: ErrorClassifier::shared().clone() }
    }

    /// Use a custom classifier
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }
}

impl RetryPolicy for FixedBackoff {
    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn should_retry(
        &self,
        attempt: u32,
        error: Option<&(dyn std::error::Error + 'static)>,
    ) -> bool {
        budget_allows(&self.classifier, self.max_retries, attempt, error)
    }

    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Policy that never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn max_retries(&self) -> u32 {
        0
    }

    fn should_retry(
        &self,
        _attempt: u32,
        _error: Option<&(dyn std::error::Error + 'static)>,
    ) -> bool {
        false
    }

    fn next_delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}
