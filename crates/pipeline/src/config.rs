//! Pipeline configuration
//!
//! Plain data types describing a retry policy, a circuit breaker and how the
//! two are composed. With the `serde` feature they deserialize from any
//! serde format, durations written as integer milliseconds and missing
//! fields filled from defaults:
//!
//! ```rust
//! # #[cfg(feature = "serde")] {
//! use std::time::Duration;
//!
//! use steadfast_pipeline::{BackoffKind, PipelineConfig};
//!
//! let config: PipelineConfig = serde_json::from_str(
//!     r#"{ "retry": { "kind": "fixed", "max_retries": 2, "min_backoff": 250 } }"#,
//! )
//! .unwrap();
//!
//! let retry = config.retry.as_ref().unwrap();
//! assert_eq!(retry.kind, BackoffKind::Fixed);
//! assert_eq!(retry.min_backoff, Duration::from_millis(250));
//! assert!(config.circuit_breaker.is_none());
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::executor::BreakerPlacement;
use crate::resilience::{
    CircuitBreakerConfig, ExponentialBackoff, FixedBackoff, LinearBackoff, NoRetry, RetryPolicy,
};

/// Which [`RetryPolicy`] variant a [`RetryConfig`] builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BackoffKind {
    /// [`ExponentialBackoff`]
    #[default]
    Exponential,
    /// [`LinearBackoff`]
    Linear,
    /// [`FixedBackoff`]
    Fixed,
    /// [`NoRetry`]
    None,
}

/// Retry policy settings
///
/// `min_backoff` doubles as the constant delay of the linear and fixed
/// variants; `max_backoff` caps the exponential and linear ones.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetryConfig {
    pub kind: BackoffKind,
    pub max_retries: u32,
    #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration_millis"))]
    pub min_backoff: Duration,
    #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration_millis"))]
    pub max_backoff: Duration,
    /// Exponential only
    pub jitter: bool,
    /// Linear only: added to the delay per attempt
    #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration_millis"))]
    pub increment: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential,
            max_retries: 3,
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            jitter: true,
            increment: Duration::ZERO,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff preset
    pub fn exponential(max_retries: u32, min_backoff: Duration, max_backoff: Duration) -> Self {
        Self { max_retries, min_backoff, max_backoff, ..Self::default() }
    }

    /// Fixed delay preset
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            max_retries,
            min_backoff: delay,
            max_backoff: delay,
            jitter: false,
            increment: Duration::ZERO,
        }
    }

    /// Preset that never retries
    pub fn none() -> Self {
        Self { kind: BackoffKind::None, max_retries: 0, jitter: false, ..Self::default() }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.kind == BackoffKind::None {
            return Ok(());
        }
        if self.min_backoff.is_zero() {
            return Err(ConfigError::invalid("min_backoff must be greater than 0"));
        }
        if self.kind != BackoffKind::Fixed && self.max_backoff < self.min_backoff {
            return Err(ConfigError::invalid(format!(
                "max_backoff ({:?}) cannot be less than min_backoff ({:?})",
                self.max_backoff, self.min_backoff
            )));
        }
        Ok(())
    }

    /// Build the configured policy
    pub fn build_policy(&self) -> ConfigResult<Arc<dyn RetryPolicy>> {
        self.validate()?;
        let policy: Arc<dyn RetryPolicy> = match self.kind {
            BackoffKind::Exponential => Arc::new(
                ExponentialBackoff::new(self.max_retries, self.min_backoff, self.max_backoff)?
                    .with_jitter(self.jitter),
            ),
            BackoffKind::Linear => {
                let linear = LinearBackoff::new(self.max_retries, self.min_backoff);
                if self.increment.is_zero() {
                    Arc::new(linear)
                } else {
                    Arc::new(linear.with_increment(self.increment, self.max_backoff)?)
                }
            }
            BackoffKind::Fixed => Arc::new(FixedBackoff::new(self.max_retries, self.min_backoff)),
            BackoffKind::None => Arc::new(NoRetry),
        };
        Ok(policy)
    }
}

/// Complete executor configuration
///
/// Defaults to exponential retries and no circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PipelineConfig {
    /// `None` runs every operation exactly once
    pub retry: Option<RetryConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub breaker_placement: BreakerPlacement,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: Some(RetryConfig::default()),
            circuit_breaker: None,
            breaker_placement: BreakerPlacement::AroundRetries,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        Ok(())
    }
}
