//! Error types shared by the pipeline components
//!
//! The taxonomy mirrors how callers need to react to a failed execution:
//!
//! | Kind | Type | Produced by |
//! |------|------|-------------|
//! | **Operation** | `ExecutionError::Operation(E)` | The wrapped operation, passed through untouched |
//! | **Circuit open** | [`CircuitOpenError`] | The breaker, without invoking the operation |
//! | **Cancellation** | [`ContextError`] | The context, while waiting out a backoff |
//! | **Configuration** | [`ConfigError`] | Builders and `validate()` |
//!
//! Every type implements [`ErrorClassification`] so retry, alerting and
//! logging decisions can be made uniformly.
//!
//! # Preserving error identity
//!
//! The executor never re-wraps the operation's error. `ExecutionError` is a
//! transparent enum: its `Display` and `source()` are those of the inner
//! error, and [`ExecutionError::into_operation_error`] hands the original
//! value back to the caller.
//!
//! ```rust
//! use steadfast_pipeline::{CircuitOpenError, ExecutionError};
//!
//! let err: ExecutionError<std::io::Error> = CircuitOpenError.into();
//! assert!(err.is_circuit_open());
//! assert_eq!(err.to_string(), "circuit breaker is open");
//! ```

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type for executor calls
pub type ExecutionResult<T, E> = Result<T, ExecutionError<E>>;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Reason an [`ExecutionContext`](crate::ExecutionContext) finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ContextError {
    /// The context's cancellation token was triggered
    #[error("context canceled")]
    Cancelled,

    /// The context's deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Synthetic rejection produced by an open circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpenError;

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Invalid classifier pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl ConfigError {
    /// Create an `Invalid` error from any message
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Errors returned by [`Executor`](crate::Executor)
///
/// `E` is the operation's own error type. All variants are transparent so the
/// rendered message is always that of the underlying cause.
#[derive(Debug, Error)]
pub enum ExecutionError<E> {
    /// The operation failed; the value is exactly what the operation returned
    #[error(transparent)]
    Operation(E),

    /// The breaker rejected the call without running the operation
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The context was cancelled or expired during a backoff wait
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl<E> ExecutionError<E> {
    /// True if the breaker rejected the call
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen(_))
    }

    /// True if the context ended the execution
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// Borrow the operation error, if this is one
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }

    /// Recover the operation error, if this is one
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }

    /// Borrow the context error, if this is one
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Self::Context(err) => Some(*err),
            _ => None,
        }
    }

    /// Map the operation error, leaving the other variants untouched
    pub fn map_operation<F, O>(self, f: F) -> ExecutionError<O>
    where
        F: FnOnce(E) -> O,
    {
        match self {
            Self::Operation(err) => ExecutionError::Operation(f(err)),
            Self::CircuitOpen(err) => ExecutionError::CircuitOpen(err),
            Self::Context(err) => ExecutionError::Context(err),
        }
    }
}

impl<E> ExecutionError<E>
where
    E: std::error::Error + 'static,
{
    /// The innermost meaningful error as a trait object
    ///
    /// For `Operation` this is the operation error itself, so hooks can
    /// downcast it back to `E`.
    pub fn as_dyn_error(&self) -> &(dyn std::error::Error + 'static) {
        match self {
            Self::Operation(err) => err,
            Self::CircuitOpen(err) => err,
            Self::Context(err) => err,
        }
    }
}

/// Trait for classifying errors by their characteristics
///
/// Implemented by every error type in this crate so that retry, alerting and
/// logging layers can treat them uniformly.
pub trait ErrorClassification {
    /// Check if this error is retryable
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl ErrorClassification for ContextError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Info
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl ErrorClassification for CircuitOpenError {
    // The breaker will admit a trial once its timeout elapses
    fn is_retryable(&self) -> bool {
        true
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl ErrorClassification for ConfigError {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl<E> ErrorClassification for ExecutionError<E>
where
    E: std::error::Error + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            Self::Operation(err) => crate::resilience::ErrorClassifier::shared().is_retryable(err),
            Self::CircuitOpen(err) => err.is_retryable(),
            Self::Context(err) => err.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Operation(_) => ErrorSeverity::Error,
            Self::CircuitOpen(err) => err.severity(),
            Self::Context(err) => err.severity(),
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}
