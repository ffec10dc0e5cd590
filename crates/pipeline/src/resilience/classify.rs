//! Non-retryable error classification
//!
//! Retrying cannot fix a cancelled caller, bad credentials, a missing
//! permission or a malformed command. [`ErrorClassifier`] recognises those
//! classes by walking an error's `source()` chain: [`ContextError`] values are
//! matched by type, everything else by its rendered message against a
//! case-insensitive [`RegexSet`].

use std::fmt;

use once_cell::sync::Lazy;
use regex::RegexSet;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult, ContextError};

/// Error classes that must never be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NonRetryableClass {
    /// The caller cancelled the context
    Cancelled,
    /// The caller's deadline expired
    DeadlineExceeded,
    /// Credentials missing or rejected
    Authentication,
    /// Authenticated but not allowed
    PermissionDenied,
    /// Unknown or malformed command
    InvalidCommand,
}

impl fmt::Display for NonRetryableClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Authentication => "authentication",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidCommand => "invalid_command",
        };
        f.write_str(name)
    }
}

const DEFAULT_PATTERNS: &[(NonRetryableClass, &str)] = &[
    (NonRetryableClass::Cancelled, r"(?i)\bcontext cancel+ed\b"),
    (NonRetryableClass::DeadlineExceeded, r"(?i)\bdeadline exceeded\b"),
    (
        NonRetryableClass::Authentication,
        r"(?i)\bNOAUTH\b|\bWRONGPASS\b|authentication (failed|required)|invalid password",
    ),
    (NonRetryableClass::PermissionDenied, r"(?i)\bNOPERM\b|permission denied"),
    (
        NonRetryableClass::InvalidCommand,
        r"(?i)unknown command|syntax error|wrong number of arguments",
    ),
];

static SHARED: Lazy<ErrorClassifier> = Lazy::new(ErrorClassifier::new);

/// Matches errors against the non-retryable classes
///
/// Cheap to clone; the compiled pattern set is shared.
#[derive(Clone)]
pub struct ErrorClassifier {
    patterns: Vec<(NonRetryableClass, String)>,
    set: RegexSet,
}

impl ErrorClassifier {
    /// Classifier with the default pattern set
    pub fn new() -> Self {
        let patterns: Vec<_> =
            DEFAULT_PATTERNS
                .iter()
                .map(|(class, pattern)| (*class, (*pattern).to_string()))
                .collect();
        // The defaults are static and known to compile
        let set = RegexSet::new(patterns.iter().map(|(_, p)| p.as_str()))
            .unwrap_or_else(|_| RegexSet::empty());
        Self { patterns, set }
    }

    /// Process-wide default classifier
    pub fn shared() -> &'static Self {
        &SHARED
    }

    /// Extend the classifier with another pattern for `class`
    ///
    /// Patterns are case-sensitive unless they opt in with `(?i)`.
    pub fn with_pattern(
        mut self,
        class: NonRetryableClass,
        pattern: impl Into<String>,
    ) -> ConfigResult<Self> {
        let pattern = pattern.into();
        self.patterns.push((class, pattern.clone()));
        self.set = RegexSet::new(self.patterns.iter().map(|(_, p)| p.as_str())).map_err(|e| {
            ConfigError::InvalidPattern { pattern, message: e.to_string() }
        })?;
        Ok(self)
    }

    /// Non-retryable class of `error`, if any link in its chain matches
    pub fn classify(&self, error: &(dyn std::error::Error + 'static)) -> Option<NonRetryableClass> {
        let mut current = Some(error);
        while let Some(err) = current {
            if let Some(ctx_err) = err.downcast_ref::<ContextError>() {
                return Some(match ctx_err {
                    ContextError::Cancelled => NonRetryableClass::Cancelled,
                    ContextError::DeadlineExceeded => NonRetryableClass::DeadlineExceeded,
                });
            }

            let message = err.to_string();
            if let Some(idx) = self.set.matches(&message).iter().next() {
                let class = self.patterns[idx].0;
                debug!(class = %class, error = %message, "Classified error as non-retryable");
                return Some(class);
            }

            current = err.source();
        }
        None
    }

    /// `true` unless `error` falls into a non-retryable class
    pub fn is_retryable(&self, error: &(dyn std::error::Error + 'static)) -> bool {
        self.classify(error).is_none()
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorClassifier").field("patterns", &self.patterns.len()).finish()
    }
}
