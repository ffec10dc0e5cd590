//! Structured logging hook
//!
//! Turns hook events into `tracing` events. Attempts slower than the
//! configured threshold are logged at `warn` level.

use std::error::Error;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{ConnectionHook, ExecutionHook, ExecutionOutcome, PipelineHook, RetryHook};
use crate::context::{ExecutionContext, Operation};

/// Default threshold above which an attempt is reported as slow
pub const DEFAULT_SLOW_THRESHOLD: Duration = Duration::from_millis(100);

/// Logs every hook event through `tracing`
///
/// Register it in all categories with
/// [`CompositeHook::add_hook`](super::CompositeHook::add_hook).
#[derive(Debug, Clone)]
pub struct TracingHook {
    slow_threshold: Duration,
    log_args: bool,
}

impl TracingHook {
    pub fn new() -> Self {
        Self { slow_threshold: DEFAULT_SLOW_THRESHOLD, log_args: false }
    }

    /// Attempts taking at least `threshold` are logged as slow
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.slow_threshold = threshold;
        self
    }

    /// Include operation arguments in log events
    ///
    /// Off by default since arguments may carry user data.
    pub fn with_args(mut self, enabled: bool) -> Self {
        self.log_args = enabled;
        self
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    fn describe(&self, op: &Operation) -> String {
        if self.log_args {
            op.to_string()
        } else {
            op.name().to_string()
        }
    }
}

impl Default for TracingHook {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionHook for TracingHook {
    fn before_execution(&self, ctx: ExecutionContext, op: &Operation) -> ExecutionContext {
        debug!(operation = %self.describe(op), args = op.args().len(), "Executing operation");
        ctx
    }

    fn after_execution(
        &self,
        _ctx: &ExecutionContext,
        op: &Operation,
        outcome: &ExecutionOutcome<'_>,
    ) {
        let duration_ms = outcome.duration.as_millis();
        match outcome.error {
            Some(error) => warn!(
                operation = %self.describe(op),
                duration_ms = duration_ms,
                error = %error,
                "Operation failed"
            ),
            None if outcome.duration >= self.slow_threshold => warn!(
                operation = %self.describe(op),
                duration_ms = duration_ms,
                threshold_ms = self.slow_threshold.as_millis(),
                "Slow operation"
            ),
            None => debug!(
                operation = %self.describe(op),
                duration_ms = duration_ms,
                "Operation succeeded"
            ),
        }
    }
}

impl ConnectionHook for TracingHook {
    fn before_connect(&self, ctx: ExecutionContext, endpoint: &str) -> ExecutionContext {
        debug!(endpoint = endpoint, "Connecting");
        ctx
    }

    fn after_connect(
        &self,
        _ctx: &ExecutionContext,
        endpoint: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        match error {
            Some(error) => warn!(endpoint = endpoint, error = %error, "Connection failed"),
            None => info!(endpoint = endpoint, "Connected"),
        }
    }

    fn after_disconnect(
        &self,
        _ctx: &ExecutionContext,
        endpoint: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        match error {
            Some(error) => warn!(endpoint = endpoint, error = %error, "Disconnect failed"),
            None => info!(endpoint = endpoint, "Disconnected"),
        }
    }
}

impl PipelineHook for TracingHook {
    fn before_pipeline_execution(
        &self,
        ctx: ExecutionContext,
        ops: &[Operation],
    ) -> ExecutionContext {
        debug!(commands = ops.len(), "Executing pipeline");
        ctx
    }

    fn after_pipeline_execution(
        &self,
        _ctx: &ExecutionContext,
        ops: &[Operation],
        error: Option<&(dyn Error + 'static)>,
        duration: Duration,
    ) {
        match error {
            Some(error) => warn!(
                commands = ops.len(),
                duration_ms = duration.as_millis(),
                error = %error,
                "Pipeline failed"
            ),
            None => debug!(
                commands = ops.len(),
                duration_ms = duration.as_millis(),
                "Pipeline succeeded"
            ),
        }
    }
}

impl RetryHook for TracingHook {
    fn before_retry(
        &self,
        ctx: ExecutionContext,
        attempt: u32,
        error: Option<&(dyn Error + 'static)>,
    ) -> ExecutionContext {
        match error {
            Some(error) => info!(attempt = attempt, last_error = %error, "Retry attempt"),
            None => info!(attempt = attempt, "Retry attempt"),
        }
        ctx
    }

    fn after_retry(
        &self,
        _ctx: &ExecutionContext,
        attempt: u32,
        success: bool,
        error: Option<&(dyn Error + 'static)>,
    ) {
        match (success, error) {
            (true, _) => info!(attempt = attempt, "Retry succeeded"),
            (false, Some(error)) => {
                warn!(attempt = attempt, error = %error, "Retry attempt failed")
            }
            (false, None) => warn!(attempt = attempt, "Retry attempt failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use super::*;
    use crate::hooks::CompositeHook;

    #[test]
    fn test_builder_settings() {
        let hook = TracingHook::new().with_slow_threshold(Duration::from_millis(5)).with_args(true);
        assert_eq!(hook.slow_threshold(), Duration::from_millis(5));
        assert_eq!(hook.describe(&Operation::new("SET").with_arg("k").with_arg(1)), "SET k 1");
        assert_eq!(TracingHook::new().describe(&Operation::new("SET").with_arg("k")), "SET");
    }

    #[test]
    fn test_context_passes_through() {
        let hooks = CompositeHook::new();
        hooks.add_hook(Arc::new(TracingHook::new()));

        let ctx = ExecutionContext::background().with_value("request_id", 42u64);
        let out = hooks.dispatch_before_execution(ctx.clone(), &Operation::new("GET"));
        assert!(out.ptr_eq(&ctx));

        let err = io::Error::other("connection refused");
        hooks.dispatch_after_execution(
            &out,
            &Operation::new("GET"),
            &ExecutionOutcome::failure(&err, Duration::from_millis(3)),
        );
        hooks.dispatch_after_retry(&out, 1, false, Some(&err));
        assert_eq!(hooks.isolated_failures(), 0);
    }
}
