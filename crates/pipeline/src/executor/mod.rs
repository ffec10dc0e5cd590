//! Execution orchestrator
//!
//! [`Executor`] runs a caller-supplied async operation under the combined
//! protection of an optional [`RetryPolicy`], an optional [`CircuitBreaker`]
//! and a [`CompositeHook`]. For each call:
//!
//! 1. The breaker (if any) admits or rejects the call
//! 2. Each attempt dispatches `before_execution`, runs the operation, then
//!    dispatches `after_execution`
//! 3. A failed attempt is retried while the policy allows it, after a backoff
//!    that ends early if the context is cancelled or expires
//! 4. Attempts after the first are bracketed by `before_retry` and
//!    `after_retry`
//!
//! The executor never spawns; everything, including backoff, runs inside the
//! caller's future. It holds no per-call state, so one instance can serve
//! any number of concurrent callers.
//!
//! # Breaker placement
//!
//! With [`BreakerPlacement::AroundRetries`] (the default) the breaker sees a
//! single outcome per call: a call that fails twice and then succeeds is one
//! success. [`BreakerPlacement::PerAttempt`] records every attempt instead,
//! and a rejection by the breaker ends the call at once.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use crate::config::PipelineConfig;
use crate::context::{ExecutionContext, Operation};
use crate::error::{ConfigResult, ExecutionError};
use crate::hooks::{CompositeHook, ExecutionOutcome};
use crate::resilience::{CircuitBreaker, Clock, RetryPolicy, SystemClock};

/// Descriptor name used for batched executions
pub const PIPELINE_OPERATION: &str = "pipeline";

/// Where the circuit breaker sits relative to the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BreakerPlacement {
    /// The breaker wraps the whole retry sequence
    #[default]
    AroundRetries,
    /// The breaker wraps each individual attempt
    PerAttempt,
}

/// Runs operations with retry, circuit breaking and hooks
pub struct Executor<C: Clock = SystemClock> {
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    circuit_breaker: Option<Arc<CircuitBreaker<C>>>,
    hooks: Arc<CompositeHook>,
    placement: BreakerPlacement,
}

impl Executor<SystemClock> {
    pub fn builder() -> ExecutorBuilder<SystemClock> {
        ExecutorBuilder::new()
    }

    /// Build an executor from validated configuration
    pub fn from_config(config: &PipelineConfig, hooks: Arc<CompositeHook>) -> ConfigResult<Self> {
        config.validate()?;

        let retry_policy = config.retry.as_ref().map(|retry| retry.build_policy()).transpose()?;
        let circuit_breaker = config
            .circuit_breaker
            .clone()
            .map(CircuitBreaker::new)
            .transpose()?
            .map(Arc::new);

        Ok(Self { retry_policy, circuit_breaker, hooks, placement: config.breaker_placement })
    }
}

impl<C: Clock> Executor<C> {
    pub fn retry_policy(&self) -> Option<&Arc<dyn RetryPolicy>> {
        self.retry_policy.as_ref()
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker<C>>> {
        self.circuit_breaker.as_ref()
    }

    pub fn hooks(&self) -> &Arc<CompositeHook> {
        &self.hooks
    }

    pub fn placement(&self) -> BreakerPlacement {
        self.placement
    }

    /// Run `operation` under retry, breaker and hook protection
    ///
    /// `operation` is called once per attempt with the context produced by
    /// the before-hooks. On exhaustion the last operation error is returned
    /// unchanged inside [`ExecutionError::Operation`]; a context that ends
    /// during a backoff yields [`ExecutionError::Context`] instead.
    #[instrument(level = "debug", skip_all, fields(operation = %op.name()))]
    pub async fn execute<T, E, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        op: &Operation,
        operation: F,
    ) -> Result<T, ExecutionError<E>>
    where
        F: FnMut(ExecutionContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: fmt::Debug,
        E: Error + 'static,
    {
        match (&self.circuit_breaker, self.placement) {
            (Some(breaker), BreakerPlacement::AroundRetries) => {
                breaker.execute(move || self.retry_loop(ctx, op, operation, None)).await
            }
            (Some(breaker), BreakerPlacement::PerAttempt) => {
                self.retry_loop(ctx, op, operation, Some(breaker.as_ref())).await
            }
            (None, _) => self.retry_loop(ctx, op, operation, None).await,
        }
    }

    async fn retry_loop<T, E, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        op: &Operation,
        mut operation: F,
        per_attempt: Option<&CircuitBreaker<C>>,
    ) -> Result<T, ExecutionError<E>>
    where
        F: FnMut(ExecutionContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: fmt::Debug,
        E: Error + 'static,
    {
        let policy = self.retry_policy.as_deref();
        let max_attempts = policy.map_or(1, |p| p.max_attempts()).max(1);
        let mut ctx = ctx.clone();
        let mut attempt: u32 = 0;

        loop {
            ctx = self.hooks.dispatch_before_execution(ctx, op);

            let started = Instant::now();
            let result = match per_attempt {
                Some(breaker) => {
                    let operation = &mut operation;
                    let attempt_ctx = ctx.clone();
                    breaker
                        .execute(move || {
                            let fut = operation(attempt_ctx);
                            async move { fut.await.map_err(ExecutionError::Operation) }
                        })
                        .await
                }
                None => operation(ctx.clone()).await.map_err(ExecutionError::Operation),
            };
            let duration = started.elapsed();

            let err = match result {
                Ok(value) => {
                    let outcome = ExecutionOutcome::success(&value, duration);
                    self.hooks.dispatch_after_execution(&ctx, op, &outcome);
                    if attempt > 0 {
                        self.hooks.dispatch_after_retry(&ctx, attempt, true, None);
                        debug!(attempt = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            self.hooks.dispatch_after_execution(
                &ctx,
                op,
                &ExecutionOutcome::failure(err.as_dyn_error(), duration),
            );
            if attempt > 0 {
                self.hooks.dispatch_after_retry(&ctx, attempt, false, Some(err.as_dyn_error()));
            }

            let Some(policy) = policy else {
                return Err(err);
            };
            if err.is_circuit_open() {
                debug!(attempt = attempt, "Circuit breaker rejected attempt, not retrying");
                return Err(err);
            }

            attempt += 1;
            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "All retry attempts exhausted");
                return Err(err);
            }
            if !policy.should_retry(attempt, Some(err.as_dyn_error())) {
                debug!(attempt = attempt, error = %err, "Retry not permitted");
                return Err(err);
            }

            let delay = policy.next_delay(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis(),
                error = %err,
                "Backing off before retry"
            );
            if let Err(ctx_err) = ctx.sleep(delay).await {
                warn!(attempt = attempt, reason = %ctx_err, "Context finished during backoff");
                return Err(ctx_err.into());
            }

            ctx = self.hooks.dispatch_before_retry(ctx, attempt, Some(err.as_dyn_error()));
        }
    }

    /// Run a batch of operations as one protected execution
    ///
    /// Pipeline hooks bracket the call; inside, the batch is executed like a
    /// single operation named [`PIPELINE_OPERATION`] whose arguments are the
    /// batched operation names.
    #[instrument(level = "debug", skip_all, fields(commands = ops.len()))]
    pub async fn execute_pipeline<T, E, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        ops: &[Operation],
        operation: F,
    ) -> Result<T, ExecutionError<E>>
    where
        F: FnMut(ExecutionContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: fmt::Debug,
        E: Error + 'static,
    {
        let ctx = self.hooks.dispatch_before_pipeline_execution(ctx.clone(), ops);
        let descriptor =
            Operation::with_args(PIPELINE_OPERATION, ops.iter().map(|op| op.name().to_string()));

        let started = Instant::now();
        let result = self.execute(&ctx, &descriptor, operation).await;
        self.hooks.dispatch_after_pipeline_execution(
            &ctx,
            ops,
            result.as_ref().err().map(|err| err.as_dyn_error()),
            started.elapsed(),
        );
        result
    }

    /// Open a connection with connection hooks around it
    ///
    /// The call is neither retried nor guarded by the breaker.
    #[instrument(level = "debug", skip_all, fields(endpoint = endpoint))]
    pub async fn connect<T, E, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        endpoint: &str,
        connect: F,
    ) -> Result<T, E>
    where
        F: FnOnce(ExecutionContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        let ctx = self.hooks.dispatch_before_connect(ctx.clone(), endpoint);
        let result = connect(ctx.clone()).await;
        self.hooks.dispatch_after_connect(
            &ctx,
            endpoint,
            result.as_ref().err().map(|err| err as &(dyn Error + 'static)),
        );
        result
    }

    /// Close a connection with connection hooks around it
    #[instrument(level = "debug", skip_all, fields(endpoint = endpoint))]
    pub async fn disconnect<T, E, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        endpoint: &str,
        disconnect: F,
    ) -> Result<T, E>
    where
        F: FnOnce(ExecutionContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + 'static,
    {
        let ctx = self.hooks.dispatch_before_disconnect(ctx.clone(), endpoint);
        let result = disconnect(ctx.clone()).await;
        self.hooks.dispatch_after_disconnect(
            &ctx,
            endpoint,
            result.as_ref().err().map(|err| err as &(dyn Error + 'static)),
        );
        result
    }
}

impl<C: Clock> Clone for Executor<C> {
    fn clone(&self) -> Self {
        Self {
            retry_policy: self.retry_policy.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
            hooks: Arc::clone(&self.hooks),
            placement: self.placement,
        }
    }
}

impl<C: Clock> fmt::Debug for Executor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("retry_policy", &self.retry_policy)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("hooks", &self.hooks)
            .field("placement", &self.placement)
            .finish()
    }
}

/// Builder for [`Executor`]
///
/// Every collaborator is optional; an executor built with defaults runs each
/// operation once with an empty hook registry.
pub struct ExecutorBuilder<C: Clock = SystemClock> {
    retry_policy: Option<Arc<dyn RetryPolicy>>,
    circuit_breaker: Option<Arc<CircuitBreaker<C>>>,
    hooks: Arc<CompositeHook>,
    placement: BreakerPlacement,
}

impl ExecutorBuilder<SystemClock> {
    pub fn new() -> Self {
        Self {
            retry_policy: None,
            circuit_breaker: None,
            hooks: Arc::new(CompositeHook::new()),
            placement: BreakerPlacement::default(),
        }
    }
}

impl Default for ExecutorBuilder<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ExecutorBuilder<C> {
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Guard executions with `breaker`, which may use any clock
    pub fn circuit_breaker<D: Clock>(self, breaker: Arc<CircuitBreaker<D>>) -> ExecutorBuilder<D> {
        ExecutorBuilder {
            retry_policy: self.retry_policy,
            circuit_breaker: Some(breaker),
            hooks: self.hooks,
            placement: self.placement,
        }
    }

    pub fn hooks(mut self, hooks: Arc<CompositeHook>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn breaker_placement(mut self, placement: BreakerPlacement) -> Self {
        self.placement = placement;
        self
    }

    pub fn build(self) -> Executor<C> {
        Executor {
            retry_policy: self.retry_policy,
            circuit_breaker: self.circuit_breaker,
            hooks: self.hooks,
            placement: self.placement,
        }
    }
}
