//! Circuit breaker
//!
//! A process-local state machine that stops calling a failing dependency
//! for a cooldown period.
//!
//! ```text
//!            failures >= threshold                 elapsed > timeout
//!   Closed ------------------------> Open ------------------------------> HalfOpen
//!     ^                               ^                                      |
//!     |                               +---------- any trial failure ---------+
//!     +---------------- requests >= max_requests successes -----------------+
//! ```
//!
//! All state sits behind one `RwLock`. Admission and result recording take
//! the write lock; the operation itself runs without holding it, so a slow
//! call never blocks [`state`](CircuitBreaker::state) readers.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{CircuitOpenError, ConfigError, ConfigResult};
use crate::resilience::clock::{Clock, SystemClock};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected
    Open,
    /// A limited number of trial calls test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Minimum time spent open before a trial is admitted
    #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration_millis"))]
    pub timeout: Duration,
    /// Successful trials needed to close the circuit from half-open
    pub max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, timeout: Duration::from_secs(60), max_requests: 1 }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout must be greater than 0"));
        }
        if self.max_requests == 0 {
            return Err(ConfigError::invalid("max_requests must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_requests(mut self, max_requests: u32) -> Self {
        self.config.max_requests = max_requests;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build a breaker reading time from `clock`
    pub fn build_with_clock<C: Clock>(self, clock: C) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(self.config, clock)
    }
}

/// Point-in-time view of a breaker for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Successful trials in the current half-open window
    pub requests: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_failure_at: Option<Instant>,
    pub state_changed_at: Instant,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    requests: u32,
    /// Trials admitted in the current half-open window
    trials: u32,
    /// Bumped on every transition so permits can tell their window apart
    generation: u64,
    last_failure_at: Option<Instant>,
    state_changed_at: Instant,
    total_calls: u64,
    rejected_calls: u64,
    successes: u64,
    failures: u64,
}

impl BreakerState {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            requests: 0,
            trials: 0,
            generation: 0,
            last_failure_at: None,
            state_changed_at: now,
            total_calls: 0,
            rejected_calls: 0,
            successes: 0,
            failures: 0,
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) {
        debug!(from = %self.state, to = %to, "Circuit breaker state transition");
        self.state = to;
        self.state_changed_at = now;
        self.requests = 0;
        self.trials = 0;
        self.generation = self.generation.wrapping_add(1);
        if to == CircuitState::Closed {
            self.failure_count = 0;
        }
    }
}

/// Process-local circuit breaker
///
/// Share it between callers with `Arc`; every method takes `&self`.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerState>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker reading time from `clock`
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self { config, inner: RwLock::new(BreakerState::new(now)), clock })
    }

    /// The configuration this breaker was built with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run an async operation under breaker protection
    ///
    /// Rejected calls return `CircuitOpenError` converted into `E` without
    /// invoking `operation`. Otherwise the operation's result is recorded and
    /// returned unchanged.
    #[instrument(level = "debug", skip_all, fields(state = %self.state()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpenError>,
    {
        let permit = self.acquire()?;
        let result = operation().await;
        permit.record(result.is_ok());
        result
    }

    /// Run a blocking operation under breaker protection
    ///
    /// Same contract as [`execute`](Self::execute).
    #[instrument(level = "debug", skip_all, fields(state = %self.state()))]
    pub fn call<F, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<CircuitOpenError>,
    {
        let permit = self.acquire()?;
        let result = operation();
        permit.record(result.is_ok());
        result
    }

    /// Decide whether a call may proceed
    fn acquire(&self) -> Result<Permit<'_, C>, CircuitOpenError> {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .map_or(true, |at| now.saturating_duration_since(at) > self.config.timeout);
                if !cooled_down {
                    inner.rejected_calls += 1;
                    debug!("Circuit breaker rejecting call - state: OPEN");
                    return Err(CircuitOpenError);
                }
                inner.transition(CircuitState::HalfOpen, now);
                inner.trials = 1;
                info!("Circuit breaker half-open, admitting trial call");
            }
            CircuitState::HalfOpen => {
                if inner.trials >= self.config.max_requests {
                    inner.rejected_calls += 1;
                    debug!("Circuit breaker rejecting call - half-open trials exhausted");
                    return Err(CircuitOpenError);
                }
                inner.trials += 1;
            }
        }

        inner.total_calls += 1;
        let trial_window = (inner.state == CircuitState::HalfOpen).then_some(inner.generation);
        Ok(Permit { breaker: self, trial_window, recorded: false })
    }

    fn on_success(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        inner.successes += 1;

        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.requests += 1;
                if inner.requests >= self.config.max_requests {
                    let successes = inner.requests;
                    inner.transition(CircuitState::Closed, now);
                    info!("Circuit breaker closed after {} successful trials", successes);
                }
            }
            CircuitState::Open => {
                debug!("Ignoring success recorded while circuit is open");
            }
        }
    }

    fn on_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        inner.failures += 1;

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    let failures = inner.failure_count;
                    inner.transition(CircuitState::Open, now);
                    inner.last_failure_at = Some(now);
                    warn!("Circuit breaker opened after {} failures", failures);
                }
            }
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Open, now);
                inner.last_failure_at = Some(now);
                warn!("Circuit breaker reopened due to failure in half-open state");
            }
            CircuitState::Open => {
                debug!("Ignoring failure recorded while circuit is open");
            }
        }
    }

    /// Give back a half-open trial slot whose outcome was never recorded
    ///
    /// Slots belong to the window that admitted them; a release arriving after
    /// the breaker has moved on is ignored.
    fn release_trial(&self, generation: u64) {
        let mut inner = self.inner.write();
        if inner.state == CircuitState::HalfOpen
            && inner.generation == generation
            && inner.trials > 0
        {
            inner.trials -= 1;
        }
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    /// Consecutive failures counted while closed
    pub fn failure_count(&self) -> u32 {
        self.inner.read().failure_count
    }

    /// Snapshot of state and counters
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.read();
        CircuitBreakerMetrics {
            state: inner.state,
            failure_count: inner.failure_count,
            requests: inner.requests,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            successes: inner.successes,
            failures: inner.failures,
            last_failure_at: inner.last_failure_at,
            state_changed_at: inner.state_changed_at,
        }
    }

    /// Force the breaker closed with all counters zeroed
    pub fn reset(&self) {
        let now = self.clock.now();
        *self.inner.write() = BreakerState::new(now);
        info!("Circuit breaker manually reset to closed state");
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        let config = CircuitBreakerConfig::default();
        Self { inner: RwLock::new(BreakerState::new(Instant::now())), config, clock: SystemClock }
    }
}

/// Admission granted by [`CircuitBreaker::acquire`]
struct Permit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    /// Generation of the half-open window this permit is a trial in
    trial_window: Option<u64>,
    recorded: bool,
}

impl<C: Clock> Permit<'_, C> {
    fn record(mut self, success: bool) {
        self.recorded = true;
        if success {
            self.breaker.on_success();
        } else {
            self.breaker.on_failure();
        }
    }
}

impl<C: Clock> Drop for Permit<'_, C> {
    fn drop(&mut self) {
        // Panicked or dropped before completing
        if let (false, Some(generation)) = (self.recorded, self.trial_window) {
            self.breaker.release_trial(generation);
        }
    }
}
