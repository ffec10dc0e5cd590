//! In-memory metrics aggregation hook
//!
//! [`MetricsHook`] keeps per-operation counters and a bounded latency history
//! in a concurrent map. Latency samples live in a [`RingBuffer`], so memory
//! per operation name is fixed regardless of traffic.

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use super::{ConnectionHook, ExecutionHook, ExecutionOutcome, PipelineHook, RetryHook};
use crate::collections::RingBuffer;
use crate::context::{ExecutionContext, Operation};

/// Latency samples retained per operation name
pub const DEFAULT_LATENCY_WINDOW: usize = 1024;

#[derive(Debug)]
struct OperationEntry {
    calls: u64,
    errors: u64,
    total_time: Duration,
    latencies: RingBuffer<Duration>,
}

impl OperationEntry {
    fn new(window: usize) -> Self {
        Self { calls: 0, errors: 0, total_time: Duration::ZERO, latencies: RingBuffer::new(window) }
    }
}

/// Aggregated statistics for one operation name
#[derive(Debug, Clone, PartialEq)]
pub struct OperationStats {
    /// Attempts observed, including failed ones
    pub calls: u64,
    pub errors: u64,
    pub total_time: Duration,
    /// Percentiles over the retained latency window
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
    pub max: Duration,
}

impl OperationStats {
    /// Fraction of attempts that failed
    pub fn error_rate(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.errors as f64 / self.calls as f64
        }
    }

    /// Mean latency across all attempts
    pub fn mean(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total_time / u32::try_from(self.calls).unwrap_or(u32::MAX)
        }
    }
}

/// Point-in-time copy of everything a [`MetricsHook`] has recorded
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub operations: Vec<(String, OperationStats)>,
    pub retries: u64,
    pub retry_successes: u64,
    pub retry_failures: u64,
    pub connects: u64,
    pub connect_errors: u64,
    pub disconnects: u64,
    pub pipelines: u64,
    pub pipeline_errors: u64,
}

impl MetricsSnapshot {
    /// Stats for `name`, if it was ever observed
    pub fn operation(&self, name: &str) -> Option<&OperationStats> {
        self.operations.iter().find(|(op, _)| op == name).map(|(_, stats)| stats)
    }
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[Duration], pct: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Collects execution, retry, connection and pipeline metrics in memory
#[derive(Debug)]
pub struct MetricsHook {
    window: usize,
    operations: DashMap<String, OperationEntry>,
    retries: AtomicU64,
    retry_successes: AtomicU64,
    retry_failures: AtomicU64,
    connects: AtomicU64,
    connect_errors: AtomicU64,
    disconnects: AtomicU64,
    pipelines: AtomicU64,
    pipeline_errors: AtomicU64,
}

impl MetricsHook {
    pub fn new() -> Self {
        Self::with_latency_window(DEFAULT_LATENCY_WINDOW)
    }

    /// Retain at most `window` latency samples per operation name
    pub fn with_latency_window(window: usize) -> Self {
        Self {
            window,
            operations: DashMap::new(),
            retries: AtomicU64::new(0),
            retry_successes: AtomicU64::new(0),
            retry_failures: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            connect_errors: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            pipelines: AtomicU64::new(0),
            pipeline_errors: AtomicU64::new(0),
        }
    }

    fn record(&self, name: &str, duration: Duration, failed: bool) {
        let mut entry = self
            .operations
            .entry(name.to_string())
            .or_insert_with(|| OperationEntry::new(self.window));
        entry.calls += 1;
        if failed {
            entry.errors += 1;
        }
        entry.total_time += duration;
        entry.latencies.push(duration);
    }

    /// Stats for a single operation name
    pub fn operation_stats(&self, name: &str) -> Option<OperationStats> {
        self.operations.get(name).map(|entry| Self::summarize(&entry))
    }

    fn summarize(entry: &OperationEntry) -> OperationStats {
        let mut samples = entry.latencies.to_vec();
        samples.sort_unstable();
        OperationStats {
            calls: entry.calls,
            errors: entry.errors,
            total_time: entry.total_time,
            p50: percentile(&samples, 50.0),
            p95: percentile(&samples, 95.0),
            p99: percentile(&samples, 99.0),
            max: samples.last().copied().unwrap_or_default(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut operations: Vec<_> = self
            .operations
            .iter()
            .map(|entry| (entry.key().clone(), Self::summarize(entry.value())))
            .collect();
        operations.sort_by(|a, b| a.0.cmp(&b.0));

        MetricsSnapshot {
            operations,
            retries: self.retries.load(Ordering::Relaxed),
            retry_successes: self.retry_successes.load(Ordering::Relaxed),
            retry_failures: self.retry_failures.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            connect_errors: self.connect_errors.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            pipelines: self.pipelines.load(Ordering::Relaxed),
            pipeline_errors: self.pipeline_errors.load(Ordering::Relaxed),
        }
    }

    /// Drop all recorded data
    pub fn reset(&self) {
        self.operations.clear();
        for counter in [
            &self.retries,
            &self.retry_successes,
            &self.retry_failures,
            &self.connects,
            &self.connect_errors,
            &self.disconnects,
            &self.pipelines,
            &self.pipeline_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for MetricsHook {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionHook for MetricsHook {
    fn after_execution(
        &self,
        _ctx: &ExecutionContext,
        op: &Operation,
        outcome: &ExecutionOutcome<'_>,
    ) {
        self.record(op.name(), outcome.duration, !outcome.is_success());
    }
}

impl ConnectionHook for MetricsHook {
    fn after_connect(
        &self,
        _ctx: &ExecutionContext,
        _endpoint: &str,
        error: Option<&(dyn Error + 'static)>,
    ) {
        self.connects.fetch_add(1, Ordering::Relaxed);
        if error.is_some() {
            self.connect_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn after_disconnect(
        &self,
        _ctx: &ExecutionContext,
        _endpoint: &str,
        _error: Option<&(dyn Error + 'static)>,
    ) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }
}

impl PipelineHook for MetricsHook {
    fn after_pipeline_execution(
        &self,
        _ctx: &ExecutionContext,
        _ops: &[Operation],
        error: Option<&(dyn Error + 'static)>,
        _duration: Duration,
    ) {
        self.pipelines.fetch_add(1, Ordering::Relaxed);
        if error.is_some() {
            self.pipeline_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl RetryHook for MetricsHook {
    fn before_retry(
        &self,
        ctx: ExecutionContext,
        _attempt: u32,
        _error: Option<&(dyn Error + 'static)>,
    ) -> ExecutionContext {
        self.retries.fetch_add(1, Ordering::Relaxed);
        ctx
    }

    fn after_retry(
        &self,
        _ctx: &ExecutionContext,
        _attempt: u32,
        success: bool,
        _error: Option<&(dyn Error + 'static)>,
    ) {
        let counter = if success { &self.retry_successes } else { &self.retry_failures };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let samples: Vec<_> = (1..=100).map(ms).collect();
        assert_eq!(percentile(&samples, 50.0), ms(50));
        assert_eq!(percentile(&samples, 95.0), ms(95));
        assert_eq!(percentile(&samples, 99.0), ms(99));
        assert_eq!(percentile(&[], 50.0), Duration::ZERO);
        assert_eq!(percentile(&[ms(7)], 99.0), ms(7));
    }

    #[test]
    fn test_execution_stats() {
        let hook = MetricsHook::new();
        let ctx = ExecutionContext::background();
        let op = Operation::new("GET");
        let err = io::Error::other("timeout");

        hook.after_execution(&ctx, &op, &ExecutionOutcome::success(&"v", ms(10)));
        hook.after_execution(&ctx, &op, &ExecutionOutcome::failure(&err, ms(30)));

        let stats = hook.operation_stats("GET").expect("recorded");
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.mean(), ms(20));
        assert_eq!(stats.max, ms(30));
        assert!((stats.error_rate() - 0.5).abs() < f64::EPSILON);
        assert!(hook.operation_stats("SET").is_none());
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let hook = MetricsHook::with_latency_window(4);
        let ctx = ExecutionContext::background();
        let op = Operation::new("GET");
        for n in 1..=10 {
            hook.after_execution(&ctx, &op, &ExecutionOutcome::success(&(), ms(n)));
        }

        let stats = hook.operation_stats("GET").expect("recorded");
        assert_eq!(stats.calls, 10);
        // Only 7..=10 remain in the window
        assert_eq!(stats.p50, ms(8));
        assert_eq!(stats.max, ms(10));
    }

    #[test]
    fn test_retry_and_connection_counters() {
        let hook = Arc::new(MetricsHook::new());
        let hooks = crate::hooks::CompositeHook::new();
        hooks.add_hook(hook.clone());

        let ctx = ExecutionContext::background();
        let err = io::Error::other("refused");
        let ctx = hooks.dispatch_before_retry(ctx, 1, Some(&err));
        hooks.dispatch_after_retry(&ctx, 1, false, Some(&err));
        let ctx = hooks.dispatch_before_retry(ctx, 2, Some(&err));
        hooks.dispatch_after_retry(&ctx, 2, true, None);
        hooks.dispatch_after_connect(&ctx, "localhost:6379", Some(&err));
        hooks.dispatch_after_disconnect(&ctx, "localhost:6379", None);
        hooks.dispatch_after_pipeline_execution(&ctx, &[], None, ms(1));

        let snapshot = hook.snapshot();
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.retry_successes, 1);
        assert_eq!(snapshot.retry_failures, 1);
        assert_eq!(snapshot.connects, 1);
        assert_eq!(snapshot.connect_errors, 1);
        assert_eq!(snapshot.disconnects, 1);
        assert_eq!(snapshot.pipelines, 1);

        hook.reset();
        assert_eq!(hook.snapshot(), MetricsSnapshot::default());
    }
}
