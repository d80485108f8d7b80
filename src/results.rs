//! Running statistics for a load test.
//!
//! Results arrive from many workers at once. Counters are plain atomics and
//! each endpoint's latency sketch has its own narrow lock, so recording for
//! one endpoint never waits on another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::errors::ErrorCategory;
use crate::percentiles::{PercentileStats, PercentileTracker};
use crate::runner::ExecResult;
use crate::throughput::RateCounter;

/// Window of the whole-run throughput counter.
pub const RATE_WINDOW: Duration = Duration::from_secs(10);

/// Statistics for one result identifier.
pub struct EndpointResults {
    name: String,
    total: AtomicU64,
    failed: AtomicU64,
    total_duration_ms: AtomicU64,
    failures_by_category: [AtomicU64; ErrorCategory::COUNT],
    latencies: PercentileTracker,
}

impl EndpointResults {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            total: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            failures_by_category: Default::default(),
            latencies: PercentileTracker::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self, result: &ExecResult) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = &result.error {
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.failures_by_category[error.category.index()].fetch_add(1, Ordering::Relaxed);
        }

        let latency_ms = u64::try_from(result.latency.as_millis()).unwrap_or(u64::MAX);
        self.total_duration_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
        self.latencies.record(result.latency);
    }

    pub fn total_requests(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Mean latency in milliseconds. NaN when nothing was recorded.
    pub fn average_duration_ms(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            return f64::NAN;
        }
        self.total_duration_ms.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Latency at quantile `q` in milliseconds, or None when empty.
    pub fn percentile_ms(&self, q: f64) -> Option<f64> {
        self.latencies.value_at_quantile_ms(q)
    }

    pub fn latency_stats(&self) -> Option<PercentileStats> {
        self.latencies.stats()
    }

    /// Non-zero failure counts, in [`ErrorCategory::all`] order.
    pub fn failures_by_category(&self) -> Vec<(ErrorCategory, u64)> {
        ErrorCategory::all()
            .into_iter()
            .map(|category| {
                (
                    category,
                    self.failures_by_category[category.index()].load(Ordering::Relaxed),
                )
            })
            .filter(|&(_, count)| count > 0)
            .collect()
    }
}

/// Per-identifier statistics table.
pub struct LoadTestResults {
    entries: RwLock<HashMap<String, Arc<EndpointResults>>>,
}

impl LoadTestResults {
    /// Pre-creates an entry for every name.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                (name.clone(), Arc::new(EndpointResults::new(name)))
            })
            .collect();

        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Records one result under its identifier, creating the entry if this
    /// identifier hasn't been seen before.
    pub fn record(&self, result: &ExecResult) {
        self.entry(&result.identifier).record(result);
    }

    fn entry(&self, identifier: &str) -> Arc<EndpointResults> {
        if let Some(entry) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
        {
            return Arc::clone(entry);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(identifier.to_string()).or_insert_with(|| {
            debug!(identifier = identifier, "Tracking results for new identifier");
            Arc::new(EndpointResults::new(identifier))
        }))
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<EndpointResults>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
            .cloned()
    }

    /// Entries sorted by name.
    pub fn iter(&self) -> Vec<Arc<EndpointResults>> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.name().cmp(b.name()));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_requests(&self) -> u64 {
        self.iter().iter().map(|e| e.total_requests()).sum()
    }

    pub fn failed_requests(&self) -> u64 {
        self.iter().iter().map(|e| e.failed_requests()).sum()
    }
}

/// Whole-run counters used for live progress reporting.
pub struct ResultAggregator {
    rate: RateCounter,
    total: AtomicU64,
    failures: AtomicU64,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::with_window(RATE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            rate: RateCounter::new(window),
            total: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn record(&self, result: &ExecResult) {
        self.rate.incr(1);
        self.total.fetch_add(1, Ordering::Relaxed);
        if result.error.is_some() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Results completed within the sliding window.
    pub fn recent(&self) -> u64 {
        self.rate.count()
    }

    /// Completed results per second over the sliding window.
    pub fn actual_rate(&self) -> f64 {
        self.rate.rate_per_second()
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExecutionError;
    use tokio::time::Instant;

    fn result(identifier: &str, latency_ms: u64, error: Option<ExecutionError>) -> ExecResult {
        ExecResult {
            identifier: identifier.to_string(),
            timestamp: Instant::now(),
            latency: Duration::from_millis(latency_ms),
            error,
            additional_data: None,
        }
    }

    #[test]
    fn test_empty_entry_reads() {
        let results = LoadTestResults::new(["a"]);
        let entry = results.get("a").unwrap();

        assert_eq!(entry.total_requests(), 0);
        assert_eq!(entry.failed_requests(), 0);
        assert!(entry.average_duration_ms().is_nan());
        assert!(entry.percentile_ms(0.99).is_none());
        assert!(entry.failures_by_category().is_empty());
    }

    #[test]
    fn test_record_updates_entry() {
        let results = LoadTestResults::new(["a"]);
        results.record(&result("a", 10, None));
        results.record(&result("a", 30, Some(ExecutionError::timeout(Duration::from_millis(30)))));

        let entry = results.get("a").unwrap();
        assert_eq!(entry.total_requests(), 2);
        assert_eq!(entry.failed_requests(), 1);
        assert_eq!(entry.average_duration_ms(), 20.0);
        assert_eq!(
            entry.failures_by_category(),
            vec![(ErrorCategory::TimeoutError, 1)]
        );
        assert!(entry.percentile_ms(0.5).is_some());
    }

    #[test]
    fn test_unknown_identifier_gets_an_entry() {
        let results = LoadTestResults::new(["group"]);
        results.record(&result("member", 5, None));

        assert_eq!(results.len(), 2);
        assert_eq!(results.get("member").unwrap().total_requests(), 1);
        assert_eq!(results.get("group").unwrap().total_requests(), 0);
    }

    #[test]
    fn test_iter_is_sorted_by_name() {
        let results = LoadTestResults::new(["charlie", "alpha", "bravo"]);
        let names: Vec<String> = results.iter().iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["alpha", "bravo", "charlie"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_recording_is_exact() {
        let results = Arc::new(LoadTestResults::new(["a"]));
        let tasks = 64;

        let handles: Vec<_> = (0..tasks)
            .map(|_| {
                let results = Arc::clone(&results);
                tokio::spawn(async move {
                    results.record(&result("a", 1, None));
                    results.record(&result("a", 1, Some(ExecutionError::other("failed"))));
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let entry = results.get("a").unwrap();
        assert_eq!(entry.total_requests(), 2 * tasks);
        assert_eq!(entry.failed_requests(), tasks);
    }

    #[test]
    fn test_aggregator_counts() {
        let aggregator = ResultAggregator::new();
        aggregator.record(&result("a", 1, None));
        aggregator.record(&result("a", 1, Some(ExecutionError::other("failed"))));

        assert_eq!(aggregator.total(), 2);
        assert_eq!(aggregator.failures(), 1);
        assert_eq!(aggregator.recent(), 2);
        assert!((aggregator.actual_rate() - 0.2).abs() < 1e-9);
    }
}
