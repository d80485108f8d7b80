//! Latency quantile sketch using HDR Histogram.
//!
//! Each [`PercentileTracker`] is a fixed-memory histogram covering 1µs to one
//! hour with 3 significant digits, so percentile queries stay accurate to
//! about 0.1% no matter how many samples a run records.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use hdrhistogram::Histogram;
use tracing::warn;

/// Lowest trackable latency in microseconds.
const MIN_LATENCY_US: u64 = 1;

/// Highest trackable latency in microseconds (one hour). Longer samples are
/// clamped.
const MAX_LATENCY_US: u64 = 3_600_000_000;

/// Percentile statistics for a set of latency measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileStats {
    /// Number of samples
    pub count: u64,

    /// Minimum value (microseconds)
    pub min: u64,

    /// Maximum value (microseconds)
    pub max: u64,

    /// Mean/average value (microseconds)
    pub mean: f64,

    /// 50th percentile - median (microseconds)
    pub p50: u64,

    /// 90th percentile (microseconds)
    pub p90: u64,

    /// 95th percentile (microseconds)
    pub p95: u64,

    /// 99th percentile (microseconds)
    pub p99: u64,
}

impl PercentileStats {
    /// Format statistics as a human-readable string.
    pub fn format(&self) -> String {
        format!(
            "count={}, min={:.2}ms, max={:.2}ms, mean={:.2}ms, p50={:.2}ms, p90={:.2}ms, p95={:.2}ms, p99={:.2}ms",
            self.count,
            self.min as f64 / 1000.0,
            self.max as f64 / 1000.0,
            self.mean / 1000.0,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
        )
    }
}

/// Thread-safe latency sketch.
///
/// Recording takes a short lock on the histogram only; counters that need to
/// be lock-free live next to it in [`crate::results::EndpointResults`].
pub struct PercentileTracker {
    histogram: Mutex<Histogram<u64>>,
}

impl PercentileTracker {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(MIN_LATENCY_US, MAX_LATENCY_US, 3)
            .expect("histogram bounds are valid");

        Self {
            histogram: Mutex::new(histogram),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Histogram<u64>> {
        self.histogram.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, latency: Duration) {
        let latency_us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.record_us(latency_us);
    }

    pub fn record_us(&self, latency_us: u64) {
        let clamped = latency_us.clamp(MIN_LATENCY_US, MAX_LATENCY_US);

        if let Err(e) = self.lock().record(clamped) {
            warn!(
                latency_us = latency_us,
                error = %e,
                "Failed to record latency in histogram"
            );
        }
    }

    pub fn len(&self) -> u64 {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Latency at quantile `q` (0.0 to 1.0) in milliseconds, or None if no
    /// samples have been recorded.
    pub fn value_at_quantile_ms(&self, q: f64) -> Option<f64> {
        let hist = self.lock();
        if hist.is_empty() {
            return None;
        }
        Some(hist.value_at_quantile(q.clamp(0.0, 1.0)) as f64 / 1000.0)
    }

    /// Returns None if no samples have been recorded.
    pub fn stats(&self) -> Option<PercentileStats> {
        let hist = self.lock();

        if hist.is_empty() {
            return None;
        }

        Some(PercentileStats {
            count: hist.len(),
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p90: hist.value_at_quantile(0.90),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
        })
    }

    pub fn reset(&self) {
        self.lock().clear();
    }
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self::new()
    }
}
