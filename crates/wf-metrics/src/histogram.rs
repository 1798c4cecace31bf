//! Fixed-memory HDR-histogram latency aggregation.

use hdrhistogram::Histogram;
use std::collections::BTreeMap;
use std::sync::Mutex;
use wf_core::{Metrics, StepMetrics};

/// Lower bound of the histogram's tracked range: 1 microsecond.
const LOWEST_DISCERNIBLE_VALUE_US: u64 = 1;
/// Upper bound of the histogram's tracked range: 3600 seconds.
const HIGHEST_TRACKABLE_VALUE_US: u64 = 3_600_000_000;
/// Number of significant decimal digits of precision retained per bucket.
const SIGNIFICANT_DIGITS: u8 = 3;

fn new_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(
        LOWEST_DISCERNIBLE_VALUE_US,
        HIGHEST_TRACKABLE_VALUE_US,
        SIGNIFICANT_DIGITS,
    )
    .expect("histogram bounds are valid constants")
}

struct StepAggregator {
    histogram: Histogram<u64>,
    errors: u64,
}

impl StepAggregator {
    fn new() -> Self {
        Self {
            histogram: new_histogram(),
            errors: 0,
        }
    }

    fn record(&mut self, duration_us: u64, success: bool) {
        // Values outside the trackable range are clamped rather than
        // dropped, so a single pathological sample can't silently vanish
        // from the aggregate.
        let clamped = duration_us.clamp(LOWEST_DISCERNIBLE_VALUE_US, HIGHEST_TRACKABLE_VALUE_US);
        let _ = self.histogram.record(clamped);
        if !success {
            self.errors += 1;
        }
    }

    fn merge(&mut self, other: &StepAggregator) {
        self.histogram.add(&other.histogram).ok();
        self.errors += other.errors;
    }

    fn snapshot(&self) -> StepMetrics {
        StepMetrics {
            count: self.histogram.len(),
            errors: self.errors,
            min_us: self.histogram.min(),
            max_us: self.histogram.max(),
            mean_us: self.histogram.mean(),
            p50_us: self.histogram.value_at_quantile(0.50),
            p90_us: self.histogram.value_at_quantile(0.90),
            p95_us: self.histogram.value_at_quantile(0.95),
            p99_us: self.histogram.value_at_quantile(0.99),
        }
    }
}

/// Thread-safe latency aggregator backed by one HDR histogram per step plus
/// one for the task overall.
///
/// Each tracked histogram covers 1 microsecond to 3600 seconds at 3
/// significant decimal digits, which bounds its memory footprint to roughly
/// 20KB regardless of how many samples are recorded.
pub struct MetricsAggregator {
    inner: Mutex<Inner>,
}

struct Inner {
    overall: StepAggregator,
    steps: BTreeMap<String, StepAggregator>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    /// Create a new, empty aggregator.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                overall: StepAggregator::new(),
                steps: BTreeMap::new(),
            }),
        }
    }

    /// Record one step invocation's outcome.
    pub fn record(&self, step_name: &str, duration_us: u64, success: bool) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.overall.record(duration_us, success);
        inner
            .steps
            .entry(step_name.to_string())
            .or_insert_with(StepAggregator::new)
            .record(duration_us, success);
    }

    /// Merge another aggregator's state into this one (e.g. when combining
    /// per-worker aggregators at the master).
    pub fn merge(&self, other: &MetricsAggregator) {
        let other_inner = other.inner.lock().expect("metrics lock poisoned");
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.overall.merge(&other_inner.overall);
        for (name, agg) in other_inner.steps.iter() {
            inner
                .steps
                .entry(name.clone())
                .or_insert_with(StepAggregator::new)
                .merge(agg);
        }
    }

    /// Produce a point-in-time, serialisable snapshot.
    pub fn snapshot(&self) -> Metrics {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        Metrics {
            total_requests: inner.overall.histogram.len(),
            total_errors: inner.overall.errors,
            overall: inner.overall.snapshot(),
            steps: inner
                .steps
                .iter()
                .map(|(name, agg)| (name.clone(), agg.snapshot()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_reflected_in_snapshot() {
        let agg = MetricsAggregator::new();
        agg.record("login", 1_000, true);
        agg.record("login", 2_000, false);
        let snap = agg.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.total_errors, 1);
        let step = &snap.steps["login"];
        assert_eq!(step.count, 2);
        assert_eq!(step.errors, 1);
        assert!(step.min_us <= 1_000);
        assert!(step.max_us >= 2_000);
    }

    #[test]
    fn merge_combines_two_aggregators() {
        let a = MetricsAggregator::new();
        let b = MetricsAggregator::new();
        a.record("checkout", 500, true);
        b.record("checkout", 1_500, true);
        a.merge(&b);
        let snap = a.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert_eq!(snap.steps["checkout"].count, 2);
    }

    #[test]
    fn out_of_range_values_are_clamped_not_dropped() {
        let agg = MetricsAggregator::new();
        agg.record("huge", HIGHEST_TRACKABLE_VALUE_US * 10, true);
        let snap = agg.snapshot();
        assert_eq!(snap.total_requests, 1);
    }

    #[test]
    fn percentiles_are_monotonic() {
        let agg = MetricsAggregator::new();
        for v in 1..=1000u64 {
            agg.record("ramp", v * 10, true);
        }
        let snap = agg.snapshot();
        let s = &snap.overall;
        assert!(s.p50_us <= s.p90_us);
        assert!(s.p90_us <= s.p95_us);
        assert!(s.p95_us <= s.p99_us);
    }
}
