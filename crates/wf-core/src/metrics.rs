//! Aggregated metrics envelopes exchanged between the engine, the worker,
//! and the master.
//!
//! These are serialisable snapshots of the live HDR-histogram state kept by
//! `wf-metrics`; this crate only defines the wire shape.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Percentile/latency summary for one step (or for a whole task, under the
/// empty-string step key).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepMetrics {
    /// Number of completed (successful + failed) invocations.
    pub count: u64,
    /// Number of failed invocations.
    pub errors: u64,
    /// Minimum observed latency, in microseconds.
    pub min_us: u64,
    /// Maximum observed latency, in microseconds.
    pub max_us: u64,
    /// Arithmetic mean latency, in microseconds.
    pub mean_us: f64,
    /// 50th percentile latency, in microseconds.
    pub p50_us: u64,
    /// 90th percentile latency, in microseconds.
    pub p90_us: u64,
    /// 95th percentile latency, in microseconds.
    pub p95_us: u64,
    /// 99th percentile latency, in microseconds.
    pub p99_us: u64,
}

impl StepMetrics {
    /// Error rate in `[0.0, 1.0]`; `0.0` when `count` is zero.
    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.errors as f64 / self.count as f64
        }
    }
}

/// Full metrics snapshot for a task: totals plus a per-step breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Metrics {
    /// Total requests across all steps.
    pub total_requests: u64,
    /// Total errors across all steps.
    pub total_errors: u64,
    /// Aggregate latency summary across all steps.
    pub overall: StepMetrics,
    /// Per-step latency summaries, keyed by [`crate::workflow::Step::name`].
    pub steps: BTreeMap<String, StepMetrics>,
}

impl Metrics {
    /// An empty metrics snapshot (no requests observed yet).
    pub fn empty() -> Self {
        Self {
            total_requests: 0,
            total_errors: 0,
            overall: StepMetrics {
                count: 0,
                errors: 0,
                min_us: 0,
                max_us: 0,
                mean_us: 0.0,
                p50_us: 0,
                p90_us: 0,
                p95_us: 0,
                p99_us: 0,
            },
            steps: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_rate_zero_count_is_zero() {
        let m = StepMetrics {
            count: 0,
            errors: 0,
            min_us: 0,
            max_us: 0,
            mean_us: 0.0,
            p50_us: 0,
            p90_us: 0,
            p95_us: 0,
            p99_us: 0,
        };
        assert_eq!(m.error_rate(), 0.0);
    }

    #[test]
    fn error_rate_computes_fraction() {
        let m = StepMetrics {
            count: 200,
            errors: 10,
            ..StepMetrics {
                count: 0,
                errors: 0,
                min_us: 0,
                max_us: 0,
                mean_us: 0.0,
                p50_us: 0,
                p90_us: 0,
                p95_us: 0,
                p99_us: 0,
            }
        };
        assert!((m.error_rate() - 0.05).abs() < 1e-9);
    }

    #[test]
    fn empty_metrics_has_zero_totals() {
        let m = Metrics::empty();
        assert_eq!(m.total_requests, 0);
        assert_eq!(m.total_errors, 0);
        assert!(m.steps.is_empty());
    }
}
