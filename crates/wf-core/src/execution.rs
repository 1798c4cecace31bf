//! Execution options controlling how a [`crate::Workflow`] is driven.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A ramp stage: hold or move towards `target` VUs over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RampStage {
    /// Target active-VU count at the end of this stage.
    pub target: u32,
    /// Time to interpolate from the previous stage's target to this one.
    #[serde(with = "wf_duration::duration_millis")]
    pub duration: Duration,
}

/// Execution-mode-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ExecutionMode {
    /// Hold `vus` VUs running for `duration`.
    ConstantVus {
        /// Number of concurrent virtual users.
        vus: u32,
        /// Total wall-clock duration of the test.
        #[serde(with = "wf_duration::duration_millis")]
        duration: Duration,
    },
    /// Ramp through a sequence of stages.
    RampingVus {
        /// Active-VU count before the first stage begins.
        start_vus: u32,
        /// Ordered ramp stages.
        stages: Vec<RampStage>,
    },
    /// Run each of `vus` VUs for `iterations` iterations.
    PerVuIterations {
        /// Number of concurrent virtual users.
        vus: u32,
        /// Iterations each VU must complete.
        iterations: u32,
    },
    /// Run `iterations` total iterations shared across `vus` VUs.
    SharedIterations {
        /// Number of concurrent virtual users.
        vus: u32,
        /// Total iterations to complete across the whole pool.
        iterations: u32,
    },
}

impl ExecutionMode {
    /// Number of VUs the pool must be sized to for this mode.
    pub fn max_vus(&self) -> u32 {
        match self {
            Self::ConstantVus { vus, .. } => *vus,
            Self::RampingVus {
                start_vus, stages, ..
            } => stages
                .iter()
                .map(|s| s.target)
                .chain(std::iter::once(*start_vus))
                .max()
                .unwrap_or(*start_vus),
            Self::PerVuIterations { vus, .. } => *vus,
            Self::SharedIterations { vus, .. } => *vus,
        }
    }
}

/// A `[start, end] ⊂ [0, 1]` sub-range used to apportion VUs and iterations
/// for one worker's share of a fanned-out task.
///
/// A fan-out's segments must sum to `1.0` disjointly across its workers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionSegment {
    /// Inclusive start of this worker's share, in `[0, 1]`.
    pub start: f64,
    /// Exclusive-ish end of this worker's share, in `[0, 1]`.
    pub end: f64,
}

impl ExecutionSegment {
    /// The whole range — used when a task is not fanned out across workers.
    pub const FULL: Self = Self { start: 0.0, end: 1.0 };

    /// Build a segment, clamping both bounds into `[0, 1]`.
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start: start.clamp(0.0, 1.0),
            end: end.clamp(0.0, 1.0),
        }
    }

    /// Fraction of the total this segment covers.
    pub fn width(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Apply this segment's share to a `total` count, rounding up and
    /// never returning less than 1 for a non-empty segment of a non-zero
    /// total.
    pub fn apportion(&self, total: u32) -> u32 {
        if total == 0 || self.width() <= 0.0 {
            return 0;
        }
        ((total as f64) * self.width()).ceil().max(1.0) as u32
    }
}

impl Default for ExecutionSegment {
    fn default() -> Self {
        Self::FULL
    }
}

/// Controls how heavily request/response samples are retained alongside the
/// aggregated histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Retain no per-request samples, only aggregated metrics.
    #[default]
    None,
    /// Retain samples only for failed requests.
    Errors,
    /// Reservoir-sample a bounded number of requests across all outcomes.
    Smart,
}

/// Full set of options controlling one task's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionOptions {
    /// The execution-mode driver and its parameters.
    pub mode: ExecutionMode,
    /// Default per-step timeout when a step does not specify its own.
    #[serde(with = "wf_duration::duration_millis")]
    pub step_timeout: Duration,
    /// How aggressively to retain per-request samples.
    #[serde(default)]
    pub sampling_mode: SamplingMode,
}

impl ExecutionOptions {
    /// Construct options with the given mode and the documented default
    /// step timeout and sampling mode.
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            step_timeout: Duration::from_secs(30),
            sampling_mode: SamplingMode::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_vus_max_vus() {
        let mode = ExecutionMode::ConstantVus {
            vus: 10,
            duration: Duration::from_secs(60),
        };
        assert_eq!(mode.max_vus(), 10);
    }

    #[test]
    fn ramping_vus_max_vus_is_highest_stage_target() {
        let mode = ExecutionMode::RampingVus {
            start_vus: 5,
            stages: vec![
                RampStage {
                    target: 20,
                    duration: Duration::from_secs(30),
                },
                RampStage {
                    target: 0,
                    duration: Duration::from_secs(30),
                },
            ],
        };
        assert_eq!(mode.max_vus(), 20);
    }

    #[test]
    fn execution_options_defaults() {
        let opts = ExecutionOptions::new(ExecutionMode::PerVuIterations {
            vus: 4,
            iterations: 100,
        });
        assert_eq!(opts.step_timeout, Duration::from_secs(30));
        assert_eq!(opts.sampling_mode, SamplingMode::None);
    }

    #[test]
    fn sampling_mode_serde_tags() {
        assert_eq!(serde_json::to_string(&SamplingMode::Smart).unwrap(), r#""smart""#);
    }

    #[test]
    fn full_segment_apportions_the_whole_total() {
        assert_eq!(ExecutionSegment::FULL.apportion(37), 37);
    }

    #[test]
    fn half_segment_rounds_up_and_never_zero() {
        let seg = ExecutionSegment::new(0.0, 0.5);
        assert_eq!(seg.apportion(10), 5);
        assert_eq!(seg.apportion(1), 1);
    }

    #[test]
    fn empty_segment_apportions_nothing() {
        let seg = ExecutionSegment::new(0.5, 0.5);
        assert_eq!(seg.apportion(10), 0);
    }

    #[test]
    fn zero_total_apportions_to_zero_even_on_full_segment() {
        assert_eq!(ExecutionSegment::FULL.apportion(0), 0);
    }
}
