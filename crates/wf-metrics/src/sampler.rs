//! Reservoir-sampled request/response logs, retained alongside the
//! aggregated histogram according to [`SamplingMode`].

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;
use wf_core::{SamplingMode, StepStatus};

/// Detail fields longer than this are truncated before being stored, so a
/// single oversized response body can't blow the sampler's memory budget.
const MAX_DETAIL_BYTES: usize = 4096;

/// One retained request/response sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSample {
    /// Execution this sample was produced under.
    pub execution_id: Uuid,
    /// Step that produced this sample.
    pub step_name: String,
    /// This invocation's outcome.
    pub status: StepStatus,
    /// Whether the request failed (kept alongside `status` so
    /// error-mode filtering doesn't need a match arm).
    pub error: bool,
    /// Observed latency in microseconds.
    pub duration_us: u64,
    /// Milliseconds since the Unix epoch when the request completed.
    pub timestamp_ms: i64,
    /// Request method/target, if the step was an HTTP-shaped action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_summary: Option<String>,
    /// Response status line or code, if the step was an HTTP-shaped action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_summary: Option<String>,
    /// Free-form detail (e.g. response body or error message), truncated
    /// to [`MAX_DETAIL_BYTES`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl RequestSample {
    /// Truncate `detail` (and the summary fields) to [`MAX_DETAIL_BYTES`]
    /// bytes, splitting on a UTF-8 boundary rather than mid-codepoint.
    pub fn truncated(mut self) -> Self {
        self.detail = self.detail.map(|d| truncate_to(d, MAX_DETAIL_BYTES));
        self.request_summary = self.request_summary.map(|d| truncate_to(d, MAX_DETAIL_BYTES));
        self.response_summary = self.response_summary.map(|d| truncate_to(d, MAX_DETAIL_BYTES));
        self
    }
}

fn truncate_to(mut s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
    s
}

/// Cheap, dependency-free pseudo-random source.
///
/// Not cryptographically meaningful: it only needs to decide, uniformly
/// enough, whether an incoming sample displaces one already held in the
/// reservoir.
struct SplitMix64(u64);

impl SplitMix64 {
    fn seeded() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        Self(nanos ^ 0x9E3779B97F4A7C15)
    }

    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    /// Uniform integer in `[0, bound)`.
    fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            0
        } else {
            self.next_u64() % bound
        }
    }
}

/// Bounded sample log, populated according to a [`SamplingMode`].
pub struct ReservoirSampler {
    mode: SamplingMode,
    capacity: usize,
    state: Mutex<State>,
}

struct State {
    seen: u64,
    samples: VecDeque<RequestSample>,
    rng: SplitMix64,
}

impl ReservoirSampler {
    /// Create a sampler retaining at most `capacity` samples under the
    /// given mode.
    pub fn new(mode: SamplingMode, capacity: usize) -> Self {
        Self {
            mode,
            capacity,
            state: Mutex::new(State {
                seen: 0,
                samples: VecDeque::new(),
                rng: SplitMix64::seeded(),
            }),
        }
    }

    /// Offer a sample for retention; whether it is kept depends on the
    /// configured [`SamplingMode`]. The sample is truncated before storage
    /// regardless of mode.
    pub fn offer(&self, sample: RequestSample) {
        let sample = sample.truncated();
        match self.mode {
            SamplingMode::None => {}
            SamplingMode::Errors => {
                if sample.error {
                    self.insert_bounded(sample);
                }
            }
            SamplingMode::Smart => self.reservoir_insert(sample),
        }
    }

    /// Retain the most recent `capacity` samples, evicting the oldest on
    /// overflow so a long-running `errors` sampler keeps the last N
    /// failures rather than the first N.
    fn insert_bounded(&self, sample: RequestSample) {
        let mut state = self.state.lock().expect("sampler lock poisoned");
        if state.samples.len() >= self.capacity {
            state.samples.pop_front();
        }
        state.samples.push_back(sample);
    }

    /// Reservoir-sample successes, but never let a success evict an error:
    /// failures are always retained (FIFO-evicting the oldest failure once
    /// every slot holds one), and incoming successes are only weighed
    /// against the success slots currently in the reservoir.
    fn reservoir_insert(&self, sample: RequestSample) {
        let mut state = self.state.lock().expect("sampler lock poisoned");
        state.seen += 1;

        if sample.error {
            if state.samples.len() >= self.capacity {
                if let Some(idx) = state.samples.iter().position(|s| s.error) {
                    state.samples.remove(idx);
                } else {
                    state.samples.pop_front();
                }
            }
            state.samples.push_back(sample);
            return;
        }

        if state.samples.len() < self.capacity {
            state.samples.push_back(sample);
            return;
        }

        let seen = state.seen;
        if state.rng.below(seen) as usize >= self.capacity {
            return;
        }
        let success_slots: Vec<usize> = state.samples.iter().enumerate().filter(|(_, s)| !s.error).map(|(i, _)| i).collect();
        if success_slots.is_empty() {
            return;
        }
        let pick = state.rng.below(success_slots.len() as u64) as usize;
        let slot = success_slots[pick];
        state.samples[slot] = sample;
    }

    /// Snapshot of currently retained samples.
    pub fn samples(&self) -> Vec<RequestSample> {
        self.state.lock().expect("sampler lock poisoned").samples.iter().cloned().collect()
    }

    /// Number of samples offered so far (not the number retained).
    pub fn seen(&self) -> u64 {
        self.state.lock().expect("sampler lock poisoned").seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(step: &str, error: bool) -> RequestSample {
        RequestSample {
            execution_id: Uuid::nil(),
            step_name: step.into(),
            status: if error { StepStatus::Failed } else { StepStatus::Success },
            error,
            duration_us: 1_000,
            timestamp_ms: 0,
            request_summary: None,
            response_summary: None,
            detail: None,
        }
    }

    #[test]
    fn none_mode_retains_nothing() {
        let sampler = ReservoirSampler::new(SamplingMode::None, 10);
        sampler.offer(sample("a", true));
        sampler.offer(sample("a", false));
        assert!(sampler.samples().is_empty());
    }

    #[test]
    fn errors_mode_retains_only_errors_up_to_capacity() {
        let sampler = ReservoirSampler::new(SamplingMode::Errors, 1);
        sampler.offer(sample("a", false));
        sampler.offer(sample("a", true));
        sampler.offer(sample("a", true));
        assert_eq!(sampler.samples().len(), 1);
        assert!(sampler.samples()[0].error);
    }

    #[test]
    fn errors_mode_keeps_the_last_n_not_the_first_n() {
        let sampler = ReservoirSampler::new(SamplingMode::Errors, 2);
        sampler.offer(sample("first", true));
        sampler.offer(sample("second", true));
        sampler.offer(sample("third", true));
        let names: Vec<&str> = sampler.samples().iter().map(|s| s.step_name.as_str()).collect();
        assert_eq!(names, vec!["second", "third"], "the oldest error is evicted, not the newest");
    }

    #[test]
    fn smart_mode_never_exceeds_capacity() {
        let sampler = ReservoirSampler::new(SamplingMode::Smart, 5);
        for i in 0..500 {
            sampler.offer(sample(&format!("step-{i}"), i % 7 == 0));
        }
        assert_eq!(sampler.samples().len(), 5);
        assert_eq!(sampler.seen(), 500);
    }

    #[test]
    fn smart_mode_never_evicts_an_error_for_a_success() {
        let sampler = ReservoirSampler::new(SamplingMode::Smart, 3);
        sampler.offer(sample("e1", true));
        sampler.offer(sample("e2", true));
        sampler.offer(sample("e3", true));
        for i in 0..200 {
            sampler.offer(sample(&format!("ok-{i}"), false));
        }
        let errors = sampler.samples().iter().filter(|s| s.error).count();
        assert_eq!(errors, 3, "every retained error must survive any number of successful offers");
    }

    #[test]
    fn smart_mode_retains_errors_beyond_capacity_by_evicting_oldest_error() {
        let sampler = ReservoirSampler::new(SamplingMode::Smart, 2);
        sampler.offer(sample("e1", true));
        sampler.offer(sample("e2", true));
        sampler.offer(sample("e3", true));
        let names: Vec<&str> = sampler.samples().iter().map(|s| s.step_name.as_str()).collect();
        assert_eq!(names, vec!["e2", "e3"]);
    }

    #[test]
    fn detail_longer_than_max_is_truncated_on_a_char_boundary() {
        let sampler = ReservoirSampler::new(SamplingMode::Errors, 1);
        let mut s = sample("a", true);
        s.detail = Some("x".repeat(5000));
        sampler.offer(s);
        let stored = sampler.samples().into_iter().next().unwrap();
        assert_eq!(stored.detail.unwrap().len(), MAX_DETAIL_BYTES);
    }
}
