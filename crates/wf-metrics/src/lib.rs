//! Fixed-memory HDR-histogram latency aggregation and reservoir-sampled
//! request/response logs for the workflow backplane.
//!
//! [`MetricsAggregator`] lives inside the engine's VU pool and is merged
//! upward — worker into master — as tasks report progress. [`ReservoirSampler`]
//! independently retains a bounded set of raw request/response samples
//! according to the configured [`wf_core::SamplingMode`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod histogram;
mod sampler;

pub use histogram::MetricsAggregator;
pub use sampler::{RequestSample, ReservoirSampler};
