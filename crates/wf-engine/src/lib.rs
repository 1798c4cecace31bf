// SPDX-License-Identifier: MIT OR Apache-2.0
//! The VU pool and task engine: the component that actually drives a
//! worker's assigned [`wf_core::Task`] against its configured execution
//! mode, producing step results and HDR-histogram metrics.
//!
//! [`TaskEngine::execute`] is the single entry point workers call once a
//! task has been dispatched to them. Everything else in this crate exists
//! to support that call: [`vu_pool::VuPool`] manages virtual-user lifetime,
//! [`driver`] implements the per-step execution contract, and [`cancel`]
//! propagates stop signals down through both.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod driver;
pub mod engine;
pub mod vu_pool;

pub use cancel::{CancellableRun, CancellationReason, CancellationToken};
pub use driver::{
    run_iteration, run_step, EngineHooks, ExecutionContext, ExecutorRegistry, IterationOutcome, NoopHooks,
    StepExecutor,
};
pub use engine::TaskEngine;
pub use vu_pool::VuPool;
