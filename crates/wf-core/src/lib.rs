//! Stable contract types for the workflow backplane.
//!
//! This crate defines the data model shared by the master scheduler, the
//! worker nodes, and the VU-pool execution engine: [`Workflow`] documents,
//! [`Task`] assignments, [`VirtualUser`] handles, result and metrics
//! envelopes, and worker/session registry state. Every wire-facing type
//! derives `serde` and `schemars::JsonSchema` so the control plane can
//! publish a schema for its HTTP surface.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod execution;
pub mod metrics;
pub mod result;
pub mod session;
pub mod task;
pub mod vu;
pub mod worker;
pub mod workflow;

pub use execution::{ExecutionMode, ExecutionOptions, ExecutionSegment, RampStage, SamplingMode};
pub use wf_error::{ErrorCategory, WfError, WfErrorCode};
pub use metrics::{Metrics, StepMetrics};
pub use result::{ExecutionError, StepLogEntry, StepLogSource, StepResult, StepStatus, TaskResult, TaskStatus};
pub use session::{Session, SessionStatus};
pub use task::Task;
pub use vu::{VirtualUser, VuState};
pub use worker::{SlaveInfo, SlaveStatus};
pub use workflow::{LoopMode, LoopSpec, OnError, Step, Workflow, WorkflowType};
