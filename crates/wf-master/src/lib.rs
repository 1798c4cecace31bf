// SPDX-License-Identifier: MIT OR Apache-2.0
//! The master: scheduler, session registry, worker registry, and interactive
//! step support.
//!
//! [`scheduler`] resolves a dispatch request to a [`scheduler::Target`].
//! [`worker_registry::SlaveRegistry`] is the master-resident directory of
//! workers. [`session::SessionRegistry`] tracks in-flight and
//! recently-completed executions. [`filter`] implements `filterSteps`.
//! [`interaction`] parks/resumes drivers waiting on an operator response.
//!
//! The wire side (framing, Register/Heartbeat/StreamTasks/StreamMetrics) is
//! [`wf_protocol`]; per-worker task/command delivery is
//! [`wf_queue::WorkerQueue`]. This crate owns the decisions, not the bytes.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatch;
pub mod filter;
pub mod interaction;
pub mod scheduler;
pub mod session;
pub mod worker_registry;

pub use dispatch::Dispatcher;
pub use filter::filter_steps;
pub use interaction::{InteractionBroker, InteractionResponse};
pub use scheduler::{schedule, select_least_loaded, DispatchMode, ExecutorStrategy, Target};
pub use session::{SessionRecord, SessionRegistry, DEFAULT_RETENTION_MS};
pub use worker_registry::{SlaveEvent, SlaveRegistry, SlaveWatch};
