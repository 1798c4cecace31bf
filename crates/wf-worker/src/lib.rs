// SPDX-License-Identifier: MIT OR Apache-2.0
//! The worker node: the process that registers with a master, owns one
//! [`wf_engine::TaskEngine`] and one [`wf_engine::ExecutorRegistry`], and
//! services tasks and control commands for as long as it stays connected.
//!
//! [`worker::WorkerNode`] is the entry point. [`connection::MasterConnection`]
//! handles the JSONL handshake and framing, [`reconnect`] wraps dialing with
//! exponential backoff, [`lifecycle`] enforces the worker's state machine,
//! and [`health`] tracks connection health history for diagnostics.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod connection;
pub mod health;
pub mod lifecycle;
pub mod reconnect;
pub mod worker;

use thiserror::Error;

use wf_protocol::ProtocolError;

pub use connection::{MasterConnection, MasterReadHalf, MasterWriteHalf};
pub use lifecycle::{LifecycleError, LifecycleManager};
pub use reconnect::{connect_with_retry, ReconnectConfig};
pub use worker::{run_heartbeat_loop, run_service_loop, WorkerIdentity, WorkerNode, DEFAULT_HEARTBEAT_INTERVAL};

/// Errors from connecting to and communicating with the master.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Dialing the master's address failed.
    #[error("failed to dial master: {0}")]
    Dial(#[source] std::io::Error),

    /// Reading from the master connection failed.
    #[error("failed to read from master stream: {0}")]
    Read(#[source] std::io::Error),

    /// Writing to the master connection failed.
    #[error("failed to write to master stream: {0}")]
    Write(#[source] std::io::Error),

    /// A malformed or unexpected envelope was exchanged.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The master refused this worker's `Register` request.
    #[error("registration rejected: {0}")]
    RegistrationRejected(String),

    /// The master closed the connection.
    #[error("master stream ended unexpectedly")]
    StreamClosed,

    /// A reconnect attempt exceeded its overall timeout budget.
    #[error("connect attempt timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<WorkerError> for wf_error::WfError {
    fn from(err: WorkerError) -> Self {
        use wf_error::WfErrorCode;
        let code = match &err {
            WorkerError::Dial(_) | WorkerError::Timeout(_) => WfErrorCode::DialFailure,
            WorkerError::Read(_) | WorkerError::Write(_) | WorkerError::StreamClosed => WfErrorCode::StreamEof,
            WorkerError::Protocol(_) => WfErrorCode::ProtocolVersionMismatch,
            WorkerError::RegistrationRejected(_) => WfErrorCode::WorkerNotFound,
        };
        wf_error::WfError::new(code, err.to_string())
    }
}
