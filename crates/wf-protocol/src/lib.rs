// SPDX-License-Identifier: MIT OR Apache-2.0
//! Newline-delimited JSON wire protocol between the master and its workers.
//!
//! A worker opens one connection to the master and multiplexes all four
//! logical exchanges — Register, Heartbeat, StreamTasks, StreamMetrics — over
//! it as a sequence of [`Envelope`] values, one per line. [`JsonlCodec`]
//! encodes and decodes that framing; [`stream::StreamParser`] handles the
//! incremental case where bytes arrive split across reads.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod builder;
pub mod codec;
pub mod compress;
pub mod router;
pub mod stream;
pub mod validate;
pub mod version;

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use wf_core::{SlaveStatus, StepResult, Task, TaskResult};
use wf_error::{WfError, WfErrorCode};

pub use version::{negotiate_version, ProtocolVersion, VersionError};

/// The protocol version this crate speaks, in `"wf/vMAJOR.MINOR"` form.
pub const CONTRACT_VERSION: &str = "wf/v1.0";

// ---------------------------------------------------------------------------
// Wire-only supporting types
// ---------------------------------------------------------------------------

/// Resource footprint a worker advertises at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ResourceInfo {
    /// Number of CPU cores available to the worker process.
    pub cpu_cores: u32,
    /// Memory budget in megabytes.
    pub memory_mb: u32,
    /// Maximum virtual users this worker can host concurrently.
    pub max_vus: u32,
    /// Currently active virtual users, as a fraction of `max_vus`.
    pub current_load: f64,
}

/// Identity and negotiated parameters the master returns on registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct MasterInfo {
    /// Stable identifier of the master process.
    pub master_id: String,
    /// Master's protocol version, e.g. `"wf/v1.0"`.
    pub version: String,
    /// Heartbeat cadence the worker should honor, in milliseconds.
    pub heartbeat_interval_ms: u64,
}

/// A command the master drains onto a worker's heartbeat reply, addressed at
/// a specific in-flight task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Abort the named task immediately.
    Stop {
        /// Task to stop.
        task_id: Uuid,
    },
    /// Pause the named task; VUs finish their current iteration and idle.
    Pause {
        /// Task to pause.
        task_id: Uuid,
    },
    /// Resume a previously paused task.
    Resume {
        /// Task to resume.
        task_id: Uuid,
    },
}

/// Progress report a worker sends back over the `StreamTasks` exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TaskUpdateKind {
    /// The worker accepted the task and is starting execution.
    Started,
    /// One step finished; carries its raw result.
    StepResult(StepResult),
    /// The task ran to completion.
    Completed(TaskResult),
    /// The task could not be completed.
    Failed {
        /// Human-readable failure description.
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Every message exchanged between a worker and the master, framed one per
/// line by [`JsonlCodec`].
///
/// # Examples
///
/// ```
/// use wf_protocol::{Envelope, JsonlCodec, ResourceInfo};
///
/// let register = Envelope::register(
///     "worker-1",
///     "vu-runner",
///     "10.0.0.1:9000",
///     ResourceInfo { cpu_cores: 4, memory_mb: 4096, max_vus: 100, current_load: 0.0 },
/// );
/// let line = JsonlCodec::encode(&register).unwrap();
/// assert!(line.contains("\"t\":\"register\""));
/// let decoded = JsonlCodec::decode(line.trim()).unwrap();
/// assert!(matches!(decoded, Envelope::Register { .. }));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum Envelope {
    /// Worker → master: request to join the registry.
    Register {
        /// Identifier the worker proposes for itself.
        slave_id: String,
        /// Worker kind/flavor string (free-form, used for routing).
        kind: String,
        /// Feature/step-action capabilities the worker supports.
        capabilities: Vec<String>,
        /// Scheduling labels advertised by the worker.
        labels: BTreeMap<String, String>,
        /// Dialable address for diagnostics.
        address: String,
        /// Declared resource footprint.
        resources: ResourceInfo,
        /// Protocol version the worker speaks.
        contract_version: String,
    },
    /// Master → worker: registration outcome.
    RegisterAck {
        /// Whether the worker was admitted to the registry.
        accepted: bool,
        /// The id the worker is now known by (normally echoes `slave_id`).
        assigned_id: String,
        /// Master identity and negotiated parameters.
        master: MasterInfo,
        /// Present when `accepted` is false.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Worker → master: periodic liveness/status report.
    Heartbeat {
        /// Worker sending the heartbeat.
        slave_id: String,
        /// Current status (Online/Busy/Draining).
        status: SlaveStatus,
    },
    /// Master → worker: heartbeat reply, draining the per-worker command
    /// queue without blocking the worker's loop.
    HeartbeatAck {
        /// Commands queued for this worker since the last heartbeat.
        commands: Vec<ControlCommand>,
        /// Master clock, milliseconds since the Unix epoch.
        ts_ms: i64,
    },
    /// Master → worker: a task dispatched from the per-worker task queue.
    TaskAssignment {
        /// The task to execute.
        task: Task,
    },
    /// Worker → master: task progress.
    TaskUpdate {
        /// Task this update concerns.
        task_id: Uuid,
        /// What changed.
        update: TaskUpdateKind,
    },
    /// Worker → master: a metrics snapshot for an in-flight task.
    MetricsReport {
        /// Task the snapshot belongs to.
        execution_id: Uuid,
        /// Aggregated metrics as of this report.
        snapshot: wf_core::Metrics,
    },
    /// Master → worker: acknowledgement of a metrics report.
    MetricsAck {
        /// Task the acknowledgement concerns.
        execution_id: Uuid,
        /// Master clock, milliseconds since the Unix epoch.
        ts_ms: i64,
    },
    /// Either direction: unrecoverable protocol-level failure.
    Fatal {
        /// Task or stream this failure is scoped to, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ref_id: Option<String>,
        /// Human-readable description.
        error: String,
        /// Stable machine-readable code, when available.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
}

impl Envelope {
    /// Build a `Register` envelope for the running [`CONTRACT_VERSION`].
    #[must_use]
    pub fn register(
        slave_id: impl Into<String>,
        kind: impl Into<String>,
        address: impl Into<String>,
        resources: ResourceInfo,
    ) -> Self {
        Envelope::Register {
            slave_id: slave_id.into(),
            kind: kind.into(),
            capabilities: Vec::new(),
            labels: BTreeMap::new(),
            address: address.into(),
            resources,
            contract_version: CONTRACT_VERSION.to_string(),
        }
    }

    /// Build a `Fatal` envelope carrying a [`WfErrorCode`].
    #[must_use]
    pub fn fatal_with_code(ref_id: Option<String>, error: impl Into<String>, code: WfErrorCode) -> Self {
        Envelope::Fatal {
            ref_id,
            error: error.into(),
            error_code: Some(code.as_str().to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while encoding, decoding, or negotiating the wire
/// protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line was not valid JSON, or did not match any [`Envelope`] shape.
    #[error("invalid envelope JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Underlying I/O failure while reading or writing the stream.
    #[error("protocol I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A structurally valid envelope violated a protocol invariant.
    #[error("protocol violation: {0}")]
    Violation(String),
    /// An envelope of the wrong variant arrived where another was expected.
    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        /// Envelope variant name that was expected.
        expected: String,
        /// Envelope variant name that actually arrived.
        got: String,
    },
    /// The peer's major protocol version differs from ours.
    #[error("incompatible protocol version: local {local}, remote {remote}")]
    VersionMismatch {
        /// This side's version.
        local: String,
        /// The peer's version.
        remote: String,
    },
}

impl From<ProtocolError> for WfError {
    fn from(err: ProtocolError) -> Self {
        let code = match &err {
            ProtocolError::VersionMismatch { .. } => WfErrorCode::ProtocolVersionMismatch,
            ProtocolError::Io(_) | ProtocolError::Json(_) | ProtocolError::Violation(_) => WfErrorCode::StreamEof,
            ProtocolError::UnexpectedMessage { .. } => WfErrorCode::StreamEof,
        };
        WfError::new(code, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// JsonlCodec
// ---------------------------------------------------------------------------

/// Stateless codec for encoding/decoding [`Envelope`] messages as
/// newline-delimited JSON.
#[derive(Debug, Clone, Copy)]
pub struct JsonlCodec;

impl JsonlCodec {
    /// Serialize an [`Envelope`] to a newline-terminated JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the envelope cannot be serialized.
    pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
        let mut line = serde_json::to_string(envelope)?;
        line.push('\n');
        Ok(line)
    }

    /// Deserialize a single JSON line into an [`Envelope`].
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if the line is not valid JSON or does
    /// not match any [`Envelope`] variant.
    pub fn decode(line: &str) -> Result<Envelope, ProtocolError> {
        Ok(serde_json::from_str(line.trim_end_matches('\n'))?)
    }

    /// Return a lazy iterator that reads JSONL lines from `reader`, skipping
    /// blank lines, and deserializing each into an [`Envelope`].
    pub fn decode_stream(reader: impl BufRead) -> impl Iterator<Item = Result<Envelope, ProtocolError>> {
        reader.lines().filter_map(|line_result| match line_result {
            Err(e) => Some(Err(ProtocolError::Io(e))),
            Ok(line) => {
                if line.trim().is_empty() {
                    None
                } else {
                    Some(Self::decode(line.trim()))
                }
            }
        })
    }

    /// Write a single [`Envelope`] as a newline-terminated JSON line.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on serialization or I/O failure.
    pub fn encode_to_writer(writer: &mut impl Write, envelope: &Envelope) -> Result<(), ProtocolError> {
        let line = Self::encode(envelope)?;
        writer.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Write multiple [`Envelope`]s as consecutive JSONL lines.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError`] on serialization or I/O failure.
    pub fn encode_many_to_writer(writer: &mut impl Write, envelopes: &[Envelope]) -> Result<(), ProtocolError> {
        for env in envelopes {
            Self::encode_to_writer(writer, env)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn resources() -> ResourceInfo {
        ResourceInfo {
            cpu_cores: 4,
            memory_mb: 4096,
            max_vus: 100,
            current_load: 0.0,
        }
    }

    #[test]
    fn register_roundtrips_through_jsonl() {
        let env = Envelope::register("worker-1", "vu-runner", "10.0.0.1:9000", resources());
        let line = JsonlCodec::encode(&env).unwrap();
        assert!(line.ends_with('\n'));
        let decoded = JsonlCodec::decode(&line).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn decode_stream_skips_blank_lines() {
        let env = Envelope::Heartbeat {
            slave_id: "w1".into(),
            status: SlaveStatus::Online,
        };
        let input = format!("{}\n{}", JsonlCodec::encode(&env).unwrap(), JsonlCodec::encode(&env).unwrap());
        let reader = BufReader::new(input.as_bytes());
        let results: Vec<_> = JsonlCodec::decode_stream(reader).collect();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(Result::is_ok));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(JsonlCodec::decode("not json").is_err());
    }

    #[test]
    fn fatal_with_code_carries_error_code() {
        let env = Envelope::fatal_with_code(None, "boom", WfErrorCode::ProtocolVersionMismatch);
        match env {
            Envelope::Fatal { error_code, .. } => {
                assert_eq!(error_code.as_deref(), Some("PROTOCOL_VERSION_MISMATCH"));
            }
            _ => panic!("expected Fatal"),
        }
    }

    #[test]
    fn protocol_error_converts_to_wf_error_category() {
        let err: WfError = ProtocolError::VersionMismatch {
            local: CONTRACT_VERSION.into(),
            remote: "wf/v2.0".into(),
        }
        .into();
        assert_eq!(err.code, WfErrorCode::ProtocolVersionMismatch);
    }
}
