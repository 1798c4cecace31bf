//! Unified error taxonomy with stable error codes for the workflow backplane.
//!
//! Every error raised across the master/worker/engine boundary carries a
//! [`WfErrorCode`] (a machine-readable, stable string tag), a human-readable
//! message, an optional cause chain, and arbitrary key-value context. Use the
//! builder returned by [`WfError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad disposition family that a [`WfErrorCode`] belongs to.
///
/// These map directly onto how the caller should react: retry, fail the
/// request, fail the step, or tear down the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Request input was malformed or failed schema/semantic validation.
    Validation,
    /// The scheduler could not place or continue an execution.
    Scheduling,
    /// A transport-level failure between master, worker, and engine.
    Transport,
    /// A failure produced by running a step or task.
    Execution,
    /// Unrecoverable failure; the owning process should shut down.
    Fatal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Scheduling => "scheduling",
            Self::Transport => "transport",
            Self::Execution => "execution",
            Self::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// WfErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WfErrorCode {
    // -- Validation --
    /// Workflow document failed schema or semantic validation.
    InvalidWorkflow,
    /// Execution options failed validation (e.g. negative VU count).
    InvalidExecutionOptions,
    /// A step definition is malformed.
    InvalidStep,

    // -- Scheduling --
    /// No online worker was available to satisfy the strategy.
    NoOnlineWorker,
    /// The named worker is not known to the registry.
    WorkerNotFound,
    /// An operator manually took a worker offline.
    ManualSlaveOffline,
    /// The referenced session does not exist.
    SessionNotFound,
    /// The referenced session has expired and was garbage collected.
    SessionExpired,

    // -- Transport --
    /// Dialing the master or worker endpoint failed.
    DialFailure,
    /// The task/metric stream ended unexpectedly (EOF).
    StreamEof,
    /// Sending on a per-worker queue exceeded its timeout.
    SendTimeout,
    /// A worker failed its liveness health check.
    HealthCheckFailed,
    /// Master/worker contract version mismatch.
    ProtocolVersionMismatch,
    /// No heartbeat was received within the configured window.
    HeartbeatTimeout,

    // -- Execution --
    /// A step failed and `onError` policy requires surfacing it.
    StepFailure,
    /// The VU pool could not satisfy an acquire request.
    VuPoolExhausted,
    /// A step exceeded its configured timeout.
    StepTimeout,
    /// The task was cancelled before completion.
    TaskCancelled,

    // -- Fatal --
    /// A virtual user panicked during execution.
    EnginePanic,
    /// The engine encountered an unrecoverable internal error.
    EngineFatal,
    /// The metrics/result writer failed unrecoverably.
    WriterFatal,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl WfErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidWorkflow | Self::InvalidExecutionOptions | Self::InvalidStep => {
                ErrorCategory::Validation
            }

            Self::NoOnlineWorker
            | Self::WorkerNotFound
            | Self::ManualSlaveOffline
            | Self::SessionNotFound
            | Self::SessionExpired => ErrorCategory::Scheduling,

            Self::DialFailure
            | Self::StreamEof
            | Self::SendTimeout
            | Self::HealthCheckFailed
            | Self::ProtocolVersionMismatch
            | Self::HeartbeatTimeout => ErrorCategory::Transport,

            Self::StepFailure | Self::VuPoolExhausted | Self::StepTimeout | Self::TaskCancelled => {
                ErrorCategory::Execution
            }

            Self::EnginePanic | Self::EngineFatal | Self::WriterFatal | Self::Internal => {
                ErrorCategory::Fatal
            }
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"NO_ONLINE_WORKER"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidWorkflow => "INVALID_WORKFLOW",
            Self::InvalidExecutionOptions => "INVALID_EXECUTION_OPTIONS",
            Self::InvalidStep => "INVALID_STEP",
            Self::NoOnlineWorker => "NO_ONLINE_WORKER",
            Self::WorkerNotFound => "WORKER_NOT_FOUND",
            Self::ManualSlaveOffline => "MANUAL_SLAVE_OFFLINE",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::DialFailure => "DIAL_FAILURE",
            Self::StreamEof => "STREAM_EOF",
            Self::SendTimeout => "SEND_TIMEOUT",
            Self::HealthCheckFailed => "HEALTH_CHECK_FAILED",
            Self::ProtocolVersionMismatch => "PROTOCOL_VERSION_MISMATCH",
            Self::HeartbeatTimeout => "HEARTBEAT_TIMEOUT",
            Self::StepFailure => "STEP_FAILURE",
            Self::VuPoolExhausted => "VU_POOL_EXHAUSTED",
            Self::StepTimeout => "STEP_TIMEOUT",
            Self::TaskCancelled => "TASK_CANCELLED",
            Self::EnginePanic => "ENGINE_PANIC",
            Self::EngineFatal => "ENGINE_FATAL",
            Self::WriterFatal => "WRITER_FATAL",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for WfErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WfError
// ---------------------------------------------------------------------------

/// Unified workflow-backplane error.
///
/// Carries a stable [`WfErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use wf_error::{WfError, WfErrorCode};
///
/// let err = WfError::new(WfErrorCode::NoOnlineWorker, "no worker matched labels")
///     .with_context("labels", vec!["region:us-east"])
///     .with_context("candidates", 0);
/// ```
pub struct WfError {
    /// Machine-readable error code.
    pub code: WfErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl WfError {
    /// Create a new error with the given code and message.
    pub fn new(code: WfErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for WfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("WfError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for WfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for WfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`WfError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WfErrorDto {
    /// Error code.
    pub code: WfErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&WfError> for WfErrorDto {
    fn from(err: &WfError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<WfErrorDto> for WfError {
    fn from(dto: WfErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
