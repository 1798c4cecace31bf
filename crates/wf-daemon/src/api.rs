// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP control-plane API types: request/response envelopes and the
//! wire-level mirrors of the scheduler's non-serialisable decision types.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use wf_core::{TaskResult, TaskStatus, Workflow};
use wf_error::{ErrorCategory, WfError, WfErrorCode};
use wf_master::{DispatchMode, ExecutorStrategy};

// ---------------------------------------------------------------------------
// Wire mirrors of wf_master's scheduler types
// ---------------------------------------------------------------------------
//
// `wf_master::DispatchMode`/`ExecutorStrategy` intentionally carry no serde
// derives (they are internal decision types, not wire contracts); these
// mirrors are this crate's boundary translation.

/// Wire form of [`DispatchMode`]. The request's `mode` field speaks the
/// operator-facing `debug`/`normal` vocabulary; `normal` maps onto the
/// scheduler's `Execute` variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DispatchModeWire {
    /// Always runs against the embedded engine, bypassing scheduling.
    Debug,
    /// Normal dispatch: scheduled per `executor_strategy`.
    Normal,
}

impl From<DispatchModeWire> for DispatchMode {
    fn from(wire: DispatchModeWire) -> Self {
        match wire {
            DispatchModeWire::Debug => DispatchMode::Debug,
            DispatchModeWire::Normal => DispatchMode::Execute,
        }
    }
}

/// Wire form of [`ExecutorStrategy`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorStrategyWire {
    /// Target exactly this worker.
    Manual {
        /// Worker id to target.
        slave_id: String,
    },
    /// Match workers by label superset, least-loaded wins.
    Labels {
        /// Required label key/value pairs.
        labels: BTreeMap<String, String>,
    },
    /// Target the embedded engine.
    Local,
}

impl From<ExecutorStrategyWire> for ExecutorStrategy {
    fn from(wire: ExecutorStrategyWire) -> Self {
        match wire {
            ExecutorStrategyWire::Manual { slave_id } => ExecutorStrategy::Manual(slave_id),
            ExecutorStrategyWire::Labels { labels } => ExecutorStrategy::Labels(labels),
            ExecutorStrategyWire::Local => ExecutorStrategy::Local,
        }
    }
}

// ---------------------------------------------------------------------------
// Submit execution
// ---------------------------------------------------------------------------

/// Body of `POST /executions`.
#[derive(Clone, Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SubmitExecutionRequest {
    /// The workflow document to run. A single-step ad hoc check can be
    /// submitted as a one-step workflow; there is no separate "step" wire
    /// shape, since every execution is just a `Workflow` of one or more
    /// steps running under a chosen [`wf_core::ExecutionMode`].
    pub workflow: Workflow,
    /// Target environment identifier, used for session indexing and audit.
    pub env_id: String,
    /// Identifier of the user submitting this execution.
    pub user_id: String,
    /// Seed variables available to the first iteration of every VU.
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    /// Execution shape: VU/iteration model, step timeout, sampling mode.
    pub options: wf_core::ExecutionOptions,
    /// `debug` targets the embedded engine unconditionally; `normal` is
    /// scheduled per `executor_strategy`.
    pub mode: DispatchModeWire,
    /// Whether the caller intends to open the SSE event stream for this
    /// session (`GET /executions/{id}/events`).
    #[serde(default)]
    pub stream: bool,
    /// Whether the completed result should be retained past the in-memory
    /// session TTL (delegated to whatever persistence layer is configured;
    /// the in-process registry always retains it for the TTL regardless).
    #[serde(default)]
    pub persist: bool,
    /// Only run these step names, in their original workflow order; empty
    /// means run every step.
    #[serde(default)]
    pub selected_steps: Vec<String>,
    /// Required for `mode: normal` against a non-`Local` worker; rejected
    /// outright for `mode: debug` and for `workflow_type: normal` workflows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_strategy: Option<ExecutorStrategyWire>,
}

/// Response to `POST /executions`.
#[derive(Clone, Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SubmitExecutionResponse {
    /// The session id assigned to this execution. Distinct from the
    /// underlying task id; look the task up via the session registry.
    pub session_id: Uuid,
    /// Where the execution was scheduled.
    pub target: ExecutionTargetWire,
}

/// Wire form of [`wf_master::Target`], for reporting back to the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionTargetWire {
    /// Ran against the master's own embedded engine.
    Embedded,
    /// Dispatched to a remote worker.
    Worker {
        /// The worker's id.
        slave_id: String,
    },
}

// ---------------------------------------------------------------------------
// Stop execution
// ---------------------------------------------------------------------------

/// Body of `POST /executions/{id}/stop`.
#[derive(Clone, Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct StopExecutionRequest {
    /// Session to stop.
    pub session_id: Uuid,
}

/// Response to `POST /executions/{id}/stop`.
#[derive(Clone, Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct StopExecutionResponse {
    /// Echoes the stopped session id.
    pub session_id: Uuid,
    /// Whether a running worker task was actually signalled (`false` when
    /// the session had already reached a terminal status).
    pub signalled: bool,
}

// ---------------------------------------------------------------------------
// Submit interaction
// ---------------------------------------------------------------------------

/// Body of `POST /executions/{id}/interactions`.
#[derive(Clone, Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SubmitInteractionRequest {
    /// Session the interaction belongs to.
    pub session_id: Uuid,
    /// Correlates this response to the `Interaction` event that prompted it.
    pub correlation_id: Uuid,
    /// Operator-supplied value, opaque to the daemon.
    #[serde(default)]
    pub value: serde_json::Value,
    /// Whether the operator chose to skip rather than answer.
    #[serde(default)]
    pub skipped: bool,
}

/// Response to `POST /executions/{id}/interactions`.
#[derive(Clone, Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SubmitInteractionResponse {
    /// Echoes the session id the response was delivered to.
    pub session_id: Uuid,
}

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

/// Response to `GET /executions/{id}`.
#[derive(Clone, Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ExecutionStatusResponse {
    /// Session identifier.
    pub session_id: Uuid,
    /// Workflow/environment/user this session belongs to.
    pub workflow_id: String,
    /// Environment identifier.
    pub env_id: String,
    /// User identifier.
    pub user_id: String,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// The final result, once the session reaches a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<TaskResult>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Clone, Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct HealthResponse {
    /// Server status (e.g. `"ok"`).
    pub status: String,
    /// Wire contract version this master speaks.
    pub contract_version: String,
    /// Number of workers currently online.
    pub workers_online: usize,
    /// Total number of workers the registry knows about (any status).
    pub workers_total: usize,
    /// Number of sessions currently tracked in memory.
    pub sessions_tracked: usize,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structured API error returned on failure, built around the same error
/// taxonomy the rest of the core uses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable error code (e.g. `"NO_ONLINE_WORKER"`).
    pub code: WfErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create an error with no additional details.
    pub fn new(code: WfErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), details: None }
    }

    /// Attach additional details to this error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// 400 — request validation failed. `errors` is the accumulated list
    /// from a `RequestValidator` call.
    pub fn validation(errors: Vec<String>) -> Self {
        Self::new(WfErrorCode::InvalidWorkflow, "request validation failed").with_details(json!({ "errors": errors }))
    }

    /// The HTTP status this error's category maps onto.
    ///
    /// Per the error-handling design: validation failures are synchronous
    /// 400s; scheduling failures are either a 404 (the named target doesn't
    /// exist) or a 503 (no eligible target was available); transport
    /// failures are 502 (the daemon is healthy, the peer is not); execution
    /// failures that reach the HTTP layer (rather than being folded into a
    /// `TaskResult`) are 422; fatal errors are 500.
    pub fn status_code(&self) -> StatusCode {
        match self.code {
            WfErrorCode::WorkerNotFound | WfErrorCode::SessionNotFound => StatusCode::NOT_FOUND,
            WfErrorCode::SessionExpired => StatusCode::GONE,
            _ => match self.code.category() {
                ErrorCategory::Validation => StatusCode::BAD_REQUEST,
                ErrorCategory::Scheduling => StatusCode::SERVICE_UNAVAILABLE,
                ErrorCategory::Transport => StatusCode::BAD_GATEWAY,
                ErrorCategory::Execution => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorCategory::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<WfError> for ApiError {
    fn from(err: WfError) -> Self {
        let details = if err.context.is_empty() { None } else { serde_json::to_value(&err.context).ok() };
        Self { code: err.code, message: err.message, details }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_mode_wire_maps_debug_and_normal() {
        assert_eq!(DispatchMode::from(DispatchModeWire::Debug), DispatchMode::Debug);
        assert_eq!(DispatchMode::from(DispatchModeWire::Normal), DispatchMode::Execute);
    }

    #[test]
    fn dispatch_mode_wire_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&DispatchModeWire::Normal).unwrap(), "\"normal\"");
        assert_eq!(serde_json::to_string(&DispatchModeWire::Debug).unwrap(), "\"debug\"");
    }

    #[test]
    fn executor_strategy_wire_roundtrips_manual() {
        let wire = ExecutorStrategyWire::Manual { slave_id: "w1".into() };
        let json = serde_json::to_string(&wire).unwrap();
        let back: ExecutorStrategyWire = serde_json::from_str(&json).unwrap();
        assert_eq!(back, wire);
        match ExecutorStrategy::from(back) {
            ExecutorStrategy::Manual(id) => assert_eq!(id, "w1"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn executor_strategy_wire_converts_labels() {
        let mut labels = BTreeMap::new();
        labels.insert("region".to_string(), "us-east".to_string());
        let strategy: ExecutorStrategy = ExecutorStrategyWire::Labels { labels: labels.clone() }.into();
        assert_eq!(strategy, ExecutorStrategy::Labels(labels));
    }

    #[test]
    fn api_error_validation_details_carry_the_error_list() {
        let err = ApiError::validation(vec!["bad field".into()]);
        assert_eq!(err.code, WfErrorCode::InvalidWorkflow);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.details.unwrap()["errors"][0], "bad field");
    }

    #[test]
    fn api_error_status_codes_follow_category_with_overrides() {
        assert_eq!(ApiError::new(WfErrorCode::WorkerNotFound, "x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::new(WfErrorCode::SessionNotFound, "x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::new(WfErrorCode::SessionExpired, "x").status_code(), StatusCode::GONE);
        assert_eq!(ApiError::new(WfErrorCode::NoOnlineWorker, "x").status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(ApiError::new(WfErrorCode::DialFailure, "x").status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ApiError::new(WfErrorCode::StepTimeout, "x").status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::new(WfErrorCode::EnginePanic, "x").status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn api_error_from_wf_error_carries_context_as_details() {
        let wf_err = WfError::new(WfErrorCode::ManualSlaveOffline, "worker offline").with_context("slave_id", "w1");
        let api_err: ApiError = wf_err.into();
        assert_eq!(api_err.code, WfErrorCode::ManualSlaveOffline);
        assert_eq!(api_err.details.unwrap()["slave_id"], "w1");
    }

    #[test]
    fn submit_execution_request_roundtrips() {
        let req = SubmitExecutionRequest {
            workflow: Workflow::new("smoke", vec![wf_core::Step::new("step-1", "mock")]),
            env_id: "env-1".into(),
            user_id: "user-1".into(),
            variables: BTreeMap::new(),
            options: wf_core::ExecutionOptions::new(wf_core::ExecutionMode::ConstantVus {
                vus: 1,
                duration: std::time::Duration::from_secs(1),
            }),
            mode: DispatchModeWire::Debug,
            stream: false,
            persist: false,
            selected_steps: vec![],
            executor_strategy: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: SubmitExecutionRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.workflow.name, "smoke");
        assert_eq!(back.mode, DispatchModeWire::Debug);
    }
}
