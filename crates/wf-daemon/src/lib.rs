// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The daemon's HTTP control plane: submit/stop/status/interaction
//! endpoints and the SSE event bridge between the embedded engine (or a
//! remote worker's reported updates) and a session's subscribers.

pub mod api;
pub mod middleware;
pub mod validation;
pub mod versioning;
pub mod wire;

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::extract::{Path as AxPath, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use wf_core::{Task, TaskResult, TaskStatus};
use wf_engine::cancel::CancellationToken;
use wf_engine::driver::{EngineHooks, ExecutionContext, ExecutorRegistry};
use wf_engine::engine::TaskEngine;
use wf_error::WfErrorCode;
use wf_master::{schedule, Dispatcher, InteractionBroker, InteractionResponse, SessionRegistry, Target, DEFAULT_RETENTION_MS};
use wf_protocol::{ControlCommand, CONTRACT_VERSION};
use wf_stream::StreamEvent;

use api::{
    ApiError, ExecutionStatusResponse, ExecutionTargetWire, HealthResponse, SubmitExecutionRequest,
    SubmitExecutionResponse, SubmitInteractionRequest, SubmitInteractionResponse, StopExecutionRequest,
    StopExecutionResponse,
};
use validation::RequestValidator;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Per-execution bookkeeping
// ---------------------------------------------------------------------------

/// What the daemon is tracking for one in-flight task, independent of
/// whatever a session's own status says.
struct ActiveExecution {
    target: ExecutionTargetWire,
    cancellation: Option<CancellationToken>,
}

/// The sending half of a task's event channel, plus the receiving half until
/// a subscriber claims it. A task that finishes before anyone subscribes
/// still has its events held here for the subscriber that arrives later —
/// subject to the channel's bounded capacity, same as every other consumer
/// of [`wf_stream::SessionEventStream`].
struct StreamSlot {
    tx: mpsc::Sender<StreamEvent>,
    rx: Option<mpsc::Receiver<StreamEvent>>,
}

const STREAM_CHANNEL_CAPACITY: usize = 256;

/// Shared daemon state, threaded through every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    /// Effective runtime configuration this daemon was started with.
    pub config: Arc<wf_config::RuntimeConfig>,
    /// Worker directory and per-worker task/command queues.
    pub dispatcher: Arc<Dispatcher>,
    /// In-flight and recently-completed sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Outstanding interactive-step prompts.
    pub interactions: Arc<InteractionBroker>,
    /// Step executors available to the embedded engine.
    pub executors: Arc<ExecutorRegistry>,
    active: Arc<Mutex<HashMap<Uuid, ActiveExecution>>>,
    streams: Arc<Mutex<HashMap<Uuid, StreamSlot>>>,
    /// Reverse index from task id to session id, for the wire listener
    /// (worker `TaskUpdate`/`MetricsReport` envelopes only carry `task_id`).
    task_sessions: Arc<Mutex<HashMap<Uuid, Uuid>>>,
}

impl AppState {
    /// Build a fresh, empty application state around the given config and
    /// worker dispatcher.
    pub fn new(config: Arc<wf_config::RuntimeConfig>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            sessions: Arc::new(SessionRegistry::new()),
            interactions: Arc::new(InteractionBroker::new()),
            executors: Arc::new(ExecutorRegistry::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
            streams: Arc::new(Mutex::new(HashMap::new())),
            task_sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Look up the session id a given task belongs to, for the wire
    /// listener to translate worker-reported `task_id`s back to a session.
    pub fn session_for_task(&self, task_id: Uuid) -> Option<Uuid> {
        self.task_sessions.lock().expect("task-session map lock poisoned").get(&task_id).copied()
    }

    pub(crate) fn stream_slot(&self, task_id: Uuid) -> mpsc::Sender<StreamEvent> {
        let mut streams = self.streams.lock().expect("stream map lock poisoned");
        streams
            .entry(task_id)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
                StreamSlot { tx, rx: Some(rx) }
            })
            .tx
            .clone()
    }

    fn take_stream(&self, task_id: Uuid) -> Option<mpsc::Receiver<StreamEvent>> {
        self.streams.lock().expect("stream map lock poisoned").get_mut(&task_id).and_then(|slot| slot.rx.take())
    }
}

/// Bridges [`EngineHooks`] callbacks onto a session's [`StreamEvent`]
/// channel, for the embedded execution path.
struct StreamHooks {
    tx: mpsc::Sender<StreamEvent>,
}

#[async_trait]
impl EngineHooks for StreamHooks {
    async fn on_step_start(&self, _ctx: &ExecutionContext, step: &wf_core::Step) {
        let _ = self.tx.send(StreamEvent::StepStart { step_name: step.name.clone(), timestamp_ms: now_ms() }).await;
    }

    async fn on_step_complete(&self, _ctx: &ExecutionContext, result: &wf_core::StepResult) {
        let _ = self.tx.send(StreamEvent::StepComplete { result: result.clone() }).await;
    }

    async fn on_step_failed(&self, _ctx: &ExecutionContext, result: &wf_core::StepResult) {
        let _ = self.tx.send(StreamEvent::StepFailed { result: result.clone() }).await;
    }

    async fn on_progress(&self, _ctx: &ExecutionContext, completed_iterations: u64) {
        let _ = self
            .tx
            .send(StreamEvent::StepProgress { step_name: "iteration".into(), detail: serde_json::json!({ "completed": completed_iterations }) })
            .await;
    }
}

/// Build the Axum router with all daemon routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(cmd_health))
        .route("/executions", post(cmd_submit_execution))
        .route("/executions/{id}", get(cmd_execution_status))
        .route("/executions/{id}/stop", post(cmd_stop_execution))
        .route("/executions/{id}/interactions", post(cmd_submit_interaction))
        .route("/executions/{id}/events", get(cmd_execution_events))
        .with_state(state)
}

async fn cmd_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.dispatcher.registry();
    Json(HealthResponse {
        status: "ok".into(),
        contract_version: CONTRACT_VERSION.to_string(),
        workers_online: registry.online().len(),
        workers_total: registry.list().len(),
        sessions_tracked: state.sessions.len(),
    })
}

async fn cmd_submit_execution(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitExecutionRequest>,
) -> Result<Json<SubmitExecutionResponse>, ApiError> {
    if let Err(errors) = RequestValidator::validate_submit(&req) {
        return Err(ApiError::validation(errors));
    }

    let workflow_type = req.workflow.workflow_type;
    let strategy = req.executor_strategy.clone().map(Into::into);
    let target = schedule(req.mode.into(), workflow_type, strategy.as_ref(), state.dispatcher.registry(), now_ms())?;

    let mut workflow = req.workflow.clone();
    if !req.selected_steps.is_empty() {
        let selected: std::collections::HashSet<String> = req.selected_steps.iter().cloned().collect();
        workflow.steps = wf_master::filter_steps(&workflow.steps, &selected);
    }

    let task = Task::new(workflow, req.options.clone());
    let session = state.sessions.insert(task.id, req.workflow.name.clone(), req.user_id.clone(), now_ms(), DEFAULT_RETENTION_MS);
    state.task_sessions.lock().expect("task-session map lock poisoned").insert(task.id, session.id);

    let target_wire = match &target {
        Target::Embedded => ExecutionTargetWire::Embedded,
        Target::Worker(slave) => ExecutionTargetWire::Worker { slave_id: slave.id.clone() },
    };

    match target {
        Target::Embedded => {
            let cancellation = CancellationToken::new();
            state.active.lock().expect("active map lock poisoned").insert(task.id, ActiveExecution { target: target_wire.clone(), cancellation: Some(cancellation.clone()) });

            let tx = state.stream_slot(task.id);
            let _ = tx.send(StreamEvent::Connected { session_id: session.id }).await;

            let executors = state.executors.clone();
            let sessions = state.sessions.clone();
            let session_id = session.id;
            let task_for_spawn = task.clone();

            sessions.update_status(session_id, TaskStatus::Running).ok();
            tokio::spawn(async move {
                let engine = TaskEngine::with_hooks(executors, Arc::new(StreamHooks { tx: tx.clone() }));
                let result: TaskResult = engine.execute("embedded", &task_for_spawn, cancellation).await;
                let _ = sessions.update_status(session_id, result.status);
                let _ = tx.send(StreamEvent::Metrics { snapshot: result.metrics.clone() }).await;
                let _ = tx.send(StreamEvent::Summary { result: result.clone() }).await;
                let _ = tx.send(StreamEvent::Complete { status: result.status }).await;
            });
        }
        Target::Worker(slave) => {
            state.active.lock().expect("active map lock poisoned").insert(task.id, ActiveExecution { target: target_wire.clone(), cancellation: None });
            state.dispatcher.dispatch_task(&slave.id, task.clone()).await?;
            state.sessions.update_status(session.id, TaskStatus::Running).ok();
            info!(slave_id = %slave.id, task_id = %task.id, "task dispatched to worker");
        }
    }

    Ok(Json(SubmitExecutionResponse { session_id: session.id, target: target_wire }))
}

async fn cmd_execution_status(
    State(state): State<Arc<AppState>>,
    AxPath(session_id): AxPath<Uuid>,
) -> Result<Json<ExecutionStatusResponse>, ApiError> {
    let record = state
        .sessions
        .get(session_id)
        .ok_or_else(|| ApiError::new(WfErrorCode::SessionNotFound, format!("session {session_id} not found")))?;

    Ok(Json(ExecutionStatusResponse {
        session_id: record.session.id,
        workflow_id: record.workflow_id,
        env_id: String::new(),
        user_id: record.user_id,
        status: record.session.status,
        created_at: chrono::DateTime::from_timestamp_millis(record.session.created_at_ms).unwrap_or_else(chrono::Utc::now),
        summary: None,
    }))
}

async fn cmd_stop_execution(
    State(state): State<Arc<AppState>>,
    AxPath(session_id): AxPath<Uuid>,
    body: Option<Json<StopExecutionRequest>>,
) -> Result<Json<StopExecutionResponse>, ApiError> {
    if let Some(Json(req)) = &body {
        if req.session_id != session_id {
            return Err(ApiError::new(WfErrorCode::InvalidWorkflow, "session_id in body does not match path"));
        }
    }

    let record = state
        .sessions
        .get(session_id)
        .ok_or_else(|| ApiError::new(WfErrorCode::SessionNotFound, format!("session {session_id} not found")))?;

    if record.session.status.is_terminal() {
        return Ok(Json(StopExecutionResponse { session_id, signalled: false }));
    }

    let signalled = {
        let active = state.active.lock().expect("active map lock poisoned");
        match active.get(&record.session.task_id) {
            Some(ActiveExecution { target: ExecutionTargetWire::Embedded, cancellation: Some(token) }) => {
                token.cancel();
                true
            }
            Some(ActiveExecution { target: ExecutionTargetWire::Worker { slave_id }, .. }) => {
                state.dispatcher.enqueue_command(slave_id, ControlCommand::Stop { task_id: record.session.task_id })?;
                true
            }
            _ => false,
        }
    };

    Ok(Json(StopExecutionResponse { session_id, signalled }))
}

async fn cmd_submit_interaction(
    State(state): State<Arc<AppState>>,
    AxPath(session_id): AxPath<Uuid>,
    Json(req): Json<SubmitInteractionRequest>,
) -> Result<Json<SubmitInteractionResponse>, ApiError> {
    if req.session_id != session_id {
        return Err(ApiError::new(WfErrorCode::InvalidWorkflow, "session_id in body does not match path"));
    }

    state.interactions.submit(session_id, req.correlation_id, InteractionResponse { value: req.value, skipped: req.skipped })?;
    Ok(Json(SubmitInteractionResponse { session_id }))
}

async fn cmd_execution_events(
    State(state): State<Arc<AppState>>,
    AxPath(session_id): AxPath<Uuid>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let record = state
        .sessions
        .get(session_id)
        .ok_or_else(|| ApiError::new(WfErrorCode::SessionNotFound, format!("session {session_id} not found")))?;

    let rx = state.take_stream(record.session.task_id).ok_or_else(|| {
        ApiError::new(WfErrorCode::SessionNotFound, "event stream already claimed or not yet started for this session")
    })?;

    // `event.to_sse()` runs arbitrary serialization logic per event; a panic
    // there must end this one SSE connection cleanly rather than taking the
    // whole server down with it.
    let stream = ReceiverStream::new(rx).map_while(|event| {
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| event.to_sse())) {
            Ok(Ok(sse)) => Some(Ok(SseEvent::default().data(sse))),
            Ok(Err(err)) => {
                warn!(error = %err, "failed to serialize stream event");
                Some(Ok(SseEvent::default().data(String::new())))
            }
            Err(_) => {
                error!("panic while serializing a stream event; closing SSE connection");
                None
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
