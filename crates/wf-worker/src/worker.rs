// SPDX-License-Identifier: MIT OR Apache-2.0
//! The worker node itself: owns one [`TaskEngine`] and one
//! [`ExecutorRegistry`], advertises itself to a master, and services tasks
//! and control commands for as long as it stays connected.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use wf_core::{SlaveStatus, Task, TaskResult};
use wf_engine::{CancellationToken, ExecutorRegistry, TaskEngine};
use wf_protocol::{ControlCommand, Envelope, ResourceInfo, TaskUpdateKind};

use crate::connection::MasterConnection;
use crate::health::HealthMonitor;
use crate::lifecycle::LifecycleManager;
use crate::reconnect::{connect_with_retry, ReconnectConfig};
use crate::WorkerError;

/// Static identity and resource footprint a worker advertises at startup.
#[derive(Debug, Clone)]
pub struct WorkerIdentity {
    /// Identifier the worker proposes for itself at registration time.
    pub slave_id: String,
    /// Worker kind/flavor string, used by `labels`/`manual` scheduling.
    pub kind: String,
    /// Dialable address advertised for diagnostics.
    pub address: String,
    /// Maximum virtual users this worker will run concurrently.
    pub max_vus: u32,
    /// Advertised CPU core count.
    pub cpu_cores: u32,
    /// Advertised memory budget in megabytes.
    pub memory_mb: u32,
    /// Operator-assigned scheduling labels.
    pub labels: BTreeMap<String, String>,
}

/// A worker node: the process that owns a [`TaskEngine`], dials a master,
/// and executes the tasks it is handed.
pub struct WorkerNode {
    identity: WorkerIdentity,
    registry: Arc<ExecutorRegistry>,
    engine: TaskEngine,
    lifecycle: Mutex<LifecycleManager>,
    health: Mutex<HealthMonitor>,
    active_tasks: AtomicU32,
    in_flight: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl WorkerNode {
    /// Construct a worker around the given identity and step-executor
    /// registry. The worker starts `Offline`; call [`WorkerNode::connect`]
    /// to bring it online.
    pub fn new(identity: WorkerIdentity, registry: ExecutorRegistry) -> Self {
        let registry = Arc::new(registry);
        Self {
            identity,
            registry: Arc::clone(&registry),
            engine: TaskEngine::new(registry),
            lifecycle: Mutex::new(LifecycleManager::new()),
            health: Mutex::new(HealthMonitor::new()),
            active_tasks: AtomicU32::new(0),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Current health/availability status.
    pub async fn status(&self) -> SlaveStatus {
        self.lifecycle.lock().await.state()
    }

    /// Current load, as a percentage of `max_vus` in use (0-100).
    pub fn current_load(&self) -> f64 {
        if self.identity.max_vus == 0 {
            100.0
        } else {
            (self.active_tasks.load(Ordering::SeqCst) as f64 / self.identity.max_vus as f64) * 100.0
        }
    }

    fn resources(&self) -> ResourceInfo {
        ResourceInfo {
            cpu_cores: self.identity.cpu_cores,
            memory_mb: self.identity.memory_mb,
            max_vus: self.identity.max_vus,
            current_load: self.current_load() / 100.0,
        }
    }

    fn register_envelope(&self) -> Envelope {
        Envelope::Register {
            slave_id: self.identity.slave_id.clone(),
            kind: self.identity.kind.clone(),
            capabilities: self.registry.capabilities(),
            labels: self.identity.labels.clone(),
            address: self.identity.address.clone(),
            resources: self.resources(),
            contract_version: wf_protocol::CONTRACT_VERSION.to_string(),
        }
    }

    /// Dial `addr`, registering with backoff per `config` until connected or
    /// `config.overall_timeout` elapses. On success, transitions
    /// `Offline -> Online` and returns the live connection, ready to be
    /// handed to [`crate::worker::run_service_loop`].
    pub async fn connect(&self, addr: &str, config: &ReconnectConfig) -> Result<MasterConnection, WorkerError> {
        let (conn, failed_attempts) = connect_with_retry(addr, || self.register_envelope(), config).await?;
        {
            let mut health = self.health.lock().await;
            for attempt in &failed_attempts {
                health.record_check(
                    "master-connection",
                    crate::health::HealthStatus::Unhealthy { reason: attempt.error.clone() },
                    None,
                );
            }
            health.record_check("master-connection", crate::health::HealthStatus::Healthy, None);
        }

        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state() == SlaveStatus::Offline {
            lifecycle
                .transition(SlaveStatus::Online, Some("connected to master".into()))
                .expect("offline -> online is always valid");
        }
        info!(slave_id = %conn.assigned_id, master_id = %conn.master.master_id, "registered with master");
        Ok(conn)
    }

    /// Execute one task to completion, tracking active-task accounting and
    /// the `online <-> busy` transition around it.
    ///
    /// The returned [`CancellationToken`] is also registered so a later
    /// `Stop` control command for this task id can cancel it; callers should
    /// pass that same token (or a child of it) into [`TaskEngine::execute`].
    pub async fn execute_task(&self, task: &Task) -> TaskResult {
        let token = CancellationToken::new();
        self.in_flight.lock().await.insert(task.id, token.clone());

        let was_idle = self.active_tasks.fetch_add(1, Ordering::SeqCst) == 0;
        if was_idle {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.state() == SlaveStatus::Online {
                let _ = lifecycle.transition(SlaveStatus::Busy, Some("task assigned".into()));
            }
        }

        debug!(task_id = %task.id, "dispatching task to engine");
        let result = self.engine.execute(&self.identity.slave_id, task, token).await;

        self.in_flight.lock().await.remove(&task.id);
        if self.active_tasks.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.state() == SlaveStatus::Busy {
                let _ = lifecycle.transition(SlaveStatus::Online, Some("task finished".into()));
            }
        }

        result
    }

    /// Apply a control command addressed at an in-flight task.
    ///
    /// `Stop` cancels the task's driver at its next cancellation check.
    /// `Pause`/`Resume` are accepted (so the master's command queue never
    /// jams on them) but are no-ops: the engine has no mid-iteration pause
    /// primitive, only start/stop.
    pub async fn handle_control_command(&self, command: ControlCommand) {
        match command {
            ControlCommand::Stop { task_id } => {
                if let Some(token) = self.in_flight.lock().await.get(&task_id) {
                    token.cancel();
                    debug!(%task_id, "stop command cancelled in-flight task");
                } else {
                    warn!(%task_id, "stop command for unknown or already-finished task");
                }
            }
            ControlCommand::Pause { task_id } => {
                warn!(%task_id, "pause command accepted but not implemented by this engine");
            }
            ControlCommand::Resume { task_id } => {
                warn!(%task_id, "resume command accepted but not implemented by this engine");
            }
        }
    }

    /// Idempotent shutdown: cancel every in-flight task and transition to
    /// `Offline`. Drivers exit at their next cancellation check; this method
    /// does not block waiting for them.
    pub async fn stop(&self) {
        let in_flight = self.in_flight.lock().await;
        for token in in_flight.values() {
            token.cancel();
        }
        drop(in_flight);

        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.transition(SlaveStatus::Offline, Some("stop requested".into())) {
            Ok(()) | Err(crate::lifecycle::LifecycleError::AlreadyInState(_)) => {}
            Err(e) => warn!(error = %e, "unexpected error stopping worker"),
        }
    }

    /// Build a `TaskUpdate(Completed)` envelope for a finished task.
    pub fn update_envelope(task_id: Uuid, kind: TaskUpdateKind) -> Envelope {
        Envelope::TaskUpdate { task_id, update: kind }
    }

    /// The identity this worker advertises.
    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }
}

/// Default heartbeat cadence, per §6: `HeartbeatInterval` default 5s.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Run the connected worker's heartbeat loop until the connection drops.
///
/// Sends `Heartbeat{slave_id, status}` every `interval`, applying whatever
/// [`ControlCommand`]s come back on the `HeartbeatAck`. Returns the error
/// that ended the loop (never returns `Ok` while the connection is live).
pub async fn run_heartbeat_loop(
    worker: &WorkerNode,
    conn: &mut MasterConnection,
    interval: Duration,
) -> WorkerError {
    loop {
        tokio::time::sleep(interval).await;

        let status = worker.status().await;
        let heartbeat = Envelope::Heartbeat { slave_id: worker.identity().slave_id.clone(), status };
        if let Err(e) = conn.send(&heartbeat).await {
            return e;
        }

        match conn.recv().await {
            Ok(Some(Envelope::HeartbeatAck { commands, ts_ms })) => {
                debug!(ts_ms, commands = commands.len(), "heartbeat acked");
                for command in commands {
                    worker.handle_control_command(command).await;
                }
            }
            Ok(Some(other)) => {
                warn!(envelope = ?other, "expected heartbeat_ack, got something else");
            }
            Ok(None) => return WorkerError::StreamClosed,
            Err(e) => return e,
        }
    }
}

/// Run a connected worker's full duty cycle: heartbeats out, task
/// assignments in, both serviced concurrently.
///
/// Splits `conn` into independent halves so a heartbeat never has to wait
/// behind a task dispatch or vice versa. The read side handles
/// `TaskAssignment` by spawning [`WorkerNode::execute_task`] and reporting
/// `Started`/`Completed` back through the shared outbound queue; the write
/// side drains that queue (periodic `Heartbeat` plus outbound
/// `TaskUpdate`s) onto the wire. Returns the error that ended the
/// connection; runs until the master closes the stream or a send/recv
/// fails.
pub async fn run_service_loop(worker: Arc<WorkerNode>, conn: MasterConnection, heartbeat_interval: Duration) -> WorkerError {
    let (read_half, mut write_half) = conn.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(64);

    let writer_task = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if let Err(e) = write_half.send(&envelope).await {
                return e;
            }
        }
        WorkerError::StreamClosed
    });

    let heartbeat_tx = outbound_tx.clone();
    let heartbeat_worker = Arc::clone(&worker);
    let heartbeat_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(heartbeat_interval).await;
            let status = heartbeat_worker.status().await;
            let heartbeat = Envelope::Heartbeat { slave_id: heartbeat_worker.identity().slave_id.clone(), status };
            if heartbeat_tx.send(heartbeat).await.is_err() {
                return;
            }
        }
    });

    let reader_err = run_read_loop(Arc::clone(&worker), read_half, outbound_tx).await;

    heartbeat_task.abort();
    match writer_task.await {
        Ok(err) => {
            // Prefer the reader's error: it usually explains *why* the
            // writer's channel closed (e.g. the reader saw StreamClosed
            // first and dropped its sender).
            let _ = err;
        }
        Err(join_err) => error!(error = %join_err, "writer task panicked"),
    }
    reader_err
}

async fn run_read_loop(worker: Arc<WorkerNode>, mut read_half: crate::connection::MasterReadHalf, outbound: mpsc::Sender<Envelope>) -> WorkerError {
    loop {
        match read_half.recv().await {
            Ok(Some(Envelope::HeartbeatAck { commands, ts_ms })) => {
                debug!(ts_ms, commands = commands.len(), "heartbeat acked");
                for command in commands {
                    worker.handle_control_command(command).await;
                }
            }
            Ok(Some(Envelope::TaskAssignment { task })) => {
                let worker = Arc::clone(&worker);
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let task_id = task.id;
                    if outbound.send(WorkerNode::update_envelope(task_id, TaskUpdateKind::Started)).await.is_err() {
                        return;
                    }
                    let result = worker.execute_task(&task).await;
                    let _ = outbound.send(WorkerNode::update_envelope(task_id, TaskUpdateKind::Completed(result))).await;
                });
            }
            Ok(Some(other)) => {
                warn!(envelope = ?other, "unexpected envelope on worker read loop");
            }
            Ok(None) => return WorkerError::StreamClosed,
            Err(e) => return e,
        }
    }
}
