// SPDX-License-Identifier: MIT OR Apache-2.0
//! The master's TCP side: accepts worker connections and speaks the
//! Register/Heartbeat/TaskAssignment/TaskUpdate/MetricsReport exchange
//! defined by [`wf_protocol`].
//!
//! One connection per worker, multiplexing every exchange over a single
//! JSONL stream. The read loop drains [`wf_protocol::Envelope`]s the worker
//! sends; the only thing the master pushes unprompted is a `TaskAssignment`,
//! which rides the worker's own per-worker task queue rather than this
//! module directly — [`crate::AppState::dispatcher`]'s [`wf_master::Dispatcher::dispatch_task`]
//! enqueues it, and the writer half here pulls it off on the worker's behalf.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use wf_core::{SlaveInfo, SlaveStatus, TaskStatus};
use wf_protocol::{Envelope, JsonlCodec, MasterInfo, ProtocolError, TaskUpdateKind, CONTRACT_VERSION};
use wf_stream::StreamEvent;

use crate::AppState;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// Bind `addr` and accept worker connections until the process stops.
pub async fn run(addr: &str, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "wire listener bound");

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, peer.to_string(), state).await {
                warn!(%peer, error = %err, "worker connection ended");
            }
        });
    }
}

async fn handle_connection(stream: TcpStream, peer: String, state: Arc<AppState>) -> Result<(), ProtocolError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let Some(line) = read_line(&mut reader).await? else {
        return Ok(());
    };

    let slave_id = match JsonlCodec::decode(&line)? {
        Envelope::Register { slave_id, address, labels, resources, capabilities: _, contract_version: _, kind: _ } => {
            let info = SlaveInfo {
                id: slave_id.clone(),
                address,
                status: SlaveStatus::Online,
                max_vus: resources.max_vus,
                cpu_cores: resources.cpu_cores,
                memory_mb: resources.memory_mb as u64,
                labels,
                active_vus: 0,
                last_heartbeat_ms: now_ms(),
            };
            state.dispatcher.register_worker(info);

            let ack = Envelope::RegisterAck {
                accepted: true,
                assigned_id: slave_id.clone(),
                master: MasterInfo {
                    master_id: "master".into(),
                    version: CONTRACT_VERSION.to_string(),
                    heartbeat_interval_ms: state.config.heartbeat_interval_ms,
                },
                reason: None,
            };
            send(&mut write_half, &ack).await?;
            slave_id
        }
        other => {
            let ack = Envelope::fatal_with_code(None, format!("expected register, got {other:?}"), wf_error::WfErrorCode::ProtocolVersionMismatch);
            send(&mut write_half, &ack).await?;
            return Err(ProtocolError::UnexpectedMessage { expected: "register".into(), got: format!("{other:?}") });
        }
    };

    info!(%slave_id, %peer, "worker registered");
    let result = service_connection(&slave_id, &mut reader, &mut write_half, &state).await;
    state.dispatcher.unregister_worker(&slave_id);
    info!(%slave_id, "worker disconnected");
    result
}

async fn service_connection(
    slave_id: &str,
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    state: &Arc<AppState>,
) -> Result<(), ProtocolError> {
    let mut sweep = interval(Duration::from_millis(state.config.heartbeat_interval_ms));
    loop {
        tokio::select! {
            line = read_line(reader) => {
                let Some(line) = line? else { return Ok(()) };
                if line.trim().is_empty() {
                    continue;
                }
                match JsonlCodec::decode(&line)? {
                    Envelope::Heartbeat { slave_id: reported_id, status } => {
                        state.dispatcher.registry().record_heartbeat(&reported_id, status, 0, now_ms());
                        let commands = state.dispatcher.drain_commands(&reported_id).await;
                        let ack = Envelope::HeartbeatAck { commands, ts_ms: now_ms() };
                        send(writer, &ack).await?;
                    }
                    Envelope::TaskUpdate { task_id, update } => handle_task_update(state, task_id, update).await,
                    Envelope::MetricsReport { execution_id, snapshot } => {
                        if let Some(session_id) = state.session_for_task(execution_id) {
                            let tx = state.stream_slot(execution_id);
                            let _ = tx.send(StreamEvent::Metrics { snapshot }).await;
                            let _ = session_id;
                        }
                    }
                    Envelope::Fatal { error, .. } => {
                        warn!(%slave_id, %error, "worker reported a fatal error");
                        return Err(ProtocolError::Violation(error));
                    }
                    other => {
                        warn!(%slave_id, envelope = ?other, "unexpected envelope from worker");
                    }
                }
            }
            _ = sweep.tick() => {
                state.dispatcher.registry().sweep(now_ms());
            }
        }
    }
}

async fn handle_task_update(state: &Arc<AppState>, task_id: uuid::Uuid, update: TaskUpdateKind) {
    let Some(session_id) = state.session_for_task(task_id) else {
        return;
    };
    let tx = state.stream_slot(task_id);

    match update {
        TaskUpdateKind::Started => {
            let _ = state.sessions.update_status(session_id, TaskStatus::Running);
        }
        TaskUpdateKind::StepResult(result) => {
            let event = if result.is_failed() { StreamEvent::StepFailed { result } } else { StreamEvent::StepComplete { result } };
            let _ = tx.send(event).await;
        }
        TaskUpdateKind::Completed(result) => {
            let _ = state.sessions.update_status(session_id, result.status);
            let _ = tx.send(StreamEvent::Summary { result: result.clone() }).await;
            let _ = tx.send(StreamEvent::Complete { status: result.status }).await;
        }
        TaskUpdateKind::Failed { error } => {
            let _ = state.sessions.update_status(session_id, TaskStatus::Failed);
            let _ = tx.send(StreamEvent::Error { message: error, code: None }).await;
            let _ = tx.send(StreamEvent::Complete { status: TaskStatus::Failed }).await;
        }
    }
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<String>, ProtocolError> {
    let mut buf = String::new();
    let n = reader.read_line(&mut buf).await?;
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(buf.trim_end().to_string()))
}

async fn send(writer: &mut OwnedWriteHalf, envelope: &Envelope) -> Result<(), ProtocolError> {
    let line = JsonlCodec::encode(envelope)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
