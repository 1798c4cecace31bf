// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-worker task and command queues, paired with the worker directory.
//!
//! Matches §5's concurrency model: "Task and command queues: per-slave
//! bounded channels (capacity 100), non-blocking send with a 5s timeout".
//! [`Dispatcher`] owns one [`WorkerQueue`] of each kind per registered
//! worker; the `StreamTasks`/`Heartbeat` wire handlers (in whichever crate
//! terminates the worker's connection) pull from these queues rather than
//! calling the scheduler directly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use wf_core::{SlaveInfo, Task};
use wf_error::{WfError, WfErrorCode};
use wf_protocol::ControlCommand;
use wf_queue::{QueueError, WorkerQueue, DEFAULT_CAPACITY, DEFAULT_SEND_TIMEOUT};

use crate::worker_registry::SlaveRegistry;

/// Ties a [`SlaveRegistry`] to the per-worker task/command queues the
/// dispatch surface actually sends on.
pub struct Dispatcher {
    registry: SlaveRegistry,
    tasks: Mutex<HashMap<String, WorkerQueue<Task>>>,
    commands: Mutex<HashMap<String, WorkerQueue<ControlCommand>>>,
}

impl Dispatcher {
    /// Build a dispatcher around a fresh worker registry with the given
    /// heartbeat interval (see [`SlaveRegistry::new`]).
    pub fn new(heartbeat_interval_ms: i64) -> Self {
        Self {
            registry: SlaveRegistry::new(heartbeat_interval_ms),
            tasks: Mutex::new(HashMap::new()),
            commands: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying worker directory, for status lookups and scheduling.
    pub fn registry(&self) -> &SlaveRegistry {
        &self.registry
    }

    /// Register a worker and provision its task/command queues.
    pub fn register_worker(&self, info: SlaveInfo) {
        let id = info.id.clone();
        self.registry.register(info);
        self.tasks.lock().expect("dispatcher task-queue lock poisoned").entry(id.clone()).or_insert_with(|| WorkerQueue::new(DEFAULT_CAPACITY));
        self.commands.lock().expect("dispatcher command-queue lock poisoned").entry(id).or_insert_with(|| WorkerQueue::new(DEFAULT_CAPACITY));
    }

    /// Remove a worker and drop its queues.
    pub fn unregister_worker(&self, slave_id: &str) {
        self.registry.unregister(slave_id);
        self.tasks.lock().expect("dispatcher task-queue lock poisoned").remove(slave_id);
        self.commands.lock().expect("dispatcher command-queue lock poisoned").remove(slave_id);
    }

    /// Enqueue a task for `slave_id`, waiting up to 5s for capacity.
    ///
    /// A full queue after the timeout elapses is surfaced as a dispatch
    /// failure, per §5: "if the slave's stream is stalled, the send is
    /// rejected".
    pub async fn dispatch_task(&self, slave_id: &str, task: Task) -> Result<(), WfError> {
        let queue = self.tasks.lock().expect("dispatcher task-queue lock poisoned").get(slave_id).cloned();
        let queue = queue.ok_or_else(|| WfError::new(WfErrorCode::WorkerNotFound, format!("no task queue for worker {slave_id}")))?;
        queue
            .send_timeout(task, DEFAULT_SEND_TIMEOUT)
            .await
            .map_err(|err| map_queue_error(slave_id, err))
    }

    /// Enqueue a control command for `slave_id`, draining it on that
    /// worker's next heartbeat reply. Fails immediately (no waiting) if the
    /// command queue is already full.
    pub fn enqueue_command(&self, slave_id: &str, command: ControlCommand) -> Result<(), WfError> {
        let queue = self.commands.lock().expect("dispatcher command-queue lock poisoned").get(slave_id).cloned();
        let queue = queue.ok_or_else(|| WfError::new(WfErrorCode::WorkerNotFound, format!("no command queue for worker {slave_id}")))?;
        queue.try_send(command).map_err(|err| map_queue_error(slave_id, err))
    }

    /// Drain every currently-queued command for `slave_id` without blocking,
    /// for inclusion in a `HeartbeatAck`.
    pub async fn drain_commands(&self, slave_id: &str) -> Vec<ControlCommand> {
        let Some(queue) = self.commands.lock().expect("dispatcher command-queue lock poisoned").get(slave_id).cloned() else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        // `recv` would wait forever on an empty queue; cap the wait at zero
        // by racing against an already-elapsed timeout instead of adding a
        // `try_recv` to `WorkerQueue` (the channel doesn't expose one, and
        // heartbeat draining can tolerate a sub-millisecond grace window).
        while let Ok(Some(command)) = tokio::time::timeout(Duration::from_millis(0), queue.recv()).await {
            drained.push(command);
        }
        drained
    }
}

fn map_queue_error(slave_id: &str, err: QueueError) -> WfError {
    WfError::new(WfErrorCode::SendTimeout, format!("queue send to worker {slave_id} failed: {err}")).with_context("slave_id", slave_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wf_core::{ExecutionMode, ExecutionOptions, SlaveStatus, Workflow};

    fn worker(id: &str) -> SlaveInfo {
        SlaveInfo {
            id: id.into(),
            address: "10.0.0.1:7000".into(),
            status: SlaveStatus::Online,
            max_vus: 10,
            cpu_cores: 4,
            memory_mb: 4096,
            labels: BTreeMap::new(),
            active_vus: 0,
            last_heartbeat_ms: 0,
        }
    }

    fn task() -> Task {
        let workflow = Workflow::new("noop", vec![]);
        let options = ExecutionOptions::new(ExecutionMode::ConstantVus { vus: 1, duration: Duration::from_millis(10) });
        Task::new(workflow, options)
    }

    #[tokio::test]
    async fn dispatch_task_to_unknown_worker_errors() {
        let dispatcher = Dispatcher::new(5_000);
        let err = dispatcher.dispatch_task("ghost", task()).await.unwrap_err();
        assert_eq!(err.code, WfErrorCode::WorkerNotFound);
    }

    #[tokio::test]
    async fn registered_worker_accepts_a_dispatched_task() {
        let dispatcher = Dispatcher::new(5_000);
        dispatcher.register_worker(worker("w1"));
        dispatcher.dispatch_task("w1", task()).await.unwrap();
    }

    #[tokio::test]
    async fn commands_drain_in_fifo_order() {
        let dispatcher = Dispatcher::new(5_000);
        dispatcher.register_worker(worker("w1"));
        dispatcher.enqueue_command("w1", ControlCommand::Stop { task_id: uuid::Uuid::new_v4() }).unwrap();
        dispatcher.enqueue_command("w1", ControlCommand::Pause { task_id: uuid::Uuid::new_v4() }).unwrap();

        let drained = dispatcher.drain_commands("w1").await;
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], ControlCommand::Stop { .. }));
        assert!(matches!(drained[1], ControlCommand::Pause { .. }));
    }

    #[tokio::test]
    async fn draining_an_unregistered_worker_yields_nothing() {
        let dispatcher = Dispatcher::new(5_000);
        assert!(dispatcher.drain_commands("ghost").await.is_empty());
    }

    #[tokio::test]
    async fn unregistering_drops_the_queues() {
        let dispatcher = Dispatcher::new(5_000);
        dispatcher.register_worker(worker("w1"));
        dispatcher.unregister_worker("w1");
        let err = dispatcher.dispatch_task("w1", task()).await.unwrap_err();
        assert_eq!(err.code, WfErrorCode::WorkerNotFound);
    }
}
