// SPDX-License-Identifier: MIT OR Apache-2.0
//! The master-resident directory of registered workers.
//!
//! Mirrors the shape of the teacher's broadcast-based event bus
//! (`abp-runtime::bus::EventBus`): a typed map guarded by a single lock,
//! paired with a `tokio::sync::broadcast` channel so callers can watch
//! directory changes (`WatchSlaves`) without polling.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use wf_core::{SlaveInfo, SlaveStatus};

const DEFAULT_WATCH_CAPACITY: usize = 256;

/// A change to the worker directory, published to [`WatchSlaves`] subscribers.
///
/// [`WatchSlaves`]: SlaveRegistry::watch
#[derive(Debug, Clone, PartialEq)]
pub enum SlaveEvent {
    /// A worker registered for the first time.
    Added(SlaveInfo),
    /// A worker's status or load changed (including going offline by TTL).
    StatusChanged(SlaveInfo),
    /// A worker was fully evicted from the registry.
    Removed(String),
}

/// The master's directory of known workers, keyed by slave id.
///
/// Registration, heartbeat updates, and TTL sweeps all go through this one
/// type; `wf-queue::WorkerQueue` (held alongside, one per worker, by the
/// caller that owns the task dispatch side) carries the actual task/command
/// traffic.
pub struct SlaveRegistry {
    slaves: Mutex<HashMap<String, SlaveInfo>>,
    events: broadcast::Sender<SlaveEvent>,
    /// A worker is marked offline once this many milliseconds pass without a
    /// heartbeat (two missed heartbeat windows, per the spec).
    offline_after_ms: i64,
    /// A worker is fully evicted once this many milliseconds pass offline.
    evict_after_ms: i64,
}

impl SlaveRegistry {
    /// Build a registry with the given heartbeat interval; offline-after is
    /// twice the interval and evict-after is ten times the interval, unless
    /// overridden with [`SlaveRegistry::with_ttls`].
    pub fn new(heartbeat_interval_ms: i64) -> Self {
        Self::with_ttls(heartbeat_interval_ms * 2, heartbeat_interval_ms * 10)
    }

    /// Build a registry with explicit offline/evict thresholds.
    pub fn with_ttls(offline_after_ms: i64, evict_after_ms: i64) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_WATCH_CAPACITY);
        Self {
            slaves: Mutex::new(HashMap::new()),
            events,
            offline_after_ms,
            evict_after_ms,
        }
    }

    /// Register a worker, replacing any previous entry under the same id.
    pub fn register(&self, info: SlaveInfo) {
        let mut slaves = self.slaves.lock().expect("slave registry lock poisoned");
        let is_new = !slaves.contains_key(&info.id);
        slaves.insert(info.id.clone(), info.clone());
        drop(slaves);

        info!(slave_id = %info.id, "worker registered");
        let event = if is_new { SlaveEvent::Added(info) } else { SlaveEvent::StatusChanged(info) };
        self.publish(event);
    }

    /// Remove a worker from the registry entirely.
    pub fn unregister(&self, slave_id: &str) {
        let removed = self.slaves.lock().expect("slave registry lock poisoned").remove(slave_id);
        if removed.is_some() {
            info!(%slave_id, "worker unregistered");
            self.publish(SlaveEvent::Removed(slave_id.to_string()));
        }
    }

    /// Record a heartbeat: updates status, active VU count, and last-seen
    /// timestamp for an already-registered worker.
    ///
    /// Returns `false` if the worker is not currently registered.
    pub fn record_heartbeat(&self, slave_id: &str, status: SlaveStatus, active_vus: u32, now_ms: i64) -> bool {
        let updated = {
            let mut slaves = self.slaves.lock().expect("slave registry lock poisoned");
            match slaves.get_mut(slave_id) {
                Some(slave) => {
                    slave.status = status;
                    slave.active_vus = active_vus;
                    slave.last_heartbeat_ms = now_ms;
                    Some(slave.clone())
                }
                None => None,
            }
        };
        match updated {
            Some(slave) => {
                self.publish(SlaveEvent::StatusChanged(slave));
                true
            }
            None => {
                warn!(%slave_id, "heartbeat for unregistered worker");
                false
            }
        }
    }

    /// Explicitly set a worker's status (e.g. an operator-requested drain).
    ///
    /// Returns `false` if the worker is not currently registered.
    pub fn update_status(&self, slave_id: &str, status: SlaveStatus) -> bool {
        let updated = {
            let mut slaves = self.slaves.lock().expect("slave registry lock poisoned");
            slaves.get_mut(slave_id).map(|slave| {
                slave.status = status;
                slave.clone()
            })
        };
        match updated {
            Some(slave) => {
                self.publish(SlaveEvent::StatusChanged(slave));
                true
            }
            None => false,
        }
    }

    /// Look up a single worker by id.
    pub fn get(&self, slave_id: &str) -> Option<SlaveInfo> {
        self.slaves.lock().expect("slave registry lock poisoned").get(slave_id).cloned()
    }

    /// Look up just a worker's status.
    pub fn get_status(&self, slave_id: &str) -> Option<SlaveStatus> {
        self.get(slave_id).map(|s| s.status)
    }

    /// All registered workers, sorted by id.
    pub fn list(&self) -> Vec<SlaveInfo> {
        let mut out: Vec<SlaveInfo> = self.slaves.lock().expect("slave registry lock poisoned").values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Workers currently accepting new tasks.
    pub fn online(&self) -> Vec<SlaveInfo> {
        self.list().into_iter().filter(|s| s.status.accepts_new_tasks()).collect()
    }

    /// Workers currently accepting new tasks AND whose last heartbeat is
    /// still within the offline TTL as of `now_ms`. Dispatch-time callers
    /// should use this instead of [`Self::online`] so a worker that has
    /// gone stale since the last [`Self::sweep`] is not handed a task.
    pub fn online_fresh(&self, now_ms: i64) -> Vec<SlaveInfo> {
        self.online()
            .into_iter()
            .filter(|s| now_ms - s.last_heartbeat_ms < self.offline_after_ms)
            .collect()
    }

    /// Confirm a single worker's health for dispatch: it must be registered,
    /// its status must accept new tasks, and its last heartbeat must be
    /// within the offline TTL as of `now_ms`.
    pub fn check_slave_health(&self, slave_id: &str, now_ms: i64) -> bool {
        match self.get(slave_id) {
            Some(slave) => slave.status.accepts_new_tasks() && now_ms - slave.last_heartbeat_ms < self.offline_after_ms,
            None => false,
        }
    }

    /// Subscribe to directory change events.
    pub fn watch(&self) -> SlaveWatch {
        SlaveWatch { rx: self.events.subscribe() }
    }

    /// Sweep for missed heartbeats: transitions stale workers to `Offline`,
    /// and fully evicts workers that have been offline past the eviction
    /// threshold. Returns the number of workers evicted.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let mut to_evict = Vec::new();
        let mut to_offline = Vec::new();
        {
            let mut slaves = self.slaves.lock().expect("slave registry lock poisoned");
            for (id, slave) in slaves.iter_mut() {
                let idle_ms = now_ms - slave.last_heartbeat_ms;
                if idle_ms >= self.evict_after_ms {
                    to_evict.push(id.clone());
                } else if idle_ms >= self.offline_after_ms && slave.status != SlaveStatus::Offline {
                    slave.status = SlaveStatus::Offline;
                    to_offline.push(slave.clone());
                }
            }
            for id in &to_evict {
                slaves.remove(id);
            }
        }
        for slave in to_offline {
            debug!(slave_id = %slave.id, "worker marked offline: missed heartbeat windows");
            self.publish(SlaveEvent::StatusChanged(slave));
        }
        for id in &to_evict {
            info!(slave_id = %id, "worker evicted: offline past retention window");
            self.publish(SlaveEvent::Removed(id.clone()));
        }
        to_evict.len()
    }

    fn publish(&self, event: SlaveEvent) {
        // No subscribers is not an error: the registry is useful even with
        // nobody watching (e.g. before the SSE layer starts up).
        let _ = self.events.send(event);
    }
}

/// A handle for receiving [`SlaveEvent`]s from a [`SlaveRegistry`].
pub struct SlaveWatch {
    rx: broadcast::Receiver<SlaveEvent>,
}

impl SlaveWatch {
    /// Receive the next directory change, waiting asynchronously.
    ///
    /// Returns `None` once the registry is dropped. A lagging subscriber
    /// silently skips ahead to the next available event rather than
    /// resurfacing a `Lagged` error, since directory state is eventually
    /// re-derivable via [`SlaveRegistry::list`].
    pub async fn recv(&mut self) -> Option<SlaveEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
