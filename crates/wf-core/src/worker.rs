//! Worker registry state.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Health/availability state of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SlaveStatus {
    /// Not currently connected (TTL lapsed, or never registered).
    Offline,
    /// Connected, healthy, and accepting new tasks.
    Online,
    /// Connected and currently running at least one task.
    Busy,
    /// Connected but refusing new tasks (operator-requested drain).
    Draining,
}

impl SlaveStatus {
    /// Whether a task may be dispatched to a worker in this state.
    pub fn accepts_new_tasks(&self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Registry record for one worker node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SlaveInfo {
    /// Stable worker identifier, established once at stream initialization.
    pub id: String,
    /// Address the master last observed this worker dialing in from.
    pub address: String,
    /// Current health/availability state.
    pub status: SlaveStatus,
    /// Maximum number of virtual users this worker will run concurrently.
    pub max_vus: u32,
    /// Advertised CPU core count, used for capacity-aware scheduling.
    pub cpu_cores: u32,
    /// Advertised memory budget in megabytes.
    pub memory_mb: u64,
    /// Operator-assigned labels used by the `labels` scheduling strategy.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Number of VUs currently in use across all tasks on this worker.
    #[serde(default)]
    pub active_vus: u32,
    /// Milliseconds since the Unix epoch of the last received heartbeat.
    pub last_heartbeat_ms: i64,
}

impl SlaveInfo {
    /// Fraction of `max_vus` currently in use, in `[0.0, 1.0]`.
    pub fn load_factor(&self) -> f64 {
        if self.max_vus == 0 {
            1.0
        } else {
            self.active_vus as f64 / self.max_vus as f64
        }
    }

    /// Whether this worker matches every key/value pair in `required`.
    pub fn matches_labels(&self, required: &BTreeMap<String, String>) -> bool {
        required
            .iter()
            .all(|(k, v)| self.labels.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(status: SlaveStatus, active: u32, max: u32) -> SlaveInfo {
        SlaveInfo {
            id: "w1".into(),
            address: "10.0.0.1:7000".into(),
            status,
            max_vus: max,
            cpu_cores: 4,
            memory_mb: 4096,
            labels: BTreeMap::new(),
            active_vus: active,
            last_heartbeat_ms: 0,
        }
    }

    #[test]
    fn only_online_accepts_new_tasks() {
        assert!(SlaveStatus::Online.accepts_new_tasks());
        assert!(!SlaveStatus::Busy.accepts_new_tasks());
        assert!(!SlaveStatus::Draining.accepts_new_tasks());
        assert!(!SlaveStatus::Offline.accepts_new_tasks());
    }

    #[test]
    fn load_factor_divides_active_by_max() {
        let w = worker(SlaveStatus::Online, 25, 100);
        assert!((w.load_factor() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn load_factor_saturates_when_max_is_zero() {
        let w = worker(SlaveStatus::Online, 0, 0);
        assert_eq!(w.load_factor(), 1.0);
    }

    #[test]
    fn matches_labels_requires_all_keys() {
        let mut w = worker(SlaveStatus::Online, 0, 10);
        w.labels.insert("region".into(), "us-east".into());
        let mut want = BTreeMap::new();
        want.insert("region".into(), "us-east".into());
        assert!(w.matches_labels(&want));
        want.insert("tier".into(), "gpu".into());
        assert!(!w.matches_labels(&want));
    }
}
