// SPDX-License-Identifier: MIT OR Apache-2.0
//! Target selection: deciding which engine (embedded or a specific worker)
//! services a dispatch request.

use std::collections::BTreeMap;

use wf_core::{SlaveInfo, WorkflowType};
use wf_error::{WfError, WfErrorCode};

use crate::worker_registry::SlaveRegistry;

/// Dispatch mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Always targets the embedded engine, regardless of workflow type.
    Debug,
    /// Targets a remote worker (or, for `Local`, the embedded engine) per
    /// [`ExecutorStrategy`]. Rejected outright for [`WorkflowType::Normal`].
    Execute,
}

/// How an `execute`-mode request picks its worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorStrategy {
    /// Target exactly this worker id; it must be online.
    Manual(String),
    /// Match workers whose labels are a superset of these key/value pairs,
    /// then pick the least-loaded match.
    Labels(BTreeMap<String, String>),
    /// Target the embedded engine, same as `Debug`, but still subject to
    /// `execute`-mode's workflow-type gate.
    Local,
}

/// Where a scheduled task should run.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// The master's own embedded task engine.
    Embedded,
    /// A specific, confirmed-healthy remote worker.
    Worker(SlaveInfo),
}

/// Resolve a dispatch request to a concrete [`Target`].
///
/// This is the single decision point the spec calls for ("a single selection
/// function should own this decision") rather than scattering strategy
/// checks across call sites.
pub fn schedule(
    mode: DispatchMode,
    workflow_type: WorkflowType,
    strategy: Option<&ExecutorStrategy>,
    registry: &SlaveRegistry,
    now_ms: i64,
) -> Result<Target, WfError> {
    match mode {
        DispatchMode::Debug => Ok(Target::Embedded),
        DispatchMode::Execute => {
            if !workflow_type.eligible_for_remote_execution() {
                return Err(WfError::new(
                    WfErrorCode::InvalidWorkflow,
                    "normal-typed workflows cannot be dispatched in execute mode",
                ));
            }
            match strategy {
                None => Err(WfError::new(
                    WfErrorCode::NoOnlineWorker,
                    "execute mode requires an executor strategy",
                )),
                Some(ExecutorStrategy::Local) => Ok(Target::Embedded),
                Some(ExecutorStrategy::Manual(slave_id)) => {
                    let slave = registry
                        .get(slave_id)
                        .ok_or_else(|| WfError::new(WfErrorCode::WorkerNotFound, format!("unknown worker {slave_id}")))?;
                    if !registry.check_slave_health(slave_id, now_ms) {
                        return Err(WfError::new(
                            WfErrorCode::ManualSlaveOffline,
                            format!("worker {slave_id} is not online (status: {:?})", slave.status),
                        ));
                    }
                    Ok(Target::Worker(slave))
                }
                Some(ExecutorStrategy::Labels(required)) => {
                    let candidate = select_least_loaded(registry.online_fresh(now_ms), required)
                        .ok_or_else(|| WfError::new(WfErrorCode::NoOnlineWorker, "no online worker matches the requested labels"))?;
                    Ok(Target::Worker(candidate))
                }
            }
        }
    }
}

/// Among `candidates`, pick the least-loaded worker whose labels are a
/// superset of `required`. Returns `None` if no candidate matches.
pub fn select_least_loaded(candidates: Vec<SlaveInfo>, required: &BTreeMap<String, String>) -> Option<SlaveInfo> {
    candidates
        .into_iter()
        .filter(|slave| slave.matches_labels(required))
        .min_by(|a, b| a.load_factor().partial_cmp(&b.load_factor()).unwrap_or(std::cmp::Ordering::Equal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_core::SlaveStatus;

    fn worker(id: &str, active: u32, max: u32, labels: &[(&str, &str)]) -> SlaveInfo {
        SlaveInfo {
            id: id.into(),
            address: "10.0.0.1:7000".into(),
            status: SlaveStatus::Online,
            max_vus: max,
            cpu_cores: 4,
            memory_mb: 4096,
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            active_vus: active,
            last_heartbeat_ms: 0,
        }
    }

    #[test]
    fn debug_mode_always_targets_embedded() {
        let registry = SlaveRegistry::new(5_000);
        let target = schedule(DispatchMode::Debug, WorkflowType::Normal, None, &registry, 0).unwrap();
        assert_eq!(target, Target::Embedded);
    }

    #[test]
    fn execute_mode_rejects_normal_workflow_type() {
        let registry = SlaveRegistry::new(5_000);
        let err = schedule(DispatchMode::Execute, WorkflowType::Normal, Some(&ExecutorStrategy::Local), &registry, 0).unwrap_err();
        assert_eq!(err.code, WfErrorCode::InvalidWorkflow);
    }

    #[test]
    fn execute_mode_without_strategy_is_rejected() {
        let registry = SlaveRegistry::new(5_000);
        let err = schedule(DispatchMode::Execute, WorkflowType::Performance, None, &registry, 0).unwrap_err();
        assert_eq!(err.code, WfErrorCode::NoOnlineWorker);
    }

    #[test]
    fn manual_strategy_requires_the_named_worker_to_be_online() {
        let registry = SlaveRegistry::new(5_000);
        registry.register(worker("w1", 0, 10, &[]));
        registry.update_status("w1", SlaveStatus::Draining);

        let err = schedule(
            DispatchMode::Execute,
            WorkflowType::Performance,
            Some(&ExecutorStrategy::Manual("w1".into())),
            &registry,
            0,
        )
        .unwrap_err();
        assert_eq!(err.code, WfErrorCode::ManualSlaveOffline);

        let err = schedule(
            DispatchMode::Execute,
            WorkflowType::Performance,
            Some(&ExecutorStrategy::Manual("ghost".into())),
            &registry,
            0,
        )
        .unwrap_err();
        assert_eq!(err.code, WfErrorCode::WorkerNotFound);
    }

    #[test]
    fn manual_strategy_rejects_a_worker_whose_heartbeat_has_gone_stale() {
        // registry.update_status would still show Online; only last_heartbeat_ms
        // reveals the worker has gone quiet before the next sweep runs.
        let registry = SlaveRegistry::with_ttls(10_000, 20_000);
        registry.register(worker("w1", 0, 10, &[]));

        let err = schedule(
            DispatchMode::Execute,
            WorkflowType::Performance,
            Some(&ExecutorStrategy::Manual("w1".into())),
            &registry,
            15_000,
        )
        .unwrap_err();
        assert_eq!(err.code, WfErrorCode::ManualSlaveOffline);
    }

    #[test]
    fn labels_strategy_picks_least_loaded_match() {
        let registry = SlaveRegistry::new(5_000);
        registry.register(worker("busy", 8, 10, &[("region", "us-east")]));
        registry.register(worker("idle", 1, 10, &[("region", "us-east")]));
        registry.register(worker("wrong-region", 0, 10, &[("region", "eu-west")]));

        let mut required = BTreeMap::new();
        required.insert("region".to_string(), "us-east".to_string());
        let target = schedule(
            DispatchMode::Execute,
            WorkflowType::DataGeneration,
            Some(&ExecutorStrategy::Labels(required)),
            &registry,
            0,
        )
        .unwrap();
        assert_eq!(target, Target::Worker(registry.get("idle").unwrap()));
    }

    #[test]
    fn labels_strategy_excludes_a_match_with_a_stale_heartbeat() {
        let registry = SlaveRegistry::with_ttls(10_000, 20_000);
        registry.register(worker("idle", 1, 10, &[("region", "us-east")]));

        let mut required = BTreeMap::new();
        required.insert("region".to_string(), "us-east".to_string());
        let err = schedule(
            DispatchMode::Execute,
            WorkflowType::DataGeneration,
            Some(&ExecutorStrategy::Labels(required)),
            &registry,
            15_000,
        )
        .unwrap_err();
        assert_eq!(err.code, WfErrorCode::NoOnlineWorker);
    }

    #[test]
    fn local_strategy_targets_embedded_but_still_checks_workflow_type() {
        let registry = SlaveRegistry::new(5_000);
        let target =
            schedule(DispatchMode::Execute, WorkflowType::Performance, Some(&ExecutorStrategy::Local), &registry, 0).unwrap();
        assert_eq!(target, Target::Embedded);
    }
}
