//! Task assignment: a workflow bound to execution options and dispatched to
//! a single worker.

use crate::execution::{ExecutionOptions, ExecutionSegment};
use crate::workflow::Workflow;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One unit of dispatch from the master to a worker: a workflow to run with
/// a fixed set of execution options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    /// Unique task identifier, generated by the master at submission time.
    pub id: Uuid,
    /// Identifier of the parent execution this task belongs to. Shared
    /// across every worker a fanned-out execution is split onto.
    pub execution_id: Uuid,
    /// The workflow to execute.
    pub workflow: Workflow,
    /// How the workflow should be driven.
    pub options: ExecutionOptions,
    /// This task's `[start, end]` share of the parent execution's total VUs
    /// and iterations. Defaults to the full range for a single-worker run.
    #[serde(default)]
    pub segment: ExecutionSegment,
    /// The worker assigned to run this task, set once at dispatch time and
    /// never re-sent on subsequent `TaskUpdate` messages.
    #[serde(default)]
    pub worker_id: Option<String>,
}

impl Task {
    /// Create a new, unassigned task covering the full execution segment.
    pub fn new(workflow: Workflow, options: ExecutionOptions) -> Self {
        Self::new_segment(workflow, options, ExecutionSegment::FULL)
    }

    /// Create a new, unassigned task covering a specific fan-out segment.
    pub fn new_segment(workflow: Workflow, options: ExecutionOptions, segment: ExecutionSegment) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            workflow,
            options,
            segment,
            worker_id: None,
        }
    }

    /// Bind this task to a worker, returning the assigned task.
    pub fn assign_to(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionMode;
    use crate::workflow::Step;
    use std::time::Duration;

    fn sample_workflow() -> Workflow {
        Workflow::new("smoke", vec![Step::new("ping", "http_get")])
    }

    #[test]
    fn new_task_is_unassigned() {
        let opts = ExecutionOptions::new(ExecutionMode::ConstantVus {
            vus: 1,
            duration: Duration::from_secs(1),
        });
        let task = Task::new(sample_workflow(), opts);
        assert!(task.worker_id.is_none());
    }

    #[test]
    fn assign_to_sets_worker_id_once() {
        let opts = ExecutionOptions::new(ExecutionMode::ConstantVus {
            vus: 1,
            duration: Duration::from_secs(1),
        });
        let task = Task::new(sample_workflow(), opts).assign_to("worker-7");
        assert_eq!(task.worker_id.as_deref(), Some("worker-7"));
    }
}
