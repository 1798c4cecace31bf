//! Per-step and per-task result envelopes.

use crate::metrics::Metrics;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Disposition of a single step invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// The step's executor returned without error inside its timeout.
    Success,
    /// The step's executor returned an error, or it panicked.
    Failed,
    /// The step did not complete within its timeout.
    Timeout,
    /// The step's `on_error: skip` policy marked this failure as
    /// intentionally disregarded; it will not be retried.
    Skipped,
}

/// Where a [`StepLogEntry`] originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepLogSource {
    /// A line the step's action wrote to its console/log output.
    Console,
    /// An assertion check performed against the step's result.
    Assertion,
    /// A pre/post-processor attached to the step.
    Processor,
}

/// One log line attributed to a step invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepLogEntry {
    /// What produced this entry.
    pub source: StepLogSource,
    /// The entry's text.
    pub message: String,
    /// When the entry was recorded, as milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

/// Outcome of a single step invocation within one VU iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepResult {
    /// Id of the step that ran, matching [`crate::workflow::Step::id`].
    pub step_id: String,
    /// Name of the step that ran, matching [`crate::workflow::Step::name`].
    pub step_name: String,
    /// This invocation's outcome.
    pub status: StepStatus,
    /// Wall-clock time the step took to run.
    #[serde(with = "wf_duration::duration_millis")]
    pub duration: Duration,
    /// Error message, present when the step failed, timed out, or was
    /// skipped after failing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the step started, as milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Arbitrary typed payload produced by the step's executor (e.g. an
    /// HTTP response envelope), present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Custom metrics the step's executor chose to report, merged into the
    /// aggregate snapshot by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_metrics: BTreeMap<String, f64>,
    /// Console/assertion/processor log entries attributed to this step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<StepLogEntry>,
}

impl StepResult {
    /// A step is failed if it carries an error, or its status is
    /// [`StepStatus::Failed`] or [`StepStatus::Timeout`] — independent of
    /// whether `on_error: skip` later relabels it.
    pub fn is_failed(&self) -> bool {
        self.error.is_some() || matches!(self.status, StepStatus::Failed | StepStatus::Timeout)
    }
}

/// Terminal status of a dispatched [`crate::task::Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be picked up by a worker.
    Queued,
    /// Currently executing.
    Running,
    /// Completed without a fatal error (individual steps may still have
    /// failed, depending on their `on_error` policy).
    Completed,
    /// Terminated by a fatal engine or transport error.
    Failed,
    /// Stopped by an explicit cancellation request.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status represents a terminal state the task will not
    /// transition out of.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One driver-local failure recorded against a task, independent of the
/// individual step results (e.g. a step executor error, surfaced with
/// enough context to locate which step and when).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionError {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Id of the step that produced this error.
    pub step_id: String,
    /// When the error occurred, as milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

/// Final or intermediate result reported by a worker for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskResult {
    /// Identifier of the task this result belongs to.
    pub task_id: Uuid,
    /// Identifier of the execution (dispatch request) this task belongs to.
    pub execution_id: Uuid,
    /// Identifier of the worker that produced this result.
    pub worker_id: String,
    /// Current status of the task.
    pub status: TaskStatus,
    /// Total iterations completed across every VU in this task.
    pub iterations: u64,
    /// Results for individual step invocations observed so far.
    pub step_results: Vec<StepResult>,
    /// Aggregated metrics snapshot as of this report.
    pub metrics: Metrics,
    /// Driver-local errors collected during execution; `errors[0]` is the
    /// first non-cancellation error observed, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ExecutionError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
    }

    fn ok_result() -> StepResult {
        StepResult {
            step_id: "login".into(),
            step_name: "login".into(),
            status: StepStatus::Success,
            duration: Duration::from_millis(42),
            error: None,
            timestamp_ms: 0,
            output: None,
            custom_metrics: BTreeMap::new(),
            logs: Vec::new(),
        }
    }

    #[test]
    fn step_result_error_omitted_when_successful() {
        let json = serde_json::to_string(&ok_result()).unwrap();
        assert!(!json.contains("\"error\""));
        assert!(!ok_result().is_failed());
    }

    #[test]
    fn timeout_without_explicit_error_is_still_failed() {
        let mut result = ok_result();
        result.status = StepStatus::Timeout;
        assert!(result.is_failed());
    }

    #[test]
    fn skipped_step_is_not_treated_as_failed_by_is_failed_alone() {
        // Skip is assigned after a failure is recorded, so `error` is still
        // set; `is_failed` deliberately keeps reporting true here, since the
        // on_error dispatch (not this helper) is what decides not to abort.
        let mut result = ok_result();
        result.status = StepStatus::Skipped;
        result.error = Some("boom".into());
        assert!(result.is_failed());
    }
}
