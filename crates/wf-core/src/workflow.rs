//! Workflow and step definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A named, ordered sequence of steps executed once per virtual-user
/// iteration.
///
/// On the wire, a `Workflow` is always carried as a string-encoded JSON
/// document inside an envelope rather than as a bare nested map — this is
/// the canonical form used by every component in this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Workflow {
    /// Human-readable workflow name, shown in the master's UI and logs.
    pub name: String,
    /// Ordered steps making up one iteration.
    pub steps: Vec<Step>,
    /// What kind of workflow this is, which governs whether the scheduler
    /// may target a remote worker at all.
    #[serde(default)]
    pub workflow_type: WorkflowType,
}

/// Governs which dispatch targets a workflow is eligible for.
///
/// Only `Performance` and `DataGeneration` workflows may be scheduled onto a
/// remote worker; `Normal` workflows always run against the embedded engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    /// Everyday workflow; execute requests for it are always rejected.
    #[default]
    Normal,
    /// Load/performance test; eligible for remote execution.
    Performance,
    /// Bulk data generation job; eligible for remote execution.
    DataGeneration,
}

impl WorkflowType {
    /// Whether a workflow of this type may be dispatched to a remote worker.
    pub fn eligible_for_remote_execution(&self) -> bool {
        matches!(self, Self::Performance | Self::DataGeneration)
    }
}

impl Workflow {
    /// Build a workflow from a name and its steps, defaulting to
    /// [`WorkflowType::Normal`].
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
            workflow_type: WorkflowType::Normal,
        }
    }

    /// Set this workflow's type (builder-style).
    #[must_use]
    pub fn with_type(mut self, workflow_type: WorkflowType) -> Self {
        self.workflow_type = workflow_type;
        self
    }

    /// Parse a workflow from its canonical string-encoded JSON wire form.
    pub fn from_wire(encoded: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(encoded)
    }

    /// Encode this workflow into its canonical string-encoded JSON wire form.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A single action within a [`Workflow`], or a container of nested steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    /// Stable identifier referenced by `selectedSteps`, filter results, and
    /// error/result records. Defaults to the step's name.
    pub id: String,
    /// Step name, used to key per-step metrics and results.
    pub name: String,
    /// Opaque action identifier interpreted by the engine's step executor
    /// (e.g. `"http_get"`, `"sleep"`, `"script"`). Unused by composite
    /// steps, which carry `loop_spec` or `children` instead.
    #[serde(default)]
    pub action: String,
    /// Action-specific parameters, passed through verbatim.
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
    /// Per-step timeout; falls back to the task's configured default when
    /// absent.
    #[serde(default, with = "wf_duration::option_duration_millis")]
    pub timeout: Option<Duration>,
    /// Policy applied when this step fails.
    #[serde(default)]
    pub on_error: OnError,
    /// Fixed pause applied after the step completes, before the next step
    /// runs (models user "think time").
    #[serde(default, with = "wf_duration::option_duration_millis")]
    pub think_time: Option<Duration>,
    /// A loop body repeated per [`LoopSpec::mode`]. Mutually exclusive with
    /// `children`; a step with neither is a terminal action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_spec: Option<LoopSpec>,
    /// A fixed sub-sequence of branches. Mutually exclusive with
    /// `loop_spec`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Step>,
}

impl Step {
    /// Build a terminal step with default timeout/on-error/think-time and
    /// no composite body. `id` defaults to `name`.
    pub fn new(name: impl Into<String>, action: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            action: action.into(),
            params: BTreeMap::new(),
            timeout: None,
            on_error: OnError::default(),
            think_time: None,
            loop_spec: None,
            children: Vec::new(),
        }
    }

    /// Whether this step is a container (carries a loop body or children)
    /// rather than a terminal action.
    pub fn is_composite(&self) -> bool {
        self.loop_spec.is_some() || !self.children.is_empty()
    }

    /// Checks the composite-step invariant: a step carries a loop body or
    /// children, never both.
    pub fn validate_composite(&self) -> Result<(), String> {
        if self.loop_spec.is_some() && !self.children.is_empty() {
            Err(format!("step '{}' has both a loop and children populated", self.id))
        } else {
            Ok(())
        }
    }
}

/// How a [`LoopSpec`] determines when to stop iterating its nested steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    /// Repeat a fixed number of times (`count`).
    Count,
    /// Repeat once per entry of `items`.
    Items,
    /// Repeat until `condition` evaluates false (or `max_iterations` is
    /// reached, whichever comes first).
    While,
}

/// The repeating body of a composite [`Step`].
///
/// Nested steps run in order on each pass, parameterized by the parent
/// step's id and the current iteration index so callbacks and sample-log
/// tags can attribute events to the right loop pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoopSpec {
    /// Which stop condition governs this loop.
    pub mode: LoopMode,
    /// Iteration count for [`LoopMode::Count`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Items iterated over for [`LoopMode::Items`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<serde_json::Value>,
    /// Expression evaluated each pass for [`LoopMode::While`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Hard cap on iterations regardless of mode, guarding against a
    /// runaway `while` condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    /// Expression that, when true, ends the loop early after the current
    /// pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub break_condition: Option<String>,
    /// Expression that, when true, skips the remaining steps of the
    /// current pass and moves to the next one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_condition: Option<String>,
    /// The steps run once per pass.
    pub steps: Vec<Step>,
}

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Abort the remaining steps of this iteration; count the iteration as
    /// failed.
    #[default]
    Abort,
    /// Record the failure and continue with the next step.
    Continue,
    /// Identical control flow to `Continue`, but the step's result is
    /// marked as intentionally skipped rather than failed, and it is never
    /// retried.
    Skip,
}
