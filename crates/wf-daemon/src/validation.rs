// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request validation for the daemon API.

use std::collections::HashSet;

use wf_core::{ExecutionMode, Workflow, WorkflowType};

use crate::api::{ExecutorStrategyWire, SubmitExecutionRequest};

/// Maximum allowed length for a workflow name.
const MAX_NAME_LENGTH: usize = 256;

/// Maximum number of steps a single workflow may declare.
const MAX_STEPS: usize = 10_000;

/// Validates incoming submit-execution requests before they reach the
/// scheduler.
pub struct RequestValidator;

impl RequestValidator {
    /// Validate every field of a [`SubmitExecutionRequest`], accumulating
    /// every error found rather than stopping at the first.
    pub fn validate_submit(req: &SubmitExecutionRequest) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if req.env_id.trim().is_empty() {
            errors.push("env_id must not be empty".into());
        }

        if let Err(e) = Self::validate_workflow(&req.workflow) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_execution_mode(&req.options.mode) {
            errors.push(e);
        }

        if !req.selected_steps.is_empty() {
            let mut known = HashSet::new();
            collect_step_ids(&req.workflow.steps, &mut known);
            for id in &req.selected_steps {
                if !known.contains(id.as_str()) {
                    errors.push(format!("selected_steps references unknown step '{id}'"));
                }
            }
        }

        if let Some(ref strategy) = req.executor_strategy
            && let ExecutorStrategyWire::Manual { slave_id } = strategy
            && slave_id.trim().is_empty()
        {
            errors.push("executor_strategy.slave_id must not be empty".into());
        }

        if req.workflow.workflow_type == WorkflowType::Normal && req.executor_strategy.is_some() {
            errors.push("normal-typed workflows cannot carry an executor_strategy (execute mode requires a performance/data-generation workflow)".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate a [`Workflow`] document in isolation: name, step count, and
    /// per-mode VU/iteration bounds.
    pub fn validate_workflow(workflow: &Workflow) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if workflow.name.trim().is_empty() {
            errors.push("workflow.name must not be empty".into());
        } else if workflow.name.len() > MAX_NAME_LENGTH {
            errors.push(format!("workflow.name exceeds maximum length of {MAX_NAME_LENGTH} characters"));
        }

        if workflow.steps.is_empty() {
            errors.push("workflow.steps must not be empty".into());
        } else if workflow.steps.len() > MAX_STEPS {
            errors.push(format!("workflow.steps exceeds maximum of {MAX_STEPS}"));
        }

        let mut seen = HashSet::new();
        validate_step_tree(&workflow.steps, &mut seen, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate an [`ExecutionMode`] in isolation (zero VUs/iterations are
    /// always invalid regardless of which variant carries them).
    pub fn validate_execution_mode(mode: &ExecutionMode) -> Result<(), String> {
        match mode {
            ExecutionMode::ConstantVus { vus, .. } if *vus == 0 => Err("constant-vus requires at least 1 VU".into()),
            ExecutionMode::PerVuIterations { vus, iterations } if *vus == 0 || *iterations == 0 => {
                Err("per-vu-iterations requires at least 1 VU and 1 iteration".into())
            }
            ExecutionMode::SharedIterations { vus, iterations } if *vus == 0 || *iterations == 0 => {
                Err("shared-iterations requires at least 1 VU and 1 iteration".into())
            }
            ExecutionMode::RampingVus { stages, .. } if stages.is_empty() => Err("ramping-vus requires at least one stage".into()),
            _ => Ok(()),
        }
    }
}

/// Walk a step tree (including loop bodies and children) validating names,
/// duplicate ids, empty actions on terminal steps, and the composite-step
/// invariant, accumulating every violation found.
fn validate_step_tree<'a>(steps: &'a [wf_core::Step], seen: &mut HashSet<&'a str>, errors: &mut Vec<String>) {
    for step in steps {
        if step.name.trim().is_empty() {
            errors.push("every step must have a non-empty name".into());
        } else if !seen.insert(step.id.as_str()) {
            errors.push(format!("duplicate step id '{}'", step.id));
        }

        if let Err(e) = step.validate_composite() {
            errors.push(e);
        } else if !step.is_composite() && step.action.trim().is_empty() {
            errors.push(format!("step '{}' has an empty action", step.id));
        }

        if let Some(loop_spec) = &step.loop_spec {
            validate_step_tree(&loop_spec.steps, seen, errors);
        }
        if !step.children.is_empty() {
            validate_step_tree(&step.children, seen, errors);
        }
    }
}

/// Collect every step id in the tree, including loop bodies and children.
fn collect_step_ids<'a>(steps: &'a [wf_core::Step], ids: &mut HashSet<&'a str>) {
    for step in steps {
        ids.insert(step.id.as_str());
        if let Some(loop_spec) = &step.loop_spec {
            collect_step_ids(&loop_spec.steps, ids);
        }
        if !step.children.is_empty() {
            collect_step_ids(&step.children, ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use wf_core::{ExecutionOptions, Step};

    fn workflow_with(steps: Vec<Step>) -> Workflow {
        Workflow::new("checkout", steps)
    }

    fn request(workflow: Workflow) -> SubmitExecutionRequest {
        SubmitExecutionRequest {
            workflow,
            env_id: "env-1".into(),
            user_id: "user-1".into(),
            variables: BTreeMap::new(),
            options: ExecutionOptions::new(ExecutionMode::ConstantVus { vus: 1, duration: Duration::from_secs(1) }),
            mode: crate::api::DispatchModeWire::Debug,
            stream: false,
            persist: false,
            selected_steps: Vec::new(),
            executor_strategy: None,
        }
    }

    #[test]
    fn valid_request_accepted() {
        let wf = workflow_with(vec![Step::new("login", "http")]);
        assert!(RequestValidator::validate_submit(&request(wf)).is_ok());
    }

    #[test]
    fn empty_steps_rejected() {
        let wf = workflow_with(vec![]);
        let errs = RequestValidator::validate_submit(&request(wf)).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("steps must not be empty")));
    }

    #[test]
    fn empty_workflow_name_rejected() {
        let mut wf = workflow_with(vec![Step::new("login", "http")]);
        wf.name = String::new();
        let errs = RequestValidator::validate_submit(&request(wf)).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("workflow.name")));
    }

    #[test]
    fn duplicate_step_ids_rejected() {
        let wf = workflow_with(vec![Step::new("login", "http"), Step::new("login", "http")]);
        let errs = RequestValidator::validate_submit(&request(wf)).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("duplicate step id")));
    }

    #[test]
    fn step_with_both_loop_and_children_rejected() {
        use wf_core::{LoopMode, LoopSpec};
        let mut bad = Step::new("bad", "");
        bad.loop_spec = Some(LoopSpec {
            mode: LoopMode::Count,
            count: Some(1),
            items: Vec::new(),
            condition: None,
            max_iterations: None,
            break_condition: None,
            continue_condition: None,
            steps: vec![Step::new("inner", "http")],
        });
        bad.children = vec![Step::new("other", "http")];
        let wf = workflow_with(vec![bad]);
        let errs = RequestValidator::validate_submit(&request(wf)).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("loop and children")));
    }

    #[test]
    fn selected_step_nested_in_a_loop_body_is_known() {
        use wf_core::{LoopMode, LoopSpec};
        let group = Step {
            loop_spec: Some(LoopSpec {
                mode: LoopMode::Count,
                count: Some(3),
                items: Vec::new(),
                condition: None,
                max_iterations: None,
                break_condition: None,
                continue_condition: None,
                steps: vec![Step::new("inner", "http")],
            }),
            ..Step::new("retry", "")
        };
        let wf = workflow_with(vec![group]);
        let mut req = request(wf);
        req.selected_steps = vec!["inner".into()];
        assert!(RequestValidator::validate_submit(&req).is_ok());
    }

    #[test]
    fn empty_env_id_rejected() {
        let wf = workflow_with(vec![Step::new("login", "http")]);
        let mut req = request(wf);
        req.env_id = String::new();
        let errs = RequestValidator::validate_submit(&req).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("env_id")));
    }

    #[test]
    fn unknown_selected_step_rejected() {
        let wf = workflow_with(vec![Step::new("login", "http")]);
        let mut req = request(wf);
        req.selected_steps = vec!["does-not-exist".into()];
        let errs = RequestValidator::validate_submit(&req).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("unknown step")));
    }

    #[test]
    fn known_selected_step_accepted() {
        let wf = workflow_with(vec![Step::new("login", "http"), Step::new("checkout", "http")]);
        let mut req = request(wf);
        req.selected_steps = vec!["checkout".into()];
        assert!(RequestValidator::validate_submit(&req).is_ok());
    }

    #[test]
    fn zero_vus_rejected() {
        let mode = ExecutionMode::ConstantVus { vus: 0, duration: Duration::from_secs(1) };
        assert!(RequestValidator::validate_execution_mode(&mode).is_err());
    }

    #[test]
    fn nonzero_vus_accepted() {
        let mode = ExecutionMode::ConstantVus { vus: 1, duration: Duration::from_secs(1) };
        assert!(RequestValidator::validate_execution_mode(&mode).is_ok());
    }

    #[test]
    fn empty_ramp_stages_rejected() {
        let mode = ExecutionMode::RampingVus { start_vus: 1, stages: vec![] };
        assert!(RequestValidator::validate_execution_mode(&mode).is_err());
    }

    #[test]
    fn manual_strategy_with_empty_slave_id_rejected() {
        let wf = workflow_with(vec![Step::new("login", "http")]);
        let mut req = request(wf);
        req.workflow.workflow_type = WorkflowType::Performance;
        req.executor_strategy = Some(ExecutorStrategyWire::Manual { slave_id: String::new() });
        let errs = RequestValidator::validate_submit(&req).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("slave_id")));
    }

    #[test]
    fn normal_workflow_with_strategy_rejected() {
        let wf = workflow_with(vec![Step::new("login", "http")]);
        let mut req = request(wf);
        req.executor_strategy = Some(ExecutorStrategyWire::Local);
        let errs = RequestValidator::validate_submit(&req).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("normal-typed workflows")));
    }

    #[test]
    fn execution_options_default_step_timeout_is_thirty_seconds() {
        let opts = ExecutionOptions::new(ExecutionMode::ConstantVus { vus: 1, duration: Duration::from_secs(1) });
        assert_eq!(opts.step_timeout, Duration::from_secs(30));
    }
}
