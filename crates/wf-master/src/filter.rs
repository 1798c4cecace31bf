// SPDX-License-Identifier: MIT OR Apache-2.0
//! `filterSteps`: prune a step list down to an operator-selected subset
//! before dispatch.
//!
//! The algorithm is tree-recursive: a selected container's interior is kept
//! untouched, an unselected container whose body transitively contains a
//! selected step is retained with its own body reduced to just that
//! subtree, and a container with no selected descendant is dropped
//! entirely. This yields a well-formed sub-workflow rather than a flat list.

use std::collections::HashSet;

use wf_core::{LoopSpec, Step};

/// Return the steps from `steps` whose id is in `selected`, plus whichever
/// ancestor containers are needed to preserve the nesting of a selected
/// descendant, preserving relative order throughout.
///
/// An empty `selected` set is treated as "no filter": every step passes
/// through unchanged, matching the caller-facing contract that omitting
/// `selectedSteps` runs the whole workflow.
pub fn filter_steps(steps: &[Step], selected: &HashSet<String>) -> Vec<Step> {
    if selected.is_empty() {
        return steps.to_vec();
    }
    steps.iter().filter_map(|step| filter_step(step, selected)).collect()
}

/// Retain `step` as-is if selected, reduced if an unselected container with
/// a selected descendant, or drop it otherwise.
fn filter_step(step: &Step, selected: &HashSet<String>) -> Option<Step> {
    if selected.contains(&step.id) {
        return Some(step.clone());
    }

    if let Some(loop_spec) = &step.loop_spec {
        let retained = filter_steps(&loop_spec.steps, selected);
        if retained.is_empty() {
            return None;
        }
        let mut reduced = step.clone();
        reduced.loop_spec = Some(LoopSpec {
            steps: retained,
            ..loop_spec.clone()
        });
        return Some(reduced);
    }

    if !step.children.is_empty() {
        let retained = filter_steps(&step.children, selected);
        if retained.is_empty() {
            return None;
        }
        let mut reduced = step.clone();
        reduced.children = retained;
        return Some(reduced);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use wf_core::LoopMode;

    fn steps() -> Vec<Step> {
        vec![Step::new("login", "http_post"), Step::new("browse", "http_get"), Step::new("checkout", "http_post")]
    }

    fn selected(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_selection_passes_everything_through() {
        let filtered = filter_steps(&steps(), &HashSet::new());
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn selection_keeps_only_named_steps_in_order() {
        let filtered = filter_steps(&steps(), &selected(&["checkout", "login"]));
        let names: Vec<&str> = filtered.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["login", "checkout"]);
    }

    #[test]
    fn selection_with_no_matches_yields_empty() {
        assert!(filter_steps(&steps(), &selected(&["nonexistent"])).is_empty());
    }

    #[test]
    fn selected_container_is_kept_with_its_interior_untouched() {
        let inner = vec![Step::new("a", "http_get"), Step::new("b", "http_get")];
        let group = Step {
            children: inner.clone(),
            ..Step::new("group", "")
        };
        let filtered = filter_steps(&[group], &selected(&["group"]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].children, inner);
    }

    #[test]
    fn unselected_container_with_a_selected_descendant_is_retained_and_reduced() {
        let group = Step {
            children: vec![Step::new("a", "http_get"), Step::new("b", "http_get")],
            ..Step::new("group", "")
        };
        let filtered = filter_steps(&[group], &selected(&["b"]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "group");
        let child_ids: Vec<&str> = filtered[0].children.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(child_ids, vec!["b"]);
    }

    #[test]
    fn container_with_no_selected_descendant_is_dropped() {
        let group = Step {
            children: vec![Step::new("a", "http_get"), Step::new("b", "http_get")],
            ..Step::new("group", "")
        };
        let other = Step::new("checkout", "http_post");
        let filtered = filter_steps(&[group, other], &selected(&["checkout"]));
        let ids: Vec<&str> = filtered.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["checkout"]);
    }

    #[test]
    fn loop_body_is_reduced_like_a_children_container() {
        let looped = Step {
            loop_spec: Some(LoopSpec {
                mode: LoopMode::Count,
                count: Some(5),
                items: Vec::new(),
                condition: None,
                max_iterations: None,
                break_condition: None,
                continue_condition: None,
                steps: vec![Step::new("a", "http_get"), Step::new("b", "http_get")],
            }),
            ..Step::new("retry-loop", "")
        };
        let filtered = filter_steps(&[looped], &selected(&["a"]));
        assert_eq!(filtered.len(), 1);
        let loop_spec = filtered[0].loop_spec.as_ref().unwrap();
        let ids: Vec<&str> = loop_spec.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(loop_spec.count, Some(5), "reducing the body must not disturb the loop's own fields");
    }
}
