// SPDX-License-Identifier: MIT OR Apache-2.0
//! Worker lifecycle state machine — tracks and enforces valid transitions
//! between [`SlaveStatus`] values as the worker connects, takes on tasks,
//! and is asked to drain or stop.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use wf_core::SlaveStatus;

/// Record of a single lifecycle state transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleTransition {
    /// State before the transition.
    pub from: SlaveStatus,
    /// State after the transition.
    pub to: SlaveStatus,
    /// ISO-8601 timestamp of when the transition occurred.
    pub timestamp: String,
    /// Optional human-readable reason for the transition.
    pub reason: Option<String>,
}

/// Errors produced by [`LifecycleManager`] when a transition is invalid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    /// The requested transition is not allowed by the state machine.
    InvalidTransition {
        /// Current state.
        from: SlaveStatus,
        /// Requested target state.
        to: SlaveStatus,
    },
    /// The manager is already in the requested state.
    AlreadyInState(SlaveStatus),
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { from, to } => {
                write!(f, "invalid worker transition from {from:?} to {to:?}")
            }
            Self::AlreadyInState(s) => write!(f, "already in state {s:?}"),
        }
    }
}

impl std::error::Error for LifecycleError {}

/// Drives the worker through the state machine from §4.4:
///
/// ```text
/// offline --start-->     online
/// online  --connect-->   online  (+ connected=true, heartbeat started)
/// online  --task in-->   busy    (activeTasks > 0)
/// busy    --task done--> online  (activeTasks == 0)
/// *       --stop-->      offline (idempotent)
/// ```
#[derive(Debug)]
pub struct LifecycleManager {
    state: SlaveStatus,
    history: Vec<LifecycleTransition>,
    online_since: Option<Instant>,
}

impl LifecycleManager {
    /// Create a new manager, starting in [`SlaveStatus::Offline`].
    pub fn new() -> Self {
        Self {
            state: SlaveStatus::Offline,
            history: Vec::new(),
            online_since: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SlaveStatus {
        self.state
    }

    /// Attempt to transition to a new state.
    pub fn transition(&mut self, to: SlaveStatus, reason: Option<String>) -> Result<(), LifecycleError> {
        if self.state == to {
            return Err(LifecycleError::AlreadyInState(to));
        }
        if !self.can_transition(to) {
            return Err(LifecycleError::InvalidTransition { from: self.state, to });
        }

        let from = self.state;
        self.state = to;

        if to == SlaveStatus::Online && self.online_since.is_none() {
            self.online_since = Some(Instant::now());
        }
        if to == SlaveStatus::Offline {
            self.online_since = None;
        }

        self.history.push(LifecycleTransition {
            from,
            to,
            timestamp: chrono::Utc::now().to_rfc3339(),
            reason,
        });

        Ok(())
    }

    /// Returns `true` if transitioning from the current state to `to` is valid.
    ///
    /// Stopping (going `Offline`) is always allowed, from any state.
    pub fn can_transition(&self, to: SlaveStatus) -> bool {
        if to == SlaveStatus::Offline {
            return true;
        }
        matches!(
            (self.state, to),
            (SlaveStatus::Offline, SlaveStatus::Online)
                | (SlaveStatus::Online, SlaveStatus::Busy)
                | (SlaveStatus::Online, SlaveStatus::Draining)
                | (SlaveStatus::Busy, SlaveStatus::Online)
                | (SlaveStatus::Busy, SlaveStatus::Draining)
                | (SlaveStatus::Draining, SlaveStatus::Online)
        )
    }

    /// Full history of state transitions.
    pub fn history(&self) -> &[LifecycleTransition] {
        &self.history
    }

    /// Time elapsed since the worker last became [`SlaveStatus::Online`].
    ///
    /// Returns `None` while offline.
    pub fn uptime(&self) -> Option<std::time::Duration> {
        self.online_since.map(|t| t.elapsed())
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_offline() {
        let mgr = LifecycleManager::new();
        assert_eq!(mgr.state(), SlaveStatus::Offline);
        assert!(mgr.uptime().is_none());
    }

    #[test]
    fn start_then_task_in_then_task_done() {
        let mut mgr = LifecycleManager::new();
        mgr.transition(SlaveStatus::Online, Some("connected".into())).unwrap();
        assert!(mgr.uptime().is_some());
        mgr.transition(SlaveStatus::Busy, Some("task assigned".into())).unwrap();
        mgr.transition(SlaveStatus::Online, Some("task finished".into())).unwrap();
        assert_eq!(mgr.state(), SlaveStatus::Online);
        assert_eq!(mgr.history().len(), 3);
    }

    #[test]
    fn stop_is_allowed_from_any_state() {
        let mut mgr = LifecycleManager::new();
        mgr.transition(SlaveStatus::Online, None).unwrap();
        mgr.transition(SlaveStatus::Busy, None).unwrap();
        mgr.transition(SlaveStatus::Offline, Some("stop".into())).unwrap();
        assert_eq!(mgr.state(), SlaveStatus::Offline);
        assert!(mgr.uptime().is_none());
    }

    #[test]
    fn stop_is_idempotent_via_already_in_state() {
        let mut mgr = LifecycleManager::new();
        let err = mgr.transition(SlaveStatus::Offline, None).unwrap_err();
        assert_eq!(err, LifecycleError::AlreadyInState(SlaveStatus::Offline));
    }

    #[test]
    fn cannot_go_straight_from_offline_to_busy() {
        let mgr_err = {
            let mut mgr = LifecycleManager::new();
            mgr.transition(SlaveStatus::Busy, None).unwrap_err()
        };
        assert_eq!(
            mgr_err,
            LifecycleError::InvalidTransition {
                from: SlaveStatus::Offline,
                to: SlaveStatus::Busy,
            }
        );
    }

    #[test]
    fn draining_returns_to_online_not_busy() {
        let mut mgr = LifecycleManager::new();
        mgr.transition(SlaveStatus::Online, None).unwrap();
        mgr.transition(SlaveStatus::Draining, None).unwrap();
        assert!(!mgr.can_transition(SlaveStatus::Busy));
        mgr.transition(SlaveStatus::Online, None).unwrap();
        assert_eq!(mgr.state(), SlaveStatus::Online);
    }
}
