//! Session registry state for the master's execution tracking.

use crate::result::TaskStatus;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a scheduler-tracked session.
///
/// Mirrors [`TaskStatus`] but is kept as a distinct type: a session can
/// outlive its underlying task (e.g. while results are still being
/// drained for a blocking caller) and its `is_terminal` definition follows
/// the session's own GC rules, not the task's.
pub type SessionStatus = TaskStatus;

/// Tracks one in-flight or recently-completed execution for the purposes of
/// SSE/blocking dispatch and interactive step submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Session {
    /// Session identifier, handed back to the caller at submission time.
    pub id: Uuid,
    /// The task this session is tracking.
    pub task_id: Uuid,
    /// Current status, mirrored from the latest `TaskResult`.
    pub status: SessionStatus,
    /// Milliseconds since the Unix epoch when the session was created.
    pub created_at_ms: i64,
    /// Milliseconds since the Unix epoch after which the session becomes
    /// eligible for garbage collection once terminal.
    pub expires_at_ms: i64,
}

impl Session {
    /// Create a new queued session for `task_id`, expiring `ttl_ms`
    /// milliseconds after `now_ms` once it reaches a terminal status.
    pub fn new(task_id: Uuid, now_ms: i64, ttl_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            status: SessionStatus::Queued,
            created_at_ms: now_ms,
            expires_at_ms: now_ms + ttl_ms,
        }
    }

    /// Whether this session is eligible for garbage collection at `now_ms`:
    /// it must be in a terminal status and past its expiry.
    pub fn is_collectible(&self, now_ms: i64) -> bool {
        self.status.is_terminal() && now_ms >= self.expires_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_terminal_session_never_collectible() {
        let mut s = Session::new(Uuid::new_v4(), 0, 1_000);
        s.status = SessionStatus::Running;
        assert!(!s.is_collectible(10_000_000));
    }

    #[test]
    fn terminal_session_collectible_after_expiry() {
        let mut s = Session::new(Uuid::new_v4(), 0, 1_000);
        s.status = SessionStatus::Completed;
        assert!(!s.is_collectible(500));
        assert!(s.is_collectible(1_000));
        assert!(s.is_collectible(5_000));
    }
}
