// SPDX-License-Identifier: MIT OR Apache-2.0
//! The master's session registry: tracks in-flight and recently-completed
//! executions for `GetExecutionStatus`, `StopExecution`, and listing.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use uuid::Uuid;

use wf_core::{Session, SessionStatus};
use wf_error::{WfError, WfErrorCode};

/// Default in-memory retention window after a session reaches a terminal
/// status, per spec §4.5 ("default 10 minutes in-memory, then externalized").
pub const DEFAULT_RETENTION_MS: i64 = 10 * 60 * 1000;

/// A session plus the listing metadata the registry indexes it by.
///
/// [`Session`] itself carries only what the wire protocol needs; the
/// `(workflow_id, user_id)` index key lives here instead of on the shared
/// wire type.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    /// The tracked session.
    pub session: Session,
    /// Identifier of the workflow this session is running.
    pub workflow_id: String,
    /// Identifier of the user who submitted this execution.
    pub user_id: String,
}

/// In-memory registry of [`SessionRecord`]s, indexed by id and by
/// `(workflow_id, user_id)`.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SessionRecord>>,
    by_workflow_and_user: Mutex<BTreeMap<(String, String), BTreeSet<Uuid>>>,
}

impl SessionRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            by_workflow_and_user: Mutex::new(BTreeMap::new()),
        }
    }

    /// Insert a newly-scheduled session.
    pub fn insert(&self, task_id: Uuid, workflow_id: impl Into<String>, user_id: impl Into<String>, now_ms: i64, ttl_ms: i64) -> Session {
        let session = Session::new(task_id, now_ms, ttl_ms);
        let workflow_id = workflow_id.into();
        let user_id = user_id.into();
        let record = SessionRecord { session: session.clone(), workflow_id: workflow_id.clone(), user_id: user_id.clone() };

        self.sessions.lock().expect("session registry lock poisoned").insert(session.id, record);
        self.by_workflow_and_user
            .lock()
            .expect("session index lock poisoned")
            .entry((workflow_id, user_id))
            .or_default()
            .insert(session.id);

        session
    }

    /// Fetch a session record by id.
    pub fn get(&self, session_id: Uuid) -> Option<SessionRecord> {
        self.sessions.lock().expect("session registry lock poisoned").get(&session_id).cloned()
    }

    /// Update a session's status, e.g. as `TaskUpdate`s arrive.
    ///
    /// Returns [`WfErrorCode::SessionNotFound`] if the session does not
    /// exist (or has already been garbage-collected).
    pub fn update_status(&self, session_id: Uuid, status: SessionStatus) -> Result<(), WfError> {
        let mut sessions = self.sessions.lock().expect("session registry lock poisoned");
        match sessions.get_mut(&session_id) {
            Some(record) => {
                record.session.status = status;
                Ok(())
            }
            None => Err(WfError::new(WfErrorCode::SessionNotFound, format!("session {session_id} not found"))),
        }
    }

    /// List sessions for a given `(workflow_id, user_id)` pair, most
    /// recently created first.
    pub fn list_for(&self, workflow_id: &str, user_id: &str) -> Vec<SessionRecord> {
        let index = self.by_workflow_and_user.lock().expect("session index lock poisoned");
        let Some(ids) = index.get(&(workflow_id.to_string(), user_id.to_string())) else {
            return Vec::new();
        };
        let sessions = self.sessions.lock().expect("session registry lock poisoned");
        let mut records: Vec<SessionRecord> = ids.iter().filter_map(|id| sessions.get(id).cloned()).collect();
        records.sort_by(|a, b| b.session.created_at_ms.cmp(&a.session.created_at_ms));
        records
    }

    /// Remove every session past its terminal-status retention window.
    /// Returns the number of sessions collected.
    pub fn gc(&self, now_ms: i64) -> usize {
        let mut sessions = self.sessions.lock().expect("session registry lock poisoned");
        let expired: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, record)| record.session.is_collectible(now_ms))
            .map(|(id, _)| *id)
            .collect();

        let mut index = self.by_workflow_and_user.lock().expect("session index lock poisoned");
        for id in &expired {
            if let Some(record) = sessions.remove(id) {
                if let Some(bucket) = index.get_mut(&(record.workflow_id, record.user_id)) {
                    bucket.remove(id);
                }
            }
        }
        expired.len()
    }

    /// Total number of tracked sessions (terminal or not).
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session registry lock poisoned").len()
    }

    /// Whether the registry currently tracks no sessions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_roundtrips() {
        let registry = SessionRegistry::new();
        let session = registry.insert(Uuid::new_v4(), "wf-1", "user-1", 0, DEFAULT_RETENTION_MS);
        let record = registry.get(session.id).unwrap();
        assert_eq!(record.workflow_id, "wf-1");
        assert_eq!(record.session.status, SessionStatus::Queued);
    }

    #[test]
    fn update_status_on_unknown_session_errors() {
        let registry = SessionRegistry::new();
        let err = registry.update_status(Uuid::new_v4(), SessionStatus::Running).unwrap_err();
        assert_eq!(err.code, WfErrorCode::SessionNotFound);
    }

    #[test]
    fn list_for_groups_by_workflow_and_user() {
        let registry = SessionRegistry::new();
        registry.insert(Uuid::new_v4(), "wf-1", "user-1", 0, DEFAULT_RETENTION_MS);
        registry.insert(Uuid::new_v4(), "wf-1", "user-1", 1, DEFAULT_RETENTION_MS);
        registry.insert(Uuid::new_v4(), "wf-1", "user-2", 0, DEFAULT_RETENTION_MS);

        assert_eq!(registry.list_for("wf-1", "user-1").len(), 2);
        assert_eq!(registry.list_for("wf-1", "user-2").len(), 1);
        assert!(registry.list_for("wf-2", "user-1").is_empty());
    }

    #[test]
    fn gc_only_collects_terminal_and_expired_sessions() {
        let registry = SessionRegistry::new();
        let running = registry.insert(Uuid::new_v4(), "wf-1", "user-1", 0, 1_000);
        let done = registry.insert(Uuid::new_v4(), "wf-1", "user-1", 0, 1_000);
        registry.update_status(running.id, SessionStatus::Running).unwrap();
        registry.update_status(done.id, SessionStatus::Completed).unwrap();

        assert_eq!(registry.gc(500), 0);
        assert_eq!(registry.gc(1_000), 1);
        assert!(registry.get(done.id).is_none());
        assert!(registry.get(running.id).is_some());
    }
}
