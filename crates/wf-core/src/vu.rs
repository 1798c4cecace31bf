//! Virtual-user handle types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of one virtual user inside a [`crate::task::Task`]'s pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VuState {
    /// Sitting in the pool, not currently running an iteration.
    Idle,
    /// Currently executing a workflow iteration.
    Busy,
    /// Finished its assigned work (e.g. reached its iteration count).
    Done,
    /// Terminated because of a fatal error.
    Failed,
}

/// A handle identifying one virtual user within a pool.
///
/// `index` is stable for the lifetime of the task and is used to derive
/// per-VU iteration counts in `per_vu_iterations` mode; `id` is unique
/// across the whole process and is what result/metrics records key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VirtualUser {
    /// Process-unique identifier.
    pub id: Uuid,
    /// Zero-based slot index within the pool.
    pub index: u32,
    /// Current lifecycle state.
    pub state: VuState,
}

impl VirtualUser {
    /// Create a new, idle virtual user at the given pool slot.
    pub fn new(index: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            index,
            state: VuState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_vu_is_idle() {
        let vu = VirtualUser::new(3);
        assert_eq!(vu.index, 3);
        assert_eq!(vu.state, VuState::Idle);
    }

    #[test]
    fn vu_state_serde_tags() {
        assert_eq!(serde_json::to_string(&VuState::Busy).unwrap(), r#""busy""#);
    }
}
