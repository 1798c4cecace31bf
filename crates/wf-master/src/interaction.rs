// SPDX-License-Identifier: MIT OR Apache-2.0
//! Interactive-step support: a step can park its driver on a prompt and wait
//! for an operator-submitted response, correlated by session and a
//! per-prompt id.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use wf_error::{WfError, WfErrorCode};

/// The value an operator submits in answer to an `interaction-required`
/// event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionResponse {
    /// Operator-supplied value, shape defined by the prompting step.
    pub value: serde_json::Value,
    /// `true` if the operator chose to skip rather than answer.
    pub skipped: bool,
}

/// Tracks outstanding interaction prompts and delivers operator responses to
/// whichever driver is parked waiting for them.
///
/// One-shot per prompt, matching the spec's "per-session one-shot channel"
/// wording: each `(session_id, correlation_id)` pair gets exactly one
/// [`oneshot::Receiver`], consumed by a single `await`.
pub struct InteractionBroker {
    pending: Mutex<HashMap<(Uuid, Uuid), oneshot::Sender<InteractionResponse>>>,
}

impl InteractionBroker {
    /// Build an empty broker.
    pub fn new() -> Self {
        Self { pending: Mutex::new(HashMap::new()) }
    }

    /// Register a new prompt and return the receiver a driver should await.
    ///
    /// If cancellation or a session timeout occurs first, the caller should
    /// drop the receiver (or race it against a cancellation future) and call
    /// [`InteractionBroker::cancel`] to clean up the pending entry.
    pub fn prompt(&self, session_id: Uuid, correlation_id: Uuid) -> oneshot::Receiver<InteractionResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("interaction broker lock poisoned").insert((session_id, correlation_id), tx);
        rx
    }

    /// Deliver an operator's response to the matching pending prompt.
    ///
    /// Returns [`WfErrorCode::SessionNotFound`] if there is no pending
    /// prompt for this `(session_id, correlation_id)` pair (already
    /// answered, cancelled, or never registered).
    pub fn submit(&self, session_id: Uuid, correlation_id: Uuid, response: InteractionResponse) -> Result<(), WfError> {
        let sender = self.pending.lock().expect("interaction broker lock poisoned").remove(&(session_id, correlation_id));
        match sender {
            Some(tx) => tx.send(response).map_err(|_| {
                WfError::new(WfErrorCode::SessionNotFound, "interaction receiver was dropped before a response arrived")
            }),
            None => Err(WfError::new(WfErrorCode::SessionNotFound, "no pending interaction for this session/correlation id")),
        }
    }

    /// Drop a pending prompt without delivering a response, e.g. because the
    /// session was cancelled or timed out. A no-op if already answered.
    pub fn cancel(&self, session_id: Uuid, correlation_id: Uuid) {
        self.pending.lock().expect("interaction broker lock poisoned").remove(&(session_id, correlation_id));
    }

    /// Number of prompts currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("interaction broker lock poisoned").len()
    }
}

impl Default for InteractionBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_delivers_to_the_waiting_receiver() {
        let broker = InteractionBroker::new();
        let session_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();
        let rx = broker.prompt(session_id, correlation_id);

        broker
            .submit(session_id, correlation_id, InteractionResponse { value: serde_json::json!("yes"), skipped: false })
            .unwrap();

        let response = rx.await.unwrap();
        assert_eq!(response.value, serde_json::json!("yes"));
        assert!(!response.skipped);
        assert_eq!(broker.pending_count(), 0);
    }

    #[test]
    fn submit_without_a_pending_prompt_errors() {
        let broker = InteractionBroker::new();
        let err = broker.submit(Uuid::new_v4(), Uuid::new_v4(), InteractionResponse { value: serde_json::Value::Null, skipped: true }).unwrap_err();
        assert_eq!(err.code, WfErrorCode::SessionNotFound);
    }

    #[tokio::test]
    async fn cancel_drops_the_prompt_so_the_receiver_sees_a_closed_channel() {
        let broker = InteractionBroker::new();
        let session_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();
        let rx = broker.prompt(session_id, correlation_id);

        broker.cancel(session_id, correlation_id);
        assert!(rx.await.is_err());
    }
}
