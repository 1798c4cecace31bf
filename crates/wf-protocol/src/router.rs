// SPDX-License-Identifier: MIT OR Apache-2.0
//! Message routing for dispatching envelopes to named destinations.

use serde::{Deserialize, Serialize};

use crate::Envelope;

/// A single routing rule mapping a pattern to a destination handler.
///
/// `pattern` is matched against the envelope's wire type name (`register`,
/// `heartbeat`, `task_assignment`, ...) or, for envelopes that carry a task
/// or execution id, against an id prefix. Higher `priority` values are
/// evaluated first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRoute {
    /// Matching pattern: envelope type or id prefix.
    pub pattern: String,
    /// Target handler name.
    pub destination: String,
    /// Higher values are evaluated first.
    pub priority: u32,
}

/// The result of successfully routing one envelope.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// The route that matched.
    pub route: MessageRoute,
    /// The envelope that was matched.
    pub envelope: Envelope,
}

/// Return the wire-level type name for an [`Envelope`] variant.
#[must_use]
pub fn envelope_type(env: &Envelope) -> &'static str {
    match env {
        Envelope::Register { .. } => "register",
        Envelope::RegisterAck { .. } => "register_ack",
        Envelope::Heartbeat { .. } => "heartbeat",
        Envelope::HeartbeatAck { .. } => "heartbeat_ack",
        Envelope::TaskAssignment { .. } => "task_assignment",
        Envelope::TaskUpdate { .. } => "task_update",
        Envelope::MetricsReport { .. } => "metrics_report",
        Envelope::MetricsAck { .. } => "metrics_ack",
        Envelope::Fatal { .. } => "fatal",
    }
}

/// Return the task/execution id carried by the envelope, if any, as a
/// string suitable for prefix matching.
#[must_use]
pub fn envelope_ref_id(env: &Envelope) -> Option<String> {
    match env {
        Envelope::TaskAssignment { task } => Some(task.id.to_string()),
        Envelope::TaskUpdate { task_id, .. } => Some(task_id.to_string()),
        Envelope::MetricsReport { execution_id, .. } | Envelope::MetricsAck { execution_id, .. } => {
            Some(execution_id.to_string())
        }
        Envelope::Fatal { ref_id, .. } => ref_id.clone(),
        Envelope::Register { slave_id, .. } | Envelope::Heartbeat { slave_id, .. } => Some(slave_id.clone()),
        Envelope::RegisterAck { assigned_id, .. } => Some(assigned_id.clone()),
        Envelope::HeartbeatAck { .. } => None,
    }
}

fn matches(route: &MessageRoute, envelope: &Envelope) -> bool {
    if route.pattern == envelope_type(envelope) {
        return true;
    }
    if let Some(id) = envelope_ref_id(envelope) {
        if id.starts_with(&route.pattern) {
            return true;
        }
    }
    false
}

/// Dispatches envelopes to destinations based on a prioritised set of
/// routes.
#[derive(Debug, Clone, Default)]
pub struct MessageRouter {
    routes: Vec<MessageRoute>,
}

impl MessageRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new route. Routes are kept sorted by descending priority
    /// so [`Self::route`] always returns the highest-priority match.
    pub fn add_route(&mut self, route: MessageRoute) {
        self.routes.push(route);
        self.routes.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Find the highest-priority route matching `envelope`, if any.
    #[must_use]
    pub fn route(&self, envelope: Envelope) -> Option<RouteMatch> {
        self.routes
            .iter()
            .find(|r| matches(r, &envelope))
            .cloned()
            .map(|route| RouteMatch { route, envelope })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceInfo;

    fn register() -> Envelope {
        Envelope::register(
            "w1",
            "vu-runner",
            "addr",
            ResourceInfo {
                cpu_cores: 1,
                memory_mb: 1,
                max_vus: 1,
                current_load: 0.0,
            },
        )
    }

    #[test]
    fn routes_by_type_pattern() {
        let mut router = MessageRouter::new();
        router.add_route(MessageRoute {
            pattern: "register".into(),
            destination: "registry".into(),
            priority: 1,
        });
        let matched = router.route(register()).unwrap();
        assert_eq!(matched.route.destination, "registry");
    }

    #[test]
    fn higher_priority_route_wins() {
        let mut router = MessageRouter::new();
        router.add_route(MessageRoute {
            pattern: "register".into(),
            destination: "low".into(),
            priority: 1,
        });
        router.add_route(MessageRoute {
            pattern: "register".into(),
            destination: "high".into(),
            priority: 10,
        });
        let matched = router.route(register()).unwrap();
        assert_eq!(matched.route.destination, "high");
    }

    #[test]
    fn no_match_returns_none() {
        let router = MessageRouter::new();
        assert!(router.route(register()).is_none());
    }
}
