// SPDX-License-Identifier: MIT OR Apache-2.0
//! Health monitoring for the worker's outbound connections and internal
//! subsystems (currently just the connection to the master, but the
//! monitor is keyed by name so other checks can be added later).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Health status of a monitored check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Running but experiencing issues.
    Degraded {
        /// Description of the degradation.
        reason: String,
    },
    /// Not functioning correctly.
    Unhealthy {
        /// Description of the failure.
        reason: String,
    },
    /// Health has not been determined yet.
    Unknown,
}

/// Result of a single health check.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Name identifying the check (e.g. `"master-connection"`).
    pub name: String,
    /// Current health status.
    pub status: HealthStatus,
    /// When this check was last performed.
    pub last_checked: DateTime<Utc>,
    /// How long the check took, if measured.
    #[serde(default, skip_serializing_if = "Option::is_none", with = "wf_duration::option_duration_millis")]
    pub response_time: Option<Duration>,
    /// Number of consecutive failures recorded.
    pub consecutive_failures: u32,
}

/// Aggregated health report across all monitored checks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthReport {
    /// Rolled-up status across every check.
    pub overall: HealthStatus,
    /// Individual check results.
    pub checks: Vec<HealthCheck>,
    /// When this report was generated.
    pub generated_at: DateTime<Utc>,
}

/// Tracks health history for named checks and rolls them up into an overall
/// status.
#[derive(Debug)]
pub struct HealthMonitor {
    checks: BTreeMap<String, HealthCheck>,
    history: BTreeMap<String, Vec<bool>>,
}

impl HealthMonitor {
    /// Create a new, empty health monitor.
    pub fn new() -> Self {
        Self {
            checks: BTreeMap::new(),
            history: BTreeMap::new(),
        }
    }

    /// Record the result of a health check by name.
    pub fn record_check(&mut self, name: &str, status: HealthStatus, response_time: Option<Duration>) {
        let is_healthy = matches!(status, HealthStatus::Healthy);
        let consecutive_failures = if is_healthy {
            0
        } else {
            self.checks.get(name).map_or(1, |prev| prev.consecutive_failures + 1)
        };

        self.checks.insert(
            name.to_string(),
            HealthCheck {
                name: name.to_string(),
                status,
                last_checked: Utc::now(),
                response_time,
                consecutive_failures,
            },
        );

        self.history.entry(name.to_string()).or_default().push(is_healthy);
    }

    /// Get the latest health check by name.
    pub fn get_status(&self, name: &str) -> Option<&HealthCheck> {
        self.checks.get(name)
    }

    /// Returns `true` if every tracked check is currently `Healthy`.
    pub fn all_healthy(&self) -> bool {
        !self.checks.is_empty() && self.checks.values().all(|c| matches!(c.status, HealthStatus::Healthy))
    }

    /// Return references to all checks currently `Unhealthy`.
    pub fn unhealthy_checks(&self) -> Vec<&HealthCheck> {
        self.checks
            .values()
            .filter(|c| matches!(c.status, HealthStatus::Unhealthy { .. }))
            .collect()
    }

    /// Number of checks being tracked.
    pub fn total_checks(&self) -> usize {
        self.checks.len()
    }

    /// Percentage of historical checks that were healthy (0.0-100.0).
    ///
    /// Returns `0.0` if no history exists for the given name.
    pub fn uptime_percentage(&self, name: &str) -> f64 {
        match self.history.get(name) {
            Some(h) if !h.is_empty() => {
                let healthy = h.iter().filter(|&&ok| ok).count();
                (healthy as f64 / h.len() as f64) * 100.0
            }
            _ => 0.0,
        }
    }

    /// Generate a point-in-time report of all monitored checks.
    pub fn generate_report(&self) -> HealthReport {
        let checks: Vec<HealthCheck> = self.checks.values().cloned().collect();
        let overall = Self::compute_overall(&checks);
        HealthReport {
            overall,
            checks,
            generated_at: Utc::now(),
        }
    }

    fn compute_overall(checks: &[HealthCheck]) -> HealthStatus {
        if checks.is_empty() {
            return HealthStatus::Unknown;
        }
        if checks.iter().any(|c| matches!(c.status, HealthStatus::Unhealthy { .. })) {
            return HealthStatus::Unhealthy {
                reason: "one or more checks unhealthy".into(),
            };
        }
        if checks.iter().any(|c| matches!(c.status, HealthStatus::Degraded { .. })) {
            return HealthStatus::Degraded {
                reason: "one or more checks degraded".into(),
            };
        }
        if checks.iter().any(|c| matches!(c.status, HealthStatus::Unknown)) {
            return HealthStatus::Unknown;
        }
        HealthStatus::Healthy
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_monitor_has_no_checks() {
        let monitor = HealthMonitor::new();
        assert!(!monitor.all_healthy());
        assert_eq!(monitor.total_checks(), 0);
    }

    #[test]
    fn consecutive_failures_reset_on_success() {
        let mut monitor = HealthMonitor::new();
        monitor.record_check(
            "master-connection",
            HealthStatus::Unhealthy { reason: "dial failed".into() },
            None,
        );
        monitor.record_check(
            "master-connection",
            HealthStatus::Unhealthy { reason: "dial failed".into() },
            None,
        );
        assert_eq!(monitor.get_status("master-connection").unwrap().consecutive_failures, 2);
        monitor.record_check("master-connection", HealthStatus::Healthy, Some(Duration::from_millis(5)));
        assert_eq!(monitor.get_status("master-connection").unwrap().consecutive_failures, 0);
    }

    #[test]
    fn uptime_percentage_tracks_history() {
        let mut monitor = HealthMonitor::new();
        monitor.record_check("master-connection", HealthStatus::Healthy, None);
        monitor.record_check("master-connection", HealthStatus::Unhealthy { reason: "x".into() }, None);
        assert!((monitor.uptime_percentage("master-connection") - 50.0).abs() < 1e-9);
        assert_eq!(monitor.uptime_percentage("unknown-check"), 0.0);
    }

    #[test]
    fn overall_report_reflects_worst_check() {
        let mut monitor = HealthMonitor::new();
        monitor.record_check("a", HealthStatus::Healthy, None);
        monitor.record_check("b", HealthStatus::Degraded { reason: "slow".into() }, None);
        let report = monitor.generate_report();
        assert_eq!(report.overall, HealthStatus::Degraded { reason: "one or more checks degraded".into() });
    }
}
