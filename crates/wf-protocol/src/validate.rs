// SPDX-License-Identifier: MIT OR Apache-2.0
//! Envelope validation: hard rule violations versus soft warnings.

use std::fmt;

use crate::{version, Envelope};

/// Recommended maximum serialized size (bytes) for a single envelope
/// payload.
const MAX_RECOMMENDED_PAYLOAD: usize = 10 * 1024 * 1024;

/// A hard violation of protocol rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    EmptyField {
        /// Name of the empty field.
        field: String,
    },
    /// `contract_version` could not be parsed as a valid protocol version.
    InvalidVersion {
        /// The version string that failed to parse.
        version: String,
    },
    /// A field's value is out of the accepted range.
    InvalidValue {
        /// Name of the field.
        field: String,
        /// Description of what was expected.
        expected: String,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyField { field } => write!(f, "field must not be empty: {field}"),
            Self::InvalidVersion { version } => write!(f, "invalid protocol version: \"{version}\""),
            Self::InvalidValue { field, expected } => write!(f, "invalid value for {field}: expected {expected}"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A non-fatal observation about an otherwise-valid envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// The serialized envelope exceeds the recommended size.
    LargePayload {
        /// Actual size in bytes.
        size: usize,
        /// Recommended maximum size in bytes.
        max_recommended: usize,
    },
    /// The peer's minor version differs from ours (still compatible).
    MinorVersionDrift {
        /// The peer's advertised version.
        remote: String,
    },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LargePayload { size, max_recommended } => {
                write!(f, "payload size {size} bytes exceeds recommended maximum of {max_recommended} bytes")
            }
            Self::MinorVersionDrift { remote } => write!(f, "peer minor version drift: {remote}"),
        }
    }
}

/// Validates individual [`Envelope`] values against protocol invariants.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeValidator;

impl EnvelopeValidator {
    /// Check `envelope` for hard violations.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    pub fn validate(&self, envelope: &Envelope) -> Result<(), ValidationError> {
        match envelope {
            Envelope::Register {
                slave_id,
                address,
                contract_version,
                resources,
                ..
            } => {
                if slave_id.is_empty() {
                    return Err(ValidationError::EmptyField { field: "slave_id".into() });
                }
                if address.is_empty() {
                    return Err(ValidationError::EmptyField { field: "address".into() });
                }
                if version::parse_version(contract_version).is_none() {
                    return Err(ValidationError::InvalidVersion {
                        version: contract_version.clone(),
                    });
                }
                if resources.max_vus == 0 {
                    return Err(ValidationError::InvalidValue {
                        field: "resources.max_vus".into(),
                        expected: "a positive integer".into(),
                    });
                }
            }
            Envelope::Heartbeat { slave_id, .. } => {
                if slave_id.is_empty() {
                    return Err(ValidationError::EmptyField { field: "slave_id".into() });
                }
            }
            Envelope::RegisterAck { assigned_id, .. } => {
                if assigned_id.is_empty() {
                    return Err(ValidationError::EmptyField { field: "assigned_id".into() });
                }
            }
            Envelope::Fatal { error, .. } => {
                if error.is_empty() {
                    return Err(ValidationError::EmptyField { field: "error".into() });
                }
            }
            Envelope::TaskAssignment { .. }
            | Envelope::TaskUpdate { .. }
            | Envelope::MetricsReport { .. }
            | Envelope::MetricsAck { .. }
            | Envelope::HeartbeatAck { .. } => {}
        }
        Ok(())
    }

    /// Collect soft warnings about `envelope` that don't block processing.
    #[must_use]
    pub fn warnings(&self, envelope: &Envelope) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        if let Ok(bytes) = serde_json::to_vec(envelope) {
            if bytes.len() > MAX_RECOMMENDED_PAYLOAD {
                warnings.push(ValidationWarning::LargePayload {
                    size: bytes.len(),
                    max_recommended: MAX_RECOMMENDED_PAYLOAD,
                });
            }
        }
        if let Envelope::Register { contract_version, .. } = envelope {
            if let Some((_, minor)) = version::parse_version(contract_version) {
                let (_, our_minor) = version::parse_version(crate::CONTRACT_VERSION).expect("valid constant");
                if minor != our_minor {
                    warnings.push(ValidationWarning::MinorVersionDrift {
                        remote: contract_version.clone(),
                    });
                }
            }
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceInfo;

    fn valid_register() -> Envelope {
        Envelope::register(
            "w1",
            "vu-runner",
            "10.0.0.1:9000",
            ResourceInfo {
                cpu_cores: 4,
                memory_mb: 4096,
                max_vus: 100,
                current_load: 0.0,
            },
        )
    }

    #[test]
    fn accepts_well_formed_register() {
        assert!(EnvelopeValidator.validate(&valid_register()).is_ok());
    }

    #[test]
    fn rejects_empty_slave_id() {
        let env = Envelope::register(
            "",
            "vu-runner",
            "addr",
            ResourceInfo {
                cpu_cores: 1,
                memory_mb: 1,
                max_vus: 1,
                current_load: 0.0,
            },
        );
        assert_eq!(
            EnvelopeValidator.validate(&env),
            Err(ValidationError::EmptyField { field: "slave_id".into() })
        );
    }

    #[test]
    fn rejects_zero_max_vus() {
        let env = Envelope::register(
            "w1",
            "vu-runner",
            "addr",
            ResourceInfo {
                cpu_cores: 1,
                memory_mb: 1,
                max_vus: 0,
                current_load: 0.0,
            },
        );
        assert!(EnvelopeValidator.validate(&env).is_err());
    }

    #[test]
    fn flags_minor_version_drift_as_warning_not_error() {
        let mut env = valid_register();
        if let Envelope::Register { contract_version, .. } = &mut env {
            *contract_version = "wf/v1.9".into();
        }
        assert!(EnvelopeValidator.validate(&env).is_ok());
        assert!(EnvelopeValidator.warnings(&env).iter().any(|w| matches!(w, ValidationWarning::MinorVersionDrift { .. })));
    }
}
