// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured protocol version negotiation.
//!
//! Provides [`ProtocolVersion`] and [`negotiate_version`] for type-safe
//! version handling, plus the free-function equivalents
//! [`parse_version`]/[`is_compatible_version`] used where a plain string is
//! more convenient (e.g. inside [`crate::Envelope::Register`] handling).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::CONTRACT_VERSION;

/// Errors that can occur when parsing or negotiating protocol versions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// The string was not of the form `"wf/vMAJOR.MINOR"`.
    #[error("invalid version format (expected \"wf/vMAJOR.MINOR\")")]
    InvalidFormat,
    /// The major component was not a valid integer.
    #[error("invalid major version component")]
    InvalidMajor,
    /// The minor component was not a valid integer.
    #[error("invalid minor version component")]
    InvalidMinor,
    /// The major versions differ, so no compatible version exists.
    #[error("incompatible protocol versions: local {local}, remote {remote}")]
    Incompatible {
        /// This side's version.
        local: ProtocolVersion,
        /// The peer's version.
        remote: ProtocolVersion,
    },
}

/// A parsed `"wf/vMAJOR.MINOR"` protocol version.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Major component. A mismatch between peers is always incompatible.
    pub major: u32,
    /// Minor component. Newer minors are expected to stay backward compatible.
    pub minor: u32,
}

impl ProtocolVersion {
    /// Parse a version string of the form `"wf/vMAJOR.MINOR"`.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] if the string does not match the expected
    /// format.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        let rest = s.strip_prefix("wf/v").ok_or(VersionError::InvalidFormat)?;
        let (major_str, minor_str) = rest.split_once('.').ok_or(VersionError::InvalidFormat)?;
        let major = major_str.parse::<u32>().map_err(|_| VersionError::InvalidMajor)?;
        let minor = minor_str.parse::<u32>().map_err(|_| VersionError::InvalidMinor)?;
        Ok(Self { major, minor })
    }

    /// Two versions are compatible when they share the same major version.
    /// A warning (not an error) is appropriate when the minors differ; the
    /// major must match or the peers are rejected outright.
    #[must_use]
    pub fn is_compatible(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }

    /// The [`ProtocolVersion`] corresponding to [`CONTRACT_VERSION`].
    #[must_use]
    pub fn current() -> Self {
        Self::parse(CONTRACT_VERSION).expect("CONTRACT_VERSION must be a valid version string")
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wf/v{}.{}", self.major, self.minor)
    }
}

/// Negotiate the effective protocol version between a local and remote peer.
///
/// Returns the lesser of the two minors when the majors match (the older
/// peer's feature set is the common ground); a major mismatch is always
/// fatal to the connection.
///
/// # Errors
///
/// Returns [`VersionError::Incompatible`] when the major versions differ.
pub fn negotiate_version(local: &ProtocolVersion, remote: &ProtocolVersion) -> Result<ProtocolVersion, VersionError> {
    if local.major != remote.major {
        return Err(VersionError::Incompatible {
            local: local.clone(),
            remote: remote.clone(),
        });
    }
    Ok(std::cmp::min(local, remote).clone())
}

/// Parse a version string of the form `"wf/vMAJOR.MINOR"` into `(MAJOR, MINOR)`.
///
/// Returns `None` if the string does not match the expected format.
#[must_use]
pub fn parse_version(version: &str) -> Option<(u32, u32)> {
    let rest = version.strip_prefix("wf/v")?;
    let (major_str, minor_str) = rest.split_once('.')?;
    let major = major_str.parse::<u32>().ok()?;
    let minor = minor_str.parse::<u32>().ok()?;
    Some((major, minor))
}

/// Two versions are compatible when they share the same major component.
///
/// Returns `false` if either string cannot be parsed.
#[must_use]
pub fn is_compatible_version(their_version: &str, our_version: &str) -> bool {
    match (parse_version(their_version), parse_version(our_version)) {
        (Some((their_major, _)), Some((our_major, _))) => their_major == our_major,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_version() {
        assert_eq!(ProtocolVersion::parse("wf/v1.2"), Ok(ProtocolVersion { major: 1, minor: 2 }));
    }

    #[test]
    fn rejects_malformed_version() {
        assert_eq!(ProtocolVersion::parse("wf1.2"), Err(VersionError::InvalidFormat));
        assert_eq!(ProtocolVersion::parse("wf/v1"), Err(VersionError::InvalidFormat));
        assert_eq!(ProtocolVersion::parse("wf/vx.2"), Err(VersionError::InvalidMajor));
    }

    #[test]
    fn negotiate_returns_lesser_minor_on_matching_major() {
        let local = ProtocolVersion { major: 1, minor: 3 };
        let remote = ProtocolVersion { major: 1, minor: 1 };
        assert_eq!(negotiate_version(&local, &remote).unwrap(), remote);
    }

    #[test]
    fn negotiate_rejects_major_mismatch() {
        let local = ProtocolVersion { major: 1, minor: 0 };
        let remote = ProtocolVersion { major: 2, minor: 0 };
        assert!(matches!(negotiate_version(&local, &remote), Err(VersionError::Incompatible { .. })));
    }

    #[test]
    fn free_functions_match_current_contract_version() {
        let (major, minor) = parse_version(CONTRACT_VERSION).unwrap();
        assert_eq!((major, minor), (1, 0));
        assert!(is_compatible_version("wf/v1.9", CONTRACT_VERSION));
        assert!(!is_compatible_version("wf/v2.0", CONTRACT_VERSION));
    }
}
