// SPDX-License-Identifier: MIT OR Apache-2.0
//! Builder patterns for constructing [`Envelope`] variants ergonomically.
//!
//! # Examples
//!
//! ```
//! use wf_protocol::builder::EnvelopeBuilder;
//!
//! let envelope = EnvelopeBuilder::register("worker-1")
//!     .kind("vu-runner")
//!     .address("10.0.0.1:9000")
//!     .max_vus(100)
//!     .build()
//!     .unwrap();
//! ```

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

use crate::{Envelope, ResourceInfo, TaskUpdateKind, CONTRACT_VERSION};

/// Errors that can occur when building an [`Envelope`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    /// A required field was not set.
    MissingField(&'static str),
}

impl fmt::Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderError::MissingField(field) => write!(f, "missing required field: {field}"),
        }
    }
}

impl std::error::Error for BuilderError {}

/// Entry point for building [`Envelope`] variants.
pub struct EnvelopeBuilder;

impl EnvelopeBuilder {
    /// Start building a `Register` envelope for `slave_id`.
    #[must_use]
    pub fn register(slave_id: impl Into<String>) -> RegisterBuilder {
        RegisterBuilder {
            slave_id: slave_id.into(),
            kind: None,
            address: None,
            labels: BTreeMap::new(),
            capabilities: Vec::new(),
            cpu_cores: None,
            memory_mb: None,
            max_vus: None,
        }
    }

    /// Start building a `Heartbeat` envelope with a `status` already known.
    #[must_use]
    pub fn heartbeat(slave_id: impl Into<String>, status: wf_core::SlaveStatus) -> Envelope {
        Envelope::Heartbeat {
            slave_id: slave_id.into(),
            status,
        }
    }

    /// Start building a `TaskAssignment` envelope.
    #[must_use]
    pub fn task_assignment(task: wf_core::Task) -> Envelope {
        Envelope::TaskAssignment { task }
    }

    /// Start building a `TaskUpdate` envelope.
    #[must_use]
    pub fn task_update(task_id: Uuid, update: TaskUpdateKind) -> Envelope {
        Envelope::TaskUpdate { task_id, update }
    }

    /// Start building a `Fatal` envelope with the given error message.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> FatalBuilder {
        FatalBuilder {
            ref_id: None,
            message: message.into(),
        }
    }
}

/// Fluent builder for a `Register` envelope.
pub struct RegisterBuilder {
    slave_id: String,
    kind: Option<String>,
    address: Option<String>,
    labels: BTreeMap<String, String>,
    capabilities: Vec<String>,
    cpu_cores: Option<u32>,
    memory_mb: Option<u32>,
    max_vus: Option<u32>,
}

impl RegisterBuilder {
    /// Set the worker kind/flavor.
    #[must_use]
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Set the dialable address.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Add a scheduling label.
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add a supported capability.
    #[must_use]
    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    /// Set CPU core count (defaults to 1 if never called).
    #[must_use]
    pub fn cpu_cores(mut self, cores: u32) -> Self {
        self.cpu_cores = Some(cores);
        self
    }

    /// Set memory budget in megabytes (defaults to 4096 if never called).
    #[must_use]
    pub fn memory_mb(mut self, mb: u32) -> Self {
        self.memory_mb = Some(mb);
        self
    }

    /// Set the maximum VU count.
    #[must_use]
    pub fn max_vus(mut self, max_vus: u32) -> Self {
        self.max_vus = Some(max_vus);
        self
    }

    /// Build the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::MissingField`] if `address` or `kind` was
    /// never set.
    pub fn build(self) -> Result<Envelope, BuilderError> {
        let kind = self.kind.ok_or(BuilderError::MissingField("kind"))?;
        let address = self.address.ok_or(BuilderError::MissingField("address"))?;
        Ok(Envelope::Register {
            slave_id: self.slave_id,
            kind,
            capabilities: self.capabilities,
            labels: self.labels,
            address,
            resources: ResourceInfo {
                cpu_cores: self.cpu_cores.unwrap_or(1),
                memory_mb: self.memory_mb.unwrap_or(4096),
                max_vus: self.max_vus.unwrap_or(100),
                current_load: 0.0,
            },
            contract_version: CONTRACT_VERSION.to_string(),
        })
    }
}

/// Fluent builder for a `Fatal` envelope.
pub struct FatalBuilder {
    ref_id: Option<String>,
    message: String,
}

impl FatalBuilder {
    /// Scope this failure to a task or stream id.
    #[must_use]
    pub fn ref_id(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = Some(ref_id.into());
        self
    }

    /// Attach a stable error code from [`wf_error::WfErrorCode`].
    #[must_use]
    pub fn build_with_code(self, code: wf_error::WfErrorCode) -> Envelope {
        Envelope::fatal_with_code(self.ref_id, self.message, code)
    }

    /// Build without an error code.
    #[must_use]
    pub fn build(self) -> Envelope {
        Envelope::Fatal {
            ref_id: self.ref_id,
            error: self.message,
            error_code: None,
        }
    }
}
