//! Octarine adapter core types: events, install requests, the operation
//! registry and environment configuration.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

mod config;
mod registry;

pub use config::AdapterConfig;
pub use registry::{lookup_op, supported_operations, OpKind, SupportedOp, SUPPORTED_OPS};

/// Namespace used for the managed dataplane when a request leaves it empty.
pub const DEFAULT_DATAPLANE_NS: &str = "octarine-dataplane";

/// Name reported by the mesh-name query.
pub const MESH_NAME: &str = "Octarine";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    Info,
    Error,
}

/// Status record produced by a background workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub summary: String,
    pub details: String,
}

impl Event {
    pub fn info(summary: impl Into<String>, details: impl Into<String>) -> Self {
        Self { kind: EventKind::Info, summary: summary.into(), details: details.into() }
    }

    pub fn error(summary: impl Into<String>, details: impl Into<String>) -> Self {
        Self { kind: EventKind::Error, summary: summary.into(), details: details.into() }
    }

    pub fn is_error(&self) -> bool { self.kind == EventKind::Error }
}

/// One "apply an operation" request. Consumed once by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallRequest {
    pub op_name: String,
    pub username: String,
    /// Target namespace; empty means the default dataplane namespace.
    pub namespace: String,
    pub delete: bool,
    /// Manifest text, only read by the custom operation.
    pub custom_body: String,
}

impl InstallRequest {
    pub fn new(op_name: impl Into<String>) -> Self {
        Self { op_name: op_name.into(), ..Default::default() }
    }

    pub fn namespace(mut self, ns: impl Into<String>) -> Self { self.namespace = ns.into(); self }
    pub fn username(mut self, user: impl Into<String>) -> Self { self.username = user.into(); self }
    pub fn delete(mut self, delete: bool) -> Self { self.delete = delete; self }
    pub fn body(mut self, body: impl Into<String>) -> Self { self.custom_body = body.into(); self }

    /// Namespace with the dataplane default applied.
    pub fn resolved_namespace(&self) -> &str {
        if self.namespace.is_empty() { DEFAULT_DATAPLANE_NS } else { &self.namespace }
    }
}
