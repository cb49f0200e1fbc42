use std::collections::BTreeMap;

/// How the orchestrator dispatches an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Deploy or remove the managed dataplane (background unit).
    Install,
    /// Deploy or remove the demo application (background unit).
    DemoApp,
    /// Built-in self check (background unit).
    Vet,
    /// Caller supplies the manifest text (synchronous).
    Custom,
    /// Manifest rendered from a template file (synchronous).
    Template(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct SupportedOp {
    pub key: &'static str,
    pub description: &'static str,
    pub kind: OpKind,
}

pub const SUPPORTED_OPS: &[SupportedOp] = &[
    SupportedOp { key: "octarine_install", description: "Install the latest version of Octarine", kind: OpKind::Install },
    SupportedOp { key: "install_book_info", description: "Install the canonical Book Info Application", kind: OpKind::DemoApp },
    SupportedOp { key: "octarine_vet", description: "Run vet for service mesh configuration", kind: OpKind::Vet },
    SupportedOp { key: "custom", description: "Custom YAML", kind: OpKind::Custom },
    SupportedOp {
        key: "bookinfo_default_routes",
        description: "Route all Book Info traffic to the v1 services",
        kind: OpKind::Template("bookinfo_default_routes.yaml"),
    },
];

pub fn lookup_op(key: &str) -> Option<&'static SupportedOp> {
    SUPPORTED_OPS.iter().find(|op| op.key == key)
}

/// Operation key to description, as reported to callers.
pub fn supported_operations() -> BTreeMap<String, String> {
    SUPPORTED_OPS.iter().map(|op| (op.key.to_string(), op.description.to_string())).collect()
}
