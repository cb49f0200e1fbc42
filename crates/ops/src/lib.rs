//! Octarine Ops: dispatches install requests. The primary install, the demo
//! application and vet run as background units that report through the event
//! stream; custom and templated operations run inline.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use kube::core::DynamicObject;
use octarine_core::{lookup_op, AdapterConfig, InstallRequest, OpKind};
use octarine_kubehub::ResourceCoordinate;
use serde_json::json;
use tracing::{info, warn};

mod manifests;
mod session;
mod templates;
mod vet;
mod workflow;

pub use manifests::{
    ControlPlaneIdentity, ManifestSource, SupportingObjects, TemplateManifests, TemplateSupportingObjects, CONTROL_PLANE_CONFIGMAP,
    DATAPLANE_TEMPLATE, DEMO_TEMPLATE, REGISTRY_SECRET, SUPPORTING_TEMPLATE,
};
pub use session::Session;
pub use templates::{HandlebarsRenderer, TemplateRenderer};
pub use vet::{ClusterVet, Diagnostics};
pub use workflow::{WorkflowHandle, INJECTION_LABEL};

/// Core-group kinds the workflows address directly.
pub(crate) struct CoreKind {
    plural: &'static str,
    kind: &'static str,
}

impl CoreKind {
    pub(crate) fn coordinate(&self) -> ResourceCoordinate { ResourceCoordinate::new("", "v1", self.plural, self.kind) }
}

pub(crate) const NAMESPACES: CoreKind = CoreKind { plural: "namespaces", kind: "Namespace" };
pub(crate) const SECRETS: CoreKind = CoreKind { plural: "secrets", kind: "Secret" };
pub(crate) const CONFIGMAPS: CoreKind = CoreKind { plural: "configmaps", kind: "ConfigMap" };

/// Name-only object used to address a get.
pub(crate) fn reference(res: &ResourceCoordinate, namespace: Option<&str>, name: &str) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &res.api_resource());
    obj.metadata.namespace = namespace.map(str::to_string);
    obj
}

/// Request rejected or failed before any background unit started.
#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error("{0} is not a valid operation name")]
    UnknownOperation(String),
    #[error("yaml body is empty for {0} operation")]
    EmptyBody(String),
    #[error("{0}")]
    Template(String),
    #[error(transparent)]
    Apply(#[from] anyhow::Error),
}

/// How a request was carried out.
pub enum Dispatch {
    /// Ran inline and finished.
    Completed,
    /// Runs in the background; the outcome arrives as an event.
    Scheduled(WorkflowHandle),
}

impl Dispatch {
    pub fn into_handle(self) -> Option<WorkflowHandle> {
        match self {
            Dispatch::Completed => None,
            Dispatch::Scheduled(h) => Some(h),
        }
    }
}

pub struct Orchestrator {
    renderer: Arc<dyn TemplateRenderer>,
    manifests: Arc<dyn ManifestSource>,
    supporting: Arc<dyn SupportingObjects>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl Orchestrator {
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        manifests: Arc<dyn ManifestSource>,
        supporting: Arc<dyn SupportingObjects>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        Self { renderer, manifests, supporting, diagnostics }
    }

    /// Everything rendered from `cfg.templates_dir`.
    pub fn from_config(cfg: &AdapterConfig) -> Self {
        let renderer: Arc<dyn TemplateRenderer> = Arc::new(HandlebarsRenderer::new(cfg.templates_dir.clone()));
        let identity = ControlPlaneIdentity::from_config(cfg);
        Self::new(
            renderer.clone(),
            Arc::new(TemplateManifests::new(renderer.clone(), identity.clone())),
            Arc::new(TemplateSupportingObjects::new(renderer, identity)),
            Arc::new(ClusterVet),
        )
    }

    /// Validate and dispatch one request. Validation failures never touch the
    /// store. Background units are started and their handle returned at once.
    pub async fn apply_operation(&self, session: &Arc<Session>, req: InstallRequest) -> Result<Dispatch, OpError> {
        let op = lookup_op(&req.op_name).ok_or_else(|| OpError::UnknownOperation(req.op_name.clone()))?;
        info!(op = %op.key, ns = %req.namespace, delete = req.delete, "ops: apply_operation");
        match op.kind {
            OpKind::Install => {
                let ns = req.resolved_namespace().to_string();
                session.record_dataplane_namespace(&ns);
                let work = workflow::dataplane(session.clone(), self.manifests.clone(), self.supporting.clone(), ns, req.delete);
                Ok(Dispatch::Scheduled(workflow::spawn(session.events().clone(), op.key, workflow::Summaries::install(req.delete), work)))
            }
            OpKind::DemoApp => {
                let ns = req.resolved_namespace().to_string();
                let work = workflow::demo_app(session.clone(), self.manifests.clone(), ns, session.dataplane_namespace(), req.delete);
                Ok(Dispatch::Scheduled(workflow::spawn(session.events().clone(), op.key, workflow::Summaries::demo(req.delete), work)))
            }
            OpKind::Vet => {
                let work = workflow::vet(session.clone(), self.diagnostics.clone(), session.dataplane_namespace());
                Ok(Dispatch::Scheduled(workflow::spawn(session.events().clone(), op.key, workflow::Summaries::vet(), work)))
            }
            OpKind::Custom => {
                if req.custom_body.trim().is_empty() {
                    return Err(OpError::EmptyBody(op.key.to_string()));
                }
                self.inline(session, op.key, &req.custom_body, &req).await
            }
            OpKind::Template(file) => {
                let vars = json!({ "user_name": req.username, "namespace": req.namespace });
                let yaml = self.renderer.render(file, &vars).map_err(|e| OpError::Template(format!("{:#}", e)))?;
                self.inline(session, op.key, &yaml, &req).await
            }
        }
    }

    async fn inline(&self, session: &Session, op: &str, manifest: &str, req: &InstallRequest) -> Result<Dispatch, OpError> {
        let started = Instant::now();
        let res = session.engine().apply_config_change(manifest, &req.namespace, req.delete).await;
        let took_ms = started.elapsed().as_millis() as u64;
        match res {
            Ok(()) => {
                info!(op, took_ms, "ops: apply_operation ok");
                Ok(Dispatch::Completed)
            }
            Err(e) => {
                warn!(op, took_ms, error = %format!("{:#}", e), "ops: apply_operation failed");
                Err(OpError::Apply(e))
            }
        }
    }
}
