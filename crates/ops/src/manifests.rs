//! Manifest sources for the background workflows and the supporting objects
//! the dataplane needs before it can start.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use octarine_apply::ApplyEngine;
use octarine_core::AdapterConfig;
use serde_json::{json, Value as Json};
use tracing::info;

use crate::templates::TemplateRenderer;

pub const DATAPLANE_TEMPLATE: &str = "octarine_dataplane.yaml";
pub const DEMO_TEMPLATE: &str = "bookinfo.yaml";
pub const SUPPORTING_TEMPLATE: &str = "supporting_objects.yaml";

/// Registry credential shared between the dataplane and injected workloads.
pub const REGISTRY_SECRET: &str = "docker-registry-secret";
pub const CONTROL_PLANE_CONFIGMAP: &str = "octarine-control-plane";

/// Control plane identity handed to every rendered manifest.
#[derive(Debug, Clone, Default)]
pub struct ControlPlaneIdentity {
    pub account: String,
    pub control_plane: String,
    pub domain: String,
    pub registry_auth: String,
}

impl ControlPlaneIdentity {
    pub fn from_config(cfg: &AdapterConfig) -> Self {
        Self {
            account: cfg.account.clone(),
            control_plane: cfg.control_plane.clone(),
            domain: cfg.domain.clone(),
            registry_auth: cfg.registry_auth.clone(),
        }
    }

    fn vars(&self, namespace: &str) -> Json {
        json!({
            "namespace": namespace,
            "account": self.account,
            "control_plane": self.control_plane,
            "domain": self.domain,
            "registry_auth": self.registry_auth,
            "registry_secret": REGISTRY_SECRET,
            "control_plane_configmap": CONTROL_PLANE_CONFIGMAP,
        })
    }
}

/// Produces the manifest text applied by the install workflows.
pub trait ManifestSource: Send + Sync {
    fn dataplane_manifest(&self, namespace: &str) -> Result<String>;
    fn demo_manifest(&self) -> Result<String>;
}

pub struct TemplateManifests {
    renderer: Arc<dyn TemplateRenderer>,
    identity: ControlPlaneIdentity,
}

impl TemplateManifests {
    pub fn new(renderer: Arc<dyn TemplateRenderer>, identity: ControlPlaneIdentity) -> Self { Self { renderer, identity } }
}

impl ManifestSource for TemplateManifests {
    fn dataplane_manifest(&self, namespace: &str) -> Result<String> {
        self.renderer
            .render(DATAPLANE_TEMPLATE, &self.identity.vars(namespace))
            .context("unable to generate the dataplane manifest")
    }

    fn demo_manifest(&self) -> Result<String> {
        self.renderer.render(DEMO_TEMPLATE, &Json::Null).context("unable to load the Book Info manifest")
    }
}

/// Objects created before the dataplane and removed after it.
#[async_trait]
pub trait SupportingObjects: Send + Sync {
    async fn provision(&self, engine: &ApplyEngine, namespace: &str) -> Result<()>;
    async fn teardown(&self, engine: &ApplyEngine, namespace: &str) -> Result<()>;
}

/// Supporting objects rendered from a template: the dataplane namespace, the
/// registry credential and the control plane config map.
pub struct TemplateSupportingObjects {
    renderer: Arc<dyn TemplateRenderer>,
    identity: ControlPlaneIdentity,
}

impl TemplateSupportingObjects {
    pub fn new(renderer: Arc<dyn TemplateRenderer>, identity: ControlPlaneIdentity) -> Self { Self { renderer, identity } }

    fn manifest(&self, namespace: &str) -> Result<String> {
        self.renderer
            .render(SUPPORTING_TEMPLATE, &self.identity.vars(namespace))
            .context("unable to generate the supporting objects")
    }
}

#[async_trait]
impl SupportingObjects for TemplateSupportingObjects {
    async fn provision(&self, engine: &ApplyEngine, namespace: &str) -> Result<()> {
        let yaml = self.manifest(namespace)?;
        engine.apply_config_change(&yaml, namespace, false).await.context("unable to create supporting objects")?;
        info!(ns = %namespace, "supporting objects created");
        Ok(())
    }

    async fn teardown(&self, engine: &ApplyEngine, namespace: &str) -> Result<()> {
        let yaml = self.manifest(namespace)?;
        engine.apply_config_change(&yaml, namespace, true).await.context("unable to delete supporting objects")?;
        info!(ns = %namespace, "supporting objects deleted");
        Ok(())
    }
}
