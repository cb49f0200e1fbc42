use anyhow::{anyhow, Result};
use async_trait::async_trait;
use octarine_apply::ApplyEngine;
use tracing::{debug, warn};

use crate::manifests::{CONTROL_PLANE_CONFIGMAP, REGISTRY_SECRET};
use crate::{reference, CONFIGMAPS, NAMESPACES, SECRETS};

/// Self check run by the vet operation.
#[async_trait]
pub trait Diagnostics: Send + Sync {
    /// Returns a one-line report on success.
    async fn run(&self, engine: &ApplyEngine, dataplane_ns: &str) -> Result<String>;
}

/// Checks that the dataplane namespace and its supporting objects exist.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClusterVet;

#[async_trait]
impl Diagnostics for ClusterVet {
    async fn run(&self, engine: &ApplyEngine, dataplane_ns: &str) -> Result<String> {
        let checks = [
            (NAMESPACES.coordinate(), reference(&NAMESPACES.coordinate(), None, dataplane_ns)),
            (SECRETS.coordinate(), reference(&SECRETS.coordinate(), Some(dataplane_ns), REGISTRY_SECRET)),
            (CONFIGMAPS.coordinate(), reference(&CONFIGMAPS.coordinate(), Some(dataplane_ns), CONTROL_PLANE_CONFIGMAP)),
        ];
        let mut missing = Vec::new();
        for (res, obj) in &checks {
            let name = obj.metadata.name.as_deref().unwrap_or("");
            match engine.get(res, obj).await {
                Ok(_) => debug!(kind = %res.kind, name = %name, "vet: present"),
                Err(e) => {
                    warn!(kind = %res.kind, name = %name, error = %format!("{:#}", e), "vet: check failed");
                    missing.push(format!("{} {}", res.kind, name));
                }
            }
        }
        if !missing.is_empty() {
            return Err(anyhow!("missing in {}: {}", dataplane_ns, missing.join(", ")));
        }
        Ok(format!("{} checks passed in {}", checks.len(), dataplane_ns))
    }
}
