//! Octarine apply engine: turns manifest text into store calls with
//! namespace-then-cluster and create-then-update fallbacks.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use kube::{api::DeleteParams, core::DynamicObject};
use metrics::counter;
use octarine_kubehub::{ResourceClient, ResourceCoordinate, StoreError};
use serde_json::Value as Json;
use tracing::{debug, error, info, warn};

mod resolve;
mod split;

pub use resolve::{coordinate_for, decode_document, pluralize, resolve_documents, resolve_object, DocumentBudget, ResolvedDocument};
pub use split::split_manifests;

/// Kinds scaled to zero before delete so their pods and replica sets are not left behind.
const SCALE_BEFORE_DELETE: &[&str] = &["deployments"];

const NO_ROUTE: &str = "the server could not find the requested resource";

/// Whether `err` means the target is already absent. Removal workflows treat
/// this as success.
pub fn is_benign_absence(err: &anyhow::Error) -> bool {
    if err.chain().any(|c| c.downcast_ref::<StoreError>().is_some_and(StoreError::is_not_found)) {
        return true;
    }
    let msg = format!("{:#}", err);
    let msg = msg.trim();
    msg.ends_with("not found") || msg.ends_with(NO_ROUTE)
}

fn scope(obj: &DynamicObject) -> Option<&str> {
    obj.metadata.namespace.as_deref().filter(|ns| !ns.is_empty())
}

fn name_of(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or("")
}

fn zero_replicas(obj: &mut DynamicObject) {
    if obj.data.is_null() {
        obj.data = Json::Object(Default::default());
    }
    if let Some(map) = obj.data.as_object_mut() {
        let spec = map.entry("spec").or_insert_with(|| Json::Object(Default::default()));
        if let Some(spec) = spec.as_object_mut() {
            spec.insert("replicas".into(), Json::from(0));
        }
    }
}

/// Drives documents through a [`ResourceClient`].
#[derive(Clone)]
pub struct ApplyEngine {
    client: Arc<dyn ResourceClient>,
}

impl ApplyEngine {
    pub fn new(client: Arc<dyn ResourceClient>) -> Self { Self { client } }

    pub fn client(&self) -> &Arc<dyn ResourceClient> { &self.client }

    /// Create in the object's namespace, then without one.
    pub async fn create(&self, res: &ResourceCoordinate, obj: &DynamicObject) -> Result<DynamicObject> {
        let ns = scope(obj);
        let created = match self.client.create(res, ns, obj).await {
            Ok(o) => o,
            Err(e) if ns.is_some() => {
                warn!(error = %e, kind = %res.kind, name = %name_of(obj), "unable to create the requested resource, attempting operation without namespace");
                self.client.create(res, None, obj).await.map_err(|e| {
                    error!(error = %e, kind = %res.kind, name = %name_of(obj), "unable to create the requested resource");
                    e
                }).context("unable to create the requested resource")?
            }
            Err(e) => return Err(e).context("unable to create the requested resource"),
        };
        info!(verb = "create", kind = %res.kind, name = %name_of(obj), "created resource");
        Ok(created)
    }

    /// Fetch the live object matching `obj`'s name, namespaced then cluster-wide.
    pub async fn get(&self, res: &ResourceCoordinate, obj: &DynamicObject) -> Result<DynamicObject> {
        let (ns, name) = (scope(obj), name_of(obj));
        let live = match self.client.get(res, ns, name).await {
            Ok(o) => o,
            Err(e) if ns.is_some() => {
                warn!(error = %e, kind = %res.kind, name = %name, "unable to retrieve the resource with a matching name, attempting operation without namespace");
                self.client.get(res, None, name).await.map_err(|e| {
                    error!(error = %e, kind = %res.kind, name = %name, "unable to retrieve the resource with a matching name");
                    e
                }).context("unable to retrieve the resource with a matching name")?
            }
            Err(e) => return Err(e).context("unable to retrieve the resource with a matching name"),
        };
        info!(verb = "get", kind = %res.kind, name = %name, "retrieved resource");
        Ok(live)
    }

    pub async fn update(&self, res: &ResourceCoordinate, obj: &DynamicObject) -> Result<DynamicObject> {
        let ns = scope(obj);
        let updated = match self.client.update(res, ns, obj).await {
            Ok(o) => o,
            Err(e) if ns.is_some() => {
                warn!(error = %e, kind = %res.kind, name = %name_of(obj), "unable to update resource with the given name, attempting operation without namespace");
                self.client.update(res, None, obj).await.map_err(|e| {
                    error!(error = %e, kind = %res.kind, name = %name_of(obj), "unable to update resource with the given name");
                    e
                }).context("unable to update resource with the given name")?
            }
            Err(e) => return Err(e).context("unable to update resource with the given name"),
        };
        info!(verb = "update", kind = %res.kind, name = %name_of(obj), "updated resource");
        Ok(updated)
    }

    /// Delete with background cascade. The `default` namespace is never removed;
    /// scalable kinds are scaled to zero first.
    pub async fn delete(&self, res: &ResourceCoordinate, obj: &DynamicObject) -> Result<()> {
        let (ns, name) = (scope(obj), name_of(obj));
        if res.plural == "namespaces" && name == "default" {
            debug!("skipping deletion of default namespace");
            return Ok(());
        }
        if SCALE_BEFORE_DELETE.contains(&res.plural.as_str()) {
            let mut live = self.get(res, obj).await?;
            zero_replicas(&mut live);
            self.update(res, &live).await?;
        }
        let outcome = match self.client.delete(res, ns, name, &DeleteParams::background()).await {
            Ok(()) => Ok(()),
            Err(e) if ns.is_some() => {
                warn!(error = %e, kind = %res.kind, name = %name, "unable to delete the requested resource, attempting operation without namespace");
                self.client.delete(res, None, name, &DeleteParams::default()).await
            }
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {
                counter!("delete_ok", 1u64);
                info!(verb = "delete", kind = %res.kind, name = %name, "deleted resource");
                Ok(())
            }
            Err(e) => {
                counter!("delete_err", 1u64);
                error!(error = %e, kind = %res.kind, name = %name, "unable to delete the requested resource");
                Err(e).context("unable to delete the requested resource")
            }
        }
    }

    /// Create, or when that fails, update the live object in place. The update
    /// carries the retrieved object (its resourceVersion and identity), not the
    /// caller's payload.
    pub async fn apply(&self, doc: &ResolvedDocument) -> Result<()> {
        counter!("apply_attempts", 1u64);
        if let Err(e) = self.create(&doc.coordinate, &doc.object).await {
            debug!(error = %format!("{:#}", e), kind = %doc.kind(), name = %doc.name(), "create failed; attempting to update");
            let live = self.get(&doc.coordinate, &doc.object).await.inspect_err(|_| { counter!("apply_err", 1u64); })?;
            self.update(&doc.coordinate, &live).await.inspect_err(|_| { counter!("apply_err", 1u64); })?;
        }
        counter!("apply_ok", 1u64);
        Ok(())
    }

    pub async fn execute(&self, doc: &ResolvedDocument, delete: bool) -> Result<()> {
        if delete { self.delete(&doc.coordinate, &doc.object).await } else { self.apply(doc).await }
    }

    /// Resolve one document's text (lists expand) and execute each object in
    /// order. On delete an already-absent object is skipped and the remaining
    /// items still run.
    pub async fn apply_payload(&self, text: &str, namespace: &str, delete: bool) -> Result<()> {
        for doc in resolve_documents(text, namespace)? {
            if let Err(e) = self.execute(&doc, delete).await {
                if delete && is_benign_absence(&e) {
                    debug!(error = %format!("{:#}", e), kind = %doc.kind(), name = %doc.name(), "target already absent; continuing");
                    continue;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Split a manifest and execute every document in source order. The first
    /// failure aborts the rest, except that on delete an already-absent target
    /// is skipped.
    pub async fn apply_config_change(&self, manifest: &str, namespace: &str, delete: bool) -> Result<()> {
        for doc in split_manifests(manifest) {
            self.apply_payload(doc, namespace, delete).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_replicas_sets_or_inserts_spec() {
        let mut with_spec: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1", "kind": "Deployment",
            "metadata": { "name": "d" },
            "spec": { "replicas": 3, "selector": {} }
        })).expect("object");
        zero_replicas(&mut with_spec);
        assert_eq!(with_spec.data["spec"]["replicas"], 0);
        assert!(with_spec.data["spec"].get("selector").is_some());

        let mut bare: DynamicObject = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1", "kind": "Deployment", "metadata": { "name": "d" }
        })).expect("object");
        zero_replicas(&mut bare);
        assert_eq!(bare.data["spec"]["replicas"], 0);
    }

    #[test]
    fn benign_absence_matches_typed_and_textual_not_found() {
        let typed = anyhow::Error::new(StoreError::NotFound("gone".into())).context("unable to delete the requested resource");
        assert!(is_benign_absence(&typed));
        assert!(is_benign_absence(&anyhow::anyhow!("deployments.apps \"x\" not found")));
        assert!(is_benign_absence(&anyhow::anyhow!("the server could not find the requested resource")));
        assert!(!is_benign_absence(&anyhow::anyhow!("forbidden")));
    }
}
