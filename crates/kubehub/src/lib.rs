//! Octarine kubehub: connection bootstrap and the typed create/get/update/delete
//! verbs the apply engine drives, addressed by group/version/plural.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, DynamicObject},
    Client, Config,
};
use tracing::{debug, info};

mod memory;

pub use memory::{Call, MemoryClient, Verb};

/// Target of a store call. Derived per document, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ResourceCoordinate {
    /// Empty for the core group.
    pub group: String,
    pub version: String,
    /// Lower-cased, pluralized kind used in request paths.
    pub plural: String,
    /// Kind as written in the document.
    pub kind: String,
}

impl ResourceCoordinate {
    pub fn new(group: &str, version: &str, plural: &str, kind: &str) -> Self {
        Self { group: group.into(), version: version.into(), plural: plural.into(), kind: kind.into() }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.plural.clone(),
        }
    }
}

/// Structured failure from a store call.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("{message} (code {code})")]
    Api { code: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool { matches!(self, StoreError::NotFound(_)) }
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(ae.message),
            kube::Error::Api(ae) => StoreError::Api { code: ae.code, message: ae.message },
            other => StoreError::Transport(other.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Typed verbs against the resource store. `namespace: None` addresses the
/// resource without a namespace scope.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn create(&self, res: &ResourceCoordinate, namespace: Option<&str>, obj: &DynamicObject) -> StoreResult<DynamicObject>;
    async fn get(&self, res: &ResourceCoordinate, namespace: Option<&str>, name: &str) -> StoreResult<DynamicObject>;
    async fn update(&self, res: &ResourceCoordinate, namespace: Option<&str>, obj: &DynamicObject) -> StoreResult<DynamicObject>;
    async fn delete(&self, res: &ResourceCoordinate, namespace: Option<&str>, name: &str, params: &DeleteParams) -> StoreResult<()>;
}

/// Build a kube client from raw kubeconfig bytes and an optional context.
/// Empty kubeconfig selects the in-cluster service account.
pub async fn connect(kubeconfig: &[u8], context: Option<&str>) -> Result<Client> {
    let config = if kubeconfig.is_empty() {
        info!("no kubeconfig supplied; using in-cluster config");
        Config::incluster().context("loading in-cluster config")?
    } else {
        let text = std::str::from_utf8(kubeconfig).context("kubeconfig is not valid utf-8")?;
        let kc = Kubeconfig::from_yaml(text).context("parsing kubeconfig")?;
        let opts = KubeConfigOptions {
            context: context.filter(|c| !c.is_empty()).map(|c| c.to_string()),
            ..Default::default()
        };
        debug!(context = ?opts.context, "loading kubeconfig");
        Config::from_custom_kubeconfig(kc, &opts).await.context("building client config from kubeconfig")?
    };
    Client::try_from(config).context("creating kube client")
}

/// Resource client backed by a live cluster via kube dynamic objects.
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
}

impl KubeResourceClient {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api(&self, res: &ResourceCoordinate, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = res.api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn object_name(obj: &DynamicObject) -> StoreResult<&str> {
    obj.metadata.name.as_deref().ok_or_else(|| StoreError::Api { code: 422, message: "object has no metadata.name".into() })
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn create(&self, res: &ResourceCoordinate, namespace: Option<&str>, obj: &DynamicObject) -> StoreResult<DynamicObject> {
        Ok(self.api(res, namespace).create(&PostParams::default(), obj).await?)
    }

    async fn get(&self, res: &ResourceCoordinate, namespace: Option<&str>, name: &str) -> StoreResult<DynamicObject> {
        Ok(self.api(res, namespace).get(name).await?)
    }

    async fn update(&self, res: &ResourceCoordinate, namespace: Option<&str>, obj: &DynamicObject) -> StoreResult<DynamicObject> {
        let name = object_name(obj)?;
        Ok(self.api(res, namespace).replace(name, &PostParams::default(), obj).await?)
    }

    async fn delete(&self, res: &ResourceCoordinate, namespace: Option<&str>, name: &str, params: &DeleteParams) -> StoreResult<()> {
        self.api(res, namespace).delete(name, params).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_joins_group_when_present() {
        assert_eq!(ResourceCoordinate::new("", "v1", "configmaps", "ConfigMap").api_version(), "v1");
        assert_eq!(ResourceCoordinate::new("apps", "v1", "deployments", "Deployment").api_version(), "apps/v1");
    }

    #[test]
    fn api_resource_carries_plural_and_kind() {
        let ar = ResourceCoordinate::new("networking.istio.io", "v1alpha3", "virtualservices", "VirtualService").api_resource();
        assert_eq!(ar.plural, "virtualservices");
        assert_eq!(ar.kind, "VirtualService");
        assert_eq!(ar.api_version, "networking.istio.io/v1alpha3");
    }

    #[test]
    fn not_found_is_classified() {
        assert!(StoreError::NotFound("x".into()).is_not_found());
        assert!(!StoreError::Api { code: 409, message: "exists".into() }.is_not_found());
    }

    #[tokio::test]
    async fn connect_rejects_garbage_kubeconfig() {
        let err = connect(b"{not: [yaml", None).await.err().expect("garbage kubeconfig rejected");
        assert!(format!("{:#}", err).contains("parsing kubeconfig"), "err={:#}", err);
    }
}
