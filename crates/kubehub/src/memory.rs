//! In-memory resource store for tests and offline runs. Records every call in order.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::api::{DeleteParams, PropagationPolicy};
use kube::core::DynamicObject;

use crate::{ResourceClient, ResourceCoordinate, StoreError, StoreResult};

const CLUSTER_SCOPED: &[&str] = &[
    "namespaces",
    "nodes",
    "persistentvolumes",
    "clusterroles",
    "clusterrolebindings",
    "customresourcedefinitions",
    "mutatingwebhookconfigurations",
    "validatingwebhookconfigurations",
    "storageclasses",
    "priorityclasses",
];

const NO_ROUTE: &str = "the server could not find the requested resource";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Get,
    Update,
    Delete,
}

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub resource: String,
    pub namespace: Option<String>,
    pub name: String,
    /// Delete issued with background cascade propagation.
    pub background: bool,
}

type Key = (String, Option<String>, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, DynamicObject>,
    cluster_scoped: HashSet<String>,
    failures: HashSet<(Verb, String)>,
    namespace_failures: HashSet<(Verb, String, String)>,
    calls: Vec<Call>,
    next_rv: u64,
}

/// Resource store held in memory, scoped like a real API server: cluster-scoped
/// resources reject namespaced paths and namespaced resources need a namespace.
pub struct MemoryClient {
    inner: Mutex<Inner>,
}

impl Default for MemoryClient {
    fn default() -> Self { Self::new() }
}

impl MemoryClient {
    pub fn new() -> Self {
        let inner = Inner { cluster_scoped: CLUSTER_SCOPED.iter().map(|s| s.to_string()).collect(), ..Default::default() };
        Self { inner: Mutex::new(inner) }
    }

    /// Make every `verb` call on `plural` fail with a server error.
    pub fn fail_on(&self, verb: Verb, plural: &str) {
        self.lock().failures.insert((verb, plural.to_string()));
    }

    /// Like [`Self::fail_on`], but only for calls scoped to `namespace`.
    pub fn fail_on_namespace(&self, verb: Verb, plural: &str, namespace: &str) {
        self.lock().namespace_failures.insert((verb, plural.to_string(), namespace.to_string()));
    }

    /// Seed an object without recording a call.
    pub fn insert(&self, plural: &str, mut obj: DynamicObject) {
        let mut inner = self.lock();
        let ns = if inner.cluster_scoped.contains(plural) { None } else { obj.metadata.namespace.clone() };
        inner.next_rv += 1;
        obj.metadata.resource_version = Some(inner.next_rv.to_string());
        let name = obj.metadata.name.clone().unwrap_or_default();
        inner.objects.insert((plural.to_string(), ns, name), obj);
    }

    pub fn object(&self, plural: &str, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        self.lock().objects.get(&(plural.to_string(), namespace.map(str::to_string), name.to_string())).cloned()
    }

    pub fn len(&self) -> usize { self.lock().objects.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn calls(&self) -> Vec<Call> { self.lock().calls.clone() }

    /// Recorded calls rendered as `verb resource ns/name`, for compact asserts.
    pub fn call_log(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| format!("{:?} {} {}/{}", c.verb, c.resource, c.namespace.as_deref().unwrap_or("-"), c.name).to_lowercase())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Inner {
    fn record(&mut self, verb: Verb, res: &ResourceCoordinate, namespace: Option<&str>, name: &str, background: bool) {
        self.calls.push(Call {
            verb,
            resource: res.plural.clone(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
            background,
        });
    }

    /// Resolve the storage key, enforcing the resource's scope.
    fn key(&self, verb: Verb, res: &ResourceCoordinate, namespace: Option<&str>, name: &str) -> StoreResult<Key> {
        if self.failures.contains(&(verb, res.plural.clone())) {
            return Err(StoreError::Api { code: 500, message: format!("injected {:?} failure for {}", verb, res.plural) });
        }
        if let Some(ns) = namespace {
            if self.namespace_failures.contains(&(verb, res.plural.clone(), ns.to_string())) {
                return Err(StoreError::Api { code: 500, message: format!("injected {:?} failure for {} in {}", verb, res.plural, ns) });
            }
        }
        let cluster = self.cluster_scoped.contains(&res.plural);
        match (cluster, namespace) {
            (true, Some(_)) => Err(StoreError::NotFound(NO_ROUTE.into())),
            (false, None) if verb == Verb::Create => Err(StoreError::Api {
                code: 405,
                message: "the server does not allow this method on the requested resource".into(),
            }),
            (false, None) => Err(StoreError::NotFound(NO_ROUTE.into())),
            (true, None) => Ok((res.plural.clone(), None, name.to_string())),
            (false, Some(ns)) => Ok((res.plural.clone(), Some(ns.to_string()), name.to_string())),
        }
    }

    fn not_found(res: &ResourceCoordinate, name: &str) -> StoreError {
        let qualified = if res.group.is_empty() { res.plural.clone() } else { format!("{}.{}", res.plural, res.group) };
        StoreError::NotFound(format!("{} \"{}\" not found", qualified, name))
    }

    fn bump(&mut self) -> String {
        self.next_rv += 1;
        self.next_rv.to_string()
    }
}

fn name_of(obj: &DynamicObject) -> StoreResult<String> {
    obj.metadata.name.clone().ok_or_else(|| StoreError::Api { code: 422, message: "object has no metadata.name".into() })
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn create(&self, res: &ResourceCoordinate, namespace: Option<&str>, obj: &DynamicObject) -> StoreResult<DynamicObject> {
        let mut inner = self.lock();
        let name = name_of(obj)?;
        inner.record(Verb::Create, res, namespace, &name, false);
        let key = inner.key(Verb::Create, res, namespace, &name)?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::Api { code: 409, message: format!("{} \"{}\" already exists", res.plural, name) });
        }
        if obj.metadata.resource_version.as_deref().is_some_and(|rv| !rv.is_empty()) {
            return Err(StoreError::Api { code: 400, message: "resourceVersion should not be set on objects to be created".into() });
        }
        let mut stored = obj.clone();
        stored.metadata.namespace = key.1.clone();
        stored.metadata.resource_version = Some(inner.bump());
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        inner.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn get(&self, res: &ResourceCoordinate, namespace: Option<&str>, name: &str) -> StoreResult<DynamicObject> {
        let mut inner = self.lock();
        inner.record(Verb::Get, res, namespace, name, false);
        let key = inner.key(Verb::Get, res, namespace, name)?;
        inner.objects.get(&key).cloned().ok_or_else(|| Inner::not_found(res, name))
    }

    async fn update(&self, res: &ResourceCoordinate, namespace: Option<&str>, obj: &DynamicObject) -> StoreResult<DynamicObject> {
        let mut inner = self.lock();
        let name = name_of(obj)?;
        inner.record(Verb::Update, res, namespace, &name, false);
        let key = inner.key(Verb::Update, res, namespace, &name)?;
        let current_rv = match inner.objects.get(&key) {
            Some(cur) => cur.metadata.resource_version.clone(),
            None => return Err(Inner::not_found(res, &name)),
        };
        if let Some(rv) = obj.metadata.resource_version.as_deref().filter(|rv| !rv.is_empty()) {
            if current_rv.as_deref() != Some(rv) {
                return Err(StoreError::Api { code: 409, message: format!("the object has been modified; {} \"{}\"", res.plural, name) });
            }
        }
        let mut stored = obj.clone();
        stored.metadata.namespace = key.1.clone();
        stored.metadata.resource_version = Some(inner.bump());
        inner.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, res: &ResourceCoordinate, namespace: Option<&str>, name: &str, params: &DeleteParams) -> StoreResult<()> {
        let mut inner = self.lock();
        let background = matches!(params.propagation_policy, Some(PropagationPolicy::Background));
        inner.record(Verb::Delete, res, namespace, name, background);
        let key = inner.key(Verb::Delete, res, namespace, name)?;
        match inner.objects.remove(&key) {
            Some(_) => Ok(()),
            None => Err(Inner::not_found(res, name)),
        }
    }
}
