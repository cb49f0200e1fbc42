#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::{api::DeleteParams, core::DynamicObject};
use octarine_core::{AdapterConfig, Event, InstallRequest, DEFAULT_DATAPLANE_NS};
use octarine_events::EventStream;
use octarine_kubehub::{MemoryClient, ResourceClient, ResourceCoordinate, StoreResult};
use octarine_ops::{Dispatch, OpError, Orchestrator, Session, WorkflowHandle, INJECTION_LABEL, REGISTRY_SECRET};

fn templates_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config_templates")
}

struct Fixture {
    store: Arc<MemoryClient>,
    session: Arc<Session>,
    stream: EventStream,
    orch: Orchestrator,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryClient::new());
    let (tx, stream) = octarine_events::channel(16);
    let session = Arc::new(Session::new(store.clone(), tx));
    let cfg = AdapterConfig { templates_dir: templates_dir(), account: "acme".into(), ..Default::default() };
    Fixture { store, session, stream, orch: Orchestrator::from_config(&cfg) }
}

fn background(d: Dispatch) -> WorkflowHandle {
    d.into_handle().expect("background unit")
}

fn drain(stream: &mut EventStream) -> Vec<Event> {
    std::iter::from_fn(|| stream.try_recv()).collect()
}

fn namespace(name: &str) -> DynamicObject {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": name }
    }))
    .expect("namespace")
}

async fn install(f: &Fixture, ns: &str) {
    let h = background(f.orch.apply_operation(&f.session, InstallRequest::new("octarine_install").namespace(ns)).await.expect("dispatch"));
    h.join().await.expect("install");
}

#[tokio::test]
async fn primary_install_defaults_the_namespace() {
    let mut f = fixture();
    let h = background(f.orch.apply_operation(&f.session, InstallRequest::new("octarine_install")).await.expect("dispatch"));
    assert_eq!(h.op(), "octarine_install");
    h.join().await.expect("workflow ok");

    let events = drain(&mut f.stream);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].summary, "Octarine deployed successfully");
    assert_eq!(events[0].details, "The latest version of Octarine is now deployed.");
    assert!(!events[0].is_error());

    assert_eq!(f.session.dataplane_namespace(), DEFAULT_DATAPLANE_NS);
    assert!(f.store.object("namespaces", None, DEFAULT_DATAPLANE_NS).is_some());
    assert!(f.store.object("secrets", Some(DEFAULT_DATAPLANE_NS), REGISTRY_SECRET).is_some());
    assert!(f.store.object("deployments", Some(DEFAULT_DATAPLANE_NS), "octarine-dataplane").is_some());
    assert!(f.store.object("clusterroles", None, "octarine-dataplane").is_some());
}

#[tokio::test]
async fn removing_an_absent_install_reports_success() {
    let mut f = fixture();
    let req = InstallRequest::new("octarine_install").namespace("mesh").delete(true);
    background(f.orch.apply_operation(&f.session, req).await.expect("dispatch")).join().await.expect("removal");

    let events = drain(&mut f.stream);
    assert_eq!(events.iter().filter(|e| e.is_error()).count(), 0);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].summary, "Octarine removed successfully");
}

#[tokio::test]
async fn removal_tears_down_supporting_objects() {
    let mut f = fixture();
    install(&f, "mesh").await;
    let req = InstallRequest::new("octarine_install").namespace("mesh").delete(true);
    background(f.orch.apply_operation(&f.session, req).await.expect("dispatch")).join().await.expect("removal");

    assert!(f.store.is_empty(), "left behind: {:?}", f.store.call_log());
    let summaries: Vec<String> = drain(&mut f.stream).into_iter().map(|e| e.summary).collect();
    assert_eq!(summaries, vec!["Octarine deployed successfully", "Octarine removed successfully"]);
}

#[tokio::test]
async fn empty_custom_body_is_rejected_before_any_store_call() {
    let f = fixture();
    let err = f.orch.apply_operation(&f.session, InstallRequest::new("custom").body("  \n")).await.err().expect("rejected");
    assert!(matches!(err, OpError::EmptyBody(ref op) if op == "custom"), "err={}", err);
    assert!(f.store.calls().is_empty());
}

#[tokio::test]
async fn unknown_operation_is_rejected() {
    let f = fixture();
    let err = f.orch.apply_operation(&f.session, InstallRequest::new("install")).await.err().expect("rejected");
    assert!(matches!(err, OpError::UnknownOperation(ref op) if op == "install"));
    assert_eq!(err.to_string(), "install is not a valid operation name");
    assert!(f.store.calls().is_empty());
}

#[tokio::test]
async fn custom_operation_runs_inline() {
    let mut f = fixture();
    let body = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: tuning\n";
    let d = f.orch.apply_operation(&f.session, InstallRequest::new("custom").namespace("shop").body(body)).await.expect("apply");
    assert!(matches!(d, Dispatch::Completed));
    assert!(f.store.object("configmaps", Some("shop"), "tuning").is_some());
    assert!(drain(&mut f.stream).is_empty());
}

#[tokio::test]
async fn custom_operation_failure_is_returned() {
    let f = fixture();
    let err = f
        .orch
        .apply_operation(&f.session, InstallRequest::new("custom").namespace("shop").body("kind: [broken"))
        .await
        .err()
        .expect("failed");
    assert!(matches!(err, OpError::Apply(_)));
    assert!(format!("{}", err).contains("unable to parse yaml"));
}

#[tokio::test]
async fn templated_routes_carry_namespace_and_user() {
    let f = fixture();
    let req = InstallRequest::new("bookinfo_default_routes").namespace("shop").username("alice");
    let d = f.orch.apply_operation(&f.session, req).await.expect("apply");
    assert!(matches!(d, Dispatch::Completed));
    let vs = f.store.object("virtualservices", Some("shop"), "productpage").expect("route");
    let by = vs.metadata.annotations.as_ref().and_then(|a| a.get("octarine.io/requested-by")).cloned();
    assert_eq!(by.as_deref(), Some("alice"));
}

#[tokio::test]
async fn book_info_labels_namespace_and_copies_registry_secret() {
    let mut f = fixture();
    install(&f, "mesh").await;
    f.store.insert("namespaces", namespace("shop"));

    let req = InstallRequest::new("install_book_info").namespace("shop");
    background(f.orch.apply_operation(&f.session, req).await.expect("dispatch")).join().await.expect("book info");

    let ns = f.store.object("namespaces", None, "shop").expect("ns");
    assert_eq!(ns.metadata.labels.as_ref().and_then(|l| l.get(INJECTION_LABEL)).map(String::as_str), Some("enabled"));

    let original = f.store.object("secrets", Some("mesh"), REGISTRY_SECRET).expect("source");
    let copy = f.store.object("secrets", Some("shop"), REGISTRY_SECRET).expect("copy");
    assert_ne!(copy.metadata.resource_version, original.metadata.resource_version);
    assert_ne!(copy.metadata.uid, original.metadata.uid);
    assert_eq!(copy.data["type"], original.data["type"]);

    assert!(f.store.object("deployments", Some("shop"), "productpage-v1").is_some());
    let last = drain(&mut f.stream).pop().expect("event");
    assert_eq!(last.summary, "Book Info app deployed successfully");
    assert_eq!(last.details, "The canonical Book Info app is now deployed.");
}

#[tokio::test]
async fn book_info_failure_becomes_an_error_event() {
    let mut f = fixture();
    let req = InstallRequest::new("install_book_info").namespace("ghost");
    let res = background(f.orch.apply_operation(&f.session, req).await.expect("dispatch")).join().await;
    assert!(res.is_err());

    let events = drain(&mut f.stream);
    assert_eq!(events.len(), 1);
    assert!(events[0].is_error());
    assert_eq!(events[0].summary, "Error while deploying the canonical Book Info App");
    assert!(events[0].details.contains("unable to label the namespace"), "details={}", events[0].details);
}

#[tokio::test]
async fn vet_reports_missing_and_present_dataplane() {
    let mut f = fixture();
    let vet = || InstallRequest::new("octarine_vet");

    let _ = background(f.orch.apply_operation(&f.session, vet()).await.expect("dispatch")).join().await;
    let failed = drain(&mut f.stream);
    assert!(failed[0].is_error());
    assert_eq!(failed[0].summary, "Error while running vet");

    install(&f, "").await;
    drain(&mut f.stream);
    background(f.orch.apply_operation(&f.session, vet()).await.expect("dispatch")).join().await.expect("vet");
    let ok = drain(&mut f.stream);
    assert_eq!(ok[0].summary, "Vet completed successfully");
    assert!(ok[0].details.contains("3 checks passed"));
}

struct Stall;

#[async_trait]
impl ResourceClient for Stall {
    async fn create(&self, _: &ResourceCoordinate, _: Option<&str>, _: &DynamicObject) -> StoreResult<DynamicObject> {
        std::future::pending().await
    }
    async fn get(&self, _: &ResourceCoordinate, _: Option<&str>, _: &str) -> StoreResult<DynamicObject> {
        std::future::pending().await
    }
    async fn update(&self, _: &ResourceCoordinate, _: Option<&str>, _: &DynamicObject) -> StoreResult<DynamicObject> {
        std::future::pending().await
    }
    async fn delete(&self, _: &ResourceCoordinate, _: Option<&str>, _: &str, _: &DeleteParams) -> StoreResult<()> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn cancelled_unit_reports_an_error() {
    let (tx, mut stream) = octarine_events::channel(4);
    let session = Arc::new(Session::new(Arc::new(Stall), tx));
    let orch = Orchestrator::from_config(&AdapterConfig { templates_dir: templates_dir(), ..Default::default() });

    let h = background(orch.apply_operation(&session, InstallRequest::new("octarine_install")).await.expect("dispatch"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!h.is_finished());
    h.cancel();
    let err = h.join().await.unwrap_err();
    assert!(err.to_string().contains("cancelled"));

    let ev = stream.try_recv().expect("event");
    assert!(ev.is_error());
    assert_eq!(ev.summary, "Error while deploying Octarine");
    assert_eq!(ev.details, "workflow cancelled");
}
