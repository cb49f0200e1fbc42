//! Octarine adapter façade (in-process).
//!
//! The surface a transport exposes: create a client, report the mesh name and
//! supported operations, apply operations, and stream workflow events.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use octarine_core::{supported_operations, AdapterConfig, InstallRequest, MESH_NAME};
use octarine_events::{EventSender, EventStream};
use octarine_kubehub::{KubeResourceClient, ResourceClient};
use octarine_ops::{OpError, Orchestrator, Session};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use octarine_core::{Event, EventKind};
pub use octarine_events::EventSink;
pub use octarine_ops::{Dispatch, WorkflowHandle};

/// Errors returned to callers, suitable for transport.
#[derive(Debug, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum AdapterError {
    #[error("{0} is not a valid operation name")]
    UnknownOperation(String),
    #[error("yaml body is empty for {0} operation")]
    EmptyBody(String),
    #[error("client not created: call create_client first")]
    ClientNotCreated,
    #[error("template: {0}")]
    Template(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

impl From<OpError> for AdapterError {
    fn from(e: OpError) -> Self {
        match e {
            OpError::UnknownOperation(op) => AdapterError::UnknownOperation(op),
            OpError::EmptyBody(op) => AdapterError::EmptyBody(op),
            OpError::Template(msg) => AdapterError::Template(msg),
            OpError::Apply(e) => AdapterError::Internal(format!("{:#}", e)),
        }
    }
}

/// Mesh adapter surface.
#[async_trait::async_trait]
pub trait MeshAdapter: Send + Sync {
    /// Connect to the resource store. Replaces any previous session; units
    /// already running keep the one they started with.
    async fn create_client(&self, kubeconfig: &[u8], context: Option<&str>) -> AdapterResult<()>;

    async fn mesh_name(&self) -> AdapterResult<String>;

    /// Validate and dispatch. Background operations return their handle at once.
    async fn apply_operation(&self, req: InstallRequest) -> AdapterResult<Dispatch>;

    async fn supported_operations(&self) -> AdapterResult<BTreeMap<String, String>>;

    /// Deliver queued events to `sink` until `cancel` fires. A delivery
    /// failure requeues the event and is returned.
    async fn stream_events(&self, sink: &mut dyn EventSink, cancel: &CancellationToken) -> AdapterResult<()>;
}

/// In-process adapter backed by the ops orchestrator.
pub struct InProcAdapter {
    orchestrator: Orchestrator,
    events: EventSender,
    stream: Mutex<EventStream>,
    session: ArcSwapOption<Session>,
}

impl InProcAdapter {
    pub fn new(config: &AdapterConfig) -> Self {
        Self::with_orchestrator(config, Orchestrator::from_config(config))
    }

    pub fn with_orchestrator(config: &AdapterConfig, orchestrator: Orchestrator) -> Self {
        let (events, stream) = octarine_events::channel(config.event_queue_cap);
        Self { orchestrator, events, stream: Mutex::new(stream), session: ArcSwapOption::empty() }
    }

    /// Start a fresh session on `client`.
    pub fn install_client(&self, client: Arc<dyn ResourceClient>) {
        self.session.store(Some(Arc::new(Session::new(client, self.events.clone()))));
    }

    pub fn with_client(self, client: Arc<dyn ResourceClient>) -> Self {
        self.install_client(client);
        self
    }

    fn session(&self) -> AdapterResult<Arc<Session>> {
        self.session.load_full().ok_or(AdapterError::ClientNotCreated)
    }
}

#[async_trait::async_trait]
impl MeshAdapter for InProcAdapter {
    async fn create_client(&self, kubeconfig: &[u8], context: Option<&str>) -> AdapterResult<()> {
        let t0 = Instant::now();
        info!(context = ?context, "api: create_client start");
        let client = octarine_kubehub::connect(kubeconfig, context).await.map_err(|e| {
            warn!(error = %format!("{:#}", e), "api: create_client failed");
            AdapterError::Internal(format!("{:#}", e))
        })?;
        self.install_client(Arc::new(KubeResourceClient::new(client)));
        info!(took_ms = %t0.elapsed().as_millis(), "api: create_client ok");
        Ok(())
    }

    async fn mesh_name(&self) -> AdapterResult<String> { Ok(MESH_NAME.to_string()) }

    async fn apply_operation(&self, req: InstallRequest) -> AdapterResult<Dispatch> {
        let t0 = Instant::now();
        let op = req.op_name.clone();
        info!(op = %op, "api: apply_operation start");
        let session = self.session()?;
        let res = self.orchestrator.apply_operation(&session, req).await;
        match &res {
            Ok(Dispatch::Scheduled(h)) => info!(op = %op, workflow = %h.id(), took_ms = %t0.elapsed().as_millis(), "api: apply_operation scheduled"),
            Ok(Dispatch::Completed) => info!(op = %op, took_ms = %t0.elapsed().as_millis(), "api: apply_operation ok"),
            Err(e) => warn!(op = %op, error = %e, "api: apply_operation failed"),
        }
        res.map_err(AdapterError::from)
    }

    async fn supported_operations(&self) -> AdapterResult<BTreeMap<String, String>> { Ok(supported_operations()) }

    async fn stream_events(&self, sink: &mut dyn EventSink, cancel: &CancellationToken) -> AdapterResult<()> {
        let mut stream = self.stream.lock().await;
        stream.pump(sink, cancel).await.map_err(|e| AdapterError::Internal(format!("{:#}", e)))
    }
}
