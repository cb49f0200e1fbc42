use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use metrics::counter;
use octarine_apply::ApplyEngine;
use octarine_core::Event;
use octarine_events::EventSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::manifests::{ManifestSource, SupportingObjects, REGISTRY_SECRET};
use crate::session::Session;
use crate::vet::Diagnostics;
use crate::{reference, NAMESPACES, SECRETS};

/// Label that opts a namespace into automatic sidecar injection.
pub const INJECTION_LABEL: &str = "octarine-injection";

/// A background unit. Dropping the handle detaches the unit; its outcome is
/// still published on the event stream.
pub struct WorkflowHandle {
    id: Uuid,
    op: &'static str,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl WorkflowHandle {
    pub fn id(&self) -> Uuid { self.id }

    pub fn op(&self) -> &str { self.op }

    /// Stop the unit at its next await point. It publishes an ERROR event.
    pub fn cancel(&self) { self.cancel.cancel(); }

    /// Token that cancels this unit, for callers that also await [`Self::join`].
    pub fn cancel_token(&self) -> CancellationToken { self.cancel.clone() }

    pub fn is_finished(&self) -> bool { self.task.is_finished() }

    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|e| anyhow!("workflow task failed: {}", e))?
    }
}

/// Event summaries for a unit's two outcomes.
pub(crate) struct Summaries {
    pub failure: String,
    pub success: String,
}

fn verbs(delete: bool) -> (&'static str, &'static str) {
    if delete { ("removing", "removed") } else { ("deploying", "deployed") }
}

impl Summaries {
    pub fn install(delete: bool) -> Self {
        let (ing, ed) = verbs(delete);
        Self { failure: format!("Error while {} Octarine", ing), success: format!("Octarine {} successfully", ed) }
    }

    pub fn demo(delete: bool) -> Self {
        let (ing, ed) = verbs(delete);
        Self {
            failure: format!("Error while {} the canonical Book Info App", ing),
            success: format!("Book Info app {} successfully", ed),
        }
    }

    pub fn vet() -> Self {
        Self { failure: "Error while running vet".into(), success: "Vet completed successfully".into() }
    }
}

/// Run `work` on the runtime. Its result becomes exactly one event: INFO with
/// the returned details, or ERROR with the full error chain.
pub(crate) fn spawn<F>(events: EventSender, op: &'static str, summaries: Summaries, work: F) -> WorkflowHandle
where
    F: Future<Output = Result<String>> + Send + 'static,
{
    let id = Uuid::new_v4();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let started = Instant::now();
        info!(workflow = %id, op, "workflow: start");
        let res = tokio::select! {
            biased;
            _ = token.cancelled() => Err(anyhow!("workflow cancelled")),
            r = work => r,
        };
        let took_ms = started.elapsed().as_millis() as u64;
        let (event, out) = match res {
            Ok(details) => {
                counter!("workflow_ok", 1u64);
                info!(workflow = %id, op, took_ms, "workflow: ok");
                (Event::info(summaries.success, details), Ok(()))
            }
            Err(e) => {
                counter!("workflow_err", 1u64);
                let details = format!("{:#}", e);
                error!(workflow = %id, op, took_ms, error = %details, "workflow: failed");
                (Event::error(summaries.failure, details), Err(e))
            }
        };
        if let Err(e) = events.send(event).await {
            warn!(workflow = %id, error = %e, "unable to publish workflow event");
        }
        out
    });
    WorkflowHandle { id, op, cancel, task }
}

/// Deploy or remove the managed dataplane in `namespace`. Removal tears the
/// supporting objects down afterwards whatever the outcome.
pub(crate) async fn dataplane(
    session: Arc<Session>,
    manifests: Arc<dyn ManifestSource>,
    supporting: Arc<dyn SupportingObjects>,
    namespace: String,
    delete: bool,
) -> Result<String> {
    let engine = session.engine();
    if delete {
        let removed = remove_dataplane(engine, manifests.as_ref(), &namespace).await;
        if let Err(e) = supporting.teardown(engine, &namespace).await {
            warn!(ns = %namespace, error = %format!("{:#}", e), "supporting objects teardown failed");
        }
        removed?;
    } else {
        supporting.provision(engine, &namespace).await?;
        let yaml = manifests.dataplane_manifest(&namespace)?;
        engine.apply_config_change(&yaml, &namespace, false).await?;
    }
    Ok(format!("The latest version of Octarine is now {}.", verbs(delete).1))
}

async fn remove_dataplane(engine: &ApplyEngine, manifests: &dyn ManifestSource, namespace: &str) -> Result<()> {
    let yaml = manifests.dataplane_manifest(namespace)?;
    engine.apply_config_change(&yaml, namespace, true).await
}

/// Deploy or remove the demo application. Deploying first opts the namespace
/// into injection and copies the registry credential from the dataplane.
pub(crate) async fn demo_app(
    session: Arc<Session>,
    manifests: Arc<dyn ManifestSource>,
    namespace: String,
    dataplane_ns: String,
    delete: bool,
) -> Result<String> {
    let engine = session.engine();
    if !delete {
        label_for_injection(engine, &namespace).await?;
        copy_registry_secret(engine, &dataplane_ns, &namespace).await?;
    }
    let yaml = manifests.demo_manifest()?;
    engine.apply_config_change(&yaml, &namespace, delete).await?;
    Ok(format!("The canonical Book Info app is now {}.", verbs(delete).1))
}

pub(crate) async fn vet(session: Arc<Session>, diagnostics: Arc<dyn Diagnostics>, dataplane_ns: String) -> Result<String> {
    diagnostics.run(session.engine(), &dataplane_ns).await
}

async fn label_for_injection(engine: &ApplyEngine, namespace: &str) -> Result<()> {
    let res = NAMESPACES.coordinate();
    let mut live = engine
        .get(&res, &reference(&res, None, namespace))
        .await
        .context("unable to label the namespace for injection")?;
    live.metadata.labels.get_or_insert_with(Default::default).insert(INJECTION_LABEL.into(), "enabled".into());
    engine.update(&res, &live).await.context("unable to label the namespace for injection")?;
    Ok(())
}

/// Copy the registry secret into `to` as a new object. An existing copy is kept.
async fn copy_registry_secret(engine: &ApplyEngine, from: &str, to: &str) -> Result<()> {
    if from == to {
        return Ok(());
    }
    let res = SECRETS.coordinate();
    if engine.client().get(&res, Some(to), REGISTRY_SECRET).await.is_ok() {
        debug!(ns = %to, "registry secret already present");
        return Ok(());
    }
    let mut secret = engine
        .get(&res, &reference(&res, Some(from), REGISTRY_SECRET))
        .await
        .context("unable to read the registry secret from the dataplane namespace")?;
    secret.metadata.namespace = Some(to.to_string());
    secret.metadata.resource_version = None;
    secret.metadata.uid = None;
    secret.metadata.creation_timestamp = None;
    secret.metadata.managed_fields = None;
    secret.metadata.generation = None;
    engine.create(&res, &secret).await.context("unable to copy the registry secret")?;
    Ok(())
}
