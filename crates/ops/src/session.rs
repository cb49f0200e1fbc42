use std::sync::Arc;

use arc_swap::ArcSwap;
use octarine_apply::ApplyEngine;
use octarine_core::DEFAULT_DATAPLANE_NS;
use octarine_events::EventSender;
use octarine_kubehub::ResourceClient;

/// Everything a request needs: the store, where events go, and the dataplane
/// namespace recorded by the last primary install. Replaced as a whole when
/// the caller creates a new client; units already running keep theirs.
pub struct Session {
    engine: ApplyEngine,
    events: EventSender,
    dataplane_ns: ArcSwap<String>,
}

impl Session {
    pub fn new(client: Arc<dyn ResourceClient>, events: EventSender) -> Self {
        Self {
            engine: ApplyEngine::new(client),
            events,
            dataplane_ns: ArcSwap::from_pointee(DEFAULT_DATAPLANE_NS.to_string()),
        }
    }

    pub fn engine(&self) -> &ApplyEngine { &self.engine }

    pub fn events(&self) -> &EventSender { &self.events }

    pub fn dataplane_namespace(&self) -> String { self.dataplane_ns.load().as_ref().clone() }

    pub(crate) fn record_dataplane_namespace(&self, ns: &str) {
        self.dataplane_ns.store(Arc::new(ns.to_string()));
    }
}
