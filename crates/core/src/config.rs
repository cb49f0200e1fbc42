use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Runtime configuration, read from `OCTARINE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdapterConfig {
    /// Directory holding operation templates and workflow manifests.
    pub templates_dir: PathBuf,
    pub event_queue_cap: usize,
    pub account: String,
    pub control_plane: String,
    pub domain: String,
    /// Base64 docker config json for the registry credential secret.
    pub registry_auth: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("config_templates"),
            event_queue_cap: 100,
            account: String::new(),
            control_plane: String::new(),
            domain: String::new(),
            registry_auth: String::new(),
        }
    }
}

impl AdapterConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let var = |k: &str| std::env::var(k).ok().filter(|s| !s.is_empty());
        Self {
            templates_dir: var("OCTARINE_TEMPLATES_DIR").map(PathBuf::from).unwrap_or(d.templates_dir),
            event_queue_cap: var("OCTARINE_EVENT_QUEUE_CAP")
                .and_then(|s| s.parse::<usize>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(d.event_queue_cap),
            account: var("OCTARINE_ACCOUNT").unwrap_or(d.account),
            control_plane: var("OCTARINE_CONTROL_PLANE").unwrap_or(d.control_plane),
            domain: var("OCTARINE_DOMAIN").unwrap_or(d.domain),
            registry_auth: var("OCTARINE_REGISTRY_AUTH").unwrap_or(d.registry_auth),
        }
    }
}
