use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

/// Engine tunables. Every field has a default so partial config files are valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Suffix for synthesized default ingress hosts. No suffix, no default ingress.
    pub domain_suffix: Option<String>,
    /// Image-pull secret injected into every workload pod spec.
    pub registry_secret: Option<String>,
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub max_template_bytes: usize,
    pub batch_group_size: usize,
    pub sync_interval_ms: u64,
    pub sync_timeout_ms: u64,
    pub service_mesh_default: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            domain_suffix: None,
            registry_secret: None,
            min_replicas: 0,
            max_replicas: 50,
            max_template_bytes: 512 * 1024,
            batch_group_size: 5,
            sync_interval_ms: 500,
            sync_timeout_ms: 15_000,
            service_mesh_default: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl EngineConfig {
    /// Apply `CANOPY_*` environment overrides on top of `self`.
    pub fn from_env(mut self) -> Self {
        if let Some(v) = env_string("CANOPY_DOMAIN_SUFFIX") { self.domain_suffix = Some(v); }
        if let Some(v) = env_string("CANOPY_REGISTRY_SECRET") { self.registry_secret = Some(v); }
        if let Some(v) = env_parse("CANOPY_MIN_REPLICAS") { self.min_replicas = v; }
        if let Some(v) = env_parse("CANOPY_MAX_REPLICAS") { self.max_replicas = v; }
        if let Some(v) = env_parse("CANOPY_MAX_TEMPLATE_BYTES") { self.max_template_bytes = v; }
        if let Some(v) = env_parse::<usize>("CANOPY_BATCH_GROUP_SIZE") { self.batch_group_size = v.max(1); }
        if let Some(v) = env_parse("CANOPY_SYNC_INTERVAL_MS") { self.sync_interval_ms = v; }
        if let Some(v) = env_parse("CANOPY_SYNC_TIMEOUT_MS") { self.sync_timeout_ms = v; }
        if let Some(v) = env_parse("CANOPY_SERVICE_MESH") { self.service_mesh_default = v; }
        debug!(config=?self, "engine.config.effective");
        self
    }

    pub fn sync_interval(&self) -> Duration { Duration::from_millis(self.sync_interval_ms.max(1)) }
    pub fn sync_timeout(&self) -> Duration { Duration::from_millis(self.sync_timeout_ms) }

    pub fn domain_suffix(&self) -> Option<&str> {
        self.domain_suffix.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}
