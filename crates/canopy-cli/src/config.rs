use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use control_plane::EngineConfig;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{CliError, CliErrorKind};

#[derive(Debug, Deserialize, Default)]
pub struct FileConfig {
    pub database_url: Option<String>,
    pub default_cluster: Option<String>,
    pub default_namespace: Option<String>,
    /// Namespaces a list without `--namespace` covers.
    pub namespaces: Option<Vec<String>>,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    pub database_url: Option<String>,
    pub default_cluster: String,
    pub default_namespace: String,
    pub namespaces: Vec<String>,
    pub engine: EngineConfig,
}

fn env_nonempty(key: &str) -> Option<String> { std::env::var(key).ok().filter(|v| !v.is_empty()) }

impl EffectiveConfig {
    pub fn load() -> Result<Self> {
        let cfg_path = config_file_path();
        debug!(path=?cfg_path, exists=?cfg_path.exists(), "config.load.attempt");
        let mut file_cfg: FileConfig = if cfg_path.exists() {
            let content = fs::read_to_string(&cfg_path)
                .with_context(|| format!("read config {cfg_path:?}"))
                .map_err(|e| CliError::with_source(CliErrorKind::Config("failed to read config".into()), e))?;
            debug!(len = content.len(), "config.read");
            match toml::from_str(&content) {
                Ok(v) => { debug!("config.parse.success"); v }
                Err(e) => {
                    debug!(error=?e, "config.parse.error");
                    return Err(CliError::with_source(CliErrorKind::Config("failed to parse config".into()), e).into());
                }
            }
        } else {
            FileConfig::default()
        };
        if let Some(v) = env_nonempty("CANOPY_DATABASE_URL") { file_cfg.database_url = Some(v); }
        if let Some(v) = env_nonempty("CANOPY_CLUSTER") { file_cfg.default_cluster = Some(v); }
        if let Some(v) = env_nonempty("CANOPY_NAMESPACE") { file_cfg.default_namespace = Some(v); }

        let default_namespace = file_cfg.default_namespace.unwrap_or_else(|| "default".into());
        let namespaces = file_cfg.namespaces.filter(|n| !n.is_empty()).unwrap_or_else(|| vec![default_namespace.clone()]);
        Ok(Self {
            database_url: file_cfg.database_url,
            default_cluster: file_cfg.default_cluster.unwrap_or_else(|| "default".into()),
            default_namespace,
            namespaces,
            engine: file_cfg.engine.from_env(),
        })
    }
}

pub fn config_dir() -> PathBuf { dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("canopy") }
pub fn config_file_path() -> PathBuf { config_dir().join("config.toml") }
