use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use control_plane::cluster::kube_api::KubeConnector;
use control_plane::cluster::ClientRegistry;
use control_plane::db::init_db;
use control_plane::services::StaticNamespaces;
use control_plane::store::PgStore;
use control_plane::Engine;
use serde::Serialize;

use crate::config::EffectiveConfig;
use crate::errors::{CliError, CliErrorKind};

pub mod apps;
pub mod inspect;
pub mod offline;
pub mod versions;

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum LogFormat { Auto, Text, Json }

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Output { Text, Json }

#[derive(Parser, Debug)]
#[command(name = "canopy", version, about = "Deploy applications and split traffic between their release lineages")]
pub struct Cli {
    /// Log level: trace|debug|info|warn|error
    #[arg(long, default_value = "info")]
    pub log_level: String,
    /// Log format: auto|text|json
    #[arg(long, default_value = "auto")]
    pub log_format: LogFormat,
    /// Command output format
    #[arg(long, short = 'o', value_enum, default_value = "text", global = true)]
    pub output: Output,
    /// Target cluster (kubeconfig context); defaults to the configured cluster
    #[arg(long, global = true)]
    pub cluster: Option<String>,
    /// Target namespace; defaults to the configured namespace
    #[arg(long, short = 'n', global = true)]
    pub namespace: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install or update one application per template file
    Install {
        #[arg(required = true)] files: Vec<PathBuf>,
        /// Uninstall same-named applications in other namespaces first
        #[arg(long, default_value_t = false)] force: bool,
    },
    /// Mark every object of an application for deletion
    Uninstall { name: String },
    /// Roll an application onto a new template
    Reconfigure {
        name: String,
        file: PathBuf,
        /// Leave Services and Ingresses as they are
        #[arg(long, default_value_t = false)] no_ancillary: bool,
    },
    /// Roll every pod of an application
    Restart { name: String },
    /// Change the replica count
    Scale { name: String, replicas: i32 },
    /// Swap container images, `container=image`
    RollingUpdate {
        name: String,
        #[arg(long = "image", required = true)] images: Vec<String>,
    },
    /// Rolling-update many applications in groups, `app/container=image`
    BatchRollingUpdate {
        #[arg(long = "update", required = true)] updates: Vec<String>,
    },
    /// List applications
    List {
        /// Name substring filter
        #[arg(long)] name: Option<String>,
        /// Every configured namespace instead of one
        #[arg(long, short = 'A', default_value_t = false)] all_namespaces: bool,
        #[arg(long, default_value_t = 0)] page: u32,
        #[arg(long, default_value_t = 20)] page_size: u32,
    },
    /// Show an application with live status and lineage weights
    Detail { name: String },
    /// Show live pods with their version and traffic weight
    Pods { name: String },
    /// Add labels to the workload, `key=value`
    Labels {
        name: String,
        #[arg(long = "label", required = true)] labels: Vec<String>,
    },
    /// Add a release lineage, or restage and reweight one with --pod-version
    SetVersion {
        name: String,
        #[arg(long)] weight: i32,
        /// new|normal
        #[arg(long, default_value = "new")] stage: String,
        #[arg(long)] pod_version: Option<String>,
        /// Template for the new lineage; the current one when absent
        #[arg(long)] template: Option<PathBuf>,
        #[arg(long)] replicas: Option<i32>,
    },
    /// Per-backend weights of one Service
    Backends { name: String, service: String },
    /// Check templates without touching a cluster
    Validate { #[arg(required = true)] files: Vec<PathBuf> },
    /// Print the objects a template would produce
    Render {
        file: PathBuf,
        #[arg(long, default_value = "preview")] pod_version: String,
    },
    /// Print engine metrics in the text exposition format
    Metrics {},
}

/// Cluster and namespace after applying flags over config.
#[derive(Debug, Clone)]
pub struct Target {
    pub cluster: String,
    pub namespace: String,
    pub output: Output,
}

impl Target {
    pub fn resolve(cli: &Cli, cfg: &EffectiveConfig) -> Self {
        Self {
            cluster: cli.cluster.clone().unwrap_or_else(|| cfg.default_cluster.clone()),
            namespace: cli.namespace.clone().unwrap_or_else(|| cfg.default_namespace.clone()),
            output: cli.output,
        }
    }
}

/// Engine over Postgres and kubeconfig-backed clusters.
pub async fn connect(cfg: &EffectiveConfig) -> Result<Engine> {
    let url = cfg.database_url.as_deref().ok_or_else(|| {
        CliError::new(CliErrorKind::Config("database_url is not set (config.toml or CANOPY_DATABASE_URL)".into()))
    })?;
    let pool = init_db(url)
        .await
        .map_err(|e| CliError::with_source(CliErrorKind::Network("database unreachable".into()), e))?;
    let clients = Arc::new(ClientRegistry::new(Arc::new(KubeConnector)));
    Ok(Engine::new(Arc::new(PgStore::new(pool)), clients, cfg.engine.clone())
        .with_namespace_lister(Arc::new(StaticNamespaces(cfg.namespaces.clone()))))
}

pub fn read_file(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| CliError::with_source(CliErrorKind::Io(format!("read {}: {e}", path.display())), e).into())
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn usage(msg: impl Into<String>) -> anyhow::Error { CliError::new(CliErrorKind::Usage(msg.into())).into() }
