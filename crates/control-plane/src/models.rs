use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;

/// Identity of an application: unique within (cluster, namespace).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppKey {
    pub cluster: String,
    pub namespace: String,
    pub name: String,
}

impl AppKey {
    pub fn new(cluster: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { cluster: cluster.into(), namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cluster, self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    #[default]
    Deployment,
    DaemonSet,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Deployment => "deployment", Self::DaemonSet => "daemonset" }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Kind {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deployment" => Ok(Self::Deployment),
            "daemonset" => Ok(Self::DaemonSet),
            other => Err(EngineError::validation(format!("unknown workload kind '{other}'"))),
        }
    }
}

/// The persisted record describing one deployed unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub cluster: String,
    pub namespace: String,
    pub name: String,
    pub kind: Kind,
    /// Opaque per-generation identifier embedded in object labels.
    pub pod_version: String,
    pub version: String,
    pub image: String,
    /// Serialized template snapshot.
    pub template: String,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub updated_replicas: i32,
    pub available_replicas: i32,
    pub message: String,
    pub service_mesh: bool,
    pub default_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub fn key(&self) -> AppKey { AppKey::new(&self.cluster, &self.namespace, &self.name) }
}

/// Mint a fresh pod version. Never reused across generations.
pub fn new_pod_version() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Canary lineage.
    New,
    /// Production lineage.
    #[default]
    Normal,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self { Self::New => "new", Self::Normal => "normal" }
    }
}

impl FromStr for Stage {
    type Err = EngineError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "normal" => Ok(Self::Normal),
            other => Err(EngineError::validation(format!("unknown stage '{other}'"))),
        }
    }
}

/// One release lineage of an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: Uuid,
    pub cluster: String,
    pub namespace: String,
    pub name: String,
    pub pod_version: String,
    pub stage: Stage,
    pub weight: i32,
    pub replicas: i32,
    pub cur_replicas: i32,
    pub template: String,
    pub created_at: DateTime<Utc>,
}

impl Version {
    pub fn key(&self) -> AppKey { AppKey::new(&self.cluster, &self.namespace, &self.name) }
}

/// Image override for one container, addressed by container name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImage {
    pub container: String,
    pub image: String,
}

impl FromStr for ContainerImage {
    type Err = EngineError;
    /// Parses `container=image`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((c, i)) if !c.trim().is_empty() && !i.trim().is_empty() => {
                Ok(Self { container: c.trim().to_string(), image: i.trim().to_string() })
            }
            _ => Err(EngineError::validation(format!("expected container=image, got '{s}'"))),
        }
    }
}

/// Live pod annotated with its display version and traffic weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodDetail {
    pub name: String,
    pub phase: String,
    pub ready: bool,
    pub restarts: i32,
    pub node: Option<String>,
    pub ip: Option<String>,
    /// Semantic application version after remapping, or the raw pod version when unknown.
    pub version: String,
    pub weight: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionWeight {
    pub pod_version: String,
    pub stage: Stage,
    pub declared_weight: i32,
    pub effective_weight: i32,
    pub running_pods: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDetail {
    pub application: Application,
    /// `running / replicas`.
    pub pod_count: String,
    pub status: String,
    pub pods: Vec<PodDetail>,
    pub versions: Vec<VersionWeight>,
    pub other_weight: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppFilter {
    pub cluster: String,
    /// `None` means every namespace visible to the caller.
    pub namespace: Option<String>,
    pub name_contains: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

pub type Labels = BTreeMap<String, String>;
