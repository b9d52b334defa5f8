//! Cluster API collaborator: typed get/create/update/mark-for-deletion over k8s objects.

pub mod kube_api;
pub mod registry;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, PersistentVolumeClaim, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;

pub use registry::{ClientRegistry, ClusterConnector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Deployment,
    DaemonSet,
    Service,
    Ingress,
    ConfigMap,
    Secret,
    PersistentVolumeClaim,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::DaemonSet => "DaemonSet",
            Self::Service => "Service",
            Self::Ingress => "Ingress",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound { kind: ObjectKind, namespace: String, name: String },
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists { kind: ObjectKind, namespace: String, name: String },
    #[error("cluster '{0}' unreachable: {1}")]
    Connect(String, String),
    #[error("api error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn not_found(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self::NotFound { kind, namespace: namespace.to_string(), name: name.to_string() }
    }
    pub fn already_exists(kind: ObjectKind, namespace: &str, name: &str) -> Self {
        Self::AlreadyExists { kind, namespace: namespace.to_string(), name: name.to_string() }
    }
    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound { .. }) }
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Everything the engine needs from one cluster. `get_*` return `Ok(None)` when absent.
#[async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    async fn get_deployment(&self, ns: &str, name: &str) -> ClusterResult<Option<Deployment>>;
    async fn create_deployment(&self, ns: &str, obj: &Deployment) -> ClusterResult<Deployment>;
    async fn replace_deployment(&self, ns: &str, obj: &Deployment) -> ClusterResult<Deployment>;

    async fn get_service(&self, ns: &str, name: &str) -> ClusterResult<Option<Service>>;
    async fn create_service(&self, ns: &str, obj: &Service) -> ClusterResult<Service>;
    async fn replace_service(&self, ns: &str, obj: &Service) -> ClusterResult<Service>;
    async fn list_services(&self, ns: &str, selector: &str) -> ClusterResult<Vec<Service>>;

    async fn get_ingress(&self, ns: &str, name: &str) -> ClusterResult<Option<Ingress>>;
    async fn create_ingress(&self, ns: &str, obj: &Ingress) -> ClusterResult<Ingress>;
    async fn replace_ingress(&self, ns: &str, obj: &Ingress) -> ClusterResult<Ingress>;

    async fn get_config_map(&self, ns: &str, name: &str) -> ClusterResult<Option<ConfigMap>>;
    async fn get_pvc(&self, ns: &str, name: &str) -> ClusterResult<Option<PersistentVolumeClaim>>;

    async fn list_pods(&self, ns: &str, selector: &str) -> ClusterResult<Vec<Pod>>;
    async fn get_endpoints(&self, ns: &str, name: &str) -> ClusterResult<Option<Endpoints>>;

    /// Stamp the deletion marker; removal itself belongs to an external collector.
    /// A missing object is not an error.
    async fn mark_for_deletion(&self, kind: ObjectKind, ns: &str, name: &str) -> ClusterResult<()>;
}
