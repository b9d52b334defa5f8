//! Workload-kind dispatch. Deployments are reconciled; DaemonSets are reserved and rejected up front.

use async_trait::async_trait;
use tracing::debug;

use crate::cluster::{ClusterApi, ObjectKind};
use crate::error::{EngineError, EngineResult};
use crate::models::Kind;
use crate::template::Workload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Replaced,
}

#[async_trait]
pub trait WorkloadReconciler: Send + Sync {
    fn object_kind(&self) -> ObjectKind;

    /// Fails before any cluster call when this kind cannot be reconciled.
    fn ensure_supported(&self) -> EngineResult<()> { Ok(()) }

    /// Create the workload, or replace it keeping the live selector and resource version.
    async fn apply(&self, cluster: &dyn ClusterApi, namespace: &str, workload: &Workload) -> EngineResult<Applied>;
}

pub struct DeploymentReconciler;

#[async_trait]
impl WorkloadReconciler for DeploymentReconciler {
    fn object_kind(&self) -> ObjectKind { ObjectKind::Deployment }

    async fn apply(&self, cluster: &dyn ClusterApi, namespace: &str, workload: &Workload) -> EngineResult<Applied> {
        let Workload::Deployment(desired) = workload else {
            return Err(EngineError::internal(format!("deployment reconciler given a {}", workload.kind())));
        };
        let name = workload.name();
        match cluster.get_deployment(namespace, &name).await? {
            None => {
                cluster.create_deployment(namespace, desired).await?;
                debug!(namespace, name=%name, "reconcile.workload.created");
                Ok(Applied::Created)
            }
            Some(live) => {
                let mut next = desired.clone();
                next.metadata.resource_version = live.metadata.resource_version.clone();
                // Selectors are immutable once created.
                if let (Some(spec), Some(live_spec)) = (next.spec.as_mut(), live.spec.as_ref()) {
                    spec.selector = live_spec.selector.clone();
                }
                cluster.replace_deployment(namespace, &next).await?;
                debug!(namespace, name=%name, "reconcile.workload.replaced");
                Ok(Applied::Replaced)
            }
        }
    }
}

pub struct DaemonSetReconciler;

#[async_trait]
impl WorkloadReconciler for DaemonSetReconciler {
    fn object_kind(&self) -> ObjectKind { ObjectKind::DaemonSet }

    fn ensure_supported(&self) -> EngineResult<()> {
        Err(EngineError::Unsupported("daemonset workloads are not supported yet".into()))
    }

    async fn apply(&self, _cluster: &dyn ClusterApi, _namespace: &str, _workload: &Workload) -> EngineResult<Applied> {
        self.ensure_supported().map(|_| Applied::Created)
    }
}

pub fn reconciler_for(kind: Kind) -> Box<dyn WorkloadReconciler> {
    match kind {
        Kind::Deployment => Box::new(DeploymentReconciler),
        Kind::DaemonSet => Box::new(DaemonSetReconciler),
    }
}
