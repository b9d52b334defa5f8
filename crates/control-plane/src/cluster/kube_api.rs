use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints, PersistentVolumeClaim, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use super::{ClusterApi, ClusterConnector, ClusterError, ClusterResult, ObjectKind};
use crate::labels::MARKED_FOR_DELETION;

fn map_err(kind: ObjectKind, ns: &str, name: &str, e: kube::Error) -> ClusterError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::not_found(kind, ns, name),
        kube::Error::Api(ae) if ae.code == 409 => ClusterError::already_exists(kind, ns, name),
        other => ClusterError::Api(format!("{kind} {ns}/{name}: {other}")),
    }
}

/// [`ClusterApi`] backed by a live `kube` client.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self { Self { client } }

    fn api<K>(&self, ns: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), ns)
    }

    async fn get<K>(&self, kind: ObjectKind, ns: &str, name: &str) -> ClusterResult<Option<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        self.api::<K>(ns).get_opt(name).await.map_err(|e| map_err(kind, ns, name, e))
    }

    async fn create<K>(&self, kind: ObjectKind, ns: &str, obj: &K) -> ClusterResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let name = obj.meta().name.clone().unwrap_or_default();
        debug!(%kind, ns, name=%name, "kube.create");
        self.api::<K>(ns).create(&PostParams::default(), obj).await.map_err(|e| map_err(kind, ns, &name, e))
    }

    async fn replace<K>(&self, kind: ObjectKind, ns: &str, obj: &K) -> ClusterResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let name = obj.meta().name.clone().unwrap_or_default();
        debug!(%kind, ns, name=%name, "kube.replace");
        self.api::<K>(ns).replace(&name, &PostParams::default(), obj).await.map_err(|e| map_err(kind, ns, &name, e))
    }

    async fn list<K>(&self, kind: ObjectKind, ns: &str, selector: &str) -> ClusterResult<Vec<K>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let lp = ListParams::default().labels(selector);
        self.api::<K>(ns).list(&lp).await.map(|l| l.items).map_err(|e| map_err(kind, ns, selector, e))
    }

    async fn mark<K>(&self, kind: ObjectKind, ns: &str, name: &str) -> ClusterResult<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let patch = json!({ "metadata": { "labels": { MARKED_FOR_DELETION: "true" } } });
        match self.api::<K>(ns).patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(map_err(kind, ns, name, e)),
        }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_deployment(&self, ns: &str, name: &str) -> ClusterResult<Option<Deployment>> {
        self.get(ObjectKind::Deployment, ns, name).await
    }
    async fn create_deployment(&self, ns: &str, obj: &Deployment) -> ClusterResult<Deployment> {
        self.create(ObjectKind::Deployment, ns, obj).await
    }
    async fn replace_deployment(&self, ns: &str, obj: &Deployment) -> ClusterResult<Deployment> {
        self.replace(ObjectKind::Deployment, ns, obj).await
    }
    async fn get_service(&self, ns: &str, name: &str) -> ClusterResult<Option<Service>> {
        self.get(ObjectKind::Service, ns, name).await
    }
    async fn create_service(&self, ns: &str, obj: &Service) -> ClusterResult<Service> {
        self.create(ObjectKind::Service, ns, obj).await
    }
    async fn replace_service(&self, ns: &str, obj: &Service) -> ClusterResult<Service> {
        self.replace(ObjectKind::Service, ns, obj).await
    }
    async fn list_services(&self, ns: &str, selector: &str) -> ClusterResult<Vec<Service>> {
        self.list(ObjectKind::Service, ns, selector).await
    }
    async fn get_ingress(&self, ns: &str, name: &str) -> ClusterResult<Option<Ingress>> {
        self.get(ObjectKind::Ingress, ns, name).await
    }
    async fn create_ingress(&self, ns: &str, obj: &Ingress) -> ClusterResult<Ingress> {
        self.create(ObjectKind::Ingress, ns, obj).await
    }
    async fn replace_ingress(&self, ns: &str, obj: &Ingress) -> ClusterResult<Ingress> {
        self.replace(ObjectKind::Ingress, ns, obj).await
    }
    async fn get_config_map(&self, ns: &str, name: &str) -> ClusterResult<Option<ConfigMap>> {
        self.get(ObjectKind::ConfigMap, ns, name).await
    }
    async fn get_pvc(&self, ns: &str, name: &str) -> ClusterResult<Option<PersistentVolumeClaim>> {
        self.get(ObjectKind::PersistentVolumeClaim, ns, name).await
    }
    async fn list_pods(&self, ns: &str, selector: &str) -> ClusterResult<Vec<Pod>> {
        let lp = ListParams::default().labels(selector);
        let api: Api<Pod> = self.api(ns);
        api.list(&lp).await.map(|l| l.items).map_err(|e| ClusterError::Api(format!("list pods {ns} [{selector}]: {e}")))
    }
    async fn get_endpoints(&self, ns: &str, name: &str) -> ClusterResult<Option<Endpoints>> {
        let api: Api<Endpoints> = self.api(ns);
        api.get_opt(name).await.map_err(|e| ClusterError::Api(format!("endpoints {ns}/{name}: {e}")))
    }
    async fn mark_for_deletion(&self, kind: ObjectKind, ns: &str, name: &str) -> ClusterResult<()> {
        match kind {
            ObjectKind::Deployment => self.mark::<Deployment>(kind, ns, name).await,
            ObjectKind::DaemonSet => self.mark::<DaemonSet>(kind, ns, name).await,
            ObjectKind::Service => self.mark::<Service>(kind, ns, name).await,
            ObjectKind::Ingress => self.mark::<Ingress>(kind, ns, name).await,
            ObjectKind::ConfigMap => self.mark::<ConfigMap>(kind, ns, name).await,
            ObjectKind::Secret => self.mark::<Secret>(kind, ns, name).await,
            ObjectKind::PersistentVolumeClaim => self.mark::<PersistentVolumeClaim>(kind, ns, name).await,
        }
    }
}

/// Builds one client per cluster id from the kubeconfig context of the same name.
#[derive(Debug, Clone, Default)]
pub struct KubeConnector;

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, cluster_id: &str) -> ClusterResult<Arc<dyn ClusterApi>> {
        let client = if matches!(cluster_id, "" | "default" | "in-cluster") {
            Client::try_default().await.map_err(|e| ClusterError::Connect(cluster_id.to_string(), e.to_string()))?
        } else {
            let opts = KubeConfigOptions { context: Some(cluster_id.to_string()), ..KubeConfigOptions::default() };
            let cfg = kube::Config::from_kubeconfig(&opts)
                .await
                .map_err(|e| ClusterError::Connect(cluster_id.to_string(), e.to_string()))?;
            Client::try_from(cfg).map_err(|e| ClusterError::Connect(cluster_id.to_string(), e.to_string()))?
        };
        info!(cluster=%cluster_id, "kube.client.connected");
        Ok(Arc::new(KubeCluster::new(client)))
    }
}
