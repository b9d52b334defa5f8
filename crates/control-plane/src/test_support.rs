//! In-memory collaborators and fixtures shared by unit and integration tests.
//! `FakeCluster` keeps typed objects per (namespace, name), records every mutation in an
//! operation log and can be told to fail the Nth create of a kind.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{
    ConfigMap, Endpoints, PersistentVolumeClaim, Pod, PodStatus, Secret, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Metadata;
use uuid::Uuid;

use crate::cluster::{ClusterApi, ClusterConnector, ClusterError, ClusterResult, ObjectKind};
use crate::labels::{APP_NAME, POD_VERSION};
use crate::models::{Application, Kind};

type Objects<K> = BTreeMap<(String, String), K>;

#[derive(Default)]
struct State {
    deployments: Objects<Deployment>,
    daemon_sets: Objects<DaemonSet>,
    services: Objects<Service>,
    ingresses: Objects<Ingress>,
    config_maps: Objects<ConfigMap>,
    secrets: Objects<Secret>,
    pvcs: Objects<PersistentVolumeClaim>,
    endpoints: Objects<Endpoints>,
    pods: Vec<Pod>,
    marked: BTreeSet<(ObjectKind, String, String)>,
    ops: Vec<String>,
    creates: HashMap<ObjectKind, usize>,
    fail_create_at: HashMap<ObjectKind, usize>,
    fail_replace: HashSet<(ObjectKind, String, String)>,
    fail_mark: bool,
    revision: u64,
}

/// Label selector match for the `k=v,k2=v2` form the engine builds.
fn selector_matches(labels: Option<&BTreeMap<String, String>>, selector: &str) -> bool {
    selector.split(',').map(str::trim).filter(|t| !t.is_empty()).all(|term| match term.split_once('=') {
        Some((k, v)) => labels.and_then(|l| l.get(k)).map(|x| x == v).unwrap_or(false),
        None => labels.map(|l| l.contains_key(term)).unwrap_or(false),
    })
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    fn lock(&self) -> MutexGuard<'_, State> { self.state.lock().unwrap_or_else(|e| e.into_inner()) }

    /// Fail the `n`th create of `kind` issued from now on (1-based).
    pub fn fail_nth_create(&self, kind: ObjectKind, n: usize) {
        let mut st = self.lock();
        let so_far = st.creates.get(&kind).copied().unwrap_or(0);
        st.fail_create_at.insert(kind, so_far + n);
    }

    /// Fail every replace of one object until the fake is dropped.
    pub fn fail_replaces(&self, kind: ObjectKind, ns: &str, name: &str) {
        self.lock().fail_replace.insert((kind, ns.to_string(), name.to_string()));
    }

    pub fn fail_marks(&self, fail: bool) { self.lock().fail_mark = fail; }

    pub fn ops(&self) -> Vec<String> { self.lock().ops.clone() }

    pub fn created(&self, kind: ObjectKind) -> usize { self.lock().creates.get(&kind).copied().unwrap_or(0) }

    pub fn is_marked(&self, kind: ObjectKind, ns: &str, name: &str) -> bool {
        self.lock().marked.contains(&(kind, ns.to_string(), name.to_string()))
    }

    pub fn marked(&self, kind: ObjectKind) -> Vec<String> {
        self.lock().marked.iter().filter(|(k, _, _)| *k == kind).map(|(_, ns, n)| format!("{ns}/{n}")).collect()
    }

    pub fn deployment(&self, ns: &str, name: &str) -> Option<Deployment> {
        self.lock().deployments.get(&(ns.to_string(), name.to_string())).cloned()
    }

    pub fn service(&self, ns: &str, name: &str) -> Option<Service> {
        self.lock().services.get(&(ns.to_string(), name.to_string())).cloned()
    }

    pub fn ingress(&self, ns: &str, name: &str) -> Option<Ingress> {
        self.lock().ingresses.get(&(ns.to_string(), name.to_string())).cloned()
    }

    pub fn seed_service(&self, ns: &str, mut svc: Service) {
        svc.metadata.namespace = Some(ns.to_string());
        let name = svc.metadata.name.clone().unwrap_or_default();
        self.lock().services.insert((ns.to_string(), name), svc);
    }

    pub fn seed_ingress(&self, ns: &str, mut ing: Ingress) {
        ing.metadata.namespace = Some(ns.to_string());
        let name = ing.metadata.name.clone().unwrap_or_default();
        self.lock().ingresses.insert((ns.to_string(), name), ing);
    }

    pub fn seed_config_map(&self, ns: &str, name: &str) {
        let cm = ConfigMap { metadata: meta(ns, name), ..ConfigMap::default() };
        self.lock().config_maps.insert((ns.to_string(), name.to_string()), cm);
    }

    pub fn seed_pvc(&self, ns: &str, name: &str) {
        let pvc = PersistentVolumeClaim { metadata: meta(ns, name), ..PersistentVolumeClaim::default() };
        self.lock().pvcs.insert((ns.to_string(), name.to_string()), pvc);
    }

    pub fn add_pod(&self, ns: &str, pod: Pod) {
        let mut pod = pod;
        pod.metadata.namespace = Some(ns.to_string());
        self.lock().pods.push(pod);
    }

    pub fn set_endpoints(&self, ns: &str, ep: Endpoints) {
        let name = ep.metadata.name.clone().unwrap_or_default();
        self.lock().endpoints.insert((ns.to_string(), name), ep);
    }

    pub fn set_deployment_status(&self, ns: &str, name: &str, status: DeploymentStatus) {
        if let Some(d) = self.lock().deployments.get_mut(&(ns.to_string(), name.to_string())) {
            d.status = Some(status);
        }
    }

    fn get<K: Clone>(&self, pick: fn(&mut State) -> &mut Objects<K>, ns: &str, name: &str) -> Option<K> {
        let mut st = self.lock();
        pick(&mut st).get(&(ns.to_string(), name.to_string())).cloned()
    }

    fn create<K>(&self, kind: ObjectKind, pick: fn(&mut State) -> &mut Objects<K>, ns: &str, obj: &K) -> ClusterResult<K>
    where
        K: Metadata<Ty = ObjectMeta> + Clone,
    {
        let mut st = self.lock();
        let name = obj.metadata().name.clone().unwrap_or_default();
        let n = {
            let c = st.creates.entry(kind).or_insert(0);
            *c += 1;
            *c
        };
        if st.fail_create_at.get(&kind) == Some(&n) {
            st.ops.push(format!("create {kind} {ns}/{name} FAILED"));
            return Err(ClusterError::Api(format!("injected failure creating {kind} {ns}/{name}")));
        }
        let key = (ns.to_string(), name.clone());
        if pick(&mut st).contains_key(&key) {
            return Err(ClusterError::already_exists(kind, ns, &name));
        }
        st.revision += 1;
        let mut stored = obj.clone();
        stored.metadata_mut().namespace = Some(ns.to_string());
        stored.metadata_mut().resource_version = Some(st.revision.to_string());
        pick(&mut st).insert(key, stored.clone());
        st.marked.remove(&(kind, ns.to_string(), name.clone()));
        st.ops.push(format!("create {kind} {ns}/{name}"));
        Ok(stored)
    }

    fn replace<K>(&self, kind: ObjectKind, pick: fn(&mut State) -> &mut Objects<K>, ns: &str, obj: &K) -> ClusterResult<K>
    where
        K: Metadata<Ty = ObjectMeta> + Clone,
    {
        let mut st = self.lock();
        let name = obj.metadata().name.clone().unwrap_or_default();
        if st.fail_replace.contains(&(kind, ns.to_string(), name.clone())) {
            st.ops.push(format!("replace {kind} {ns}/{name} FAILED"));
            return Err(ClusterError::Api(format!("injected failure replacing {kind} {ns}/{name}")));
        }
        let key = (ns.to_string(), name.clone());
        if !pick(&mut st).contains_key(&key) {
            return Err(ClusterError::not_found(kind, ns, &name));
        }
        st.revision += 1;
        let mut stored = obj.clone();
        stored.metadata_mut().namespace = Some(ns.to_string());
        stored.metadata_mut().resource_version = Some(st.revision.to_string());
        pick(&mut st).insert(key, stored.clone());
        st.marked.remove(&(kind, ns.to_string(), name.clone()));
        st.ops.push(format!("replace {kind} {ns}/{name}"));
        Ok(stored)
    }
}

fn meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta { name: Some(name.to_string()), namespace: Some(ns.to_string()), ..ObjectMeta::default() }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_deployment(&self, ns: &str, name: &str) -> ClusterResult<Option<Deployment>> {
        Ok(self.get(|s| &mut s.deployments, ns, name))
    }
    async fn create_deployment(&self, ns: &str, obj: &Deployment) -> ClusterResult<Deployment> {
        self.create(ObjectKind::Deployment, |s| &mut s.deployments, ns, obj)
    }
    async fn replace_deployment(&self, ns: &str, obj: &Deployment) -> ClusterResult<Deployment> {
        self.replace(ObjectKind::Deployment, |s| &mut s.deployments, ns, obj)
    }

    async fn get_service(&self, ns: &str, name: &str) -> ClusterResult<Option<Service>> {
        Ok(self.get(|s| &mut s.services, ns, name))
    }
    async fn create_service(&self, ns: &str, obj: &Service) -> ClusterResult<Service> {
        let mut svc = obj.clone();
        if let Some(spec) = svc.spec.as_mut() {
            if spec.cluster_ip.is_none() {
                let ip = format!("10.96.0.{}", self.created(ObjectKind::Service) + 10);
                spec.cluster_ip = Some(ip.clone());
                spec.cluster_ips = Some(vec![ip]);
            }
        }
        self.create(ObjectKind::Service, |s| &mut s.services, ns, &svc)
    }
    async fn replace_service(&self, ns: &str, obj: &Service) -> ClusterResult<Service> {
        self.replace(ObjectKind::Service, |s| &mut s.services, ns, obj)
    }
    async fn list_services(&self, ns: &str, selector: &str) -> ClusterResult<Vec<Service>> {
        let st = self.lock();
        Ok(st
            .services
            .iter()
            .filter(|((n, _), svc)| n == ns && selector_matches(svc.metadata.labels.as_ref(), selector))
            .map(|(_, svc)| svc.clone())
            .collect())
    }

    async fn get_ingress(&self, ns: &str, name: &str) -> ClusterResult<Option<Ingress>> {
        Ok(self.get(|s| &mut s.ingresses, ns, name))
    }
    async fn create_ingress(&self, ns: &str, obj: &Ingress) -> ClusterResult<Ingress> {
        self.create(ObjectKind::Ingress, |s| &mut s.ingresses, ns, obj)
    }
    async fn replace_ingress(&self, ns: &str, obj: &Ingress) -> ClusterResult<Ingress> {
        self.replace(ObjectKind::Ingress, |s| &mut s.ingresses, ns, obj)
    }

    async fn get_config_map(&self, ns: &str, name: &str) -> ClusterResult<Option<ConfigMap>> {
        Ok(self.get(|s| &mut s.config_maps, ns, name))
    }
    async fn get_pvc(&self, ns: &str, name: &str) -> ClusterResult<Option<PersistentVolumeClaim>> {
        Ok(self.get(|s| &mut s.pvcs, ns, name))
    }

    async fn list_pods(&self, ns: &str, selector: &str) -> ClusterResult<Vec<Pod>> {
        let st = self.lock();
        Ok(st
            .pods
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(ns) && selector_matches(p.metadata.labels.as_ref(), selector))
            .cloned()
            .collect())
    }

    async fn get_endpoints(&self, ns: &str, name: &str) -> ClusterResult<Option<Endpoints>> {
        Ok(self.get(|s| &mut s.endpoints, ns, name))
    }

    async fn mark_for_deletion(&self, kind: ObjectKind, ns: &str, name: &str) -> ClusterResult<()> {
        let mut st = self.lock();
        if st.fail_mark {
            st.ops.push(format!("mark {kind} {ns}/{name} FAILED"));
            return Err(ClusterError::Api(format!("injected failure marking {kind} {ns}/{name}")));
        }
        let key = (ns.to_string(), name.to_string());
        let exists = match kind {
            ObjectKind::Deployment => st.deployments.contains_key(&key),
            ObjectKind::DaemonSet => st.daemon_sets.contains_key(&key),
            ObjectKind::Service => st.services.contains_key(&key),
            ObjectKind::Ingress => st.ingresses.contains_key(&key),
            ObjectKind::ConfigMap => st.config_maps.contains_key(&key),
            ObjectKind::Secret => st.secrets.contains_key(&key),
            ObjectKind::PersistentVolumeClaim => st.pvcs.contains_key(&key),
        };
        if exists {
            st.marked.insert((kind, ns.to_string(), name.to_string()));
            st.ops.push(format!("mark {kind} {ns}/{name}"));
        }
        Ok(())
    }
}

/// Hands out one shared `FakeCluster` per cluster id and counts connects.
#[derive(Default)]
pub struct FakeConnector {
    clusters: Mutex<HashMap<String, Arc<FakeCluster>>>,
    unreachable: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FakeConnector {
    pub fn with_cluster(id: &str, cluster: Arc<FakeCluster>) -> Self {
        let c = Self::default();
        c.clusters.lock().unwrap_or_else(|e| e.into_inner()).insert(id.to_string(), cluster);
        c
    }

    pub fn set_unreachable(&self, id: &str) {
        self.unreachable.lock().unwrap_or_else(|e| e.into_inner()).insert(id.to_string());
    }

    pub fn connect_calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(&self, cluster_id: &str) -> ClusterResult<Arc<dyn ClusterApi>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.unreachable.lock().unwrap_or_else(|e| e.into_inner()).contains(cluster_id) {
            return Err(ClusterError::Connect(cluster_id.to_string(), "connection refused".into()));
        }
        let mut clusters = self.clusters.lock().unwrap_or_else(|e| e.into_inner());
        let cluster = clusters.entry(cluster_id.to_string()).or_insert_with(FakeCluster::new).clone();
        Ok(cluster)
    }
}

/// Minimal valid native template: one Deployment plus a Service on port 80 -> 8080.
pub fn native_template_yaml(name: &str, image: &str, replicas: i32) -> String {
    format!(
        r#"workload:
  apiVersion: apps/v1
  kind: Deployment
  metadata:
    name: {name}
  spec:
    replicas: {replicas}
    selector:
      matchLabels:
        app: {name}
    template:
      metadata:
        labels:
          app: {name}
      spec:
        nodeSelector:
          pool: general
        containers:
          - name: {name}
            image: {image}
            resources:
              limits:
                cpu: 500m
                memory: 256Mi
services:
  - apiVersion: v1
    kind: Service
    metadata:
      name: {name}
    spec:
      ports:
        - name: http
          port: 80
          targetPort: 8080
"#
    )
}

pub fn sample_application(cluster: &str, namespace: &str, name: &str) -> Application {
    let now = Utc::now();
    Application {
        id: Uuid::new_v4(),
        cluster: cluster.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        kind: Kind::Deployment,
        pod_version: crate::models::new_pod_version(),
        version: "1.0".into(),
        image: "nginx:1.0".into(),
        template: native_template_yaml(name, "nginx:1.0", 1),
        replicas: 1,
        ready_replicas: 0,
        updated_replicas: 0,
        available_replicas: 0,
        message: String::new(),
        service_mesh: false,
        default_address: None,
        created_at: now,
        updated_at: now,
    }
}

/// Pod labelled for `app` and `pod_version` in the given phase.
pub fn pod(name: &str, app: &str, pod_version: &str, phase: &str) -> Pod {
    let mut labels = BTreeMap::new();
    labels.insert(APP_NAME.to_string(), app.to_string());
    labels.insert(POD_VERSION.to_string(), pod_version.to_string());
    Pod {
        metadata: ObjectMeta { name: Some(name.to_string()), labels: Some(labels), ..ObjectMeta::default() },
        spec: None,
        status: Some(PodStatus { phase: Some(phase.to_string()), ..PodStatus::default() }),
    }
}
