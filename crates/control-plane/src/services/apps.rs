//! Application orchestrator: install, uninstall, reconfigure, restart, scale, rolling updates,
//! listing and live detail. Owns the persisted `Application` record and drives the resource
//! manager, the deploy workers and the weight model.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::{join_all, BoxFuture};
use k8s_openapi::api::core::v1::Pod;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use super::deployments::DeployWorker;
use crate::capture::{ConfigCapture, NoopCapture};
use crate::cluster::{ClientRegistry, ClusterApi};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::labels::{selector, POD_VERSION};
use crate::models::{
    new_pod_version, AppDetail, AppFilter, AppKey, Application, ContainerImage, Kind, Labels, Page, PodDetail, Version,
    VersionWeight,
};
use crate::reconciler::ResourceManager;
use crate::store::Store;
use crate::sync_wait::SyncWaiter;
use crate::template::{parse_stored_template, parse_template, Template};
use crate::weight::{is_running, pod_weights};

/// Expands "every namespace" into the namespaces the caller may see.
#[async_trait]
pub trait NamespaceLister: Send + Sync + 'static {
    async fn namespaces(&self, cluster: &str) -> EngineResult<Vec<String>>;
}

/// Fixed namespace set, regardless of cluster.
#[derive(Debug, Clone)]
pub struct StaticNamespaces(pub Vec<String>);

#[async_trait]
impl NamespaceLister for StaticNamespaces {
    async fn namespaces(&self, _cluster: &str) -> EngineResult<Vec<String>> { Ok(self.0.clone()) }
}

/// Called after a successful first install. Failures are logged, never returned.
pub type PostCreateHook = Arc<dyn Fn(Application) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub cluster: String,
    pub namespace: String,
    /// Raw YAML or JSON templates.
    pub templates: Vec<String>,
    /// Uninstall same-named applications in other namespaces instead of failing.
    pub force: bool,
}

#[derive(Clone)]
pub struct Engine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) clients: Arc<ClientRegistry>,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) capture: Arc<dyn ConfigCapture>,
    pub(crate) namespaces: Arc<dyn NamespaceLister>,
    pub(crate) post_create: Option<PostCreateHook>,
    pub(crate) waiter: SyncWaiter,
}

/// "Stopped" with no replicas wanted, "Running" once enough pods run, "Abnormal" on any failed pod.
pub fn app_status(replicas: i32, pods: &[Pod]) -> (String, String) {
    let running = pods.iter().filter(|p| is_running(p)).count() as i32;
    let failed = pods.iter().any(|p| p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Failed"));
    let status = if replicas == 0 {
        "Stopped"
    } else if running >= replicas {
        "Running"
    } else if failed {
        "Abnormal"
    } else {
        "Pending"
    };
    (format!("{running} / {replicas}"), status.to_string())
}

fn pod_detail(pod: &Pod, version: String, weight: i32) -> PodDetail {
    let status = pod.status.as_ref();
    let statuses = status.and_then(|s| s.container_statuses.as_ref());
    PodDetail {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: status.and_then(|s| s.phase.clone()).unwrap_or_else(|| "Unknown".into()),
        ready: statuses.map(|cs| !cs.is_empty() && cs.iter().all(|c| c.ready)).unwrap_or(false),
        restarts: statuses.map(|cs| cs.iter().map(|c| c.restart_count).sum()).unwrap_or(0),
        node: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        ip: status.and_then(|s| s.pod_ip.clone()),
        version,
        weight,
    }
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, clients: Arc<ClientRegistry>, config: EngineConfig) -> Self {
        let waiter = SyncWaiter::new(config.sync_interval(), config.sync_timeout());
        Self {
            store,
            clients,
            config: Arc::new(config),
            capture: Arc::new(NoopCapture),
            namespaces: Arc::new(StaticNamespaces(vec!["default".into()])),
            post_create: None,
            waiter,
        }
    }

    pub fn with_capture(mut self, capture: Arc<dyn ConfigCapture>) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_namespace_lister(mut self, lister: Arc<dyn NamespaceLister>) -> Self {
        self.namespaces = lister;
        self
    }

    pub fn with_post_create(mut self, hook: PostCreateHook) -> Self {
        self.post_create = Some(hook);
        self
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub(crate) async fn resources(&self, cluster: &str) -> EngineResult<ResourceManager> {
        let client = self.clients.get_or_create(cluster).await?;
        Ok(ResourceManager::new(cluster, client, self.config.clone(), self.capture.clone()))
    }

    pub(crate) async fn load(&self, key: &AppKey) -> EngineResult<Application> { Ok(self.store.get_application(key).await?) }

    fn template_of(&self, app: &Application) -> EngineResult<Box<dyn Template>> { parse_stored_template(&app.template) }

    /// One result per template, in submission order. `Err` only when a pre-check fails, in which
    /// case no worker was started.
    #[instrument(skip_all, fields(cluster=%req.cluster, namespace=%req.namespace, count=req.templates.len()))]
    pub async fn install_all(&self, req: InstallRequest) -> EngineResult<Vec<(String, EngineResult<Application>)>> {
        let mut templates = Vec::with_capacity(req.templates.len());
        let mut seen = HashSet::new();
        for raw in &req.templates {
            let t = parse_template(raw, &self.config)?;
            t.validate(&self.config)?;
            if !seen.insert(t.app_name().to_string()) {
                return Err(EngineError::validation(format!("application '{}' appears twice in the batch", t.app_name())));
            }
            templates.push(t);
        }
        self.clients.get_or_create(&req.cluster).await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<(String, EngineResult<Application>)>();
        let mut handles = Vec::with_capacity(templates.len());
        let names: Vec<String> = templates.iter().map(|t| t.app_name().to_string()).collect();
        for template in templates {
            let worker = DeployWorker::new(self.clone(), &req.cluster, &req.namespace, template, req.force);
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let name = worker.app_name().to_string();
                let result = worker.run().await;
                // The receiver outlives every worker.
                let _ = tx.send((name, result));
            }));
        }
        drop(tx);
        join_all(handles).await;

        let mut collected: HashMap<String, EngineResult<Application>> = HashMap::new();
        while let Some((name, result)) = rx.recv().await {
            collected.insert(name, result);
        }
        Ok(names
            .into_iter()
            .map(|name| {
                let result = collected
                    .remove(&name)
                    .unwrap_or_else(|| Err(EngineError::internal(format!("deploy worker for '{name}' exited without a result"))));
                (name, result)
            })
            .collect())
    }

    /// Install or update every template; execution failures come back joined in one error.
    pub async fn install(&self, req: InstallRequest) -> EngineResult<Vec<Application>> {
        let mut apps = Vec::new();
        let mut failures = Vec::new();
        for (name, result) in self.install_all(req).await? {
            match result {
                Ok(app) => apps.push(app),
                Err(e) => failures.push((name, e)),
            }
        }
        if failures.is_empty() { Ok(apps) } else { Err(EngineError::Batch(failures)) }
    }

    /// Mark every object of the application and its lineages for deletion, then drop the records.
    /// An application that does not exist is already uninstalled.
    #[instrument(skip_all, fields(app=%key))]
    pub async fn uninstall(&self, key: &AppKey) -> EngineResult<()> {
        let app = match self.store.get_application(key).await {
            Ok(app) => app,
            Err(e) if e.is_not_found() => {
                info!("app.uninstall.absent");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let rm = self.resources(&key.cluster).await?;
        let template = self.template_of(&app)?;
        rm.delete_app_resource(&key.namespace, template.as_ref(), &app.pod_version).await?;
        for v in self.store.list_versions(key).await? {
            if v.pod_version != app.pod_version {
                rm.mark_lineage(&key.namespace, &key.name, app.kind, &v.pod_version).await?;
            }
        }
        self.store.delete_versions(key).await?;
        match self.store.delete_application(key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        let store = self.store.clone();
        self.waiter
            .wait_for("application.removed", || {
                let store = store.clone();
                let key = key.clone();
                async move {
                    match store.get_application(&key).await {
                        Ok(_) => Ok(false),
                        Err(e) if e.is_not_found() => Ok(true),
                        Err(e) => Err(e),
                    }
                }
            })
            .await;
        info!("app.uninstall.ok");
        Ok(())
    }

    /// Roll `app` to `new` as a fresh generation and persist the result. The primary lineage
    /// record, if any, follows the new pod version.
    pub(crate) async fn redeploy(&self, mut app: Application, new: &dyn Template, update_ancillary: bool) -> EngineResult<Application> {
        let old = self.template_of(&app)?;
        new.update_app_object(&mut app, &self.config)?;
        let previous = std::mem::replace(&mut app.pod_version, new_pod_version());
        let rm = self.resources(&app.cluster).await?;
        rm.update_app_resource(&app, new, old.as_ref(), update_ancillary).await?;
        self.store.update_application(&app).await?;

        let key = app.key();
        let versions = self.store.list_versions(&key).await?;
        if let Some(primary) = versions.into_iter().find(|v| v.pod_version == previous) {
            self.store.delete_version(&key, &previous).await?;
            let moved = Version {
                pod_version: app.pod_version.clone(),
                template: app.template.clone(),
                replicas: app.replicas,
                ..primary
            };
            self.store.upsert_version(&moved).await?;
            self.republish_weights(&rm, &key).await?;
        }
        info!(app=%key, pod_version=%app.pod_version, "app.redeploy.ok");
        Ok(app)
    }

    #[instrument(skip_all, fields(app=%key))]
    pub async fn reconfigure(&self, key: &AppKey, raw: &str, update_ancillary: bool) -> EngineResult<Application> {
        let app = self.load(key).await?;
        let template = parse_template(raw, &self.config)?;
        self.redeploy(app, template.as_ref(), update_ancillary).await
    }

    #[instrument(skip_all, fields(app=%key))]
    pub async fn restart(&self, key: &AppKey) -> EngineResult<Application> {
        let app = self.load(key).await?;
        let stamped = self.template_of(&app)?.with_restart_stamp(&Utc::now().to_rfc3339());
        self.redeploy(app, stamped.as_ref(), false).await
    }

    #[instrument(skip_all, fields(app=%key, replicas = replicas))]
    pub async fn scale(&self, key: &AppKey, replicas: i32) -> EngineResult<Application> {
        let app = self.load(key).await?;
        let scaled = self.template_of(&app)?.replicas(replicas);
        self.redeploy(app, scaled.as_ref(), false).await
    }

    #[instrument(skip_all, fields(app=%key))]
    pub async fn rolling_update(&self, key: &AppKey, images: &[ContainerImage]) -> EngineResult<Application> {
        let app = self.load(key).await?;
        let updated = self.template_of(&app)?.image(images)?;
        self.redeploy(app, updated.as_ref(), false).await
    }

    /// Every target must exist and accept its image overrides before the first group starts.
    async fn precheck_batch_update(&self, cluster: &str, namespace: &str, updates: &[(String, Vec<ContainerImage>)]) -> EngineResult<()> {
        let mut seen = HashSet::new();
        for (name, images) in updates {
            if !seen.insert(name.as_str()) {
                return Err(EngineError::validation(format!("application '{name}' appears twice in the batch")));
            }
            let app = self.load(&AppKey::new(cluster, namespace, name)).await?;
            self.template_of(&app)?.image(images)?;
        }
        Ok(())
    }

    /// Rolling-update many applications in groups of `batch_group_size`. Groups run one after
    /// another; a failure stops later groups once the current one has finished. `Err` without a
    /// batch payload means the pre-check failed and nothing was rolled.
    #[instrument(skip_all, fields(cluster=%cluster, namespace=%namespace, count=updates.len()))]
    pub async fn batch_rolling_update(
        &self,
        cluster: &str,
        namespace: &str,
        updates: Vec<(String, Vec<ContainerImage>)>,
    ) -> EngineResult<Vec<Application>> {
        self.precheck_batch_update(cluster, namespace, &updates).await?;
        let group_size = self.config.batch_group_size.max(1);
        let mut done = Vec::new();
        let mut failures = Vec::new();
        for (n, group) in updates.chunks(group_size).enumerate() {
            let results = join_all(group.iter().map(|(name, images)| async move {
                let key = AppKey::new(cluster, namespace, name);
                (name.clone(), self.rolling_update(&key, images).await)
            }))
            .await;
            for (name, result) in results {
                match result {
                    Ok(app) => done.push(app),
                    Err(e) => failures.push((name, e)),
                }
            }
            if !failures.is_empty() {
                let skipped = updates.len().saturating_sub((n + 1) * group_size);
                warn!(group = n, failed = failures.len(), skipped, "app.batch_update.aborted");
                break;
            }
        }
        if failures.is_empty() { Ok(done) } else { Err(EngineError::Batch(failures)) }
    }

    /// Page of applications; with no namespace in the filter, every namespace the lister allows.
    pub async fn list(&self, filter: &AppFilter) -> EngineResult<Page<Application>> {
        let namespaces = match &filter.namespace {
            Some(_) => Vec::new(),
            None => self.namespaces.namespaces(&filter.cluster).await?,
        };
        Ok(self.store.list_applications(filter, &namespaces).await?)
    }

    #[instrument(skip_all, fields(app=%key))]
    pub async fn set_labels(&self, key: &AppKey, labels: &Labels) -> EngineResult<Application> {
        let app = self.load(key).await?;
        let labelled = self.template_of(&app)?.with_labels(labels)?;
        self.redeploy(app, labelled.as_ref(), false).await
    }

    /// Semantic version per pod version: the application's own, then each lineage's template.
    fn version_names(&self, app: &Application, versions: &[Version]) -> HashMap<String, String> {
        let mut names = HashMap::new();
        for v in versions {
            let name = parse_stored_template(&v.template).map(|t| t.version()).unwrap_or_else(|_| v.pod_version.clone());
            names.insert(v.pod_version.clone(), name);
        }
        names.insert(app.pod_version.clone(), app.version.clone());
        names
    }

    async fn live_pods(&self, cluster: &dyn ClusterApi, app: &Application) -> EngineResult<Vec<Pod>> {
        Ok(cluster.list_pods(&app.namespace, &selector(&app.name, None)).await?)
    }

    fn pod_details(&self, app: &Application, versions: &[Version], pods: &[Pod], weights: &[i32]) -> Vec<PodDetail> {
        let names = self.version_names(app, versions);
        pods.iter()
            .zip(weights)
            .map(|(pod, weight)| {
                let raw = pod.metadata.labels.as_ref().and_then(|l| l.get(POD_VERSION)).cloned().unwrap_or_default();
                let version = names.get(&raw).cloned().unwrap_or(raw);
                pod_detail(pod, version, *weight)
            })
            .collect()
    }

    /// Pull ready/updated/available counters and the availability message from the live workload.
    async fn refresh_counters(&self, cluster: &dyn ClusterApi, app: &mut Application) -> EngineResult<bool> {
        if app.kind != Kind::Deployment { return Ok(false); }
        let Some(status) = cluster.get_deployment(&app.namespace, &app.name).await?.and_then(|d| d.status) else {
            return Ok(false);
        };
        let ready = status.ready_replicas.unwrap_or(0);
        let updated = status.updated_replicas.unwrap_or(0);
        let available = status.available_replicas.unwrap_or(0);
        let message = status
            .conditions
            .iter()
            .flatten()
            .find(|c| c.type_ == "Available")
            .and_then(|c| c.message.clone())
            .unwrap_or_default();
        let changed = (ready, updated, available, message.as_str())
            != (app.ready_replicas, app.updated_replicas, app.available_replicas, app.message.as_str());
        app.ready_replicas = ready;
        app.updated_replicas = updated;
        app.available_replicas = available;
        app.message = message;
        Ok(changed)
    }

    #[instrument(skip_all, fields(app=%key))]
    pub async fn get_detail(&self, key: &AppKey) -> EngineResult<AppDetail> {
        let mut app = self.load(key).await?;
        let cluster = self.clients.get_or_create(&key.cluster).await?;
        if self.refresh_counters(cluster.as_ref(), &mut app).await? {
            app.updated_at = Utc::now();
            self.store.update_application(&app).await?;
        }
        let pods = self.live_pods(cluster.as_ref(), &app).await?;
        let versions = self.store.list_versions(key).await?;
        let (dist, weights) = pod_weights(&versions, &pods);
        let (pod_count, status) = app_status(app.replicas, &pods);
        let lineage_weights = versions
            .iter()
            .map(|v| VersionWeight {
                pod_version: v.pod_version.clone(),
                stage: v.stage,
                declared_weight: dist.declared_of(&v.pod_version).unwrap_or(0),
                effective_weight: dist.weight_of(&v.pod_version).unwrap_or(0),
                running_pods: pods
                    .iter()
                    .filter(|p| is_running(p))
                    .filter(|p| p.metadata.labels.as_ref().and_then(|l| l.get(POD_VERSION)) == Some(&v.pod_version))
                    .count(),
            })
            .collect();
        let pods = self.pod_details(&app, &versions, &pods, &weights);
        Ok(AppDetail { application: app, pod_count, status, pods, versions: lineage_weights, other_weight: dist.other })
    }

    #[instrument(skip_all, fields(app=%key))]
    pub async fn get_pod_list(&self, key: &AppKey) -> EngineResult<Vec<PodDetail>> {
        let app = self.load(key).await?;
        let cluster = self.clients.get_or_create(&key.cluster).await?;
        let pods = self.live_pods(cluster.as_ref(), &app).await?;
        let versions = self.store.list_versions(key).await?;
        let (_, weights) = pod_weights(&versions, &pods);
        Ok(self.pod_details(&app, &versions, &pods, &weights))
    }
}
