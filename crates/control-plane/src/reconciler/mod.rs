//! Cluster resource manager: ordered create, update and delete of one generation's objects.
//!
//! Services go first, then ingresses, then the workload, strictly one after another. A failed create
//! unwinds every object it created in reverse order before the error is returned.

pub mod merge;
pub mod rollback;
pub mod workload;

use std::collections::HashSet;
use std::sync::Arc;

use k8s_openapi::api::core::v1::PodSpec;
use tracing::{debug, info, instrument, warn};

use crate::capture::{spawn_capture, CaptureBatch, ConfigCapture};
use crate::cluster::{ClusterApi, ObjectKind};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::labels::{is_default_marked, selector, WEIGHTS};
use crate::models::{Application, Kind};
use crate::telemetry::{outcome, RECONCILE_TOTAL};
use crate::template::{ObjectSet, Template, Workload};

use merge::{merge_ingress, merge_service};
use rollback::UndoStack;
use workload::{reconciler_for, Applied};

pub struct ResourceManager {
    cluster_id: String,
    cluster: Arc<dyn ClusterApi>,
    config: Arc<EngineConfig>,
    capture: Arc<dyn ConfigCapture>,
}

fn object_name(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

impl ResourceManager {
    pub fn new(
        cluster_id: impl Into<String>,
        cluster: Arc<dyn ClusterApi>,
        config: Arc<EngineConfig>,
        capture: Arc<dyn ConfigCapture>,
    ) -> Self {
        Self { cluster_id: cluster_id.into(), cluster, config, capture }
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterApi> { &self.cluster }

    fn publish(&self, namespace: &str, app: &str, set: &ObjectSet) {
        match set.to_values() {
            Ok(objects) => spawn_capture(
                self.capture.clone(),
                CaptureBatch {
                    cluster: self.cluster_id.clone(),
                    namespace: namespace.to_string(),
                    app: app.to_string(),
                    objects,
                },
            ),
            Err(e) => warn!(app, error=%e, "capture.serialize_failed"),
        }
    }

    /// PVCs and ConfigMaps the workload mounts or imports must already exist.
    async fn check_references(&self, namespace: &str, spec: &PodSpec) -> EngineResult<()> {
        for vol in spec.volumes.iter().flatten() {
            if let Some(pvc) = &vol.persistent_volume_claim {
                if self.cluster.get_pvc(namespace, &pvc.claim_name).await?.is_none() {
                    return Err(EngineError::validation(format!("persistent volume claim '{}' does not exist", pvc.claim_name)));
                }
            }
            if let Some(cm) = &vol.config_map {
                let name = cm.name.clone().unwrap_or_default();
                if !cm.optional.unwrap_or(false) && self.cluster.get_config_map(namespace, &name).await?.is_none() {
                    return Err(EngineError::validation(format!("config map '{name}' does not exist")));
                }
            }
        }
        let env_refs = spec.containers.iter().chain(spec.init_containers.iter().flatten()).flat_map(|c| c.env_from.iter().flatten());
        for src in env_refs {
            if let Some(cm) = &src.config_map_ref {
                let name = cm.name.clone().unwrap_or_default();
                if !cm.optional.unwrap_or(false) && self.cluster.get_config_map(namespace, &name).await?.is_none() {
                    return Err(EngineError::validation(format!("config map '{name}' does not exist")));
                }
            }
        }
        Ok(())
    }

    async fn create_steps(&self, namespace: &str, set: &ObjectSet, undo: &mut UndoStack) -> EngineResult<()> {
        for svc in &set.services {
            let name = object_name(&svc.metadata);
            match self.cluster.get_service(namespace, &name).await? {
                None => {
                    self.cluster.create_service(namespace, svc).await?;
                    undo.push_mark(self.cluster.clone(), ObjectKind::Service, namespace, &name);
                }
                Some(live) => {
                    self.cluster.replace_service(namespace, &merge_service(&live, svc.clone())).await?;
                }
            }
        }
        for ing in &set.ingresses {
            let name = object_name(&ing.metadata);
            match self.cluster.get_ingress(namespace, &name).await? {
                None => {
                    self.cluster.create_ingress(namespace, ing).await?;
                    undo.push_mark(self.cluster.clone(), ObjectKind::Ingress, namespace, &name);
                }
                Some(live) => {
                    self.cluster.replace_ingress(namespace, &merge_ingress(&live, ing.clone())).await?;
                }
            }
        }
        if let Some(spec) = set.workload.pod_spec() {
            self.check_references(namespace, spec).await?;
        }
        let wr = reconciler_for(set.workload.kind());
        if wr.apply(self.cluster.as_ref(), namespace, &set.workload).await? == Applied::Created {
            undo.push_mark(self.cluster.clone(), wr.object_kind(), namespace, &set.workload.name());
        }
        Ok(())
    }

    /// Materialize one generation. Anything created before a failure is marked for deletion again.
    ///
    /// On success the returned stack holds one step per object this call created; pre-existing
    /// objects it merged into are not on it. The caller unwinds it when a later step fails, or
    /// discards it.
    #[instrument(skip(self, template), fields(cluster=%self.cluster_id, app=%template.app_name()))]
    pub async fn create_app_resource(&self, namespace: &str, template: &dyn Template, pod_version: &str) -> EngineResult<UndoStack> {
        reconciler_for(template.kind()).ensure_supported()?;
        let set = template.generate_kube_object(&self.cluster_id, namespace, pod_version, &self.config)?;
        let mut undo = UndoStack::new();
        let result = self.create_steps(namespace, &set, &mut undo).await;
        RECONCILE_TOTAL.with_label_values(&["create", outcome(&result)]).inc();
        match result {
            Ok(()) => {
                info!(namespace, pod_version, created = undo.len(), "reconcile.create.ok");
                self.publish(namespace, template.app_name(), &set);
                Ok(undo)
            }
            Err(e) => {
                warn!(namespace, pod_version, error=%e, steps=undo.len(), "reconcile.create.rollback");
                undo.unwind().await;
                Err(e)
            }
        }
    }

    async fn update_services(&self, namespace: &str, old: &ObjectSet, new: &ObjectSet) -> EngineResult<()> {
        let wanted: HashSet<String> = new.services.iter().map(|s| object_name(&s.metadata)).collect();
        for svc in &new.services {
            let name = object_name(&svc.metadata);
            match self.cluster.get_service(namespace, &name).await? {
                Some(live) => { self.cluster.replace_service(namespace, &merge_service(&live, svc.clone())).await?; }
                None => { self.cluster.create_service(namespace, svc).await?; }
            }
        }
        for svc in old.services.iter().filter(|s| !wanted.contains(&object_name(&s.metadata))) {
            let name = object_name(&svc.metadata);
            let Some(live) = self.cluster.get_service(namespace, &name).await? else { continue };
            if is_default_marked(live.metadata.annotations.as_ref()) {
                self.cluster.mark_for_deletion(ObjectKind::Service, namespace, &name).await?;
                debug!(namespace, service=%name, "reconcile.update.default_removed");
            }
        }
        Ok(())
    }

    async fn update_ingresses(&self, namespace: &str, old: &ObjectSet, new: &ObjectSet) -> EngineResult<()> {
        let wanted: HashSet<String> = new.ingresses.iter().map(|i| object_name(&i.metadata)).collect();
        for ing in &new.ingresses {
            let name = object_name(&ing.metadata);
            match self.cluster.get_ingress(namespace, &name).await? {
                Some(live) => { self.cluster.replace_ingress(namespace, &merge_ingress(&live, ing.clone())).await?; }
                None => { self.cluster.create_ingress(namespace, ing).await?; }
            }
        }
        for ing in old.ingresses.iter().filter(|i| !wanted.contains(&object_name(&i.metadata))) {
            let name = object_name(&ing.metadata);
            let Some(live) = self.cluster.get_ingress(namespace, &name).await? else { continue };
            if is_default_marked(live.metadata.annotations.as_ref()) {
                self.cluster.mark_for_deletion(ObjectKind::Ingress, namespace, &name).await?;
                debug!(namespace, ingress=%name, "reconcile.update.default_removed");
            }
        }
        Ok(())
    }

    /// Reconcile `app`'s workload to `new`; with `update_ancillary`, also diff services and ingresses
    /// between `old` and `new`. Old-only objects are removed only when default-marked.
    #[instrument(skip(self, app, new, old), fields(cluster=%self.cluster_id, app=%app.name))]
    pub async fn update_app_resource(
        &self,
        app: &Application,
        new: &dyn Template,
        old: &dyn Template,
        update_ancillary: bool,
    ) -> EngineResult<()> {
        let result = async {
            reconciler_for(app.kind).ensure_supported()?;
            let ns = app.namespace.as_str();
            let new_set = new.generate_kube_object(&self.cluster_id, ns, &app.pod_version, &self.config)?;
            if update_ancillary {
                let old_set = old.generate_kube_object(&self.cluster_id, ns, &app.pod_version, &self.config)?;
                self.update_services(ns, &old_set, &new_set).await?;
                self.update_ingresses(ns, &old_set, &new_set).await?;
            }
            if let Some(spec) = new_set.workload.pod_spec() {
                self.check_references(ns, spec).await?;
            }
            reconciler_for(app.kind).apply(self.cluster.as_ref(), ns, &new_set.workload).await?;
            Ok::<_, EngineError>(new_set)
        }
        .await;
        RECONCILE_TOTAL.with_label_values(&["update", outcome(&result)]).inc();
        let set = result?;
        info!(namespace=%app.namespace, pod_version=%app.pod_version, update_ancillary, "reconcile.update.ok");
        self.publish(&app.namespace, &app.name, &set);
        Ok(())
    }

    /// Mark every object of the generation for deletion. Every object is attempted; the first
    /// failure is returned.
    #[instrument(skip(self, template), fields(cluster=%self.cluster_id, app=%template.app_name()))]
    pub async fn delete_app_resource(&self, namespace: &str, template: &dyn Template, pod_version: &str) -> EngineResult<()> {
        let set = template.generate_kube_object(&self.cluster_id, namespace, pod_version, &self.config)?;
        let mut targets: Vec<(ObjectKind, String)> = Vec::new();
        targets.extend(set.services.iter().map(|s| (ObjectKind::Service, object_name(&s.metadata))));
        targets.extend(set.ingresses.iter().map(|i| (ObjectKind::Ingress, object_name(&i.metadata))));
        let workload_kind = match set.workload.kind() { Kind::Deployment => ObjectKind::Deployment, Kind::DaemonSet => ObjectKind::DaemonSet };
        targets.push((workload_kind, set.workload.name()));
        let mut first_err = None;
        for (kind, name) in targets {
            if let Err(e) = self.cluster.mark_for_deletion(kind, namespace, &name).await {
                warn!(namespace, kind=%kind, name=%name, error=%e, "reconcile.delete.mark_failed");
                first_err.get_or_insert(EngineError::from(e));
            }
        }
        let result = match first_err { Some(e) => Err(e), None => Ok(()) };
        RECONCILE_TOTAL.with_label_values(&["delete", outcome(&result)]).inc();
        result
    }

    /// Create or replace the workload of a release lineage beside the primary one.
    pub async fn apply_lineage(&self, namespace: &str, template: &dyn Template, pod_version: &str) -> EngineResult<()> {
        let wr = reconciler_for(template.kind());
        wr.ensure_supported()?;
        let set = template.generate_kube_object(&self.cluster_id, namespace, pod_version, &self.config)?;
        let workload: Workload = set.workload.into_lineage(pod_version);
        if let Some(spec) = workload.pod_spec() {
            self.check_references(namespace, spec).await?;
        }
        wr.apply(self.cluster.as_ref(), namespace, &workload).await?;
        debug!(namespace, pod_version, "reconcile.lineage.applied");
        Ok(())
    }

    pub async fn mark_lineage(&self, namespace: &str, app: &str, kind: Kind, pod_version: &str) -> EngineResult<()> {
        let object_kind = match kind { Kind::Deployment => ObjectKind::Deployment, Kind::DaemonSet => ObjectKind::DaemonSet };
        self.cluster.mark_for_deletion(object_kind, namespace, &format!("{app}-{pod_version}")).await?;
        Ok(())
    }

    /// Publish lineage weights on every Service of the application.
    pub async fn publish_weights(&self, namespace: &str, app: &str, weights: &str) -> EngineResult<()> {
        for mut svc in self.cluster.list_services(namespace, &selector(app, None)).await? {
            svc.metadata.annotations.get_or_insert_with(Default::default).insert(WEIGHTS.to_string(), weights.to_string());
            self.cluster.replace_service(namespace, &svc).await?;
        }
        Ok(())
    }
}
