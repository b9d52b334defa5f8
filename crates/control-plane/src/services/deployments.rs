use std::time::Instant;

use tracing::{info, warn};

use super::apps::Engine;
use crate::error::{EngineError, EngineResult};
use crate::models::{AppKey, Application};
use crate::reconciler::workload::reconciler_for;
use crate::telemetry::{outcome, DEPLOY_DURATION};
use crate::template::Template;

/// Install-or-update pipeline for exactly one application, so a batch runs as independent tasks.
pub struct DeployWorker {
    engine: Engine,
    cluster: String,
    namespace: String,
    template: Box<dyn Template>,
    force: bool,
}

impl DeployWorker {
    pub fn new(engine: Engine, cluster: &str, namespace: &str, template: Box<dyn Template>, force: bool) -> Self {
        Self { engine, cluster: cluster.to_string(), namespace: namespace.to_string(), template, force }
    }

    pub fn app_name(&self) -> &str { self.template.app_name() }

    fn key(&self) -> AppKey { AppKey::new(&self.cluster, &self.namespace, self.app_name()) }

    pub async fn run(self) -> EngineResult<Application> {
        let started = Instant::now();
        let result = self.execute().await;
        let path = match &result { Ok((path, _)) => *path, Err(_) => "unknown" };
        DEPLOY_DURATION.with_label_values(&[path, outcome(&result)]).observe(started.elapsed().as_secs_f64());
        match result {
            Ok((path, app)) => {
                info!(app=%app.key(), path, pod_version=%app.pod_version, "deploy.ok");
                Ok(app)
            }
            Err(e) => {
                warn!(app=%self.key(), error=%e, code=e.code(), "deploy.failed");
                Err(e)
            }
        }
    }

    async fn execute(&self) -> EngineResult<(&'static str, Application)> {
        // Nothing, including a forced uninstall elsewhere, may happen for a kind that cannot deploy.
        reconciler_for(self.template.kind()).ensure_supported()?;
        self.resolve_exotic().await?;
        match self.engine.store.get_application(&self.key()).await {
            Ok(existing) => Ok(("reconfigure", self.engine.redeploy(existing, self.template.as_ref(), true).await?)),
            Err(e) if e.is_not_found() => Ok(("create", self.create().await?)),
            Err(e) => Err(e.into()),
        }
    }

    /// Same-named applications in other namespaces of the cluster fail the deploy, or with `force`
    /// are uninstalled first.
    async fn resolve_exotic(&self) -> EngineResult<()> {
        let exotic: Vec<Application> = self
            .engine
            .store
            .find_by_name(&self.cluster, self.app_name())
            .await?
            .into_iter()
            .filter(|a| a.namespace != self.namespace)
            .collect();
        if exotic.is_empty() { return Ok(()); }
        if !self.force {
            let namespaces: Vec<&str> = exotic.iter().map(|a| a.namespace.as_str()).collect();
            return Err(EngineError::conflict(format!(
                "application '{}' already exists in namespace(s): {}",
                self.app_name(),
                namespaces.join(", ")
            )));
        }
        for app in exotic {
            warn!(app=%app.key(), target_namespace=%self.namespace, "deploy.force.uninstall_exotic");
            self.engine.uninstall(&app.key()).await?;
        }
        Ok(())
    }

    async fn create(&self) -> EngineResult<Application> {
        let engine = &self.engine;
        let app = self.template.generate_app_object(&self.cluster, &self.namespace, &engine.config)?;
        let rm = engine.resources(&self.cluster).await?;
        let created = rm.create_app_resource(&self.namespace, self.template.as_ref(), &app.pod_version).await?;

        if let Err(e) = engine.store.create_application(&app).await {
            // Objects that already existed were merged into, not created, and stay live.
            warn!(app=%app.key(), error=%e, steps=created.len(), "deploy.persist_failed.rollback");
            let failed = created.unwind().await;
            if failed > 0 {
                warn!(app=%app.key(), failed, "deploy.rollback.cluster_failed");
            }
            // Only remove a row this worker wrote; a concurrent winner keeps its record.
            if let Ok(stored) = engine.store.get_application(&app.key()).await {
                if stored.id == app.id {
                    if let Err(undo) = engine.store.delete_application(&app.key()).await {
                        warn!(app=%app.key(), error=%undo, "deploy.rollback.store_failed");
                    }
                }
            }
            return Err(e.into());
        }
        created.discard();

        let cluster = rm.cluster().clone();
        let (ns, name) = (self.namespace.clone(), app.name.clone());
        engine
            .waiter
            .wait_for("deployment.visible", || {
                let cluster = cluster.clone();
                let (ns, name) = (ns.clone(), name.clone());
                async move { cluster.get_deployment(&ns, &name).await.map(|d| d.is_some()) }
            })
            .await;

        if let Some(hook) = &engine.post_create {
            if let Err(e) = hook(app.clone()).await {
                warn!(app=%app.key(), error=%e, "deploy.post_create_failed");
            }
        }
        Ok(app)
    }
}
