//! Release lineages: canary workloads beside the primary one and the weights that split traffic
//! between them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use super::apps::Engine;
use crate::error::{EngineError, EngineResult};
use crate::labels::selector;
use crate::models::{new_pod_version, AppKey, Stage, Version};
use crate::reconciler::ResourceManager;
use crate::template::{parse_stored_template, parse_template};
use crate::weight::{backend_weights, backends, decode_weights, encode_weights, MIN_WEIGHT, TOTAL_WEIGHT};

/// Request to add a lineage, or to restage/reweight an existing one when `pod_version` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetVersionRequest {
    pub pod_version: Option<String>,
    pub stage: Stage,
    pub weight: i32,
    /// Template for a new lineage; the application's current template when absent.
    pub template: Option<String>,
    pub replicas: Option<i32>,
}

impl Engine {
    pub(crate) async fn republish_weights(&self, rm: &ResourceManager, key: &AppKey) -> EngineResult<()> {
        let versions = self.store.list_versions(key).await?;
        let weights: Vec<(String, i32)> = versions.iter().map(|v| (v.pod_version.clone(), v.weight)).collect();
        rm.publish_weights(&key.namespace, &key.name, &encode_weights(&weights)?).await
    }

    /// Add or update a release lineage and republish lineage weights on the application's Services.
    /// The first transition also records the primary lineage as `normal` holding the rest of the scale.
    #[instrument(skip_all, fields(app=%key, stage=req.stage.as_str(), weight=req.weight))]
    pub async fn set_version(&self, key: &AppKey, req: SetVersionRequest) -> EngineResult<Vec<Version>> {
        if !(MIN_WEIGHT..=TOTAL_WEIGHT).contains(&req.weight) {
            return Err(EngineError::validation(format!("weight {} outside [{MIN_WEIGHT}, {TOTAL_WEIGHT}]", req.weight)));
        }
        let app = self.load(key).await?;
        let rm = self.resources(&key.cluster).await?;
        let existing = self.store.list_versions(key).await?;

        if let Some(pv) = &req.pod_version {
            let Some(current) = existing.iter().find(|v| &v.pod_version == pv) else {
                return Err(EngineError::not_found(format!("version {pv} of {key}")));
            };
            let updated = Version { stage: req.stage, weight: req.weight, ..current.clone() };
            self.store.upsert_version(&updated).await?;
            self.republish_weights(&rm, key).await?;
            info!(pod_version=%pv, "version.updated");
            return self.store.list_versions(key).await.map_err(Into::into);
        }

        let template = match &req.template {
            Some(raw) => parse_template(raw, &self.config)?,
            None => parse_stored_template(&app.template)?,
        };
        if template.app_name() != app.name {
            return Err(EngineError::validation(format!("template names '{}', application is '{}'", template.app_name(), app.name)));
        }
        if template.kind() != app.kind {
            return Err(EngineError::validation(format!("kind may not change from {} to {}", app.kind, template.kind())));
        }
        let template = match req.replicas {
            Some(n) => template.replicas(n),
            None => template,
        };
        template.validate(&self.config)?;

        let now = Utc::now();
        if existing.is_empty() {
            let primary = Version {
                id: Uuid::new_v4(),
                cluster: app.cluster.clone(),
                namespace: app.namespace.clone(),
                name: app.name.clone(),
                pod_version: app.pod_version.clone(),
                stage: Stage::Normal,
                weight: TOTAL_WEIGHT - req.weight,
                replicas: app.replicas,
                cur_replicas: app.ready_replicas,
                template: app.template.clone(),
                created_at: now,
            };
            self.store.upsert_version(&primary).await?;
        }

        let pod_version = new_pod_version();
        rm.apply_lineage(&key.namespace, template.as_ref(), &pod_version).await?;
        let lineage = Version {
            id: Uuid::new_v4(),
            cluster: app.cluster.clone(),
            namespace: app.namespace.clone(),
            name: app.name.clone(),
            pod_version: pod_version.clone(),
            stage: req.stage,
            weight: req.weight,
            replicas: req.replicas.unwrap_or(app.replicas),
            cur_replicas: 0,
            template: template.snapshot()?,
            created_at: now,
        };
        self.store.upsert_version(&lineage).await?;
        self.republish_weights(&rm, key).await?;
        info!(pod_version=%pod_version, "version.created");
        Ok(self.store.list_versions(key).await?)
    }

    /// Per-backend weights for one Service, from its published lineage weights and live endpoints.
    #[instrument(skip_all, fields(app=%key, service=%service))]
    pub async fn backend_weights(&self, key: &AppKey, service: &str) -> EngineResult<Vec<(String, i32)>> {
        let cluster = self.clients.get_or_create(&key.cluster).await?;
        let svc = cluster
            .get_service(&key.namespace, service)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("service {}/{service}", key.namespace)))?;
        let lineages = decode_weights(&svc)?;
        let Some(endpoints) = cluster.get_endpoints(&key.namespace, service).await? else { return Ok(Vec::new()) };
        let pods = cluster.list_pods(&key.namespace, &selector(&key.name, None)).await?;
        Ok(backend_weights(&lineages, &backends(&endpoints, &pods)))
    }
}
