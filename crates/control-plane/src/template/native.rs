use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, Deployment};
use k8s_openapi::api::core::v1::{Container, LocalObjectReference, PodSpec, Service, ServiceSpec};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ingress::{first_host, synthesize_default};
use super::validate::{check_name, check_pod_spec, check_replicas, check_size};
use super::{ObjectSet, Template, TemplateFlavor, Workload};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::labels::{APP_NAME, APP_VERSION, MESH_INJECT, POD_VERSION, RESTARTED_AT};
use crate::models::{new_pod_version, Application, ContainerImage, Kind, Labels};

const RESERVED_PREFIX: &str = "canopy.dev/";

/// Plain Kubernetes objects: one workload plus its services and ingresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeTemplate {
    #[serde(default)]
    pub flavor: TemplateFlavor,
    #[serde(default)]
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_mesh: Option<bool>,
    pub workload: Deployment,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<Service>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingresses: Vec<Ingress>,
}

/// Tag of an image reference, ignoring registry ports and digests.
fn image_tag(image: &str) -> Option<&str> {
    let image = image.split('@').next()?;
    let last = image.rsplit('/').next()?;
    last.rsplit_once(':').map(|(_, tag)| tag).filter(|t| !t.is_empty())
}

/// Clamp to a legal label value: at most 63 chars, alphanumeric at both ends.
fn label_value(raw: &str) -> String {
    let cleaned: String = raw.chars().map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '-' }).collect();
    let cut: String = cleaned.chars().take(63).collect();
    cut.trim_matches(|c: char| !c.is_ascii_alphanumeric()).to_string()
}

fn stamp(meta: &mut ObjectMeta, namespace: &str, name: &str, version: &str, pod_version: &str) {
    meta.namespace = Some(namespace.to_string());
    let labels = meta.labels.get_or_insert_with(BTreeMap::new);
    labels.insert(APP_NAME.to_string(), name.to_string());
    labels.insert(APP_VERSION.to_string(), label_value(version));
    labels.insert(POD_VERSION.to_string(), pod_version.to_string());
}

fn to_daemon_set(dep: Deployment) -> DaemonSet {
    let spec = dep.spec.map(|s| DaemonSetSpec {
        selector: s.selector,
        template: s.template,
        min_ready_seconds: s.min_ready_seconds,
        revision_history_limit: s.revision_history_limit,
        update_strategy: None,
    });
    DaemonSet { metadata: dep.metadata, spec, status: None }
}

impl NativeTemplate {
    fn pod_spec(&self) -> Option<&PodSpec> { self.workload.spec.as_ref().and_then(|s| s.template.spec.as_ref()) }

    fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        self.workload.spec.as_mut().and_then(|s| s.template.spec.as_mut())
    }

    fn main_container(&self) -> Option<&Container> { self.pod_spec().and_then(|s| s.containers.first()) }

    pub fn main_image(&self) -> String {
        self.main_container().and_then(|c| c.image.clone()).unwrap_or_default()
    }

    pub fn replica_count(&self) -> i32 { self.workload.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1) }

    /// Tag of the main container image, `latest` when untagged.
    pub fn semantic_version(&self) -> String {
        image_tag(&self.main_image()).unwrap_or("latest").to_string()
    }

    fn mesh_enabled(&self, cfg: &EngineConfig) -> bool { self.service_mesh.unwrap_or(cfg.service_mesh_default) }

    fn default_address(&self, namespace: &str, cfg: &EngineConfig) -> Option<String> {
        let host = first_host(&self.ingresses).or_else(|| {
            let suffix = cfg.domain_suffix()?;
            let labelled = self.labelled();
            let synthesized = synthesize_default(labelled.app_name(), namespace, suffix, &labelled.services, &labelled.ingresses)?;
            first_host(std::slice::from_ref(&synthesized))
        })?;
        Some(format!("http://{host}"))
    }

    /// Copy with the application-name label on the workload, its selector and pod template,
    /// and on every service selector.
    pub fn labelled(&self) -> NativeTemplate {
        let mut t = self.clone();
        let name = t.app_name().to_string();
        t.workload.metadata.labels.get_or_insert_with(BTreeMap::new).insert(APP_NAME.to_string(), name.clone());
        if let Some(spec) = t.workload.spec.as_mut() {
            spec.selector.match_labels.get_or_insert_with(BTreeMap::new).insert(APP_NAME.to_string(), name.clone());
            spec.template
                .metadata
                .get_or_insert_with(ObjectMeta::default)
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert(APP_NAME.to_string(), name.clone());
        }
        for svc in t.services.iter_mut() {
            svc.spec
                .get_or_insert_with(ServiceSpec::default)
                .selector
                .get_or_insert_with(BTreeMap::new)
                .insert(APP_NAME.to_string(), name.clone());
        }
        t
    }
}

impl Template for NativeTemplate {
    fn flavor(&self) -> TemplateFlavor { TemplateFlavor::Native }

    fn app_name(&self) -> &str { self.workload.metadata.name.as_deref().unwrap_or("") }

    fn kind(&self) -> Kind { self.kind }

    fn version(&self) -> String { self.semantic_version() }

    fn generate_app_object(&self, cluster: &str, namespace: &str, cfg: &EngineConfig) -> EngineResult<Application> {
        self.validate(cfg)?;
        let now = Utc::now();
        Ok(Application {
            id: Uuid::new_v4(),
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
            name: self.app_name().to_string(),
            kind: self.kind,
            pod_version: new_pod_version(),
            version: self.semantic_version(),
            image: self.main_image(),
            template: self.snapshot()?,
            replicas: self.replica_count(),
            ready_replicas: 0,
            updated_replicas: 0,
            available_replicas: 0,
            message: String::new(),
            service_mesh: self.mesh_enabled(cfg),
            default_address: self.default_address(namespace, cfg),
            created_at: now,
            updated_at: now,
        })
    }

    fn update_app_object(&self, app: &mut Application, cfg: &EngineConfig) -> EngineResult<()> {
        if self.kind != app.kind {
            return Err(EngineError::validation(format!("kind may not change from {} to {}", app.kind, self.kind)));
        }
        if self.app_name() != app.name {
            return Err(EngineError::validation(format!("template names '{}', application is '{}'", self.app_name(), app.name)));
        }
        let image = self.main_image();
        if image.trim().is_empty() {
            return Err(EngineError::validation("main container image is empty"));
        }
        check_replicas(self.replica_count(), cfg.min_replicas, cfg.max_replicas)?;
        self.validate(cfg)?;
        app.image = image;
        app.replicas = self.replica_count();
        app.version = self.semantic_version();
        app.template = self.snapshot()?;
        app.service_mesh = self.mesh_enabled(cfg);
        app.default_address = self.default_address(&app.namespace, cfg);
        app.updated_at = Utc::now();
        Ok(())
    }

    fn generate_kube_object(&self, _cluster: &str, namespace: &str, pod_version: &str, cfg: &EngineConfig) -> EngineResult<ObjectSet> {
        let t = self.labelled();
        let name = t.app_name().to_string();
        let version = t.semantic_version();

        let mut deployment = t.workload.clone();
        deployment.status = None;
        stamp(&mut deployment.metadata, namespace, &name, &version, pod_version);
        if let Some(spec) = deployment.spec.as_mut() {
            let meta = spec.template.metadata.get_or_insert_with(ObjectMeta::default);
            let labels = meta.labels.get_or_insert_with(BTreeMap::new);
            labels.insert(APP_VERSION.to_string(), label_value(&version));
            labels.insert(POD_VERSION.to_string(), pod_version.to_string());
            meta.annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(MESH_INJECT.to_string(), t.mesh_enabled(cfg).to_string());
            if let (Some(secret), Some(pod)) = (cfg.registry_secret.as_deref(), spec.template.spec.as_mut()) {
                let pulls = pod.image_pull_secrets.get_or_insert_with(Vec::new);
                if !pulls.iter().any(|r| r.name.as_deref() == Some(secret)) {
                    pulls.push(LocalObjectReference { name: Some(secret.to_string()) });
                }
            }
        }

        let mut services = t.services.clone();
        for svc in services.iter_mut() {
            svc.status = None;
            stamp(&mut svc.metadata, namespace, &name, &version, pod_version);
        }
        let mut ingresses = t.ingresses.clone();
        for ing in ingresses.iter_mut() {
            ing.status = None;
            stamp(&mut ing.metadata, namespace, &name, &version, pod_version);
        }
        if let Some(suffix) = cfg.domain_suffix() {
            if let Some(mut synthesized) = synthesize_default(&name, namespace, suffix, &services, &t.ingresses) {
                stamp(&mut synthesized.metadata, namespace, &name, &version, pod_version);
                ingresses.push(synthesized);
            }
        }

        let workload = match t.kind {
            Kind::Deployment => Workload::Deployment(deployment),
            Kind::DaemonSet => Workload::DaemonSet(to_daemon_set(deployment)),
        };
        Ok(ObjectSet { workload, services, ingresses })
    }

    fn validate(&self, cfg: &EngineConfig) -> EngineResult<()> {
        check_size(self.snapshot()?.len(), cfg.max_template_bytes)?;
        check_name(self.app_name())?;
        let spec = self.pod_spec().ok_or_else(|| EngineError::validation("workload has no pod template spec"))?;
        check_pod_spec(spec)?;
        check_replicas(self.replica_count(), cfg.min_replicas, cfg.max_replicas)?;
        if let Some(svc) = self.services.iter().find(|s| s.metadata.name.as_deref().unwrap_or("").is_empty()) {
            return Err(EngineError::validation(format!("service without a name: {:?}", svc.spec.as_ref().map(|s| &s.ports))));
        }
        if self.ingresses.iter().any(|i| i.metadata.name.as_deref().unwrap_or("").is_empty()) {
            return Err(EngineError::validation("ingress without a name"));
        }
        Ok(())
    }

    fn image(&self, images: &[ContainerImage]) -> EngineResult<Box<dyn Template>> {
        let mut t = self.clone();
        let spec = t.pod_spec_mut().ok_or_else(|| EngineError::validation("workload has no pod template spec"))?;
        for ci in images {
            let found = spec
                .containers
                .iter_mut()
                .chain(spec.init_containers.iter_mut().flatten())
                .find(|c| c.name == ci.container);
            match found {
                Some(c) => c.image = Some(ci.image.clone()),
                None => return Err(EngineError::validation(format!("no container named '{}'", ci.container))),
            }
        }
        Ok(Box::new(t))
    }

    fn replicas(&self, replicas: i32) -> Box<dyn Template> {
        let mut t = self.clone();
        if let Some(spec) = t.workload.spec.as_mut() { spec.replicas = Some(replicas); }
        Box::new(t)
    }

    fn default_label(&self) -> Box<dyn Template> { Box::new(self.labelled()) }

    fn with_labels(&self, labels: &Labels) -> EngineResult<Box<dyn Template>> {
        if let Some(k) = labels.keys().find(|k| k.starts_with(RESERVED_PREFIX)) {
            return Err(EngineError::validation(format!("label '{k}' is reserved")));
        }
        let mut t = self.clone();
        t.workload.metadata.labels.get_or_insert_with(BTreeMap::new).extend(labels.clone());
        if let Some(spec) = t.workload.spec.as_mut() {
            spec.template
                .metadata
                .get_or_insert_with(ObjectMeta::default)
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(labels.clone());
        }
        Ok(Box::new(t))
    }

    fn with_restart_stamp(&self, at: &str) -> Box<dyn Template> {
        let mut t = self.clone();
        if let Some(spec) = t.workload.spec.as_mut() {
            spec.template
                .metadata
                .get_or_insert_with(ObjectMeta::default)
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(RESTARTED_AT.to_string(), at.to_string());
        }
        Box::new(t)
    }

    fn snapshot(&self) -> EngineResult<String> { Ok(serde_json::to_string(self)?) }

    fn clone_box(&self) -> Box<dyn Template> { Box::new(self.clone()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::DEFAULT_MARKER;
    use crate::template::parse_template;
    use crate::test_support::native_template_yaml;

    fn native(name: &str, image: &str, replicas: i32) -> NativeTemplate {
        serde_yaml::from_str(&native_template_yaml(name, image, replicas)).unwrap()
    }

    #[test]
    fn image_tags() {
        assert_eq!(image_tag("nginx:1.25"), Some("1.25"));
        assert_eq!(image_tag("registry:5000/team/web"), None);
        assert_eq!(image_tag("registry:5000/team/web:v2@sha256:abc"), Some("v2"));
    }

    #[test]
    fn app_object_derives_image_replicas_version() {
        let app = native("web", "nginx:1.25", 3).generate_app_object("c1", "prod", &EngineConfig::default()).unwrap();
        assert_eq!(app.image, "nginx:1.25");
        assert_eq!(app.replicas, 3);
        assert_eq!(app.version, "1.25");
        assert_eq!(app.kind, Kind::Deployment);
        assert!(!app.pod_version.is_empty());
    }

    #[test]
    fn identical_template_update_is_a_no_op_on_derived_fields() {
        let cfg = EngineConfig::default();
        let t = native("web", "nginx:1.25", 2);
        let mut app = t.generate_app_object("c1", "prod", &cfg).unwrap();
        let before = app.clone();
        t.update_app_object(&mut app, &cfg).unwrap();
        assert_eq!(app.image, before.image);
        assert_eq!(app.replicas, before.replicas);
        assert_eq!(app.version, before.version);
        assert_eq!(app.template, before.template);
    }

    #[test]
    fn update_rejects_kind_change_and_range() {
        let cfg = EngineConfig { max_replicas: 4, ..EngineConfig::default() };
        let mut app = native("web", "nginx:1.25", 2).generate_app_object("c1", "prod", &cfg).unwrap();
        let mut ds = native("web", "nginx:1.25", 2);
        ds.kind = Kind::DaemonSet;
        assert!(ds.update_app_object(&mut app, &cfg).unwrap_err().to_string().contains("kind may not change"));
        let too_many = native("web", "nginx:1.25", 9);
        assert_eq!(too_many.update_app_object(&mut app, &cfg).unwrap_err().code(), "bad_request");
        assert_eq!(app.replicas, 2);
    }

    #[test]
    fn kube_objects_carry_generation_labels() {
        let cfg = EngineConfig { registry_secret: Some("pull".into()), ..EngineConfig::default() };
        let set = native("web", "nginx:1.25", 1).generate_kube_object("c1", "prod", "pv1", &cfg).unwrap();
        let Workload::Deployment(dep) = &set.workload else { panic!("expected deployment") };
        let labels = dep.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[APP_NAME], "web");
        assert_eq!(labels[APP_VERSION], "1.25");
        assert_eq!(labels[POD_VERSION], "pv1");
        let tmpl = dep.spec.as_ref().unwrap().template.metadata.as_ref().unwrap();
        assert_eq!(tmpl.labels.as_ref().unwrap()[POD_VERSION], "pv1");
        assert_eq!(tmpl.annotations.as_ref().unwrap()[MESH_INJECT], "false");
        let pulls = dep.spec.as_ref().unwrap().template.spec.as_ref().unwrap().image_pull_secrets.as_ref().unwrap();
        assert_eq!(pulls[0].name.as_deref(), Some("pull"));
        let svc = &set.services[0];
        assert_eq!(svc.metadata.labels.as_ref().unwrap()[POD_VERSION], "pv1");
        assert_eq!(svc.spec.as_ref().unwrap().selector.as_ref().unwrap()[APP_NAME], "web");
        assert!(set.ingresses.is_empty());
    }

    #[test]
    fn domain_suffix_synthesizes_default_ingress_and_address() {
        let cfg = EngineConfig { domain_suffix: Some("apps.io".into()), ..EngineConfig::default() };
        let t = native("web", "nginx:1.25", 1);
        let set = t.generate_kube_object("c1", "prod", "pv1", &cfg).unwrap();
        assert_eq!(set.ingresses.len(), 1);
        let ing = &set.ingresses[0];
        assert_eq!(ing.metadata.annotations.as_ref().unwrap()[DEFAULT_MARKER], "true");
        let app = t.generate_app_object("c1", "prod", &cfg).unwrap();
        assert_eq!(app.default_address.as_deref(), Some("http://web-80-prod.apps.io"));
    }

    #[test]
    fn mutators_leave_original_untouched() {
        let cfg = EngineConfig::default();
        let t = native("web", "nginx:1.25", 1);
        let snapshot = t.snapshot().unwrap();
        let updated = t.image(&[ContainerImage { container: "web".into(), image: "nginx:1.27".into() }]).unwrap();
        let scaled = updated.replicas(4);
        assert_eq!(t.snapshot().unwrap(), snapshot);
        let app = scaled.generate_app_object("c1", "prod", &cfg).unwrap();
        assert_eq!(app.version, "1.27");
        assert_eq!(app.replicas, 4);
        assert!(t.image(&[ContainerImage { container: "nope".into(), image: "x:1".into() }]).is_err());
    }

    #[test]
    fn reserved_labels_rejected() {
        let t = native("web", "nginx:1.25", 1);
        let mut labels = Labels::new();
        labels.insert("canopy.dev/app".into(), "x".into());
        assert!(t.with_labels(&labels).is_err());
        labels.clear();
        labels.insert("team".into(), "payments".into());
        let tagged = t.with_labels(&labels).unwrap();
        let set = tagged.generate_kube_object("c1", "prod", "pv", &EngineConfig::default()).unwrap();
        let Workload::Deployment(dep) = set.workload else { panic!("expected deployment") };
        assert_eq!(dep.metadata.labels.unwrap()["team"], "payments");
    }

    #[test]
    fn daemonset_kind_produces_daemonset_workload() {
        let raw = format!("kind: daemonset\n{}", native_template_yaml("agent", "fluent:2", 1));
        let t = parse_template(&raw, &EngineConfig::default()).unwrap();
        let set = t.generate_kube_object("c1", "ops", "pv", &EngineConfig::default()).unwrap();
        assert_eq!(set.workload.kind(), Kind::DaemonSet);
        assert_eq!(set.workload.name(), "agent");
    }
}
