//! Templates turn a declarative application spec into a persistable [`Application`] record and
//! into the concrete, versioned object set for one deploy generation.
//!
//! Flavors are dispatched through the [`Template`] trait. Only [`NativeTemplate`] exists today;
//! the serialized form carries a `flavor` tag so further variants can be added without touching
//! callers.

pub mod ingress;
pub mod native;
pub mod validate;

use std::fmt;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{PodSpec, Service};
use k8s_openapi::api::networking::v1::Ingress;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::labels::POD_VERSION;
use crate::models::{Application, ContainerImage, Kind, Labels};

pub use native::NativeTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFlavor {
    #[default]
    Native,
}

/// Capability interface every template flavor implements. Mutators return a new template and
/// leave `self` untouched.
pub trait Template: Send + Sync + fmt::Debug {
    fn flavor(&self) -> TemplateFlavor;
    fn app_name(&self) -> &str;
    fn kind(&self) -> Kind;
    /// Semantic version derived from the main container image.
    fn version(&self) -> String;

    /// Fresh, not yet persisted record with a newly minted pod version.
    fn generate_app_object(&self, cluster: &str, namespace: &str, cfg: &EngineConfig) -> EngineResult<Application>;
    /// Re-derive from this template and merge onto `app`. Kind may not change.
    fn update_app_object(&self, app: &mut Application, cfg: &EngineConfig) -> EngineResult<()>;
    fn generate_kube_object(&self, cluster: &str, namespace: &str, pod_version: &str, cfg: &EngineConfig) -> EngineResult<ObjectSet>;
    fn validate(&self, cfg: &EngineConfig) -> EngineResult<()>;

    fn image(&self, images: &[ContainerImage]) -> EngineResult<Box<dyn Template>>;
    fn replicas(&self, replicas: i32) -> Box<dyn Template>;
    fn default_label(&self) -> Box<dyn Template>;
    fn with_labels(&self, labels: &Labels) -> EngineResult<Box<dyn Template>>;
    fn with_restart_stamp(&self, at: &str) -> Box<dyn Template>;

    /// Serialized snapshot, stored on the Application record.
    fn snapshot(&self) -> EngineResult<String>;
    fn clone_box(&self) -> Box<dyn Template>;
}

impl Clone for Box<dyn Template> {
    fn clone(&self) -> Self { self.clone_box() }
}

#[derive(Deserialize)]
struct FlavorTag {
    #[serde(default)]
    flavor: TemplateFlavor,
}

/// Parse a YAML or JSON template. The size limit is checked before anything is decoded.
pub fn parse_template(raw: &str, cfg: &EngineConfig) -> EngineResult<Box<dyn Template>> {
    validate::check_size(raw.len(), cfg.max_template_bytes)?;
    decode(raw)
}

/// Parse a snapshot already persisted on a record. The size limit applied when it was stored,
/// so a limit lowered since then does not lock the application out.
pub fn parse_stored_template(raw: &str) -> EngineResult<Box<dyn Template>> { decode(raw) }

fn decode(raw: &str) -> EngineResult<Box<dyn Template>> {
    let value: serde_json::Value =
        serde_yaml::from_str(raw).map_err(|e| EngineError::validation(format!("template is not valid YAML/JSON: {e}")))?;
    let tag: FlavorTag =
        serde_json::from_value(value.clone()).map_err(|e| EngineError::validation(format!("unknown template flavor: {e}")))?;
    match tag.flavor {
        TemplateFlavor::Native => {
            let t: NativeTemplate = serde_json::from_value(value)
                .map_err(|e| EngineError::validation(format!("malformed native template: {e}")))?;
            Ok(Box::new(t))
        }
    }
}

/// The primary workload of a generation.
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    Deployment(Deployment),
    DaemonSet(DaemonSet),
}

impl Workload {
    pub fn kind(&self) -> Kind {
        match self { Self::Deployment(_) => Kind::Deployment, Self::DaemonSet(_) => Kind::DaemonSet }
    }

    pub fn name(&self) -> String {
        let meta = match self { Self::Deployment(d) => &d.metadata, Self::DaemonSet(d) => &d.metadata };
        meta.name.clone().unwrap_or_default()
    }

    pub fn pod_spec(&self) -> Option<&PodSpec> {
        match self {
            Self::Deployment(d) => d.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            Self::DaemonSet(d) => d.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
        }
    }

    /// Rename to `<name>-<pod_version>` and pin the selector to the pod version, so a release
    /// lineage can run beside the primary workload.
    pub fn into_lineage(self, pod_version: &str) -> Self {
        match self {
            Self::Deployment(mut d) => {
                d.metadata.name = d.metadata.name.map(|n| format!("{n}-{pod_version}"));
                if let Some(spec) = d.spec.as_mut() {
                    spec.selector
                        .match_labels
                        .get_or_insert_with(Default::default)
                        .insert(POD_VERSION.to_string(), pod_version.to_string());
                }
                Self::Deployment(d)
            }
            Self::DaemonSet(mut d) => {
                d.metadata.name = d.metadata.name.map(|n| format!("{n}-{pod_version}"));
                if let Some(spec) = d.spec.as_mut() {
                    spec.selector
                        .match_labels
                        .get_or_insert_with(Default::default)
                        .insert(POD_VERSION.to_string(), pod_version.to_string());
                }
                Self::DaemonSet(d)
            }
        }
    }

    pub fn to_value(&self) -> EngineResult<serde_json::Value> {
        Ok(match self {
            Self::Deployment(d) => serde_json::to_value(d)?,
            Self::DaemonSet(d) => serde_json::to_value(d)?,
        })
    }
}

/// Desired object set for one (cluster, namespace, pod version).
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSet {
    pub workload: Workload,
    pub services: Vec<Service>,
    pub ingresses: Vec<Ingress>,
}

impl ObjectSet {
    pub fn to_values(&self) -> EngineResult<Vec<serde_json::Value>> {
        let mut out = Vec::with_capacity(1 + self.services.len() + self.ingresses.len());
        for s in &self.services { out.push(serde_json::to_value(s)?); }
        for i in &self.ingresses { out.push(serde_json::to_value(i)?); }
        out.push(self.workload.to_value()?);
        Ok(out)
    }
}
