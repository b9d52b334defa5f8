//! Label and annotation keys stamped on every object the engine manages.

use std::collections::BTreeMap;

/// Application name. Services and workloads select on this label.
pub const APP_NAME: &str = "canopy.dev/app";

/// Semantic application version.
pub const APP_VERSION: &str = "canopy.dev/version";

/// Per-generation pod version.
pub const POD_VERSION: &str = "canopy.dev/pod-version";

/// Marks objects the engine synthesized itself. Only these are auto-deleted when superseded.
pub const DEFAULT_MARKER: &str = "canopy.dev/default";

/// Deletion marker picked up by the external garbage collector.
pub const MARKED_FOR_DELETION: &str = "canopy.dev/marked-for-deletion";

/// Pod-template annotation stamped by restart.
pub const RESTARTED_AT: &str = "canopy.dev/restarted-at";

/// Service annotation carrying the per-lineage weight map as JSON.
pub const WEIGHTS: &str = "canopy.dev/weights";

/// Service-mesh sidecar injection annotation.
pub const MESH_INJECT: &str = "sidecar.istio.io/inject";

/// Label selector string for an application, optionally narrowed to one pod version.
pub fn selector(app: &str, pod_version: Option<&str>) -> String {
    match pod_version {
        Some(pv) => format!("{APP_NAME}={app},{POD_VERSION}={pv}"),
        None => format!("{APP_NAME}={app}"),
    }
}

pub fn is_default_marked(annotations: Option<&BTreeMap<String, String>>) -> bool {
    annotations.and_then(|a| a.get(DEFAULT_MARKER)).map(|v| v == "true").unwrap_or(false)
}
