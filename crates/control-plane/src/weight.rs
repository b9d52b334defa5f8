//! Traffic-share arithmetic for release lineages.
//!
//! Declared lineage weights live on a fixed scale of [`TOTAL_WEIGHT`]. Whatever the declarations
//! leave unclaimed goes to the implicit `other` bucket. A lineage with nothing running never keeps a
//! share: its weight is handed to its siblings before per-pod (or per-backend) shares are cut.

use std::collections::{BTreeMap, HashMap};

use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};

use crate::error::{EngineError, EngineResult};
use crate::labels::{POD_VERSION, WEIGHTS};
use crate::models::Version;

pub const TOTAL_WEIGHT: i32 = 100;
pub const MIN_WEIGHT: i32 = 0;
/// Bucket for pods and backends that belong to no declared lineage.
pub const OTHER: &str = "other";

/// Effective weights after clamping and redistribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    /// Declared weights after clamping to the remaining budget, in declaration order.
    pub declared: Vec<(String, i32)>,
    /// Post-redistribution weights, same order as `declared`.
    pub effective: Vec<(String, i32)>,
    pub other: i32,
}

impl Distribution {
    pub fn weight_of(&self, lineage: &str) -> Option<i32> {
        self.effective.iter().find(|(pv, _)| pv == lineage).map(|(_, w)| *w)
    }

    pub fn declared_of(&self, lineage: &str) -> Option<i32> {
        self.declared.iter().find(|(pv, _)| pv == lineage).map(|(_, w)| *w)
    }

    /// Weight owed to one member of `lineage` when `members` of it are live.
    pub fn per_member(&self, lineage: Option<&str>, members: usize) -> i32 {
        if members == 0 { return MIN_WEIGHT; }
        let pool = match lineage.and_then(|l| self.weight_of(l)) {
            Some(w) => w,
            None => self.other,
        };
        pool / members as i32
    }
}

/// Clamp declarations, derive `other`, then drain every lineage with no live members.
///
/// Lineages are visited in declaration order. A drained lineage splits its weight evenly over every
/// sibling not drained so far (the first recipient takes the remainder), so a sibling drained later
/// in the same pass forwards what it received. With no sibling left the weight goes to `other`.
pub fn distribute(lineages: &[(String, i32)], live: &HashMap<String, usize>) -> Distribution {
    let mut remaining = TOTAL_WEIGHT;
    let declared: Vec<(String, i32)> = lineages
        .iter()
        .map(|(pv, w)| {
            let w = (*w).max(MIN_WEIGHT).min(remaining);
            remaining -= w;
            (pv.clone(), w)
        })
        .collect();
    let claimed: i32 = declared.iter().map(|(_, w)| w).sum();
    let mut other = (TOTAL_WEIGHT - claimed).max(MIN_WEIGHT);

    let mut effective = declared.clone();
    let mut drained = vec![false; effective.len()];
    for i in 0..effective.len() {
        if live.get(&effective[i].0).copied().unwrap_or(0) > 0 { continue; }
        let w = effective[i].1;
        effective[i].1 = MIN_WEIGHT;
        drained[i] = true;
        if w <= 0 { continue; }
        let recipients: Vec<usize> = (0..effective.len()).filter(|&j| !drained[j]).collect();
        if recipients.is_empty() {
            other += w;
            continue;
        }
        let share = w / recipients.len() as i32;
        let rem = w % recipients.len() as i32;
        for (n, j) in recipients.into_iter().enumerate() {
            effective[j].1 += share + if n == 0 { rem } else { 0 };
        }
    }
    Distribution { declared, effective, other }
}

fn pod_lineage(pod: &Pod) -> Option<&str> {
    pod.metadata.labels.as_ref().and_then(|l| l.get(POD_VERSION)).map(String::as_str)
}

pub fn is_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
}

/// Per-pod weights, index-aligned with `pods`. Pods outside every declared lineage share `other`;
/// with no versions at all, every pod is in `other`. Non-running pods get [`MIN_WEIGHT`].
pub fn pod_weights(versions: &[Version], pods: &[Pod]) -> (Distribution, Vec<i32>) {
    let declared: Vec<(String, i32)> = versions.iter().map(|v| (v.pod_version.clone(), v.weight)).collect();
    let bucket = |pod: &Pod| -> String {
        match pod_lineage(pod) {
            Some(pv) if declared.iter().any(|(d, _)| d == pv) => pv.to_string(),
            _ => OTHER.to_string(),
        }
    };
    let mut running: HashMap<String, usize> = HashMap::new();
    for pod in pods.iter().filter(|p| is_running(p)) {
        *running.entry(bucket(pod)).or_insert(0) += 1;
    }
    let dist = distribute(&declared, &running);
    let weights = pods
        .iter()
        .map(|pod| {
            if !is_running(pod) { return MIN_WEIGHT; }
            let b = bucket(pod);
            let n = running.get(&b).copied().unwrap_or(0);
            let lineage = if b == OTHER { None } else { Some(b.as_str()) };
            dist.per_member(lineage, n)
        })
        .collect();
    (dist, weights)
}

/// One ready endpoint address and the lineage of the pod behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub address: String,
    pub pod_version: Option<String>,
}

/// Ready addresses of `endpoints`, resolved to lineages through the pods they target.
pub fn backends(endpoints: &Endpoints, pods: &[Pod]) -> Vec<Backend> {
    let by_name: HashMap<&str, &Pod> =
        pods.iter().filter_map(|p| p.metadata.name.as_deref().map(|n| (n, p))).collect();
    let mut out = Vec::new();
    for subset in endpoints.subsets.iter().flatten() {
        let port = subset.ports.as_ref().and_then(|p| p.first()).map(|p| p.port);
        for addr in subset.addresses.iter().flatten() {
            let pod_version = addr
                .target_ref
                .as_ref()
                .and_then(|r| r.name.as_deref())
                .and_then(|n| by_name.get(n))
                .and_then(|p| pod_lineage(p))
                .map(str::to_string);
            let address = match port { Some(p) => format!("{}:{p}", addr.ip), None => addr.ip.clone() };
            out.push(Backend { address, pod_version });
        }
    }
    out
}

/// Per-backend weights from the lineage weights published on a Service.
pub fn backend_weights(lineages: &[(String, i32)], backends: &[Backend]) -> Vec<(String, i32)> {
    let bucket = |b: &Backend| -> String {
        match b.pod_version.as_deref() {
            Some(pv) if lineages.iter().any(|(d, _)| d == pv) => pv.to_string(),
            _ => OTHER.to_string(),
        }
    };
    let mut live: HashMap<String, usize> = HashMap::new();
    for b in backends { *live.entry(bucket(b)).or_insert(0) += 1; }
    let dist = distribute(lineages, &live);
    backends
        .iter()
        .map(|b| {
            let key = bucket(b);
            let n = live.get(&key).copied().unwrap_or(0);
            let lineage = if key == OTHER { None } else { Some(key.as_str()) };
            (b.address.clone(), dist.per_member(lineage, n))
        })
        .collect()
}

/// Render lineage weights as the Service annotation value.
pub fn encode_weights(lineages: &[(String, i32)]) -> EngineResult<String> {
    let map: BTreeMap<&str, i32> = lineages.iter().map(|(pv, w)| (pv.as_str(), *w)).collect();
    Ok(serde_json::to_string(&map)?)
}

/// Lineage weights published on `svc`, empty when unannotated.
pub fn decode_weights(svc: &Service) -> EngineResult<Vec<(String, i32)>> {
    let Some(raw) = svc.metadata.annotations.as_ref().and_then(|a| a.get(WEIGHTS)) else { return Ok(Vec::new()) };
    let map: BTreeMap<String, i32> = serde_json::from_str(raw)
        .map_err(|e| EngineError::validation(format!("malformed {WEIGHTS} annotation: {e}")))?;
    Ok(map.into_iter().collect())
}
