//! Structural checks on workload pod specs. Every failure is a client error.

use k8s_openapi::api::core::v1::{Container, PodSpec, Probe};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{EngineError, EngineResult};

static DNS_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));
static ENV_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-._a-zA-Z][-._a-zA-Z0-9]*$").expect("valid regex"));
static PORT_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$").expect("valid regex"));

pub fn check_name(name: &str) -> EngineResult<()> {
    if name.is_empty() || name.len() > 63 || !DNS_LABEL.is_match(name) {
        return Err(EngineError::validation(format!("'{name}' is not a valid application name (DNS-1123 label)")));
    }
    Ok(())
}

pub fn check_size(len: usize, max: usize) -> EngineResult<()> {
    if len > max {
        return Err(EngineError::validation(format!("template is {len} bytes, limit is {max}")));
    }
    Ok(())
}

pub fn check_replicas(replicas: i32, min: i32, max: i32) -> EngineResult<()> {
    if replicas < min || replicas > max {
        return Err(EngineError::validation(format!("replicas {replicas} outside [{min}, {max}]")));
    }
    Ok(())
}

/// Requires an explicit node assignment or a non-empty node selector; selector values must be non-blank.
pub fn check_scheduling(spec: &PodSpec) -> EngineResult<()> {
    if let Some(sel) = &spec.node_selector {
        if let Some((k, _)) = sel.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(EngineError::validation(format!("node selector '{k}' has a blank value")));
        }
    }
    let pinned = spec.node_name.as_deref().map(|n| !n.trim().is_empty()).unwrap_or(false);
    let selected = spec.node_selector.as_ref().map(|s| !s.is_empty()).unwrap_or(false);
    if !pinned && !selected {
        return Err(EngineError::validation("pod must set nodeName or a non-empty nodeSelector"));
    }
    Ok(())
}

pub fn check_limits(c: &Container) -> EngineResult<()> {
    let limits = c.resources.as_ref().and_then(|r| r.limits.as_ref());
    for res in ["cpu", "memory"] {
        if !limits.map(|l| l.contains_key(res)).unwrap_or(false) {
            return Err(EngineError::validation(format!("container '{}' has no {res} limit", c.name)));
        }
    }
    Ok(())
}

pub fn check_env(c: &Container) -> EngineResult<()> {
    for var in c.env.iter().flatten() {
        if !ENV_NAME.is_match(&var.name) {
            return Err(EngineError::validation(format!("container '{}': invalid env name '{}'", c.name, var.name)));
        }
    }
    Ok(())
}

fn check_probe_port(container: &str, probe: &str, port: &IntOrString) -> EngineResult<()> {
    let ok = match port {
        IntOrString::Int(p) => (1..=65535).contains(p),
        IntOrString::String(s) => s.len() <= 15 && PORT_NAME.is_match(s) && s.chars().any(|ch| ch.is_ascii_alphabetic()),
    };
    if !ok {
        let shown = match port { IntOrString::Int(p) => p.to_string(), IntOrString::String(s) => s.clone() };
        return Err(EngineError::validation(format!("container '{container}': {probe} probe port '{shown}' is invalid")));
    }
    Ok(())
}

fn check_probe(container: &str, probe: &str, p: &Probe) -> EngineResult<()> {
    if let Some(port) = p.http_get.as_ref().map(|h| &h.port) { check_probe_port(container, probe, port)?; }
    if let Some(port) = p.tcp_socket.as_ref().map(|t| &t.port) { check_probe_port(container, probe, port)?; }
    if let Some(g) = &p.grpc {
        check_probe_port(container, probe, &IntOrString::Int(g.port))?;
    }
    let timings = [
        ("initialDelaySeconds", p.initial_delay_seconds),
        ("periodSeconds", p.period_seconds),
        ("timeoutSeconds", p.timeout_seconds),
        ("successThreshold", p.success_threshold),
        ("failureThreshold", p.failure_threshold),
    ];
    for (field, value) in timings {
        if value.map(|v| v < 0).unwrap_or(false) {
            return Err(EngineError::validation(format!("container '{container}': {probe} probe {field} is negative")));
        }
    }
    Ok(())
}

pub fn check_probes(c: &Container) -> EngineResult<()> {
    if let Some(p) = &c.liveness_probe { check_probe(&c.name, "liveness", p)?; }
    if let Some(p) = &c.readiness_probe { check_probe(&c.name, "readiness", p)?; }
    if let Some(p) = &c.startup_probe { check_probe(&c.name, "startup", p)?; }
    Ok(())
}

/// Full pod-spec check: scheduling, then per container limits, env and probes.
pub fn check_pod_spec(spec: &PodSpec) -> EngineResult<()> {
    if spec.containers.is_empty() {
        return Err(EngineError::validation("workload declares no containers"));
    }
    check_scheduling(spec)?;
    for c in &spec.containers {
        if c.image.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(EngineError::validation(format!("container '{}' has no image", c.name)));
        }
        check_limits(c)?;
        check_env(c)?;
        check_probes(c)?;
    }
    for c in spec.init_containers.iter().flatten() {
        check_env(c)?;
        check_probes(c)?;
    }
    Ok(())
}
