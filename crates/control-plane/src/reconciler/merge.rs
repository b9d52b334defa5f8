//! In-place update merges for Services and Ingresses.
//!
//! The live object owns fields the cluster assigned (cluster IPs, node ports, resource version) and
//! annotations other controllers added. Rules and TLS entries are merged rather than replaced, so
//! routes another generation published keep working.

use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::api::networking::v1::{Ingress, IngressRule, IngressSpec, IngressTLS};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::template::ingress::normalize_path;

/// Copy annotations present only on `live` onto `desired`, and adopt the live resource version.
pub fn carry_forward(live: &ObjectMeta, desired: &mut ObjectMeta) {
    if let Some(old) = &live.annotations {
        let ann = desired.annotations.get_or_insert_with(Default::default);
        for (k, v) in old {
            ann.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    desired.resource_version = live.resource_version.clone();
}

fn effective_target(p: &ServicePort) -> IntOrString {
    p.target_port.clone().unwrap_or(IntOrString::Int(p.port))
}

pub fn merge_service(live: &Service, mut desired: Service) -> Service {
    carry_forward(&live.metadata, &mut desired.metadata);
    let Some(live_spec) = live.spec.as_ref() else { return desired };
    let spec = desired.spec.get_or_insert_with(Default::default);
    spec.cluster_ip = live_spec.cluster_ip.clone();
    spec.cluster_ips = live_spec.cluster_ips.clone();
    let old_ports = live_spec.ports.as_deref().unwrap_or(&[]);
    for port in spec.ports.iter_mut().flatten() {
        let target = effective_target(port);
        let Some(old) = old_ports.iter().find(|o| effective_target(o) == target) else { continue };
        if old.name.is_some() {
            port.name = old.name.clone();
        }
        if port.node_port.is_none() {
            port.node_port = old.node_port;
        }
    }
    desired
}

/// Union by host; paths within a host union by normalized path with the incoming backend winning.
pub fn merge_rules(existing: Vec<IngressRule>, incoming: Vec<IngressRule>) -> Vec<IngressRule> {
    let mut merged = existing;
    for rule in incoming {
        let Some(current) = merged.iter_mut().find(|r| r.host == rule.host) else {
            merged.push(rule);
            continue;
        };
        let paths = rule.http.map(|h| h.paths).unwrap_or_default();
        let http = current.http.get_or_insert_with(Default::default);
        for path in paths {
            let key = normalize_path(path.path.as_deref());
            match http.paths.iter_mut().find(|p| normalize_path(p.path.as_deref()) == key) {
                Some(p) => {
                    p.backend = path.backend;
                    p.path_type = path.path_type;
                }
                None => http.paths.push(path),
            }
        }
    }
    merged
}

/// Union by secret name. A host belongs to one secret at a time: an entry with a new secret first
/// strips its hosts from other entries, and entries left without hosts are dropped.
pub fn merge_tls(existing: Vec<IngressTLS>, incoming: Vec<IngressTLS>) -> Vec<IngressTLS> {
    let mut merged = existing;
    for entry in incoming {
        if let Some(current) = merged.iter_mut().find(|t| t.secret_name == entry.secret_name) {
            let hosts = current.hosts.get_or_insert_with(Vec::new);
            for h in entry.hosts.into_iter().flatten() {
                if !hosts.contains(&h) { hosts.push(h); }
            }
            continue;
        }
        let claimed = entry.hosts.clone().unwrap_or_default();
        merged.retain_mut(|t| match t.hosts.as_mut() {
            Some(hosts) if !hosts.is_empty() => {
                hosts.retain(|h| !claimed.contains(h));
                !hosts.is_empty()
            }
            _ => true,
        });
        merged.push(entry);
    }
    merged
}

pub fn merge_ingress(live: &Ingress, mut desired: Ingress) -> Ingress {
    carry_forward(&live.metadata, &mut desired.metadata);
    let Some(live_spec) = live.spec.clone() else { return desired };
    let incoming = desired.spec.take().unwrap_or_default();
    let rules = merge_rules(live_spec.rules.unwrap_or_default(), incoming.rules.unwrap_or_default());
    let tls = merge_tls(live_spec.tls.unwrap_or_default(), incoming.tls.unwrap_or_default());
    desired.spec = Some(IngressSpec {
        default_backend: incoming.default_backend.or(live_spec.default_backend),
        ingress_class_name: incoming.ingress_class_name.or(live_spec.ingress_class_name),
        rules: if rules.is_empty() { None } else { Some(rules) },
        tls: if tls.is_empty() { None } else { Some(tls) },
    });
    desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;
    use k8s_openapi::api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressServiceBackend, ServiceBackendPort,
    };
    use std::collections::BTreeMap;

    fn port(name: Option<&str>, port: i32, target: i32, node_port: Option<i32>) -> ServicePort {
        ServicePort {
            name: name.map(str::to_string),
            port,
            target_port: Some(IntOrString::Int(target)),
            node_port,
            ..Default::default()
        }
    }

    fn service(ports: Vec<ServicePort>, ip: Option<&str>, ann: &[(&str, &str)]) -> Service {
        let annotations: BTreeMap<String, String> = ann.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Service {
            metadata: ObjectMeta {
                name: Some("web".into()),
                annotations: if annotations.is_empty() { None } else { Some(annotations) },
                resource_version: ip.map(|_| "42".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec { ports: Some(ports), cluster_ip: ip.map(str::to_string), ..Default::default() }),
            status: None,
        }
    }

    fn path(p: &str, svc: &str) -> HTTPIngressPath {
        HTTPIngressPath {
            path: Some(p.into()),
            path_type: "Prefix".into(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: svc.into(),
                    port: Some(ServiceBackendPort { number: Some(80), name: None }),
                }),
                resource: None,
            },
        }
    }

    fn rule(host: &str, paths: Vec<HTTPIngressPath>) -> IngressRule {
        IngressRule { host: Some(host.into()), http: Some(HTTPIngressRuleValue { paths }) }
    }

    fn tls(secret: &str, hosts: &[&str]) -> IngressTLS {
        IngressTLS { secret_name: Some(secret.into()), hosts: Some(hosts.iter().map(|h| h.to_string()).collect()) }
    }

    #[test]
    fn service_keeps_cluster_owned_fields() {
        let live = service(vec![port(Some("web-http"), 80, 8080, Some(30080))], Some("10.96.0.7"), &[("lb.io/id", "x")]);
        let desired = service(vec![port(Some("http"), 8000, 8080, None), port(None, 9090, 9090, None)], None, &[]);
        let merged = merge_service(&live, desired);
        let spec = merged.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("10.96.0.7"));
        let ports = spec.ports.unwrap();
        assert_eq!(ports[0].name.as_deref(), Some("web-http"));
        assert_eq!(ports[0].node_port, Some(30080));
        assert_eq!(ports[0].port, 8000);
        assert_eq!(ports[1].node_port, None);
        assert_eq!(merged.metadata.annotations.unwrap()["lb.io/id"], "x");
        assert_eq!(merged.metadata.resource_version.as_deref(), Some("42"));
    }

    #[test]
    fn explicit_node_port_wins() {
        let live = service(vec![port(None, 80, 8080, Some(30080))], Some("10.96.0.7"), &[]);
        let desired = service(vec![port(None, 80, 8080, Some(31000))], None, &[]);
        let merged = merge_service(&live, desired);
        assert_eq!(merged.spec.unwrap().ports.unwrap()[0].node_port, Some(31000));
    }

    #[test]
    fn rules_union_paths_with_new_backend() {
        let existing = vec![rule("a.io", vec![path("/", "old"), path("/api", "api")])];
        let incoming = vec![rule("a.io", vec![path("", "new"), path("/docs", "docs")]), rule("b.io", vec![path("/", "b")])];
        let merged = merge_rules(existing, incoming);
        assert_eq!(merged.len(), 2);
        let paths = &merged[0].http.as_ref().unwrap().paths;
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0].backend.service.as_ref().unwrap().name, "new");
        assert_eq!(paths[2].path.as_deref(), Some("/docs"));
    }

    #[test]
    fn tls_hosts_move_between_secrets() {
        let existing = vec![tls("old-cert", &["a.io"]), tls("shared", &["b.io", "c.io"])];
        let incoming = vec![tls("new-cert", &["a.io", "b.io"]), tls("shared", &["d.io"])];
        let merged = merge_tls(existing, incoming);
        let names: Vec<_> = merged.iter().map(|t| t.secret_name.clone().unwrap()).collect();
        assert_eq!(names, vec!["shared", "new-cert"]);
        assert_eq!(merged[0].hosts.as_ref().unwrap(), &vec!["c.io".to_string(), "d.io".to_string()]);
        assert_eq!(merged[1].hosts.as_ref().unwrap(), &vec!["a.io".to_string(), "b.io".to_string()]);
    }

    #[test]
    fn ingress_annotations_carry_forward() {
        let mut live = Ingress::default();
        live.metadata.annotations = Some([("cert-manager.io/issuer".to_string(), "le".to_string())].into_iter().collect());
        live.spec = Some(IngressSpec { rules: Some(vec![rule("a.io", vec![path("/", "web")])]), ..Default::default() });
        let desired = Ingress {
            spec: Some(IngressSpec { rules: Some(vec![rule("b.io", vec![path("/", "web")])]), ..Default::default() }),
            ..Default::default()
        };
        let merged = merge_ingress(&live, desired);
        assert_eq!(merged.metadata.annotations.unwrap()["cert-manager.io/issuer"], "le");
        assert_eq!(merged.spec.unwrap().rules.unwrap().len(), 2);
    }
}
