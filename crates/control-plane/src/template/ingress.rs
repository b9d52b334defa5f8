//! Default ingress synthesis for service ports no declared ingress covers.

use std::collections::{BTreeMap, HashSet};

use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
    ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::labels::DEFAULT_MARKER;

pub fn default_ingress_name(app: &str) -> String { format!("{app}-default") }

pub fn default_host(service: &str, port: i32, namespace: &str, suffix: &str) -> String {
    format!("{service}-{port}-{namespace}.{}", suffix.trim_start_matches('.'))
}

/// "" and "/" are the same path.
pub fn normalize_path(path: Option<&str>) -> String {
    match path.map(str::trim) {
        None | Some("") => "/".to_string(),
        Some(p) => p.to_string(),
    }
}

fn backend_service(path: &HTTPIngressPath) -> Option<&IngressServiceBackend> { path.backend.service.as_ref() }

fn covers(ingresses: &[Ingress], service: &str, port: &ServicePort) -> bool {
    ingresses
        .iter()
        .filter_map(|i| i.spec.as_ref())
        .flat_map(|s| s.rules.iter().flatten())
        .filter_map(|r| r.http.as_ref())
        .flat_map(|h| h.paths.iter())
        .filter_map(backend_service)
        .filter(|b| b.name == service)
        .any(|b| match &b.port {
            Some(p) => p.number == Some(port.port) || (p.name.is_some() && p.name == port.name),
            None => false,
        })
}

/// Every (host, path) pair the declared ingresses claim.
pub fn declared_routes(ingresses: &[Ingress]) -> HashSet<(String, String)> {
    let mut routes = HashSet::new();
    for rule in ingresses.iter().filter_map(|i| i.spec.as_ref()).flat_map(|s| s.rules.iter().flatten()) {
        let host = rule.host.clone().unwrap_or_default();
        for p in rule.http.iter().flat_map(|h| h.paths.iter()) {
            routes.insert((host.clone(), normalize_path(p.path.as_deref())));
        }
    }
    routes
}

fn rule_for(host: String, service: &str, port: i32) -> IngressRule {
    IngressRule {
        host: Some(host),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: Some("/".into()),
                path_type: "Prefix".into(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: service.to_string(),
                        port: Some(ServiceBackendPort { number: Some(port), name: None }),
                    }),
                    resource: None,
                },
            }],
        }),
    }
}

/// One rule per uncovered service port. Synthesized rules whose host+path a declared ingress
/// already claims are dropped. `None` when nothing is left to expose.
pub fn synthesize_default(
    app: &str,
    namespace: &str,
    suffix: &str,
    services: &[Service],
    declared: &[Ingress],
) -> Option<Ingress> {
    let claimed = declared_routes(declared);
    let mut rules = Vec::new();
    for svc in services {
        let Some(svc_name) = svc.metadata.name.as_deref() else { continue };
        for port in svc.spec.as_ref().and_then(|s| s.ports.as_ref()).into_iter().flatten() {
            if covers(declared, svc_name, port) { continue; }
            let host = default_host(svc_name, port.port, namespace, suffix);
            if claimed.contains(&(host.clone(), "/".to_string())) { continue; }
            rules.push(rule_for(host, svc_name, port.port));
        }
    }
    if rules.is_empty() { return None; }
    let mut annotations = BTreeMap::new();
    annotations.insert(DEFAULT_MARKER.to_string(), "true".to_string());
    Some(Ingress {
        metadata: ObjectMeta {
            name: Some(default_ingress_name(app)),
            namespace: Some(namespace.to_string()),
            annotations: Some(annotations),
            ..ObjectMeta::default()
        },
        spec: Some(IngressSpec { rules: Some(rules), ..IngressSpec::default() }),
        status: None,
    })
}

/// First host among `ingresses`, in declaration order.
pub fn first_host(ingresses: &[Ingress]) -> Option<String> {
    ingresses
        .iter()
        .filter_map(|i| i.spec.as_ref())
        .flat_map(|s| s.rules.iter().flatten())
        .find_map(|r| r.host.clone().filter(|h| !h.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn service(name: &str, ports: &[(i32, &str)]) -> Service {
        Service {
            metadata: ObjectMeta { name: Some(name.into()), ..Default::default() },
            spec: Some(ServiceSpec {
                ports: Some(
                    ports
                        .iter()
                        .map(|(p, n)| ServicePort { port: *p, name: Some(n.to_string()), ..Default::default() })
                        .collect(),
                ),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn declared(host: &str, path: &str, svc: &str, port: i32) -> Ingress {
        let mut rule = rule_for(host.to_string(), svc, port);
        rule.http.as_mut().unwrap().paths[0].path = Some(path.to_string());
        Ingress {
            metadata: ObjectMeta { name: Some("user".into()), ..Default::default() },
            spec: Some(IngressSpec { rules: Some(vec![rule]), ..Default::default() }),
            status: None,
        }
    }

    #[test]
    fn one_rule_per_uncovered_port() {
        let svcs = vec![service("web", &[(80, "http"), (9090, "metrics")])];
        let covered = vec![declared("web.example.com", "/", "web", 80)];
        let ing = synthesize_default("web", "prod", "apps.io", &svcs, &covered).unwrap();
        let rules = ing.spec.unwrap().rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].host.as_deref(), Some("web-9090-prod.apps.io"));
        assert!(crate::labels::is_default_marked(ing.metadata.annotations.as_ref()));
    }

    #[test]
    fn colliding_synthesized_rule_is_dropped() {
        let svcs = vec![service("web", &[(80, "http")])];
        // Claims the synthesized host+path but routes to another service, so port 80 stays uncovered.
        let user = vec![declared("web-80-prod.apps.io", "", "other", 8080)];
        assert!(synthesize_default("web", "prod", "apps.io", &svcs, &user).is_none());
    }

    #[test]
    fn root_path_normalization() {
        assert_eq!(normalize_path(None), "/");
        assert_eq!(normalize_path(Some("")), "/");
        assert_eq!(normalize_path(Some("/api")), "/api");
    }
}
