mod common;

use std::collections::BTreeMap;

use common::{harness, install_one, CLUSTER};
use control_plane::cluster::ObjectKind;
use control_plane::labels::WEIGHTS;
use control_plane::models::{AppKey, Stage};
use control_plane::store::Store;
use control_plane::test_support::{native_template_yaml, pod};
use control_plane::SetVersionRequest;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort, EndpointSubset, Endpoints, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

fn key(name: &str) -> AppKey { AppKey::new(CLUSTER, "prod", name) }

fn canary(weight: i32) -> SetVersionRequest {
    SetVersionRequest { stage: Stage::New, weight, ..SetVersionRequest::default() }
}

#[tokio::test]
async fn single_running_pod_takes_every_share() {
    let h = harness();
    let app = install_one(&h, "prod", "web", "nginx:1.25", 1).await;
    h.cluster.add_pod("prod", pod("web-0", "web", &app.pod_version, "Running"));

    let detail = h.engine.get_detail(&key("web")).await.unwrap();

    assert_eq!(detail.pod_count, "1 / 1");
    assert_eq!(detail.status, "Running");
    assert_eq!(detail.pods.len(), 1);
    assert_eq!(detail.pods[0].weight, 100);
    assert_eq!(detail.pods[0].version, "1.25");
    assert!(detail.versions.is_empty());
}

#[tokio::test]
async fn pending_and_failed_pods_shape_status() {
    let h = harness();
    let app = install_one(&h, "prod", "web", "nginx:1.25", 2).await;
    h.cluster.add_pod("prod", pod("web-0", "web", &app.pod_version, "Running"));
    h.cluster.add_pod("prod", pod("web-1", "web", &app.pod_version, "Pending"));
    let detail = h.engine.get_detail(&key("web")).await.unwrap();
    assert_eq!(detail.pod_count, "1 / 2");
    assert_eq!(detail.status, "Pending");
    assert_eq!(detail.pods.iter().map(|p| p.weight).collect::<Vec<_>>(), vec![100, 0]);

    h.cluster.add_pod("prod", pod("web-2", "web", &app.pod_version, "Failed"));
    assert_eq!(h.engine.get_detail(&key("web")).await.unwrap().status, "Abnormal");
}

#[tokio::test]
async fn canary_without_pods_hands_its_share_to_the_primary() {
    let h = harness();
    let app = install_one(&h, "prod", "web", "nginx:1.25", 2).await;

    let versions = h.engine.set_version(&key("web"), canary(20)).await.unwrap();

    assert_eq!(versions.len(), 2);
    let primary = versions.iter().find(|v| v.pod_version == app.pod_version).unwrap();
    assert_eq!((primary.stage, primary.weight), (Stage::Normal, 80));
    let lineage = versions.iter().find(|v| v.pod_version != app.pod_version).unwrap();
    assert_eq!((lineage.stage, lineage.weight), (Stage::New, 20));
    let canary_name = format!("web-{}", lineage.pod_version);
    assert!(h.cluster.deployment("prod", &canary_name).is_some());

    h.cluster.add_pod("prod", pod("web-0", "web", &app.pod_version, "Running"));
    h.cluster.add_pod("prod", pod("web-1", "web", &app.pod_version, "Running"));
    let detail = h.engine.get_detail(&key("web")).await.unwrap();

    let effective: BTreeMap<&str, i32> =
        detail.versions.iter().map(|v| (v.pod_version.as_str(), v.effective_weight)).collect();
    assert_eq!(effective[app.pod_version.as_str()], 100);
    assert_eq!(effective[lineage.pod_version.as_str()], 0);
    assert_eq!(detail.pods.iter().map(|p| p.weight).collect::<Vec<_>>(), vec![50, 50]);
    assert_eq!(detail.other_weight, 0);

    let svc = h.cluster.service("prod", "web").unwrap();
    let published = svc.metadata.annotations.unwrap()[WEIGHTS].clone();
    assert!(published.contains(&format!("\"{}\":80", app.pod_version)), "{published}");
}

#[tokio::test]
async fn canary_with_live_pods_keeps_its_share() {
    let h = harness();
    let app = install_one(&h, "prod", "web", "nginx:1.25", 1).await;
    let versions = h.engine.set_version(&key("web"), canary(20)).await.unwrap();
    let lineage = versions.iter().find(|v| v.pod_version != app.pod_version).unwrap().pod_version.clone();

    h.cluster.add_pod("prod", pod("web-0", "web", &app.pod_version, "Running"));
    h.cluster.add_pod("prod", pod("web-c", "web", &lineage, "Running"));
    let pods = h.engine.get_pod_list(&key("web")).await.unwrap();

    let by_name: BTreeMap<&str, i32> = pods.iter().map(|p| (p.name.as_str(), p.weight)).collect();
    assert_eq!(by_name["web-0"], 80);
    assert_eq!(by_name["web-c"], 20);
}

#[tokio::test]
async fn existing_lineage_can_be_reweighted() {
    let h = harness();
    let app = install_one(&h, "prod", "web", "nginx:1.25", 1).await;
    h.engine.set_version(&key("web"), canary(20)).await.unwrap();

    let req = SetVersionRequest { pod_version: Some(app.pod_version.clone()), stage: Stage::Normal, weight: 50, ..Default::default() };
    let versions = h.engine.set_version(&key("web"), req).await.unwrap();

    assert_eq!(versions.len(), 2);
    assert_eq!(versions.iter().find(|v| v.pod_version == app.pod_version).unwrap().weight, 50);
}

#[tokio::test]
async fn set_version_rejects_bad_input() {
    let h = harness();
    install_one(&h, "prod", "web", "nginx:1.25", 1).await;

    assert_eq!(h.engine.set_version(&key("web"), canary(101)).await.unwrap_err().code(), "bad_request");
    let unknown = SetVersionRequest { pod_version: Some("nope".into()), ..canary(10) };
    assert!(h.engine.set_version(&key("web"), unknown).await.unwrap_err().is_not_found());
    let renamed = SetVersionRequest { template: Some(native_template_yaml("api", "nginx:2", 1)), ..canary(10) };
    assert_eq!(h.engine.set_version(&key("web"), renamed).await.unwrap_err().code(), "bad_request");
}

#[tokio::test]
async fn redeploy_moves_the_primary_lineage() {
    let h = harness();
    install_one(&h, "prod", "web", "nginx:1.25", 1).await;
    h.engine.set_version(&key("web"), canary(20)).await.unwrap();

    let restarted = h.engine.restart(&key("web")).await.unwrap();

    let versions = h.store.list_versions(&key("web")).await.unwrap();
    assert_eq!(versions.len(), 2);
    let primary = versions.iter().find(|v| v.pod_version == restarted.pod_version).unwrap();
    assert_eq!(primary.weight, 80);
}

#[tokio::test]
async fn uninstall_marks_lineage_workloads() {
    let h = harness();
    install_one(&h, "prod", "web", "nginx:1.25", 1).await;
    let versions = h.engine.set_version(&key("web"), canary(20)).await.unwrap();
    let app = h.store.get_application(&key("web")).await.unwrap();
    let lineage = versions.iter().find(|v| v.pod_version != app.pod_version).unwrap();

    h.engine.uninstall(&key("web")).await.unwrap();

    assert!(h.cluster.is_marked(ObjectKind::Deployment, "prod", &format!("web-{}", lineage.pod_version)));
    assert!(h.store.list_versions(&key("web")).await.unwrap().is_empty());
}

#[tokio::test]
async fn detail_refreshes_replica_counters() {
    let h = harness();
    install_one(&h, "prod", "web", "nginx:1.25", 2).await;
    h.cluster.set_deployment_status(
        "prod",
        "web",
        DeploymentStatus { ready_replicas: Some(2), updated_replicas: Some(2), available_replicas: Some(1), ..Default::default() },
    );

    let detail = h.engine.get_detail(&key("web")).await.unwrap();

    assert_eq!(detail.application.ready_replicas, 2);
    let stored = h.store.get_application(&key("web")).await.unwrap();
    assert_eq!((stored.ready_replicas, stored.updated_replicas, stored.available_replicas), (2, 2, 1));
}

#[tokio::test]
async fn backend_weights_follow_published_lineages() {
    let h = harness();
    let app = install_one(&h, "prod", "web", "nginx:1.25", 1).await;
    let versions = h.engine.set_version(&key("web"), canary(20)).await.unwrap();
    let lineage = versions.iter().find(|v| v.pod_version != app.pod_version).unwrap().pod_version.clone();
    h.cluster.add_pod("prod", pod("web-0", "web", &app.pod_version, "Running"));
    h.cluster.add_pod("prod", pod("web-c", "web", &lineage, "Running"));

    let address = |ip: &str, pod: &str| EndpointAddress {
        ip: ip.into(),
        target_ref: Some(ObjectReference { name: Some(pod.into()), kind: Some("Pod".into()), ..Default::default() }),
        ..Default::default()
    };
    h.cluster.set_endpoints(
        "prod",
        Endpoints {
            metadata: ObjectMeta { name: Some("web".into()), ..Default::default() },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![address("10.0.0.1", "web-0"), address("10.0.0.2", "web-c")]),
                ports: Some(vec![EndpointPort { port: 8080, ..Default::default() }]),
                ..Default::default()
            }]),
        },
    );

    let weights = h.engine.backend_weights(&key("web"), "web").await.unwrap();

    assert_eq!(weights, vec![("10.0.0.1:8080".to_string(), 80), ("10.0.0.2:8080".to_string(), 20)]);
    assert!(h.engine.backend_weights(&key("web"), "nope").await.unwrap_err().is_not_found());
}
