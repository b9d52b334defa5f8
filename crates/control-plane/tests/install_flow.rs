mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use common::{harness, install_one, install_request, CLUSTER};
use control_plane::cluster::{ClientRegistry, ObjectKind};
use control_plane::models::{AppFilter, AppKey, Application, Page, Version};
use control_plane::store::{MemoryStore, Store, StoreError, StoreResult};
use control_plane::test_support::{native_template_yaml, FakeCluster, FakeConnector};
use control_plane::{Engine, EngineError};

#[tokio::test]
async fn batch_yields_one_result_per_template_in_order() {
    let h = harness();
    h.cluster.fail_nth_create(ObjectKind::Deployment, 2);
    let templates = ["alpha", "beta", "gamma"].iter().map(|n| native_template_yaml(n, "nginx:1.25", 1)).collect();

    let results = h.engine.install_all(install_request("prod", templates, false)).await.unwrap();

    let names: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    assert_eq!(results.iter().filter(|(_, r)| r.is_err()).count(), 1);
    assert_eq!(h.store.application_count().await, 2);
}

#[tokio::test]
async fn invalid_template_fails_the_batch_before_any_cluster_call() {
    let h = harness();
    let bad = native_template_yaml("beta", "\"\"", 1);
    let templates = vec![native_template_yaml("alpha", "nginx:1.25", 1), bad];

    let err = h.engine.install_all(install_request("prod", templates, false)).await.unwrap_err();

    assert_eq!(err.code(), "bad_request");
    assert!(h.cluster.ops().is_empty());
    assert_eq!(h.store.application_count().await, 0);
}

#[tokio::test]
async fn duplicate_names_in_one_batch_are_rejected() {
    let h = harness();
    let t = native_template_yaml("alpha", "nginx:1.25", 1);
    let err = h.engine.install_all(install_request("prod", vec![t.clone(), t], false)).await.unwrap_err();
    assert!(err.to_string().contains("appears twice"));
}

#[tokio::test]
async fn unreachable_cluster_fails_the_precheck() {
    let cluster = FakeCluster::new();
    let connector = Arc::new(FakeConnector::with_cluster(CLUSTER, cluster.clone()));
    connector.set_unreachable(CLUSTER);
    let engine = Engine::new(Arc::new(MemoryStore::new()), Arc::new(ClientRegistry::new(connector)), common::fast_config());

    let err = engine
        .install_all(install_request("prod", vec![native_template_yaml("alpha", "nginx:1.25", 1)], false))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "internal");
    assert!(cluster.ops().is_empty());
}

#[tokio::test]
async fn workload_failure_marks_created_services_and_persists_nothing() {
    let h = harness();
    h.cluster.fail_nth_create(ObjectKind::Deployment, 1);

    let err = h
        .engine
        .install(install_request("prod", vec![native_template_yaml("web", "nginx:1.25", 1)], false))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "batch");
    assert!(h.cluster.is_marked(ObjectKind::Service, "prod", "web"));
    assert!(h.cluster.deployment("prod", "web").is_none());
    assert_eq!(h.store.application_count().await, 0);
}

#[tokio::test]
async fn install_creates_service_then_workload_with_labels() {
    let h = harness();
    let app = install_one(&h, "prod", "web", "nginx:1.25", 2).await;

    assert_eq!(app.version, "1.25");
    assert_eq!(app.replicas, 2);
    let ops = h.cluster.ops();
    let svc = ops.iter().position(|o| o == "create Service prod/web").unwrap();
    let dep = ops.iter().position(|o| o == "create Deployment prod/web").unwrap();
    assert!(svc < dep);

    let d = h.cluster.deployment("prod", "web").unwrap();
    let labels = d.spec.unwrap().template.metadata.unwrap().labels.unwrap();
    assert_eq!(labels.get("canopy.dev/pod-version"), Some(&app.pod_version));
    assert_eq!(labels.get("canopy.dev/app").map(String::as_str), Some("web"));
}

#[tokio::test]
async fn reinstall_of_existing_app_reconfigures_it() {
    let h = harness();
    let first = install_one(&h, "prod", "web", "nginx:1.25", 1).await;
    let second = install_one(&h, "prod", "web", "nginx:1.26", 1).await;

    assert_eq!(first.id, second.id);
    assert_ne!(first.pod_version, second.pod_version);
    assert_eq!(second.image, "nginx:1.26");
    assert_eq!(h.store.application_count().await, 1);
}

#[tokio::test]
async fn same_name_in_other_namespace_conflicts_without_force() {
    let h = harness();
    install_one(&h, "a", "web", "nginx:1.25", 1).await;

    let results = h
        .engine
        .install_all(install_request("b", vec![native_template_yaml("web", "nginx:1.25", 1)], false))
        .await
        .unwrap();

    let err = results[0].1.as_ref().unwrap_err();
    assert_eq!(err.code(), "conflict");
    assert!(err.to_string().contains("namespace(s): a"));
    assert!(h.store.get_application(&AppKey::new(CLUSTER, "a", "web")).await.is_ok());
    assert!(h.cluster.deployment("b", "web").is_none());
}

#[tokio::test]
async fn force_uninstalls_same_name_in_other_namespace() {
    let h = harness();
    install_one(&h, "a", "web", "nginx:1.25", 1).await;

    let apps = h
        .engine
        .install(install_request("b", vec![native_template_yaml("web", "nginx:1.25", 1)], true))
        .await
        .unwrap();

    assert_eq!(apps[0].namespace, "b");
    let gone = h.store.get_application(&AppKey::new(CLUSTER, "a", "web")).await.unwrap_err();
    assert!(gone.is_not_found());
    assert!(h.cluster.is_marked(ObjectKind::Deployment, "a", "web"));
    assert!(h.cluster.is_marked(ObjectKind::Service, "a", "web"));
    assert!(!h.cluster.is_marked(ObjectKind::Deployment, "b", "web"));
}

#[tokio::test]
async fn post_create_hook_failure_does_not_fail_install() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    let mut h = harness();
    h.engine = h.engine.clone().with_post_create(Arc::new(move |_app: Application| -> BoxFuture<'static, anyhow::Result<()>> {
        seen.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(anyhow::anyhow!("notifier offline")) })
    }));

    let app = install_one(&h, "prod", "web", "nginx:1.25", 1).await;
    assert_eq!(app.name, "web");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Second install is a reconfigure and does not call the hook again.
    install_one(&h, "prod", "web", "nginx:1.26", 1).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Store whose application inserts always fail.
struct RefusingStore(MemoryStore);

#[async_trait]
impl Store for RefusingStore {
    async fn get_application(&self, key: &AppKey) -> StoreResult<Application> { self.0.get_application(key).await }
    async fn find_by_name(&self, cluster: &str, name: &str) -> StoreResult<Vec<Application>> {
        self.0.find_by_name(cluster, name).await
    }
    async fn list_applications(&self, filter: &AppFilter, namespaces: &[String]) -> StoreResult<Page<Application>> {
        self.0.list_applications(filter, namespaces).await
    }
    async fn create_application(&self, _app: &Application) -> StoreResult<()> {
        Err(StoreError::Backend("disk full".into()))
    }
    async fn update_application(&self, app: &Application) -> StoreResult<()> { self.0.update_application(app).await }
    async fn delete_application(&self, key: &AppKey) -> StoreResult<()> { self.0.delete_application(key).await }
    async fn list_versions(&self, key: &AppKey) -> StoreResult<Vec<Version>> { self.0.list_versions(key).await }
    async fn upsert_version(&self, version: &Version) -> StoreResult<()> { self.0.upsert_version(version).await }
    async fn delete_versions(&self, key: &AppKey) -> StoreResult<u64> { self.0.delete_versions(key).await }
    async fn delete_version(&self, key: &AppKey, pod_version: &str) -> StoreResult<()> {
        self.0.delete_version(key, pod_version).await
    }
}

#[tokio::test]
async fn persist_failure_rolls_back_cluster_objects() {
    let cluster = FakeCluster::new();
    let connector = Arc::new(FakeConnector::with_cluster(CLUSTER, cluster.clone()));
    let engine = Engine::new(
        Arc::new(RefusingStore(MemoryStore::new())),
        Arc::new(ClientRegistry::new(connector)),
        common::fast_config(),
    );

    let results = engine
        .install_all(install_request("prod", vec![native_template_yaml("web", "nginx:1.25", 1)], false))
        .await
        .unwrap();

    let err = results[0].1.as_ref().unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
    assert!(cluster.is_marked(ObjectKind::Deployment, "prod", "web"));
    assert!(cluster.is_marked(ObjectKind::Service, "prod", "web"));
}

/// Shares a live store but never sees an existing application on read, like a worker that lost
/// a create race after its lookup.
struct StaleReadStore(Arc<MemoryStore>);

#[async_trait]
impl Store for StaleReadStore {
    async fn get_application(&self, key: &AppKey) -> StoreResult<Application> {
        Err(StoreError::NotFound(format!("application {key}")))
    }
    async fn find_by_name(&self, cluster: &str, name: &str) -> StoreResult<Vec<Application>> {
        self.0.find_by_name(cluster, name).await
    }
    async fn list_applications(&self, filter: &AppFilter, namespaces: &[String]) -> StoreResult<Page<Application>> {
        self.0.list_applications(filter, namespaces).await
    }
    async fn create_application(&self, app: &Application) -> StoreResult<()> { self.0.create_application(app).await }
    async fn update_application(&self, app: &Application) -> StoreResult<()> { self.0.update_application(app).await }
    async fn delete_application(&self, key: &AppKey) -> StoreResult<()> { self.0.delete_application(key).await }
    async fn list_versions(&self, key: &AppKey) -> StoreResult<Vec<Version>> { self.0.list_versions(key).await }
    async fn upsert_version(&self, version: &Version) -> StoreResult<()> { self.0.upsert_version(version).await }
    async fn delete_versions(&self, key: &AppKey) -> StoreResult<u64> { self.0.delete_versions(key).await }
    async fn delete_version(&self, key: &AppKey, pod_version: &str) -> StoreResult<()> {
        self.0.delete_version(key, pod_version).await
    }
}

#[tokio::test]
async fn losing_a_create_race_leaves_the_winner_intact() {
    let h = harness();
    let winner = install_one(&h, "prod", "web", "nginx:1.25", 1).await;
    let connector = Arc::new(FakeConnector::with_cluster(CLUSTER, h.cluster.clone()));
    let loser = Engine::new(
        Arc::new(StaleReadStore(h.store.clone())),
        Arc::new(ClientRegistry::new(connector)),
        common::fast_config(),
    );

    let results = loser
        .install_all(install_request("prod", vec![native_template_yaml("web", "nginx:1.26", 1)], false))
        .await
        .unwrap();

    let err = results[0].1.as_ref().unwrap_err();
    assert_eq!(err.code(), "conflict");
    assert_eq!(h.store.get_application(&AppKey::new(CLUSTER, "prod", "web")).await.unwrap().id, winner.id);
    assert!(!h.cluster.is_marked(ObjectKind::Deployment, "prod", "web"));
    assert!(!h.cluster.is_marked(ObjectKind::Service, "prod", "web"));
}

#[tokio::test]
async fn unsupported_kind_never_force_uninstalls_other_namespaces() {
    let h = harness();
    install_one(&h, "a", "web", "nginx:1.25", 1).await;
    let daemonset = format!("kind: daemonset\n{}", native_template_yaml("web", "nginx:1.25", 1));

    let results = h.engine.install_all(install_request("b", vec![daemonset], true)).await.unwrap();

    assert_eq!(results[0].1.as_ref().unwrap_err().code(), "unsupported");
    assert!(h.store.get_application(&AppKey::new(CLUSTER, "a", "web")).await.is_ok());
    assert!(!h.cluster.is_marked(ObjectKind::Deployment, "a", "web"));
    assert!(!h.cluster.is_marked(ObjectKind::Service, "a", "web"));
}
