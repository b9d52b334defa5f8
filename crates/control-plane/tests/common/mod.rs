#![allow(dead_code)]

use std::sync::Arc;

use control_plane::cluster::ClientRegistry;
use control_plane::store::MemoryStore;
use control_plane::test_support::{native_template_yaml, FakeCluster, FakeConnector};
use control_plane::{Engine, EngineConfig, InstallRequest};

pub const CLUSTER: &str = "c1";

pub struct Harness {
    pub engine: Engine,
    pub store: Arc<MemoryStore>,
    pub cluster: Arc<FakeCluster>,
}

pub fn fast_config() -> EngineConfig {
    EngineConfig { sync_interval_ms: 5, sync_timeout_ms: 100, ..EngineConfig::default() }
}

pub fn harness_with(cfg: EngineConfig) -> Harness {
    let cluster = FakeCluster::new();
    let connector = Arc::new(FakeConnector::with_cluster(CLUSTER, cluster.clone()));
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store.clone(), Arc::new(ClientRegistry::new(connector)), cfg);
    Harness { engine, store, cluster }
}

pub fn harness() -> Harness { harness_with(fast_config()) }

pub fn install_request(namespace: &str, templates: Vec<String>, force: bool) -> InstallRequest {
    InstallRequest { cluster: CLUSTER.into(), namespace: namespace.into(), templates, force }
}

/// Install one application and return its record.
pub async fn install_one(h: &Harness, namespace: &str, name: &str, image: &str, replicas: i32) -> control_plane::models::Application {
    let mut apps = h
        .engine
        .install(install_request(namespace, vec![native_template_yaml(name, image, replicas)], false))
        .await
        .expect("install");
    apps.remove(0)
}
