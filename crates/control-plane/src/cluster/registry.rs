use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ClusterApi, ClusterResult};

/// Builds the client for one cluster id.
#[async_trait]
pub trait ClusterConnector: Send + Sync + 'static {
    async fn connect(&self, cluster_id: &str) -> ClusterResult<Arc<dyn ClusterApi>>;
}

/// Shared, lazily constructed cluster clients keyed by cluster id.
pub struct ClientRegistry {
    connector: Arc<dyn ClusterConnector>,
    clients: RwLock<HashMap<String, Arc<dyn ClusterApi>>>,
}

impl ClientRegistry {
    pub fn new(connector: Arc<dyn ClusterConnector>) -> Self {
        Self { connector, clients: RwLock::new(HashMap::new()) }
    }

    pub async fn get_or_create(&self, cluster_id: &str) -> ClusterResult<Arc<dyn ClusterApi>> {
        if let Some(c) = self.clients.read().await.get(cluster_id) {
            return Ok(c.clone());
        }
        let mut guard = self.clients.write().await;
        // Another task may have connected while we waited for the write lock.
        if let Some(c) = guard.get(cluster_id) {
            return Ok(c.clone());
        }
        debug!(cluster=%cluster_id, "cluster_registry.connect");
        let client = self.connector.connect(cluster_id).await?;
        guard.insert(cluster_id.to_string(), client.clone());
        Ok(client)
    }

    pub async fn len(&self) -> usize { self.clients.read().await.len() }

    pub async fn is_empty(&self) -> bool { self.clients.read().await.is_empty() }
}
