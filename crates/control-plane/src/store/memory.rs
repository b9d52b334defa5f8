use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{matches_filter, page_bounds, Store, StoreError, StoreResult};
use crate::models::{AppFilter, AppKey, Application, Page, Version};

/// In-process store. Used by tests and offline runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    apps: RwLock<Vec<Application>>,
    versions: RwLock<Vec<Version>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Insert without the uniqueness check, to model a store that lost its constraint.
    pub async fn insert_unchecked(&self, app: Application) { self.apps.write().await.push(app); }

    pub async fn application_count(&self) -> usize { self.apps.read().await.len() }
}

fn same_key(app: &Application, key: &AppKey) -> bool {
    app.cluster == key.cluster && app.namespace == key.namespace && app.name == key.name
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_application(&self, key: &AppKey) -> StoreResult<Application> {
        let apps = self.apps.read().await;
        let mut found = apps.iter().filter(|a| same_key(a, key));
        match (found.next(), found.next()) {
            (None, _) => Err(StoreError::NotFound(format!("application {key}"))),
            (Some(a), None) => Ok(a.clone()),
            (Some(_), Some(_)) => Err(StoreError::MultipleRows(format!("application {key}"))),
        }
    }

    async fn find_by_name(&self, cluster: &str, name: &str) -> StoreResult<Vec<Application>> {
        let apps = self.apps.read().await;
        Ok(apps.iter().filter(|a| a.cluster == cluster && a.name == name).cloned().collect())
    }

    async fn list_applications(&self, filter: &AppFilter, namespaces: &[String]) -> StoreResult<Page<Application>> {
        let apps = self.apps.read().await;
        let mut matched: Vec<Application> = apps.iter().filter(|a| matches_filter(a, filter, namespaces)).cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.name.cmp(&b.name)));
        let total = matched.len() as u64;
        let (offset, size) = page_bounds(filter);
        let items = matched.into_iter().skip(offset).take(size).collect();
        Ok(Page { items, total })
    }

    async fn create_application(&self, app: &Application) -> StoreResult<()> {
        let mut apps = self.apps.write().await;
        let key = app.key();
        if apps.iter().any(|a| same_key(a, &key)) {
            return Err(StoreError::Duplicate(format!("application {key}")));
        }
        apps.push(app.clone());
        Ok(())
    }

    async fn update_application(&self, app: &Application) -> StoreResult<()> {
        let mut apps = self.apps.write().await;
        match apps.iter_mut().find(|a| a.id == app.id) {
            Some(slot) => {
                *slot = app.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("application {}", app.key()))),
        }
    }

    async fn delete_application(&self, key: &AppKey) -> StoreResult<()> {
        let mut apps = self.apps.write().await;
        let before = apps.len();
        apps.retain(|a| !same_key(a, key));
        if apps.len() == before {
            return Err(StoreError::NotFound(format!("application {key}")));
        }
        Ok(())
    }

    async fn list_versions(&self, key: &AppKey) -> StoreResult<Vec<Version>> {
        let versions = self.versions.read().await;
        let mut out: Vec<Version> = versions
            .iter()
            .filter(|v| v.cluster == key.cluster && v.namespace == key.namespace && v.name == key.name)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn upsert_version(&self, version: &Version) -> StoreResult<()> {
        let mut versions = self.versions.write().await;
        let existing = versions.iter_mut().find(|v| {
            v.cluster == version.cluster
                && v.namespace == version.namespace
                && v.name == version.name
                && v.pod_version == version.pod_version
        });
        match existing {
            Some(slot) => *slot = version.clone(),
            None => versions.push(version.clone()),
        }
        Ok(())
    }

    async fn delete_versions(&self, key: &AppKey) -> StoreResult<u64> {
        let mut versions = self.versions.write().await;
        let before = versions.len();
        versions.retain(|v| !(v.cluster == key.cluster && v.namespace == key.namespace && v.name == key.name));
        Ok((before - versions.len()) as u64)
    }

    async fn delete_version(&self, key: &AppKey, pod_version: &str) -> StoreResult<()> {
        let mut versions = self.versions.write().await;
        versions.retain(|v| {
            !(v.cluster == key.cluster && v.namespace == key.namespace && v.name == key.name && v.pod_version == pod_version)
        });
        Ok(())
    }
}
