//! Persistence collaborator for Application and Version rows.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::models::{AppFilter, AppKey, Application, Page, Version};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("multiple rows match {0}")]
    MultipleRows(String),
    #[error("{0} already exists")]
    Duplicate(String),
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool { matches!(self, Self::NotFound(_)) }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Writers are serialized by the backing store.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get_application(&self, key: &AppKey) -> StoreResult<Application>;
    /// Every application with this name anywhere in the cluster.
    async fn find_by_name(&self, cluster: &str, name: &str) -> StoreResult<Vec<Application>>;
    /// `namespaces` restricts the result when `filter.namespace` is `None`.
    async fn list_applications(&self, filter: &AppFilter, namespaces: &[String]) -> StoreResult<Page<Application>>;
    async fn create_application(&self, app: &Application) -> StoreResult<()>;
    async fn update_application(&self, app: &Application) -> StoreResult<()>;
    async fn delete_application(&self, key: &AppKey) -> StoreResult<()>;

    async fn list_versions(&self, key: &AppKey) -> StoreResult<Vec<Version>>;
    /// Insert or replace by (cluster, namespace, name, pod_version).
    async fn upsert_version(&self, version: &Version) -> StoreResult<()>;
    async fn delete_versions(&self, key: &AppKey) -> StoreResult<u64>;
    /// Remove one lineage. A missing row is not an error.
    async fn delete_version(&self, key: &AppKey, pod_version: &str) -> StoreResult<()>;
}

pub(crate) fn matches_filter(app: &Application, filter: &AppFilter, namespaces: &[String]) -> bool {
    if app.cluster != filter.cluster { return false; }
    match &filter.namespace {
        Some(ns) if &app.namespace != ns => return false,
        None if !namespaces.iter().any(|n| n == &app.namespace) => return false,
        _ => {}
    }
    match &filter.name_contains {
        Some(part) => app.name.contains(part.as_str()),
        None => true,
    }
}

pub(crate) fn page_bounds(filter: &AppFilter) -> (usize, usize) {
    let size = if filter.page_size == 0 { 20 } else { filter.page_size.min(500) } as usize;
    (filter.page as usize * size, size)
}
