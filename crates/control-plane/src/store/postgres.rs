use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use super::{page_bounds, Store, StoreError, StoreResult};
use crate::models::{AppFilter, AppKey, Application, Page, Version};

const APP_COLUMNS: &str = "id, cluster, namespace, name, kind, pod_version, version, image, template, replicas, \
     ready_replicas, updated_replicas, available_replicas, message, service_mesh, default_address, created_at, updated_at";

const VERSION_COLUMNS: &str = "id, cluster, namespace, name, pod_version, stage, weight, replicas, cur_replicas, template, created_at";

/// Filter shared by the list and count queries. $1 cluster, $2 namespace, $3 visible namespaces, $4 name part.
const LIST_WHERE: &str = "cluster = $1 \
     AND ($2::text IS NULL OR namespace = $2) \
     AND ($2::text IS NOT NULL OR namespace = ANY($3)) \
     AND ($4::text IS NULL OR name LIKE '%' || $4 || '%' ESCAPE '\\')";

/// Escape LIKE metacharacters so a name filter matches literally.
fn like_literal(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        if matches!(c, '\\' | '%' | '_') { out.push('\\'); }
        out.push(c);
    }
    out
}

/// [`Store`] over a Postgres pool. See `migrations/` for the schema.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    pub fn pool(&self) -> &Pool<Postgres> { &self.pool }
}

fn backend(e: sqlx::Error) -> StoreError { StoreError::Backend(e.to_string()) }

fn insert_err(e: sqlx::Error, what: String) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => StoreError::Duplicate(what),
        _ => backend(e),
    }
}

fn app_from_row(row: &PgRow) -> StoreResult<Application> {
    let kind: String = row.try_get("kind").map_err(backend)?;
    Ok(Application {
        id: row.try_get("id").map_err(backend)?,
        cluster: row.try_get("cluster").map_err(backend)?,
        namespace: row.try_get("namespace").map_err(backend)?,
        name: row.try_get("name").map_err(backend)?,
        kind: kind.parse().map_err(|e| StoreError::Backend(format!("{e}")))?,
        pod_version: row.try_get("pod_version").map_err(backend)?,
        version: row.try_get("version").map_err(backend)?,
        image: row.try_get("image").map_err(backend)?,
        template: row.try_get("template").map_err(backend)?,
        replicas: row.try_get("replicas").map_err(backend)?,
        ready_replicas: row.try_get("ready_replicas").map_err(backend)?,
        updated_replicas: row.try_get("updated_replicas").map_err(backend)?,
        available_replicas: row.try_get("available_replicas").map_err(backend)?,
        message: row.try_get("message").map_err(backend)?,
        service_mesh: row.try_get("service_mesh").map_err(backend)?,
        default_address: row.try_get("default_address").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
        updated_at: row.try_get("updated_at").map_err(backend)?,
    })
}

fn version_from_row(row: &PgRow) -> StoreResult<Version> {
    let stage: String = row.try_get("stage").map_err(backend)?;
    Ok(Version {
        id: row.try_get("id").map_err(backend)?,
        cluster: row.try_get("cluster").map_err(backend)?,
        namespace: row.try_get("namespace").map_err(backend)?,
        name: row.try_get("name").map_err(backend)?,
        pod_version: row.try_get("pod_version").map_err(backend)?,
        stage: stage.parse().map_err(|e| StoreError::Backend(format!("{e}")))?,
        weight: row.try_get("weight").map_err(backend)?,
        replicas: row.try_get("replicas").map_err(backend)?,
        cur_replicas: row.try_get("cur_replicas").map_err(backend)?,
        template: row.try_get("template").map_err(backend)?,
        created_at: row.try_get("created_at").map_err(backend)?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn get_application(&self, key: &AppKey) -> StoreResult<Application> {
        let rows = sqlx::query(&format!("SELECT {APP_COLUMNS} FROM applications WHERE cluster=$1 AND namespace=$2 AND name=$3"))
            .bind(&key.cluster)
            .bind(&key.namespace)
            .bind(&key.name)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        match rows.as_slice() {
            [] => Err(StoreError::NotFound(format!("application {key}"))),
            [row] => app_from_row(row),
            _ => Err(StoreError::MultipleRows(format!("application {key}"))),
        }
    }

    async fn find_by_name(&self, cluster: &str, name: &str) -> StoreResult<Vec<Application>> {
        let rows = sqlx::query(&format!("SELECT {APP_COLUMNS} FROM applications WHERE cluster=$1 AND name=$2 ORDER BY namespace"))
            .bind(cluster)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(app_from_row).collect()
    }

    async fn list_applications(&self, filter: &AppFilter, namespaces: &[String]) -> StoreResult<Page<Application>> {
        let (offset, size) = page_bounds(filter);
        let name_pattern = filter.name_contains.as_deref().map(like_literal);
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM applications WHERE {LIST_WHERE}"))
            .bind(&filter.cluster)
            .bind(&filter.namespace)
            .bind(namespaces)
            .bind(&name_pattern)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let rows = sqlx::query(&format!(
            "SELECT {APP_COLUMNS} FROM applications WHERE {LIST_WHERE} ORDER BY created_at DESC, name LIMIT $5 OFFSET $6"
        ))
        .bind(&filter.cluster)
        .bind(&filter.namespace)
        .bind(namespaces)
        .bind(&name_pattern)
        .bind(size as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        let items = rows.iter().map(app_from_row).collect::<StoreResult<Vec<_>>>()?;
        Ok(Page { items, total: total.max(0) as u64 })
    }

    async fn create_application(&self, app: &Application) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO applications ({APP_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)"
        ))
        .bind(app.id)
        .bind(&app.cluster)
        .bind(&app.namespace)
        .bind(&app.name)
        .bind(app.kind.as_str())
        .bind(&app.pod_version)
        .bind(&app.version)
        .bind(&app.image)
        .bind(&app.template)
        .bind(app.replicas)
        .bind(app.ready_replicas)
        .bind(app.updated_replicas)
        .bind(app.available_replicas)
        .bind(&app.message)
        .bind(app.service_mesh)
        .bind(&app.default_address)
        .bind(app.created_at)
        .bind(app.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_err(e, format!("application {}", app.key())))?;
        Ok(())
    }

    async fn update_application(&self, app: &Application) -> StoreResult<()> {
        let res = sqlx::query(
            "UPDATE applications SET pod_version=$2, version=$3, image=$4, template=$5, replicas=$6, ready_replicas=$7, \
             updated_replicas=$8, available_replicas=$9, message=$10, service_mesh=$11, default_address=$12, updated_at=$13 \
             WHERE id=$1",
        )
        .bind(app.id)
        .bind(&app.pod_version)
        .bind(&app.version)
        .bind(&app.image)
        .bind(&app.template)
        .bind(app.replicas)
        .bind(app.ready_replicas)
        .bind(app.updated_replicas)
        .bind(app.available_replicas)
        .bind(&app.message)
        .bind(app.service_mesh)
        .bind(&app.default_address)
        .bind(app.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("application {}", app.key())));
        }
        Ok(())
    }

    async fn delete_application(&self, key: &AppKey) -> StoreResult<()> {
        let res = sqlx::query("DELETE FROM applications WHERE cluster=$1 AND namespace=$2 AND name=$3")
            .bind(&key.cluster)
            .bind(&key.namespace)
            .bind(&key.name)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("application {key}")));
        }
        Ok(())
    }

    async fn list_versions(&self, key: &AppKey) -> StoreResult<Vec<Version>> {
        let rows = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM app_versions WHERE cluster=$1 AND namespace=$2 AND name=$3 ORDER BY created_at"
        ))
        .bind(&key.cluster)
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(version_from_row).collect()
    }

    async fn upsert_version(&self, v: &Version) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO app_versions ({VERSION_COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) \
             ON CONFLICT (cluster, namespace, name, pod_version) DO UPDATE SET \
             stage=EXCLUDED.stage, weight=EXCLUDED.weight, replicas=EXCLUDED.replicas, \
             cur_replicas=EXCLUDED.cur_replicas, template=EXCLUDED.template"
        ))
        .bind(v.id)
        .bind(&v.cluster)
        .bind(&v.namespace)
        .bind(&v.name)
        .bind(&v.pod_version)
        .bind(v.stage.as_str())
        .bind(v.weight)
        .bind(v.replicas)
        .bind(v.cur_replicas)
        .bind(&v.template)
        .bind(v.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn delete_versions(&self, key: &AppKey) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM app_versions WHERE cluster=$1 AND namespace=$2 AND name=$3")
            .bind(&key.cluster)
            .bind(&key.namespace)
            .bind(&key.name)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(res.rows_affected())
    }

    async fn delete_version(&self, key: &AppKey, pod_version: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM app_versions WHERE cluster=$1 AND namespace=$2 AND name=$3 AND pod_version=$4")
            .bind(&key.cluster)
            .bind(&key.namespace)
            .bind(&key.name)
            .bind(pod_version)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }
}
