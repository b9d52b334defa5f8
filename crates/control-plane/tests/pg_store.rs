use control_plane::db::init_db;
use control_plane::models::{AppFilter, AppKey, Stage, Version};
use control_plane::store::{PgStore, Store};
use control_plane::test_support::sample_application;
use once_cell::sync::OnceCell;
use serial_test::serial;

fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().with_target(false).try_init();
    });
}

async fn store() -> Option<PgStore> {
    init_tracing();
    let url = std::env::var("DATABASE_URL").ok()?;
    match init_db(&url).await {
        Ok(pool) => Some(PgStore::new(pool)),
        Err(e) => {
            eprintln!("skipping (db init failed): {e}");
            None
        }
    }
}

#[tokio::test]
#[serial]
async fn schema_tables_exist() {
    let Some(store) = store().await else { eprintln!("skipping schema_tables_exist (no db)"); return; };
    for table in ["applications", "app_versions"] {
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM information_schema.tables WHERE table_schema='public' AND table_name=$1")
                .bind(table)
                .fetch_optional(store.pool())
                .await
                .unwrap();
        assert!(exists.is_some(), "table '{table}' missing after migrations");
    }
}

#[tokio::test]
#[serial]
async fn application_and_versions_lifecycle() {
    let Some(store) = store().await else { eprintln!("skipping application_and_versions_lifecycle (no db)"); return; };
    let ns = format!("pg-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    let app = sample_application("c1", &ns, "web");
    let key = AppKey::new("c1", &ns, "web");

    store.create_application(&app).await.unwrap();
    assert!(store.create_application(&app).await.is_err());
    assert_eq!(store.get_application(&key).await.unwrap().id, app.id);

    let mut updated = app.clone();
    updated.replicas = 3;
    store.update_application(&updated).await.unwrap();
    assert_eq!(store.get_application(&key).await.unwrap().replicas, 3);

    let page = store
        .list_applications(&AppFilter { cluster: "c1".into(), namespace: Some(ns.clone()), ..AppFilter::default() }, &[])
        .await
        .unwrap();
    assert_eq!(page.total, 1);

    let version = Version {
        id: uuid::Uuid::new_v4(),
        cluster: "c1".into(),
        namespace: ns.clone(),
        name: "web".into(),
        pod_version: app.pod_version.clone(),
        stage: Stage::Normal,
        weight: 80,
        replicas: 1,
        cur_replicas: 0,
        template: app.template.clone(),
        created_at: app.created_at,
    };
    store.upsert_version(&version).await.unwrap();
    store.upsert_version(&Version { weight: 60, ..version.clone() }).await.unwrap();
    let versions = store.list_versions(&key).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].weight, 60);

    store.delete_version(&key, "absent").await.unwrap();
    assert_eq!(store.delete_versions(&key).await.unwrap(), 1);
    store.delete_application(&key).await.unwrap();
    assert!(store.get_application(&key).await.unwrap_err().is_not_found());
}

#[tokio::test]
#[serial]
async fn name_filter_matches_wildcards_literally() {
    let Some(store) = store().await else { eprintln!("skipping name_filter_matches_wildcards_literally (no db)"); return; };
    let ns = format!("pg-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
    for name in ["web-a", "webxa", "api"] {
        store.create_application(&sample_application("c1", &ns, name)).await.unwrap();
    }
    let filter = |part: &str| AppFilter {
        cluster: "c1".into(),
        namespace: Some(ns.clone()),
        name_contains: Some(part.into()),
        ..AppFilter::default()
    };

    assert_eq!(store.list_applications(&filter("web"), &[]).await.unwrap().total, 2);
    assert_eq!(store.list_applications(&filter("b_a"), &[]).await.unwrap().total, 0);
    assert_eq!(store.list_applications(&filter("%"), &[]).await.unwrap().total, 0);

    for name in ["web-a", "webxa", "api"] {
        store.delete_application(&AppKey::new("c1", &ns, name)).await.unwrap();
    }
}
