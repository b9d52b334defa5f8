use std::io::Write;

use canopy_cli::config::{config_file_path, EffectiveConfig};
use serial_test::serial;
use tempfile::TempDir;

fn write_cfg(dir: &TempDir, content: Option<&str>) {
    std::env::set_var("XDG_CONFIG_HOME", dir.path());
    let path = config_file_path();
    if let Some(c) = content {
        if let Some(p) = path.parent() { std::fs::create_dir_all(p).unwrap(); }
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(c.as_bytes()).unwrap();
    } else if path.exists() {
        std::fs::remove_file(&path).unwrap();
    }
}

fn clear_env() {
    for k in ["CANOPY_DATABASE_URL", "CANOPY_CLUSTER", "CANOPY_NAMESPACE", "CANOPY_MAX_REPLICAS"] {
        std::env::remove_var(k);
    }
}

#[test]
#[serial]
fn missing_file_gives_defaults() {
    let td = TempDir::new().unwrap();
    write_cfg(&td, None);
    clear_env();
    let cfg = EffectiveConfig::load().unwrap();
    assert!(cfg.database_url.is_none());
    assert_eq!(cfg.default_cluster, "default");
    assert_eq!(cfg.default_namespace, "default");
    assert_eq!(cfg.namespaces, vec!["default".to_string()]);
    assert_eq!(cfg.engine.max_replicas, 50);
}

#[test]
#[serial]
fn parse_error_is_reported() {
    let td = TempDir::new().unwrap();
    write_cfg(&td, Some("default_namespace = [unclosed"));
    clear_env();
    let err = EffectiveConfig::load().unwrap_err();
    let s = format!("{err:#}");
    assert!(s.contains("failed to parse config"), "expected parse error, got: {s}");
}

#[test]
#[serial]
fn file_values_and_engine_section() {
    let td = TempDir::new().unwrap();
    write_cfg(
        &td,
        Some(
            "database_url = 'postgres://localhost/canopy'\ndefault_namespace = 'teamspace'\nnamespaces = ['teamspace', 'shared']\n\n[engine]\nmax_replicas = 8\ndomain_suffix = 'apps.example.com'\n",
        ),
    );
    clear_env();
    let cfg = EffectiveConfig::load().unwrap();
    assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/canopy"));
    assert_eq!(cfg.default_namespace, "teamspace");
    assert_eq!(cfg.namespaces.len(), 2);
    assert_eq!(cfg.engine.max_replicas, 8);
    assert_eq!(cfg.engine.domain_suffix(), Some("apps.example.com"));
    assert_eq!(cfg.engine.batch_group_size, 5);
}

#[test]
#[serial]
fn env_overrides_file() {
    let td = TempDir::new().unwrap();
    write_cfg(&td, Some("default_namespace='ns1'\n[engine]\nmax_replicas = 8\n"));
    clear_env();
    std::env::set_var("CANOPY_NAMESPACE", "override_ns");
    std::env::set_var("CANOPY_MAX_REPLICAS", "3");
    let cfg = EffectiveConfig::load().unwrap();
    clear_env();
    assert_eq!(cfg.default_namespace, "override_ns");
    assert_eq!(cfg.engine.max_replicas, 3);
}
