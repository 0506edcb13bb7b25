//! Smoke test: a host boots from configuration, discovers plugins from
//! disk, and reports a coherent system status.

mod common;

use atrium::{HostConfig, PluginManager, SecurityLevel};
use common::{csv_manifest, CsvProcessor};

#[tokio::test]
async fn host_boots_discovers_and_reports() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    // A discovery directory holding one valid manifest and one piece of
    // garbage that must be skipped.
    let dir = tempfile::tempdir().unwrap();
    let plugin_dir = dir.path().join("csv-processor");
    std::fs::create_dir(&plugin_dir).unwrap();
    std::fs::write(
        plugin_dir.join("manifest.json"),
        serde_json::to_string_pretty(&csv_manifest()).unwrap(),
    )
    .unwrap();
    std::fs::write(dir.path().join("noise.json"), "not even json").unwrap();

    let config = HostConfig {
        max_plugins: 4,
        security_level: SecurityLevel::Moderate,
        discovery_paths: vec![dir.path().to_path_buf()],
        ..HostConfig::default()
    };
    config.validate().unwrap();

    let manager = PluginManager::new(config).unwrap();
    manager.register_factory("csv-processor", || Box::new(CsvProcessor::new()));

    let discovered = manager.discover_plugins().await;
    assert_eq!(discovered, vec!["csv-processor".to_string()]);

    manager.activate_plugin("csv-processor").await.unwrap();

    let status = manager.system_status();
    assert_eq!(status.registered_plugins, 1);
    assert_eq!(status.active_plugins, 1);
    assert_eq!(status.security_level, "moderate");
    assert_eq!(status.resources.global.max_active_plugins, 4);
    assert!(status.bus.total_events > 0);

    manager.destroy().await;
    assert_eq!(manager.system_status().active_plugins, 0);
}

#[tokio::test]
async fn config_files_round_trip_through_yaml() {
    let yaml = r#"
max_plugins: 8
security_level: strict
resource_limits:
  global_memory_mb: 512
  global_cpu_percent: 50
enable_hot_reload: true
audit_logging: false
"#;
    let config = HostConfig::from_yaml(yaml).unwrap();
    config.validate().unwrap();

    let manager = PluginManager::new(config).unwrap();
    assert_eq!(manager.config().max_plugins, 8);
    assert_eq!(manager.config().security_level, SecurityLevel::Strict);
    assert!(manager.config().enable_hot_reload);
}
