//! End-to-end lifecycle tests: registration through execution, transitive
//! dependency activation, teardown, and failure isolation.

mod common;

use atrium::{
    events, ConfigFieldSchema, ConfigFieldType, DependencyError, LifecycleError, PluginCategory,
    PluginError, PluginStatus,
};
use common::{chart_manifest, csv_manifest, flaky_manifest, host, EventRecorder};
use serde_json::json;

#[tokio::test]
async fn csv_processor_parses_end_to_end() {
    let (manager, _store) = host();

    manager.register_plugin(csv_manifest()).await.unwrap();
    manager.load_plugin("csv-processor").await.unwrap();
    manager.activate_plugin("csv-processor").await.unwrap();

    let dataset = manager
        .execute_plugin("csv-processor", "parse", json!({ "data": "a,b\n1,2" }))
        .await
        .unwrap();

    assert_eq!(dataset["row_count"], json!(1));
    assert_eq!(dataset["column_count"], json!(2));
    assert_eq!(dataset["headers"], json!(["a", "b"]));
    assert_eq!(dataset["rows"], json!([["1", "2"]]));
}

#[tokio::test]
async fn loading_a_dependent_activates_its_dependencies_first() {
    let (manager, _store) = host();
    let recorder = EventRecorder::attach(&manager.events());

    manager.register_plugin(csv_manifest()).await.unwrap();
    manager.register_plugin(chart_manifest()).await.unwrap();

    // Loading the dependent alone must transitively activate the dependency.
    manager.load_plugin("chart-renderer").await.unwrap();

    assert_eq!(manager.plugin_status("csv-processor"), PluginStatus::Active);
    assert_eq!(manager.plugin_status("chart-renderer"), PluginStatus::Loaded);

    let dep_activated = recorder
        .position(events::PLUGIN_ACTIVATED, "csv-processor")
        .expect("dependency activation event");
    let dependent_loaded = recorder
        .position(events::PLUGIN_LOADED, "chart-renderer")
        .expect("dependent load event");
    assert!(
        dep_activated < dependent_loaded,
        "dependency must be active before the dependent initializes"
    );

    manager.activate_plugin("chart-renderer").await.unwrap();
    let dataset = manager
        .execute_plugin("csv-processor", "parse", json!({ "data": "x,y\n1,2\n3,4" }))
        .await
        .unwrap();
    let chart = manager
        .execute_plugin("chart-renderer", "render", json!({ "dataset": dataset }))
        .await
        .unwrap();
    assert_eq!(chart["series"], json!(2));
}

#[tokio::test]
async fn registering_with_a_missing_dependency_fails_by_name() {
    let (manager, _store) = host();

    let err = manager.register_plugin(chart_manifest()).await.unwrap_err();
    match err {
        PluginError::Dependency(DependencyError::Missing { dependency, .. }) => {
            assert_eq!(dependency, "csv-processor");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(manager.registered_plugins().is_empty());
}

#[tokio::test]
async fn executing_an_unknown_plugin_is_a_not_active_error() {
    let (manager, _store) = host();

    let err = manager
        .execute_plugin("nonexistent", "op", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PluginError::Lifecycle(LifecycleError::NotActive { .. })
    ));
}

#[tokio::test]
async fn unload_keeps_the_manifest_registered() {
    let (manager, _store) = host();

    manager.register_plugin(csv_manifest()).await.unwrap();
    manager.activate_plugin("csv-processor").await.unwrap();
    assert_eq!(manager.active_plugins(), vec!["csv-processor".to_string()]);

    manager.deactivate_plugin("csv-processor").await.unwrap();
    manager.unload_plugin("csv-processor").await.unwrap();

    assert!(manager.active_plugins().is_empty());
    assert!(manager
        .registered_plugins()
        .iter()
        .any(|m| m.name == "csv-processor"));
    assert_eq!(
        manager.plugin_status("csv-processor"),
        PluginStatus::Registered
    );

    // Only unregistering removes the manifest.
    manager.unregister_plugin("csv-processor").await.unwrap();
    assert!(manager.registered_plugins().is_empty());
}

#[tokio::test]
async fn monitor_records_exactly_one_sample_per_execute() {
    let (manager, _store) = host();
    manager.register_plugin(csv_manifest()).await.unwrap();
    manager.activate_plugin("csv-processor").await.unwrap();

    manager
        .execute_plugin("csv-processor", "parse", json!({ "data": "a\n1" }))
        .await
        .unwrap();
    let usage = manager.resources().usage("csv-processor").unwrap();
    assert_eq!(usage.executions, 1);

    // The failure path stops the monitor too.
    assert!(manager
        .execute_plugin("csv-processor", "no-such-op", json!({}))
        .await
        .is_err());
    let usage = manager.resources().usage("csv-processor").unwrap();
    assert_eq!(usage.executions, 2);
}

#[tokio::test]
async fn one_plugin_failing_does_not_poison_the_host() {
    let (manager, _store) = host();
    let recorder = EventRecorder::attach(&manager.events());

    manager.register_plugin(csv_manifest()).await.unwrap();
    manager.register_plugin(flaky_manifest()).await.unwrap();
    manager.activate_plugin("csv-processor").await.unwrap();
    manager.activate_plugin("flaky").await.unwrap();

    let err = manager
        .execute_plugin("flaky", "anything", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Execution { .. }));
    assert!(recorder.contains(events::PLUGIN_OPERATION_FAILED, "flaky"));

    // The failing plugin left everything else usable.
    let dataset = manager
        .execute_plugin("csv-processor", "parse", json!({ "data": "a,b\n1,2" }))
        .await
        .unwrap();
    assert_eq!(dataset["row_count"], json!(1));
    assert!(recorder.contains(events::PLUGIN_OPERATION_COMPLETED, "csv-processor"));
}

#[tokio::test]
async fn every_transition_publishes_its_event() {
    let (manager, _store) = host();
    let recorder = EventRecorder::attach(&manager.events());

    manager.register_plugin(csv_manifest()).await.unwrap();
    manager.activate_plugin("csv-processor").await.unwrap();
    manager.deactivate_plugin("csv-processor").await.unwrap();
    manager.unload_plugin("csv-processor").await.unwrap();

    for event in [
        events::PLUGIN_REGISTERED,
        events::PLUGIN_LOADED,
        events::PLUGIN_ACTIVATED,
        events::PLUGIN_DEACTIVATED,
        events::PLUGIN_UNLOADED,
    ] {
        assert!(
            recorder.contains(event, "csv-processor"),
            "missing {event}"
        );
    }

    // Failure events carry the cause.
    assert!(manager.load_plugin("unknown").await.is_err());
    assert!(recorder.contains(events::PLUGIN_LOAD_FAILED, "unknown"));
}

#[tokio::test]
async fn deactivation_releases_quota_for_other_plugins() {
    let (manager, _store) = host();
    manager.register_plugin(csv_manifest()).await.unwrap();
    manager.activate_plugin("csv-processor").await.unwrap();
    assert!(manager.resources().usage("csv-processor").is_some());

    manager.deactivate_plugin("csv-processor").await.unwrap();
    assert!(manager.resources().usage("csv-processor").is_none());
    assert_eq!(manager.resources().active_count(), 0);
    assert!(manager.security().sandbox("csv-processor").is_none());

    // Deactivated plugins can be activated again.
    manager.activate_plugin("csv-processor").await.unwrap();
    assert_eq!(manager.plugin_status("csv-processor"), PluginStatus::Active);
}

#[tokio::test]
async fn settings_are_validated_against_the_manifest_schema() {
    let (manager, _store) = host();

    let mut manifest = csv_manifest();
    manifest.configuration.insert(
        "delimiter".to_string(),
        ConfigFieldSchema {
            field_type: ConfigFieldType::String,
            required: true,
            default: Some(json!(",")),
            description: Some("Field separator".to_string()),
        },
    );
    manager.register_plugin(manifest).await.unwrap();
    manager.load_plugin("csv-processor").await.unwrap();

    manager
        .configure_plugin("csv-processor", json!({ "delimiter": ";" }))
        .await
        .unwrap();

    // Wrong type and unknown keys are rejected before the plugin sees them.
    let err = manager
        .configure_plugin("csv-processor", json!({ "delimiter": 7 }))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Configuration { .. }));

    let err = manager
        .configure_plugin("csv-processor", json!({ "color": "red" }))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Configuration { .. }));
}

#[tokio::test]
async fn introspection_reflects_the_registry_and_instances() {
    let (manager, _store) = host();
    manager.register_plugin(csv_manifest()).await.unwrap();
    manager.register_plugin(chart_manifest()).await.unwrap();
    manager.activate_plugin("chart-renderer").await.unwrap();

    let info = manager.plugin_info("csv-processor").await.unwrap();
    assert_eq!(info.status, PluginStatus::Active);
    assert_eq!(info.capabilities[0].name, "csv-parsing");
    assert!(info.usage.is_some());
    assert!(info.sandbox.is_some());

    let processing = manager.plugins_by_category(PluginCategory::DataProcessing);
    assert_eq!(processing.len(), 1);

    let hits = manager.search_plugins("csv", None);
    assert_eq!(hits[0].manifest.name, "csv-processor");

    let status = manager.system_status();
    assert_eq!(status.registered_plugins, 2);
    assert_eq!(status.active_plugins, 2);

    manager.destroy().await;
    assert!(manager.active_plugins().is_empty());
    assert_eq!(manager.resources().active_count(), 0);
}
