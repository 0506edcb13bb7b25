//! Shared fixtures for the workspace integration tests: builtin test
//! plugins, manifest builders, and an event recorder.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use atrium::{
    AccessLevel, CapabilityKind, Compatibility, EventBus, HostConfig, Plugin, PluginCapability,
    PluginCategory, PluginContext, PluginDependency, PluginManager, PluginManifest,
    PluginPermission,
};

pub fn manifest(name: &str, category: PluginCategory) -> PluginManifest {
    PluginManifest {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        description: format!("Integration test plugin '{name}'"),
        author: "atrium-tests".to_string(),
        license: "MIT".to_string(),
        homepage: None,
        repository: None,
        keywords: vec!["test".to_string()],
        category,
        entry_point: format!("builtin:{name}"),
        dependencies: Vec::new(),
        permissions: Vec::new(),
        configuration: HashMap::new(),
        compatibility: Compatibility {
            min_core_version: Some("0.1.0".to_string()),
            max_core_version: None,
            browsers: vec!["chrome".to_string(), "firefox".to_string()],
        },
    }
}

pub fn permission(resource: &str, access: AccessLevel) -> PluginPermission {
    PluginPermission {
        resource: resource.to_string(),
        access,
        scope: None,
    }
}

pub fn dependency(name: &str) -> PluginDependency {
    PluginDependency {
        name: name.to_string(),
        version: "*".to_string(),
        optional: false,
    }
}

pub fn csv_manifest() -> PluginManifest {
    let mut m = manifest("csv-processor", PluginCategory::DataProcessing);
    m.permissions = vec![
        permission("core", AccessLevel::Execute),
        permission("data", AccessLevel::Execute),
        permission("storage", AccessLevel::Write),
    ];
    m
}

pub fn chart_manifest() -> PluginManifest {
    let mut m = manifest("chart-renderer", PluginCategory::Visualization);
    m.dependencies = vec![dependency("csv-processor")];
    m.permissions = vec![permission("core", AccessLevel::Execute)];
    m
}

pub fn flaky_manifest() -> PluginManifest {
    let mut m = manifest("flaky", PluginCategory::Utility);
    m.permissions = vec![permission("core", AccessLevel::Execute)];
    m
}

/// Parses delimiter-separated text into a dataset. Carries a parse counter
/// across hot reloads through the state hooks.
pub struct CsvProcessor {
    manifest: PluginManifest,
    context: Option<PluginContext>,
    parsed: u64,
}

impl CsvProcessor {
    pub fn new() -> Self {
        Self {
            manifest: csv_manifest(),
            context: None,
            parsed: 0,
        }
    }
}

#[async_trait]
impl Plugin for CsvProcessor {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    fn capabilities(&self) -> Vec<PluginCapability> {
        vec![PluginCapability {
            name: "csv-parsing".to_string(),
            description: "Parses delimited text into datasets".to_string(),
            kind: CapabilityKind::Processing,
            version: "1.0.0".to_string(),
        }]
    }

    async fn initialize(&mut self, context: PluginContext) -> anyhow::Result<()> {
        context.logger.info("csv processor initializing");
        self.context = Some(context);
        Ok(())
    }

    async fn activate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deactivate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        self.context = None;
        Ok(())
    }

    async fn execute(&mut self, operation: &str, params: Value) -> anyhow::Result<Value> {
        match operation {
            "parse" => {
                let data = params["data"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("'data' must be a string"))?;
                let delimiter = params["delimiter"].as_str().unwrap_or(",");

                let mut lines = data.lines().filter(|l| !l.trim().is_empty());
                let headers: Vec<String> = lines
                    .next()
                    .map(|l| l.split(delimiter).map(str::to_string).collect())
                    .unwrap_or_default();
                let rows: Vec<Vec<String>> = lines
                    .map(|l| l.split(delimiter).map(str::to_string).collect())
                    .collect();

                self.parsed += 1;
                Ok(json!({
                    "headers": headers,
                    "row_count": rows.len(),
                    "column_count": headers.len(),
                    "rows": rows,
                }))
            }
            "persist" => {
                let context = self
                    .context
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("not initialized"))?;
                let stored = context.services.call("storage", "save", params)?;
                Ok(stored)
            }
            "stats" => Ok(json!({ "parsed": self.parsed })),
            other => anyhow::bail!("unknown operation '{other}'"),
        }
    }

    async fn configure(&mut self, _settings: Value) -> anyhow::Result<()> {
        Ok(())
    }

    async fn save_state(&mut self) -> anyhow::Result<Option<Value>> {
        Ok(Some(json!({ "parsed": self.parsed })))
    }

    async fn restore_state(&mut self, state: Value) -> anyhow::Result<()> {
        self.parsed = state["parsed"].as_u64().unwrap_or(0);
        Ok(())
    }
}

/// Renders datasets produced by the CSV processor.
pub struct ChartRenderer {
    manifest: PluginManifest,
}

impl ChartRenderer {
    pub fn new() -> Self {
        Self {
            manifest: chart_manifest(),
        }
    }
}

#[async_trait]
impl Plugin for ChartRenderer {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    fn capabilities(&self) -> Vec<PluginCapability> {
        vec![PluginCapability {
            name: "chart-rendering".to_string(),
            description: "Renders datasets as charts".to_string(),
            kind: CapabilityKind::Visualization,
            version: "1.0.0".to_string(),
        }]
    }

    async fn initialize(&mut self, _context: PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn activate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deactivate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute(&mut self, operation: &str, params: Value) -> anyhow::Result<Value> {
        match operation {
            "render" => {
                let series = params["dataset"]["row_count"].as_u64().unwrap_or(0);
                Ok(json!({ "chart": "bar", "series": series }))
            }
            other => anyhow::bail!("unknown operation '{other}'"),
        }
    }

    async fn configure(&mut self, _settings: Value) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Returns its params for any operation; used for permission-matrix tests.
pub struct Echo {
    manifest: PluginManifest,
}

impl Echo {
    pub fn new(manifest: PluginManifest) -> Self {
        Self { manifest }
    }
}

#[async_trait]
impl Plugin for Echo {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    async fn initialize(&mut self, _context: PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn activate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deactivate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute(&mut self, _operation: &str, params: Value) -> anyhow::Result<Value> {
        Ok(params)
    }

    async fn configure(&mut self, _settings: Value) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fails every `execute`; used for failure-path tests.
pub struct Flaky {
    manifest: PluginManifest,
}

impl Flaky {
    pub fn new() -> Self {
        Self {
            manifest: flaky_manifest(),
        }
    }
}

#[async_trait]
impl Plugin for Flaky {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    async fn initialize(&mut self, _context: PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn activate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deactivate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn execute(&mut self, operation: &str, _params: Value) -> anyhow::Result<Value> {
        anyhow::bail!("flaky plugin refuses '{operation}'")
    }

    async fn configure(&mut self, _settings: Value) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A host with the test factories and a `storage` service wired up.
///
/// Returns the manager and the backing store the `storage` service saves
/// into.
pub fn host() -> (PluginManager, Arc<Mutex<Vec<Value>>>) {
    let manager = PluginManager::new(HostConfig::default()).expect("host config is valid");

    manager.register_factory("csv-processor", || Box::new(CsvProcessor::new()));
    manager.register_factory("chart-renderer", || Box::new(ChartRenderer::new()));
    manager.register_factory("flaky", || Box::new(Flaky::new()));

    let store: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&store);
    manager.register_service("storage", move |method, args| match method {
        "save" => {
            sink.lock().push(args);
            Ok(json!({ "saved": true }))
        }
        other => anyhow::bail!("unknown storage method '{other}'"),
    });

    (manager, store)
}

/// Records every event published on a bus, in order.
pub struct EventRecorder {
    events: Arc<Mutex<Vec<(String, Value)>>>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> Self {
        let events: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        bus.subscribe("*", move |event, data| {
            sink.lock().push((event.to_string(), data.clone()));
            Ok(())
        });
        Self { events }
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Index of the first `event` published for `plugin`.
    pub fn position(&self, event: &str, plugin: &str) -> Option<usize> {
        self.events
            .lock()
            .iter()
            .position(|(name, data)| name == event && data["plugin"] == json!(plugin))
    }

    pub fn contains(&self, event: &str, plugin: &str) -> bool {
        self.position(event, plugin).is_some()
    }
}
