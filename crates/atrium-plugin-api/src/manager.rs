//! The top-level plugin orchestrator.
//!
//! `PluginManager` owns one instance of every subsystem and drives the
//! lifecycle state machine per plugin:
//!
//! ```text
//! unregistered -> registered -> loaded -> active <-> deactivated -> unloaded
//! ```
//!
//! Operations on the same plugin name are serialized through a per-name
//! async lock, so overlapping calls cannot double-allocate resources or
//! initialize an instance twice. Every transition publishes a success event
//! and a dedicated failure event on the bus.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use atrium_core::{BusMetrics, EventBus, HostConfig, Version, CORE_VERSION};

use crate::context::{PluginContext, PluginLogger, ServiceProxy, ServiceTable};
use crate::contract::{Plugin, PluginCapability};
use crate::error::{LifecycleError, LoadError, ManifestError, PluginError, PluginResult};
use crate::loader::PluginLoader;
use crate::manifest::{PluginCategory, PluginManifest, ValidationReport};
use crate::registry::{PluginRegistry, SearchMatch};
use crate::resources::{GlobalLimits, ResourceManager, ResourceQuota, ResourceReport, ResourceUsage};
use crate::security::{SandboxInfo, SecurityManager, SecurityReport};

/// Event names published by the manager.
pub mod events {
    pub const PLUGIN_REGISTERED: &str = "plugin:registered";
    pub const PLUGIN_REGISTRATION_FAILED: &str = "plugin:registration-failed";
    pub const PLUGIN_UNREGISTERED: &str = "plugin:unregistered";
    pub const PLUGIN_LOADED: &str = "plugin:loaded";
    pub const PLUGIN_LOAD_FAILED: &str = "plugin:load-failed";
    pub const PLUGIN_ACTIVATED: &str = "plugin:activated";
    pub const PLUGIN_ACTIVATION_FAILED: &str = "plugin:activation-failed";
    pub const PLUGIN_OPERATION_COMPLETED: &str = "plugin:operation-completed";
    pub const PLUGIN_OPERATION_FAILED: &str = "plugin:operation-failed";
    pub const PLUGIN_CONFIGURED: &str = "plugin:configured";
    pub const PLUGIN_CONFIGURATION_FAILED: &str = "plugin:configuration-failed";
    pub const PLUGIN_DEACTIVATED: &str = "plugin:deactivated";
    pub const PLUGIN_DEACTIVATION_FAILED: &str = "plugin:deactivation-failed";
    pub const PLUGIN_UNLOADED: &str = "plugin:unloaded";
    pub const PLUGIN_HOT_RELOADED: &str = "plugin:hot-reloaded";
    pub const PLUGIN_HOT_RELOAD_FAILED: &str = "plugin:hot-reload-failed";
    pub const PLUGINS_DISCOVERED: &str = "plugins:discovered";
    pub const HOST_DESTROYED: &str = "host:destroyed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Loaded,
    Active,
    Deactivated,
}

/// Externally visible lifecycle position of one plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Unregistered,
    Registered,
    Loaded,
    Active,
    Deactivated,
}

/// Introspection snapshot for one plugin.
#[derive(Serialize)]
pub struct PluginInfo {
    pub manifest: PluginManifest,
    pub status: PluginStatus,
    pub capabilities: Vec<PluginCapability>,
    pub usage: Option<ResourceUsage>,
    pub sandbox: Option<SandboxInfo>,
    pub module_hash: Option<String>,
}

/// Whole-system snapshot returned by [`PluginManager::system_status`].
#[derive(Serialize)]
pub struct SystemStatus {
    pub core_version: String,
    pub security_level: String,
    pub registered_plugins: usize,
    pub loaded_plugins: usize,
    pub active_plugins: usize,
    pub plugins_by_category: HashMap<String, usize>,
    pub resources: ResourceReport,
    pub security: SecurityReport,
    pub bus: BusMetrics,
}

type SharedInstance = Arc<tokio::sync::Mutex<Box<dyn Plugin>>>;

/// Orchestrates registration, loading, activation, execution, and teardown
/// of plugins.
pub struct PluginManager {
    config: HostConfig,
    core_version: Version,
    events: Arc<EventBus>,
    registry: PluginRegistry,
    loader: PluginLoader,
    resources: ResourceManager,
    security: Arc<SecurityManager>,
    services: Arc<ServiceTable>,
    instances: DashMap<String, SharedInstance>,
    contexts: DashMap<String, PluginContext>,
    states: DashMap<String, LifecycleState>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl PluginManager {
    /// Builds a manager from a validated host configuration.
    ///
    /// Construction is explicit; embedders own the instance and its
    /// lifetime. There is no process-wide singleton.
    pub fn new(config: HostConfig) -> PluginResult<Self> {
        config.validate()?;

        Ok(Self {
            core_version: Version::parse(CORE_VERSION).expect("crate version is semver"),
            events: Arc::new(EventBus::new()),
            registry: PluginRegistry::new(),
            loader: PluginLoader::new()?,
            resources: ResourceManager::new(GlobalLimits::from_config(&config)),
            security: Arc::new(SecurityManager::new(
                config.security_level,
                config.audit_logging,
            )),
            services: Arc::new(ServiceTable::new()),
            instances: DashMap::new(),
            contexts: DashMap::new(),
            states: DashMap::new(),
            locks: DashMap::new(),
            config,
        })
    }

    // ---------------------------------------------------------------------
    // Host wiring
    // ---------------------------------------------------------------------

    /// Registers the factory behind a `builtin:<name>` entry point.
    pub fn register_factory<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.loader.register_factory(name, factory);
    }

    /// Registers a host service reachable through every plugin's
    /// [`ServiceProxy`].
    pub fn register_service<F>(&self, name: &str, handler: F)
    where
        F: Fn(&str, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.services.insert(name.to_string(), Arc::new(handler));
    }

    /// Assigns the resource quota `name` will be activated under.
    pub fn set_plugin_quota(&self, name: &str, quota: ResourceQuota) {
        self.resources.set_quota(name, quota);
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    pub fn security(&self) -> &SecurityManager {
        &self.security
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn core_version(&self) -> &Version {
        &self.core_version
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Validates and stores a manifest: structural checks, host
    /// compatibility, then security policy, then the registry's dependency
    /// checks. Nothing is kept if any step fails.
    pub async fn register_plugin(&self, manifest: PluginManifest) -> PluginResult<()> {
        let name = manifest.name.clone();
        let lock = self.op_lock(&name);
        let _guard = lock.lock().await;

        match self.register_locked(manifest) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.events.publish(
                    events::PLUGIN_REGISTRATION_FAILED,
                    json!({ "plugin": name, "error": error.to_string() }),
                );
                Err(error)
            }
        }
    }

    fn register_locked(&self, manifest: PluginManifest) -> PluginResult<()> {
        let report = manifest.validate();
        if !report.is_valid {
            return Err(ManifestError::Invalid {
                plugin: manifest.name.clone(),
                errors: report.errors,
            }
            .into());
        }
        for warning in &report.warnings {
            tracing::debug!(plugin = %manifest.name, %warning, "manifest warning");
        }

        self.check_compatibility(&manifest)?;
        self.security.validate_plugin(&manifest)?;

        let name = manifest.name.clone();
        let version = manifest.version.clone();
        let category = manifest.category;
        if let Err(error) = self.registry.register(manifest) {
            // Grants were recorded by the policy check; roll them back so
            // a failed registration leaves no trace.
            self.security.revoke(&name);
            return Err(error);
        }

        self.events.publish(
            events::PLUGIN_REGISTERED,
            json!({ "plugin": name, "version": version, "category": category.as_str() }),
        );
        Ok(())
    }

    fn check_compatibility(&self, manifest: &PluginManifest) -> PluginResult<()> {
        let compat = &manifest.compatibility;
        if let Some(min) = &compat.min_core_version {
            match Version::parse(min) {
                Ok(min_version) if self.core_version < min_version => {
                    return Err(ManifestError::Incompatible {
                        plugin: manifest.name.clone(),
                        required: format!(">={min}"),
                        core_version: CORE_VERSION.to_string(),
                    }
                    .into());
                }
                Ok(_) => {}
                Err(_) => {
                    return Err(ManifestError::Invalid {
                        plugin: manifest.name.clone(),
                        errors: vec![format!("invalid min core version '{min}'")],
                    }
                    .into());
                }
            }
        }
        if let Some(max) = &compat.max_core_version {
            match Version::parse(max) {
                Ok(max_version) if self.core_version > max_version => {
                    return Err(ManifestError::Incompatible {
                        plugin: manifest.name.clone(),
                        required: format!("<={max}"),
                        core_version: CORE_VERSION.to_string(),
                    }
                    .into());
                }
                Ok(_) => {}
                Err(_) => {
                    return Err(ManifestError::Invalid {
                        plugin: manifest.name.clone(),
                        errors: vec![format!("invalid max core version '{max}'")],
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Removes a manifest. The plugin must be fully unloaded first.
    pub async fn unregister_plugin(&self, name: &str) -> PluginResult<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;

        if self.instances.contains_key(name) {
            return Err(LifecycleError::StillLoaded {
                plugin: name.to_string(),
            }
            .into());
        }
        self.registry.unregister(name)?;
        self.security.revoke(name);
        self.events
            .publish(events::PLUGIN_UNREGISTERED, json!({ "plugin": name }));
        Ok(())
    }

    /// Instantiates a registered plugin and runs `initialize`.
    ///
    /// Required dependencies that are not yet active are loaded and
    /// activated first, depth-first, so every dependency is live before
    /// this plugin's `initialize` runs. Loading an already-loaded plugin
    /// is a no-op.
    pub async fn load_plugin(&self, name: &str) -> PluginResult<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;

        match self.load_locked(name).await {
            Ok(_) => Ok(()),
            Err(error) => {
                self.events.publish(
                    events::PLUGIN_LOAD_FAILED,
                    json!({ "plugin": name, "error": error.to_string() }),
                );
                Err(error)
            }
        }
    }

    async fn load_locked(&self, name: &str) -> PluginResult<bool> {
        if self.instances.contains_key(name) {
            return Ok(false);
        }

        let manifest = self
            .registry
            .manifest(name)
            .ok_or_else(|| LifecycleError::NotRegistered {
                plugin: name.to_string(),
            })?;

        for dep in manifest.required_dependencies() {
            if self.plugin_status(&dep.name) != PluginStatus::Active {
                tracing::debug!(plugin = %name, dependency = %dep.name, "activating dependency");
                Box::pin(self.activate_plugin(&dep.name)).await?;
            }
        }

        let quota = self.resources.quota(name);
        let mut instance = self.loader.load(&manifest, &quota)?;

        let context = PluginContext {
            plugin_name: name.to_string(),
            core_version: self.core_version.clone(),
            services: ServiceProxy::new(name, Arc::clone(&self.security), Arc::clone(&self.services)),
            events: Arc::clone(&self.events),
            logger: PluginLogger::new(name),
            config: manifest.default_config(),
            resources: quota,
        };

        instance
            .initialize(context.clone())
            .await
            .map_err(|e| LoadError::InitializeFailed {
                plugin: name.to_string(),
                reason: e.to_string(),
            })?;

        self.contexts.insert(name.to_string(), context);
        self.instances
            .insert(name.to_string(), Arc::new(tokio::sync::Mutex::new(instance)));
        self.states.insert(name.to_string(), LifecycleState::Loaded);

        tracing::info!(plugin = %name, "plugin loaded");
        self.events
            .publish(events::PLUGIN_LOADED, json!({ "plugin": name }));
        Ok(true)
    }

    /// Brings a plugin to the active state: implicit load, resource
    /// admission, sandbox creation, then the plugin's own `activate`.
    pub async fn activate_plugin(&self, name: &str) -> PluginResult<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;

        match self.activate_locked(name).await {
            Ok(_) => Ok(()),
            Err(error) => {
                self.events.publish(
                    events::PLUGIN_ACTIVATION_FAILED,
                    json!({ "plugin": name, "error": error.to_string() }),
                );
                Err(error)
            }
        }
    }

    async fn activate_locked(&self, name: &str) -> PluginResult<bool> {
        if self.states.get(name).map(|s| *s) == Some(LifecycleState::Active) {
            return Ok(false);
        }

        self.load_locked(name).await?;

        self.resources.allocate(name)?;
        self.security.create_sandbox(name);

        let instance = self.shared_instance(name)?;
        let activated = { instance.lock().await.activate().await };
        if let Err(source) = activated {
            // Roll back so a failed activation leaks neither quota nor
            // sandbox state.
            self.resources.release(name);
            self.security.destroy_sandbox(name);
            return Err(PluginError::Execution {
                plugin: name.to_string(),
                operation: "activate".to_string(),
                source,
            });
        }

        self.states.insert(name.to_string(), LifecycleState::Active);
        tracing::info!(plugin = %name, "plugin activated");
        self.events
            .publish(events::PLUGIN_ACTIVATED, json!({ "plugin": name }));
        Ok(true)
    }

    /// Runs one operation on an active plugin.
    ///
    /// The permission check precedes execution; the resource monitor is
    /// stopped exactly once on both the success and the failure path.
    pub async fn execute_plugin(
        &self,
        name: &str,
        operation: &str,
        params: Value,
    ) -> PluginResult<Value> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;

        match self.execute_locked(name, operation, params).await {
            Ok((value, duration_ms)) => {
                self.events.publish(
                    events::PLUGIN_OPERATION_COMPLETED,
                    json!({ "plugin": name, "operation": operation, "duration_ms": duration_ms }),
                );
                Ok(value)
            }
            Err(error) => {
                self.events.publish(
                    events::PLUGIN_OPERATION_FAILED,
                    json!({ "plugin": name, "operation": operation, "error": error.to_string() }),
                );
                Err(error)
            }
        }
    }

    async fn execute_locked(
        &self,
        name: &str,
        operation: &str,
        params: Value,
    ) -> PluginResult<(Value, u64)> {
        if self.states.get(name).map(|s| *s) != Some(LifecycleState::Active) {
            return Err(LifecycleError::NotActive {
                plugin: name.to_string(),
            }
            .into());
        }

        self.security.check_permission(name, operation, &params)?;

        let instance = self.shared_instance(name)?;
        let monitor = self.resources.create_monitor(name);
        let result = { instance.lock().await.execute(operation, params).await };
        let sample = monitor.stop();

        match result {
            Ok(value) => Ok((value, sample.duration_ms)),
            Err(source) => Err(PluginError::Execution {
                plugin: name.to_string(),
                operation: operation.to_string(),
                source,
            }),
        }
    }

    /// Validates `settings` against the manifest configuration schema and
    /// applies them through the plugin's `configure`.
    pub async fn configure_plugin(&self, name: &str, settings: Value) -> PluginResult<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;

        match self.configure_locked(name, settings).await {
            Ok(()) => {
                self.events
                    .publish(events::PLUGIN_CONFIGURED, json!({ "plugin": name }));
                Ok(())
            }
            Err(error) => {
                self.events.publish(
                    events::PLUGIN_CONFIGURATION_FAILED,
                    json!({ "plugin": name, "error": error.to_string() }),
                );
                Err(error)
            }
        }
    }

    async fn configure_locked(&self, name: &str, settings: Value) -> PluginResult<()> {
        let manifest = self
            .registry
            .manifest(name)
            .ok_or_else(|| LifecycleError::NotRegistered {
                plugin: name.to_string(),
            })?;
        manifest
            .validate_settings(&settings)
            .map_err(|reason| PluginError::Configuration {
                plugin: name.to_string(),
                reason,
            })?;

        let instance = self.shared_instance(name)?;
        instance
            .lock()
            .await
            .configure(settings)
            .await
            .map_err(|source| PluginError::Execution {
                plugin: name.to_string(),
                operation: "configure".to_string(),
                source,
            })
    }

    /// Takes a plugin out of the active state.
    ///
    /// Resource release and sandbox teardown always run, even when the
    /// plugin's own `deactivate` fails, so quota and sandbox state never
    /// leak.
    pub async fn deactivate_plugin(&self, name: &str) -> PluginResult<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;

        match self.deactivate_locked(name).await {
            Ok(()) => {
                self.events
                    .publish(events::PLUGIN_DEACTIVATED, json!({ "plugin": name }));
                Ok(())
            }
            Err(error) => {
                self.events.publish(
                    events::PLUGIN_DEACTIVATION_FAILED,
                    json!({ "plugin": name, "error": error.to_string() }),
                );
                Err(error)
            }
        }
    }

    async fn deactivate_locked(&self, name: &str) -> PluginResult<()> {
        if self.states.get(name).map(|s| *s) != Some(LifecycleState::Active) {
            return Err(LifecycleError::NotActive {
                plugin: name.to_string(),
            }
            .into());
        }

        let instance = self.shared_instance(name)?;
        let result = { instance.lock().await.deactivate().await };
        if let Err(error) = &result {
            tracing::warn!(plugin = %name, %error, "deactivate failed, reclaiming anyway");
        }

        self.resources.release(name);
        self.security.destroy_sandbox(name);
        self.states
            .insert(name.to_string(), LifecycleState::Deactivated);

        tracing::info!(plugin = %name, "plugin deactivated");
        result.map_err(|source| PluginError::Execution {
            plugin: name.to_string(),
            operation: "deactivate".to_string(),
            source,
        })
    }

    /// Tears down a loaded plugin: deactivates if active (tolerating
    /// failure), runs `cleanup` (tolerating failure), drops the instance
    /// and context, and evicts the loader cache. The manifest stays
    /// registered.
    pub async fn unload_plugin(&self, name: &str) -> PluginResult<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;
        self.unload_locked(name).await
    }

    async fn unload_locked(&self, name: &str) -> PluginResult<()> {
        if !self.instances.contains_key(name) {
            return Err(LoadError::NotLoaded {
                plugin: name.to_string(),
            }
            .into());
        }

        if self.states.get(name).map(|s| *s) == Some(LifecycleState::Active) {
            if let Err(error) = self.deactivate_locked(name).await {
                tracing::warn!(plugin = %name, %error, "deactivation during unload failed");
            }
        }

        if let Some((_, instance)) = self.instances.remove(name) {
            if let Err(error) = instance.lock().await.cleanup().await {
                tracing::warn!(plugin = %name, %error, "cleanup failed");
            }
        }
        self.contexts.remove(name);
        self.states.remove(name);
        self.loader.unload(name);

        tracing::info!(plugin = %name, "plugin unloaded");
        self.events
            .publish(events::PLUGIN_UNLOADED, json!({ "plugin": name }));
        Ok(())
    }

    /// Replaces a plugin's running code with a freshly loaded version,
    /// carrying logical state across via the optional `save_state` /
    /// `restore_state` hooks.
    pub async fn hot_reload_plugin(&self, name: &str) -> PluginResult<()> {
        let lock = self.op_lock(name);
        let _guard = lock.lock().await;

        match self.hot_reload_locked(name).await {
            Ok(()) => {
                self.events
                    .publish(events::PLUGIN_HOT_RELOADED, json!({ "plugin": name }));
                Ok(())
            }
            Err(error) => {
                self.events.publish(
                    events::PLUGIN_HOT_RELOAD_FAILED,
                    json!({ "plugin": name, "error": error.to_string() }),
                );
                Err(error)
            }
        }
    }

    async fn hot_reload_locked(&self, name: &str) -> PluginResult<()> {
        if !self.config.enable_hot_reload {
            return Err(LifecycleError::HotReloadDisabled.into());
        }
        if !self.instances.contains_key(name) {
            return Err(LoadError::NotLoaded {
                plugin: name.to_string(),
            }
            .into());
        }

        let saved = {
            let instance = self.shared_instance(name)?;
            let mut plugin = instance.lock().await;
            match plugin.save_state().await {
                Ok(state) => state,
                Err(error) => {
                    tracing::warn!(plugin = %name, %error, "save_state failed, reloading without state");
                    None
                }
            }
        };

        self.unload_locked(name).await?;
        self.activate_locked(name).await?;

        if let Some(state) = saved {
            let instance = self.shared_instance(name)?;
            instance
                .lock()
                .await
                .restore_state(state)
                .await
                .map_err(|source| PluginError::Execution {
                    plugin: name.to_string(),
                    operation: "restore_state".to_string(),
                    source,
                })?;
        }

        tracing::info!(plugin = %name, "plugin hot-reloaded");
        Ok(())
    }

    /// Scans the configured discovery paths and registers every manifest
    /// that validates. Invalid entries are skipped with a warning.
    ///
    /// Returns the names that were newly registered.
    pub async fn discover_plugins(&self) -> Vec<String> {
        let manifests = self.loader.discover(&self.config.discovery_paths);
        let mut registered = Vec::new();
        for manifest in manifests {
            let name = manifest.name.clone();
            match self.register_plugin(manifest).await {
                Ok(()) => registered.push(name),
                Err(error) => {
                    tracing::warn!(plugin = %name, %error, "discovered plugin rejected");
                }
            }
        }

        self.events.publish(
            events::PLUGINS_DISCOVERED,
            json!({ "count": registered.len(), "plugins": registered }),
        );
        registered
    }

    /// Unloads every live plugin best-effort and clears all subsystems.
    pub async fn destroy(&self) {
        let names: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Err(error) = self.unload_plugin(&name).await {
                tracing::warn!(plugin = %name, %error, "unload during shutdown failed");
            }
        }
        self.resources.destroy();
        self.security.destroy();
        self.events.publish(events::HOST_DESTROYED, json!({}));
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    pub fn plugin_status(&self, name: &str) -> PluginStatus {
        match self.states.get(name).map(|s| *s) {
            Some(LifecycleState::Loaded) => PluginStatus::Loaded,
            Some(LifecycleState::Active) => PluginStatus::Active,
            Some(LifecycleState::Deactivated) => PluginStatus::Deactivated,
            None if self.registry.contains(name) => PluginStatus::Registered,
            None => PluginStatus::Unregistered,
        }
    }

    /// Names of plugins currently in the active state.
    pub fn active_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .states
            .iter()
            .filter(|entry| *entry.value() == LifecycleState::Active)
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Names of plugins with a live instance, whatever their state.
    pub fn loaded_plugins(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn registered_plugins(&self) -> Vec<PluginManifest> {
        self.registry.all_manifests()
    }

    pub async fn plugin_info(&self, name: &str) -> Option<PluginInfo> {
        let manifest = self.registry.manifest(name)?;
        let capabilities = match self.instances.get(name).map(|e| Arc::clone(e.value())) {
            Some(instance) => instance.lock().await.capabilities(),
            None => Vec::new(),
        };
        Some(PluginInfo {
            manifest,
            status: self.plugin_status(name),
            capabilities,
            usage: self.resources.usage(name),
            sandbox: self.security.sandbox(name),
            module_hash: self.loader.module_hash(name),
        })
    }

    pub fn plugins_by_category(&self, category: PluginCategory) -> Vec<PluginManifest> {
        self.registry.plugins_by_category(category)
    }

    pub fn search_plugins(&self, query: &str, limit: Option<usize>) -> Vec<SearchMatch> {
        self.registry.search(query, limit)
    }

    /// Pre-flight load check for a manifest, without committing to a load.
    pub fn validate_plugin(&self, manifest: &PluginManifest) -> ValidationReport {
        self.loader.validate(manifest)
    }

    pub fn system_status(&self) -> SystemStatus {
        let stats = self.registry.statistics();
        SystemStatus {
            core_version: CORE_VERSION.to_string(),
            security_level: self.config.security_level.as_str().to_string(),
            registered_plugins: stats.total_plugins,
            loaded_plugins: self.instances.len(),
            active_plugins: self.active_plugins().len(),
            plugins_by_category: stats.by_category,
            resources: self.resources.generate_report(),
            security: self.security.generate_report(),
            bus: self.events.metrics(),
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn op_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn shared_instance(&self, name: &str) -> PluginResult<SharedInstance> {
        self.instances
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                LoadError::NotLoaded {
                    plugin: name.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::minimal_manifest;
    use async_trait::async_trait;

    struct Counting {
        manifest: PluginManifest,
        fail_activate: bool,
    }

    #[async_trait]
    impl Plugin for Counting {
        fn manifest(&self) -> &PluginManifest {
            &self.manifest
        }

        async fn initialize(&mut self, _context: PluginContext) -> anyhow::Result<()> {
            Ok(())
        }

        async fn activate(&mut self) -> anyhow::Result<()> {
            if self.fail_activate {
                anyhow::bail!("refusing to activate");
            }
            Ok(())
        }

        async fn deactivate(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn cleanup(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn execute(&mut self, operation: &str, params: Value) -> anyhow::Result<Value> {
            Ok(json!({ "operation": operation, "params": params }))
        }

        async fn configure(&mut self, _settings: Value) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn manager_with(name: &str, fail_activate: bool) -> PluginManager {
        let manager = PluginManager::new(HostConfig::default()).unwrap();
        let manifest = minimal_manifest(name);
        manager.register_factory(name, move || {
            Box::new(Counting {
                manifest: manifest.clone(),
                fail_activate,
            })
        });
        manager
    }

    #[tokio::test]
    async fn lifecycle_states_progress_and_regress() {
        let manager = manager_with("walker", false);
        assert_eq!(manager.plugin_status("walker"), PluginStatus::Unregistered);

        manager
            .register_plugin(minimal_manifest("walker"))
            .await
            .unwrap();
        assert_eq!(manager.plugin_status("walker"), PluginStatus::Registered);

        manager.load_plugin("walker").await.unwrap();
        assert_eq!(manager.plugin_status("walker"), PluginStatus::Loaded);

        manager.activate_plugin("walker").await.unwrap();
        assert_eq!(manager.plugin_status("walker"), PluginStatus::Active);
        assert_eq!(manager.active_plugins(), vec!["walker".to_string()]);

        manager.deactivate_plugin("walker").await.unwrap();
        assert_eq!(manager.plugin_status("walker"), PluginStatus::Deactivated);

        manager.unload_plugin("walker").await.unwrap();
        assert_eq!(manager.plugin_status("walker"), PluginStatus::Registered);

        manager.unregister_plugin("walker").await.unwrap();
        assert_eq!(manager.plugin_status("walker"), PluginStatus::Unregistered);
    }

    #[tokio::test]
    async fn failed_registration_leaves_no_trace() {
        let manager = PluginManager::new(HostConfig::default()).unwrap();
        let mut manifest = minimal_manifest("needy");
        manifest.dependencies = vec![crate::manifest::PluginDependency {
            name: "missing".to_string(),
            version: "*".to_string(),
            optional: false,
        }];

        assert!(manager.register_plugin(manifest).await.is_err());
        assert!(manager.registered_plugins().is_empty());
        // The security grants recorded before the registry rejected the
        // manifest were rolled back.
        assert!(!manager.security().has_permission("needy", "core.run"));
    }

    #[tokio::test]
    async fn incompatible_core_versions_are_rejected() {
        let manager = PluginManager::new(HostConfig::default()).unwrap();
        let mut manifest = minimal_manifest("future");
        manifest.compatibility.min_core_version = Some("99.0.0".to_string());

        let err = manager.register_plugin(manifest).await.unwrap_err();
        assert!(matches!(
            err,
            PluginError::Manifest(ManifestError::Incompatible { .. })
        ));
    }

    #[tokio::test]
    async fn failed_activation_rolls_back_resources_and_sandbox() {
        let manager = manager_with("grumpy", true);
        manager
            .register_plugin(minimal_manifest("grumpy"))
            .await
            .unwrap();

        assert!(manager.activate_plugin("grumpy").await.is_err());
        assert_eq!(manager.plugin_status("grumpy"), PluginStatus::Loaded);
        assert!(manager.resources().usage("grumpy").is_none());
        assert!(manager.security().sandbox("grumpy").is_none());
        assert_eq!(manager.resources().active_count(), 0);
    }

    #[tokio::test]
    async fn unregister_requires_unload_first() {
        let manager = manager_with("sticky", false);
        manager
            .register_plugin(minimal_manifest("sticky"))
            .await
            .unwrap();
        manager.load_plugin("sticky").await.unwrap();

        let err = manager.unregister_plugin("sticky").await.unwrap_err();
        assert!(matches!(
            err,
            PluginError::Lifecycle(LifecycleError::StillLoaded { .. })
        ));

        manager.unload_plugin("sticky").await.unwrap();
        manager.unregister_plugin("sticky").await.unwrap();
    }

    #[tokio::test]
    async fn hot_reload_is_gated_by_configuration() {
        let manager = manager_with("static", false);
        manager
            .register_plugin(minimal_manifest("static"))
            .await
            .unwrap();
        manager.activate_plugin("static").await.unwrap();

        let err = manager.hot_reload_plugin("static").await.unwrap_err();
        assert!(matches!(
            err,
            PluginError::Lifecycle(LifecycleError::HotReloadDisabled)
        ));
    }

    #[tokio::test]
    async fn system_status_summarizes_every_subsystem() {
        let manager = manager_with("seen", false);
        manager
            .register_plugin(minimal_manifest("seen"))
            .await
            .unwrap();
        manager.activate_plugin("seen").await.unwrap();

        let status = manager.system_status();
        assert_eq!(status.registered_plugins, 1);
        assert_eq!(status.active_plugins, 1);
        assert_eq!(status.plugins_by_category["utility"], 1);
        assert_eq!(status.resources.global.active_plugins, 1);
        assert_eq!(status.security.active_sandboxes, 1);
        assert!(status.bus.total_events > 0);
    }
}
