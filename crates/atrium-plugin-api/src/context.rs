//! Per-plugin capability-scoped context.
//!
//! A [`PluginContext`] is built by the manager at load time and handed to the
//! plugin exactly once, in `initialize`. Everything a plugin may touch on the
//! host goes through it: service calls are permission-checked and audited,
//! log lines carry the plugin name, and the resource quota is a read-only
//! snapshot of the plugin's own limits.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

use atrium_core::{EventBus, Version};

use crate::error::{PluginError, PluginResult};
use crate::resources::ResourceQuota;
use crate::security::SecurityManager;

/// Host-side handler for one service, keyed by service name.
///
/// The handler receives the method name and the call arguments.
pub type ServiceHandler = Arc<dyn Fn(&str, Value) -> anyhow::Result<Value> + Send + Sync>;

/// Table of host services shared by every plugin context.
pub type ServiceTable = DashMap<String, ServiceHandler>;

/// Capability-scoped handle injected into a plugin at `initialize` time.
#[derive(Clone)]
pub struct PluginContext {
    pub plugin_name: String,
    pub core_version: Version,
    pub services: ServiceProxy,
    pub events: Arc<EventBus>,
    pub logger: PluginLogger,
    /// Initial configuration, seeded from the manifest schema defaults.
    pub config: Value,
    /// Snapshot of the quota this plugin runs under.
    pub resources: ResourceQuota,
}

/// Permission-checked dispatcher for host service calls.
///
/// Every call is checked against the plugin's granted permissions before it
/// reaches a handler; denials surface as typed
/// [`SecurityError::PermissionDenied`](crate::error::SecurityError) values
/// and land in the audit log.
#[derive(Clone)]
pub struct ServiceProxy {
    plugin: String,
    security: Arc<SecurityManager>,
    services: Arc<ServiceTable>,
}

impl ServiceProxy {
    pub fn new(plugin: &str, security: Arc<SecurityManager>, services: Arc<ServiceTable>) -> Self {
        Self {
            plugin: plugin.to_string(),
            security,
            services,
        }
    }

    /// Calls `method` on the host service `service`.
    pub fn call(&self, service: &str, method: &str, args: Value) -> PluginResult<Value> {
        let operation = format!("{service}.{method}");
        self.security
            .check_permission(&self.plugin, &operation, &args)?;

        let handler = self
            .services
            .get(service)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PluginError::UnknownService(service.to_string()))?;

        handler(method, args).map_err(|source| PluginError::ServiceFailed {
            service: service.to_string(),
            method: method.to_string(),
            source,
        })
    }

    /// Non-raising probe: would a call to `service.method` be permitted?
    pub fn has_permission(&self, service: &str, method: &str) -> bool {
        self.security
            .has_permission(&self.plugin, &format!("{service}.{method}"))
    }
}

/// Name-prefixed logger handed to plugins.
///
/// Emits `tracing` events carrying a `plugin` field so host log filtering
/// and formatting apply uniformly to plugin output.
#[derive(Clone)]
pub struct PluginLogger {
    plugin: String,
}

impl PluginLogger {
    pub fn new(plugin: &str) -> Self {
        Self {
            plugin: plugin.to_string(),
        }
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(plugin = %self.plugin, "{message}");
    }

    pub fn info(&self, message: &str) {
        tracing::info!(plugin = %self.plugin, "{message}");
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(plugin = %self.plugin, "{message}");
    }

    pub fn error(&self, message: &str) {
        tracing::error!(plugin = %self.plugin, "{message}");
    }
}
