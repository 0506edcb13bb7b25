//! The capability contract every plugin implements.
//!
//! The lifecycle surface is a statically-checked trait; dynamically loaded
//! WASM modules are adapted onto it by the loader, which probes the module
//! exports against [`REQUIRED_EXPORTS`] before instantiation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use atrium_core::Version;

use crate::context::PluginContext;
use crate::manifest::{PluginDependency, PluginManifest};

/// Exports a WASM plugin module must provide, checked at load time.
///
/// The loader and the pre-flight validator share this set so a module that
/// passes validation is guaranteed to load.
pub const REQUIRED_EXPORTS: [&str; 5] = ["init", "activate", "execute", "deactivate", "cleanup"];

/// Kind of feature a capability advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Processing,
    Visualization,
    Integration,
    Utility,
}

/// A named feature a plugin advertises, distinct from the structural
/// lifecycle interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginCapability {
    pub name: String,
    pub description: String,
    pub kind: CapabilityKind,
    pub version: String,
}

/// The contract consumed from every plugin.
///
/// Metadata getters default to reading the manifest; implementations only
/// need to provide [`Plugin::manifest`], the lifecycle methods, and
/// [`Plugin::execute`]. The hot-reload hooks are optional and default to
/// "no state to carry over".
#[async_trait]
pub trait Plugin: Send {
    /// The manifest this instance was built from.
    fn manifest(&self) -> &PluginManifest;

    fn name(&self) -> &str {
        &self.manifest().name
    }

    fn version(&self) -> &str {
        &self.manifest().version
    }

    fn description(&self) -> &str {
        &self.manifest().description
    }

    fn author(&self) -> &str {
        &self.manifest().author
    }

    fn dependencies(&self) -> Vec<PluginDependency> {
        self.manifest().dependencies.clone()
    }

    /// Advertised features. Empty is legal but flagged by validation.
    fn capabilities(&self) -> Vec<PluginCapability> {
        Vec::new()
    }

    /// Whether this plugin accepts the given host core version.
    ///
    /// The default honors the manifest compatibility range.
    fn is_compatible(&self, core_version: &Version) -> bool {
        let compat = &self.manifest().compatibility;
        if let Some(min) = compat
            .min_core_version
            .as_deref()
            .and_then(|v| Version::parse(v).ok())
        {
            if *core_version < min {
                return false;
            }
        }
        if let Some(max) = compat
            .max_core_version
            .as_deref()
            .and_then(|v| Version::parse(v).ok())
        {
            if *core_version > max {
                return false;
            }
        }
        true
    }

    /// Called once after instantiation, before any other lifecycle method.
    async fn initialize(&mut self, context: PluginContext) -> anyhow::Result<()>;

    /// Called when the plugin transitions to the active state.
    async fn activate(&mut self) -> anyhow::Result<()>;

    /// Called when the plugin leaves the active state.
    async fn deactivate(&mut self) -> anyhow::Result<()>;

    /// Final teardown before the instance is dropped.
    async fn cleanup(&mut self) -> anyhow::Result<()>;

    /// Performs one named operation. Only callable while active.
    async fn execute(&mut self, operation: &str, params: Value) -> anyhow::Result<Value>;

    /// Applies settings previously validated against the manifest schema.
    async fn configure(&mut self, settings: Value) -> anyhow::Result<()>;

    /// Captures state to survive a hot reload. `None` skips restoration.
    async fn save_state(&mut self) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }

    /// Restores state captured by [`Plugin::save_state`] on the previous
    /// instance.
    async fn restore_state(&mut self, _state: Value) -> anyhow::Result<()> {
        Ok(())
    }
}
