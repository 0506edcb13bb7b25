//! # Atrium
//!
//! A host-embedded plugin framework: load third-party plugins implementing
//! a fixed capability contract, drive their lifecycle, grant them scoped
//! access to host services through a mediated context, and track their
//! resource usage and permissions.
//!
//! This crate is the facade over the workspace members:
//!
//! - [`atrium_core`]: host configuration, shared types, and the event bus
//! - [`atrium_plugin_api`]: manifests, the plugin contract, registry,
//!   loader, WASM runtime, resource and security managers, and the
//!   top-level [`PluginManager`]
//!
//! ## Example
//!
//! ```no_run
//! use atrium::{HostConfig, PluginManager};
//! use serde_json::json;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let manager = PluginManager::new(HostConfig::default())?;
//!
//! for manifest in manager.discover_plugins().await {
//!     println!("discovered {manifest}");
//! }
//!
//! manager.activate_plugin("csv-processor").await?;
//! let dataset = manager
//!     .execute_plugin("csv-processor", "parse", json!({ "data": "a,b\n1,2" }))
//!     .await?;
//! println!("{dataset}");
//! # Ok(())
//! # }
//! ```

pub use atrium_core::{
    BusMetrics, EventBus, EventRecord, HostConfig, SecurityLevel, SubscriptionId, Version,
    CORE_VERSION,
};

pub use atrium_plugin_api::{
    events, AccessLevel, CapabilityKind, Compatibility, ConfigFieldSchema, ConfigFieldType,
    DependencyError, LifecycleError, LoadError, ManifestError, Plugin, PluginCapability,
    PluginCategory, PluginContext, PluginDependency, PluginError, PluginInfo, PluginManager,
    PluginManifest, PluginPermission, PluginResult, PluginStatus, ResourceError, ResourceQuota,
    SecurityError, SystemStatus, ValidationReport,
};
