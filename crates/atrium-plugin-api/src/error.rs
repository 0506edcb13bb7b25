//! Error taxonomy for the plugin framework.
//!
//! Every lifecycle API rejects with one of these typed errors so callers can
//! distinguish validation failures, policy rejections, dependency problems,
//! load failures, permission denials, resource admission failures, wrong-state
//! calls, and plugin execution failures without string matching.

use thiserror::Error;

/// Result alias used across the plugin framework.
pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Top-level error type for all plugin framework operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Structural manifest validation failed
    #[error("Manifest validation error: {0}")]
    Manifest(#[from] ManifestError),

    /// Security policy or permission failure
    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    /// Dependency resolution failure
    #[error("Dependency error: {0}")]
    Dependency(#[from] DependencyError),

    /// Module resolution, import, or instantiation failure
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    /// Resource quota admission failure
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// Lifecycle method invoked in the wrong state
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// The plugin's own code failed; propagated to the caller, never swallowed
    #[error("Plugin '{plugin}' failed during '{operation}': {source}")]
    Execution {
        plugin: String,
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// Settings rejected against the manifest configuration schema
    #[error("Invalid configuration for plugin '{plugin}': {reason}")]
    Configuration { plugin: String, reason: String },

    /// A service call named a host service that is not registered
    #[error("Unknown host service: {0}")]
    UnknownService(String),

    /// A host service handler failed while serving a plugin call
    #[error("Host service '{service}.{method}' failed: {source}")]
    ServiceFailed {
        service: String,
        method: String,
        #[source]
        source: anyhow::Error,
    },

    /// Host core error (configuration, event bus)
    #[error("Host error: {0}")]
    Host(#[from] atrium_core::error::CoreError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WASM runtime error
    #[error("WASM runtime error: {0}")]
    Wasm(#[from] wasmtime::Error),
}

/// Structural manifest validation failures.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The validator collected one or more structural errors
    #[error("Invalid manifest for '{plugin}': {}", errors.join("; "))]
    Invalid { plugin: String, errors: Vec<String> },

    /// The manifest's compatibility range excludes this host
    #[error(
        "Plugin '{plugin}' requires core {required}, host is {core_version}"
    )]
    Incompatible {
        plugin: String,
        required: String,
        core_version: String,
    },
}

/// Security policy and permission failures.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Manifest rejected by the active security policy
    #[error("Policy violation for plugin '{plugin}': {reason}")]
    PolicyViolation { plugin: String, reason: String },

    /// Operation attempted without a matching permission grant
    #[error(
        "Permission denied: plugin '{plugin}' cannot perform '{operation}' \
         (requires {access} on '{resource}')"
    )]
    PermissionDenied {
        plugin: String,
        operation: String,
        resource: String,
        access: String,
    },

    /// No permission grants are on record for the plugin
    #[error("No permissions on record for plugin '{plugin}'")]
    UnknownPlugin { plugin: String },
}

/// Dependency resolution failures. Each variant names the plugin(s) involved.
#[derive(Debug, Error)]
pub enum DependencyError {
    /// A required dependency is not registered
    #[error("Missing dependency: '{plugin}' requires '{dependency}'")]
    Missing { plugin: String, dependency: String },

    /// A required dependency is registered at an incompatible version
    #[error(
        "Version mismatch: '{plugin}' requires '{dependency}' {required}, found {found}"
    )]
    VersionMismatch {
        plugin: String,
        dependency: String,
        required: String,
        found: String,
    },

    /// The dependency graph contains a cycle
    #[error("Circular dependency: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// Unregistering is blocked by plugins that still require this one
    #[error("Cannot unregister '{plugin}': required by {}", dependents.join(", "))]
    RequiredBy {
        plugin: String,
        dependents: Vec<String>,
    },
}

/// Module resolution and instantiation failures.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The entry point names a factory that is not registered
    #[error("Entry point '{entry_point}' for plugin '{plugin}' is not registered")]
    EntryPointNotFound { plugin: String, entry_point: String },

    /// The entry point is neither a builtin factory nor a WASM module
    #[error("Unsupported entry point '{entry_point}' for plugin '{plugin}'")]
    UnsupportedEntryPoint { plugin: String, entry_point: String },

    /// A required export is absent from the plugin module
    #[error("Plugin '{plugin}' module is missing required export '{symbol}'")]
    MissingExport { plugin: String, symbol: String },

    /// The module bytes are not a valid WASM module
    #[error("Invalid module for plugin '{plugin}': {reason}")]
    InvalidModule { plugin: String, reason: String },

    /// Instantiating the module failed
    #[error("Failed to instantiate plugin '{plugin}': {reason}")]
    Instantiation { plugin: String, reason: String },

    /// The plugin's `initialize` hook failed
    #[error("Plugin '{plugin}' failed to initialize: {reason}")]
    InitializeFailed { plugin: String, reason: String },

    /// The operation requires a loaded instance
    #[error("Plugin '{plugin}' is not loaded")]
    NotLoaded { plugin: String },
}

/// Resource admission failures raised at allocation time.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Allocating would exceed the aggregate memory ceiling
    #[error(
        "Allocating {requested_mb}MB for '{plugin}' would exceed the global \
         memory limit ({in_use_mb}/{limit_mb}MB in use)"
    )]
    GlobalMemoryExceeded {
        plugin: String,
        requested_mb: u64,
        in_use_mb: u64,
        limit_mb: u64,
    },

    /// Allocating would exceed the aggregate CPU ceiling
    #[error(
        "Allocating {requested_percent}% CPU for '{plugin}' would exceed the \
         global CPU limit ({in_use_percent}/{limit_percent}% in use)"
    )]
    GlobalCpuExceeded {
        plugin: String,
        requested_percent: u32,
        in_use_percent: u32,
        limit_percent: u32,
    },

    /// The active plugin ceiling has been reached
    #[error("Cannot activate '{plugin}': {active} of {limit} plugin slots in use")]
    TooManyActivePlugins {
        plugin: String,
        active: usize,
        limit: usize,
    },
}

/// Lifecycle state machine violations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The plugin has no manifest in the registry
    #[error("Plugin not registered: {plugin}")]
    NotRegistered { plugin: String },

    /// The operation requires the plugin to be active
    #[error("Plugin not active: {plugin}")]
    NotActive { plugin: String },

    /// Re-registering the same name with a different version
    #[error(
        "Plugin version conflict: '{plugin}' is registered at {registered}, \
         offered {offered}"
    )]
    VersionConflict {
        plugin: String,
        registered: String,
        offered: String,
    },

    /// Unregistering requires the plugin to be unloaded first
    #[error("Plugin '{plugin}' is still loaded; unload it before unregistering")]
    StillLoaded { plugin: String },

    /// Hot reload was requested but is disabled in the host configuration
    #[error("Hot reload is disabled for this host")]
    HotReloadDisabled,
}
