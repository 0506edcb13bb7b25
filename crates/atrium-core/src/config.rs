//! Host bootstrap configuration.
//!
//! This module provides the configuration recognized by an application
//! embedding the plugin host:
//! - Loading from YAML files
//! - Environment variable overrides (`ATRIUM__` prefix)
//! - Validation of all settings

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Security posture applied to plugin manifests and permission grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Only core data/storage/ui resources may be granted.
    Strict,
    /// Network access may be granted; filesystem access may not.
    Moderate,
    /// Any known resource may be granted.
    Permissive,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Moderate => "moderate",
            Self::Permissive => "permissive",
        }
    }
}

/// Aggregate resource ceilings across all active plugins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimitsConfig {
    /// Total memory budget shared by every active plugin (MB).
    #[serde(default = "default_global_memory_mb")]
    pub global_memory_mb: u64,

    /// Total CPU budget shared by every active plugin (percent).
    #[serde(default = "default_global_cpu_percent")]
    pub global_cpu_percent: u32,
}

impl Default for ResourceLimitsConfig {
    fn default() -> Self {
        Self {
            global_memory_mb: default_global_memory_mb(),
            global_cpu_percent: default_global_cpu_percent(),
        }
    }
}

fn default_global_memory_mb() -> u64 {
    1024
}

fn default_global_cpu_percent() -> u32 {
    80
}

fn default_max_plugins() -> usize {
    20
}

fn default_security_level() -> SecurityLevel {
    SecurityLevel::Moderate
}

fn default_discovery_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("plugins")]
}

fn default_audit_logging() -> bool {
    true
}

/// Main host configuration.
///
/// # Examples
///
/// ```no_run
/// use atrium_core::config::HostConfig;
///
/// let config = HostConfig::from_file("atrium.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Maximum number of concurrently active plugins.
    #[serde(default = "default_max_plugins")]
    pub max_plugins: usize,

    /// Security posture for manifest policy validation.
    #[serde(default = "default_security_level")]
    pub security_level: SecurityLevel,

    /// Aggregate resource ceilings.
    #[serde(default)]
    pub resource_limits: ResourceLimitsConfig,

    /// Directories scanned by plugin discovery.
    #[serde(default = "default_discovery_paths")]
    pub discovery_paths: Vec<PathBuf>,

    /// Whether `hot_reload_plugin` is permitted.
    #[serde(default)]
    pub enable_hot_reload: bool,

    /// Whether security audit events are recorded.
    #[serde(default = "default_audit_logging")]
    pub audit_logging: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_plugins: default_max_plugins(),
            security_level: default_security_level(),
            resource_limits: ResourceLimitsConfig::default(),
            discovery_paths: default_discovery_paths(),
            enable_hot_reload: false,
            audit_logging: default_audit_logging(),
        }
    }
}

impl HostConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::InvalidFormat {
            reason: e.to_string(),
        })?;
        Ok(config)
    }

    /// Loads configuration using the `config` crate, which supports
    /// multiple sources and environment variable overrides (`ATRIUM__*`).
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("ATRIUM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| ConfigError::InvalidFormat {
                reason: e.to_string(),
            })?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Checks that every limit is non-zero and that the CPU budget is a
    /// sensible percentage.
    pub fn validate(&self) -> Result<()> {
        if self.max_plugins == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_plugins".into(),
                reason: "must be at least 1".into(),
            }
            .into());
        }

        if self.resource_limits.global_memory_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "resource_limits.global_memory_mb".into(),
                reason: "must be at least 1".into(),
            }
            .into());
        }

        if self.resource_limits.global_cpu_percent == 0
            || self.resource_limits.global_cpu_percent > 100
        {
            return Err(ConfigError::InvalidValue {
                field: "resource_limits.global_cpu_percent".into(),
                reason: "must be between 1 and 100".into(),
            }
            .into());
        }

        Ok(())
    }
}
