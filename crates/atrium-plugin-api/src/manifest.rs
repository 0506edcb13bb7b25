//! Plugin manifest schema and structural validation.
//!
//! A manifest is the declarative identity and contract of a plugin. It is
//! validated and stored in the registry on registration and never mutated in
//! place; updating a plugin means unregistering and registering again.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

static SEMVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+\.\d+\.\d+(-[\w.\-]+)?(\+[\w.\-]+)?$").expect("semver pattern")
});

/// Closed set of plugin categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginCategory {
    DataProcessing,
    Visualization,
    Integration,
    Utility,
}

impl PluginCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataProcessing => "data-processing",
            Self::Visualization => "visualization",
            Self::Integration => "integration",
            Self::Utility => "utility",
        }
    }
}

/// Closed set of permission access levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
    Execute,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
        }
    }

    /// Whether a grant at this level satisfies `required`.
    ///
    /// `execute` implies read and write; `write` implies read.
    pub fn allows(&self, required: AccessLevel) -> bool {
        match self {
            Self::Execute => true,
            Self::Write => matches!(required, Self::Read | Self::Write),
            Self::Read => matches!(required, Self::Read),
        }
    }
}

/// A dependency on another plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDependency {
    pub name: String,
    /// Required version: a semver string, or `"*"` for any.
    pub version: String,
    #[serde(default)]
    pub optional: bool,
}

/// A permission request for one host resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginPermission {
    pub resource: String,
    pub access: AccessLevel,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Value type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ConfigFieldType {
    /// Whether `value` has this JSON type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// Schema for one typed, optionally-required configuration setting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFieldSchema {
    #[serde(rename = "type")]
    pub field_type: ConfigFieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Host compatibility range declared by a plugin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Compatibility {
    #[serde(default)]
    pub min_core_version: Option<String>,
    #[serde(default)]
    pub max_core_version: Option<String>,
    #[serde(default)]
    pub browsers: Vec<String>,
}

/// Declarative identity and contract of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default = "default_license")]
    pub license: String,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub category: PluginCategory,
    /// Module locator: `builtin:<factory>` or a `.wasm` path.
    pub entry_point: String,
    #[serde(default)]
    pub dependencies: Vec<PluginDependency>,
    #[serde(default)]
    pub permissions: Vec<PluginPermission>,
    /// Schema of typed, optionally-required settings with defaults.
    #[serde(default)]
    pub configuration: HashMap<String, ConfigFieldSchema>,
    #[serde(default)]
    pub compatibility: Compatibility,
}

fn default_license() -> String {
    "MIT".to_string()
}

/// Outcome of a structural or load-time validation pass.
///
/// Warnings never block registration; errors do.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

impl PluginManifest {
    /// Pure structural and semantic validation.
    ///
    /// Checks required fields, semver formats, dependency and permission
    /// shape. Best-practice omissions (short description, no keywords, no
    /// minimum core version, no browser list) are reported as warnings.
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Plugin name is required".to_string());
        }

        if !SEMVER_RE.is_match(&self.version) {
            errors.push(format!(
                "Invalid plugin version '{}' (semver required)",
                self.version
            ));
        }

        if self.entry_point.trim().is_empty() {
            errors.push("Entry point is required".to_string());
        }

        for dep in &self.dependencies {
            if dep.name.trim().is_empty() {
                errors.push("Dependency must have a name".to_string());
                continue;
            }
            if dep.version != "*" && !SEMVER_RE.is_match(&dep.version) {
                errors.push(format!(
                    "Invalid version '{}' for dependency '{}'",
                    dep.version, dep.name
                ));
            }
        }

        for perm in &self.permissions {
            if perm.resource.trim().is_empty() {
                errors.push("Permission must name a resource".to_string());
            }
        }

        if self.compatibility.min_core_version.is_none() {
            warnings.push("Minimum core version not specified".to_string());
        }
        if self.compatibility.browsers.is_empty() {
            warnings.push("Supported browsers not specified".to_string());
        }
        if self.description.len() < 10 {
            warnings.push("Plugin description should be at least 10 characters".to_string());
        }
        if self.keywords.is_empty() {
            warnings.push("Adding keywords improves plugin discoverability".to_string());
        }

        ValidationReport::from_parts(errors, warnings)
    }

    /// Non-optional dependency names.
    pub fn required_dependencies(&self) -> impl Iterator<Item = &PluginDependency> {
        self.dependencies.iter().filter(|d| !d.optional)
    }

    /// Initial plugin configuration: every schema field's declared default.
    pub fn default_config(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .configuration
            .iter()
            .filter_map(|(key, schema)| schema.default.clone().map(|v| (key.clone(), v)))
            .collect();
        Value::Object(map)
    }

    /// Validates `settings` against the configuration schema.
    ///
    /// Rejects unknown keys and type mismatches; after merging over the
    /// schema defaults, every `required` field must be present.
    pub fn validate_settings(&self, settings: &Value) -> Result<(), String> {
        let Some(object) = settings.as_object() else {
            return Err("settings must be a JSON object".to_string());
        };

        for (key, value) in object {
            let Some(schema) = self.configuration.get(key) else {
                return Err(format!("unknown setting '{key}'"));
            };
            if !schema.field_type.matches(value) {
                return Err(format!(
                    "setting '{key}' must be of type {:?}",
                    schema.field_type
                ));
            }
        }

        for (key, schema) in &self.configuration {
            if schema.required && schema.default.is_none() && !object.contains_key(key) {
                return Err(format!("required setting '{key}' is missing"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn minimal_manifest(name: &str) -> PluginManifest {
        PluginManifest {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: "A plugin used in unit tests".to_string(),
            author: "tests".to_string(),
            license: default_license(),
            homepage: None,
            repository: None,
            keywords: vec!["test".to_string()],
            category: PluginCategory::Utility,
            entry_point: format!("builtin:{name}"),
            dependencies: Vec::new(),
            permissions: Vec::new(),
            configuration: HashMap::new(),
            compatibility: Compatibility {
                min_core_version: Some("0.1.0".to_string()),
                max_core_version: None,
                browsers: vec!["chrome".to_string()],
            },
        }
    }

    #[test]
    fn valid_manifest_passes_without_errors() {
        let report = minimal_manifest("alpha").validate();
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn missing_fields_produce_errors() {
        let mut manifest = minimal_manifest("alpha");
        manifest.name = " ".to_string();
        manifest.version = "one.two".to_string();
        manifest.entry_point = String::new();

        let report = manifest.validate();
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 3);
    }

    #[test]
    fn omissions_warn_but_do_not_block() {
        let mut manifest = minimal_manifest("alpha");
        manifest.description = "short".to_string();
        manifest.keywords.clear();
        manifest.compatibility = Compatibility::default();

        let report = manifest.validate();
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 4);
    }

    #[test]
    fn dependency_versions_must_be_semver_or_wildcard() {
        let mut manifest = minimal_manifest("alpha");
        manifest.dependencies = vec![
            PluginDependency {
                name: "beta".into(),
                version: "*".into(),
                optional: false,
            },
            PluginDependency {
                name: "gamma".into(),
                version: "latest".into(),
                optional: false,
            },
        ];

        let report = manifest.validate();
        assert!(!report.is_valid);
        assert!(report.errors[0].contains("gamma"));
    }

    #[test]
    fn access_levels_imply_lower_levels() {
        assert!(AccessLevel::Execute.allows(AccessLevel::Read));
        assert!(AccessLevel::Execute.allows(AccessLevel::Write));
        assert!(AccessLevel::Write.allows(AccessLevel::Read));
        assert!(!AccessLevel::Write.allows(AccessLevel::Execute));
        assert!(!AccessLevel::Read.allows(AccessLevel::Write));
    }

    #[test]
    fn settings_validate_against_schema() {
        let mut manifest = minimal_manifest("alpha");
        manifest.configuration.insert(
            "delimiter".to_string(),
            ConfigFieldSchema {
                field_type: ConfigFieldType::String,
                required: true,
                default: Some(json!(",")),
                description: None,
            },
        );
        manifest.configuration.insert(
            "threshold".to_string(),
            ConfigFieldSchema {
                field_type: ConfigFieldType::Number,
                required: false,
                default: None,
                description: None,
            },
        );

        assert!(manifest.validate_settings(&json!({"threshold": 3})).is_ok());
        assert!(manifest
            .validate_settings(&json!({"threshold": "three"}))
            .is_err());
        assert!(manifest.validate_settings(&json!({"unknown": 1})).is_err());
        assert!(manifest.validate_settings(&json!([])).is_err());

        assert_eq!(manifest.default_config(), json!({"delimiter": ","}));
    }

    #[test]
    fn manifest_serde_round_trip() {
        let manifest = minimal_manifest("alpha");
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(json.contains("\"category\":\"utility\""));
        let back: PluginManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "alpha");
        assert_eq!(back.category, PluginCategory::Utility);
    }
}
