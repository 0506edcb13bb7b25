//! Security policy, per-plugin sandboxes, permission checks, and auditing.
//!
//! Policy validation happens once at registration time and records the
//! manifest's permission grants. While a plugin is active it runs inside a
//! sandbox record that scopes permission checks and suspicious-activity
//! detection. Every check, grant, and denial lands in a bounded append-only
//! audit log with sensitive parameter values redacted.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use uuid::Uuid;

use atrium_core::SecurityLevel;

use crate::error::{PluginResult, SecurityError};
use crate::manifest::{AccessLevel, PluginManifest, PluginPermission};

/// Resources the host knows how to grant access to.
pub const KNOWN_RESOURCES: [&str; 6] = ["core", "data", "storage", "network", "filesystem", "ui"];

/// Entry-point extensions that are never acceptable in a manifest.
const SUSPICIOUS_EXTENSIONS: [&str; 5] = [".exe", ".bat", ".cmd", ".sh", ".ps1"];

/// Terms in plugin metadata that warrant an audit trail entry.
const SUSPICIOUS_KEYWORDS: [&str; 5] = ["eval", "exec", "inject", "keylog", "backdoor"];

const AUDIT_CAPACITY: usize = 10_000;

/// How many denials inside [`DENIAL_WINDOW_SECS`] flags a plugin.
const DENIAL_THRESHOLD: usize = 10;
const DENIAL_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    Validation,
    Sandbox,
    Permission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditKind {
    Check,
    Grant,
    Denial,
    Violation,
    Suspicious,
}

/// Immutable append-only audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub category: AuditCategory,
    pub kind: AuditKind,
    pub actor: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// Filter for [`SecurityManager::audit_log`].
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub category: Option<AuditCategory>,
    pub kind: Option<AuditKind>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Snapshot of one plugin's sandbox.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxInfo {
    pub plugin: String,
    pub created_at: DateTime<Utc>,
    pub permission_checks: u64,
    pub denials: u64,
}

struct Sandbox {
    created_at: DateTime<Utc>,
    permission_checks: u64,
    denials: u64,
}

/// A plugin flagged by the suspicious-activity heuristics.
#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousActivity {
    pub plugin: String,
    pub reason: String,
}

/// Summary produced by [`SecurityManager::generate_report`].
#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub generated_at: DateTime<Utc>,
    pub security_level: String,
    pub active_sandboxes: usize,
    pub total_audit_events: usize,
    /// Most recent denials and violations, newest last.
    pub recent_violations: Vec<AuditEvent>,
    pub suspicious_activity: Vec<SuspiciousActivity>,
    pub recommendations: Vec<String>,
}

/// Validates manifests against policy, brackets active plugins with
/// sandboxes, and answers permission checks.
pub struct SecurityManager {
    level: SecurityLevel,
    audit_enabled: bool,
    grants: DashMap<String, Vec<PluginPermission>>,
    sandboxes: DashMap<String, Sandbox>,
    audit: Mutex<VecDeque<AuditEvent>>,
}

impl SecurityManager {
    pub fn new(level: SecurityLevel, audit_enabled: bool) -> Self {
        Self {
            level,
            audit_enabled,
            grants: DashMap::new(),
            sandboxes: DashMap::new(),
            audit: Mutex::new(VecDeque::new()),
        }
    }

    /// Resources grantable at the active security level.
    fn resource_allowed(&self, resource: &str) -> bool {
        match self.level {
            SecurityLevel::Strict => matches!(resource, "core" | "data" | "storage" | "ui"),
            SecurityLevel::Moderate => {
                matches!(resource, "core" | "data" | "storage" | "ui" | "network")
            }
            SecurityLevel::Permissive => KNOWN_RESOURCES.contains(&resource),
        }
    }

    /// Policy-level manifest validation, distinct from structural checks.
    ///
    /// On success the manifest's permission requests are recorded as this
    /// plugin's grants.
    pub fn validate_plugin(&self, manifest: &PluginManifest) -> PluginResult<()> {
        let plugin = manifest.name.as_str();

        for ext in SUSPICIOUS_EXTENSIONS {
            if manifest.entry_point.to_lowercase().ends_with(ext) {
                self.record(
                    AuditCategory::Validation,
                    AuditKind::Violation,
                    plugin,
                    json!({ "entry_point": manifest.entry_point, "extension": ext }),
                );
                return Err(SecurityError::PolicyViolation {
                    plugin: plugin.to_string(),
                    reason: format!("entry point extension '{ext}' is not allowed"),
                }
                .into());
            }
        }

        for permission in &manifest.permissions {
            let resource = permission.resource.as_str();
            if !KNOWN_RESOURCES.contains(&resource) {
                self.record(
                    AuditCategory::Validation,
                    AuditKind::Denial,
                    plugin,
                    json!({ "resource": resource, "reason": "unknown resource" }),
                );
                return Err(SecurityError::PolicyViolation {
                    plugin: plugin.to_string(),
                    reason: format!("unknown resource '{resource}' in permission request"),
                }
                .into());
            }
            if !self.resource_allowed(resource) {
                self.record(
                    AuditCategory::Validation,
                    AuditKind::Denial,
                    plugin,
                    json!({ "resource": resource, "level": self.level.as_str() }),
                );
                return Err(SecurityError::PolicyViolation {
                    plugin: plugin.to_string(),
                    reason: format!(
                        "resource '{resource}' may not be granted at the {} security level",
                        self.level.as_str()
                    ),
                }
                .into());
            }
        }

        // Suspicious wording is audited but does not block registration.
        let haystack = format!(
            "{} {} {}",
            manifest.name.to_lowercase(),
            manifest.description.to_lowercase(),
            manifest.keywords.join(" ").to_lowercase()
        );
        for keyword in SUSPICIOUS_KEYWORDS {
            if haystack.contains(keyword) {
                tracing::warn!(plugin, keyword, "suspicious term in plugin metadata");
                self.record(
                    AuditCategory::Validation,
                    AuditKind::Suspicious,
                    plugin,
                    json!({ "keyword": keyword }),
                );
            }
        }

        self.grants
            .insert(plugin.to_string(), manifest.permissions.clone());
        for permission in &manifest.permissions {
            self.record(
                AuditCategory::Validation,
                AuditKind::Grant,
                plugin,
                json!({
                    "resource": permission.resource,
                    "access": permission.access.as_str(),
                    "scope": permission.scope,
                }),
            );
        }

        Ok(())
    }

    /// Drops the grants recorded for `name`.
    pub fn revoke(&self, name: &str) {
        self.grants.remove(name);
    }

    /// Opens the sandbox bracketing `name`'s active lifetime.
    pub fn create_sandbox(&self, name: &str) {
        if self.sandboxes.contains_key(name) {
            tracing::debug!(plugin = %name, "sandbox already exists");
            return;
        }
        self.sandboxes.insert(
            name.to_string(),
            Sandbox {
                created_at: Utc::now(),
                permission_checks: 0,
                denials: 0,
            },
        );
        self.record(AuditCategory::Sandbox, AuditKind::Grant, name, json!({ "action": "create" }));
        tracing::debug!(plugin = %name, "sandbox created");
    }

    /// Closes `name`'s sandbox. Idempotent.
    pub fn destroy_sandbox(&self, name: &str) {
        if self.sandboxes.remove(name).is_some() {
            self.record(
                AuditCategory::Sandbox,
                AuditKind::Grant,
                name,
                json!({ "action": "destroy" }),
            );
            tracing::debug!(plugin = %name, "sandbox destroyed");
        }
    }

    pub fn sandbox(&self, name: &str) -> Option<SandboxInfo> {
        self.sandboxes.get(name).map(|s| SandboxInfo {
            plugin: name.to_string(),
            created_at: s.created_at,
            permission_checks: s.permission_checks,
            denials: s.denials,
        })
    }

    pub fn active_sandboxes(&self) -> usize {
        self.sandboxes.len()
    }

    /// Checks that `name` may perform `operation`, auditing the outcome.
    ///
    /// Raises [`SecurityError::PermissionDenied`] naming the missing
    /// `{resource, access}` grant when the manifest does not cover it.
    pub fn check_permission(&self, name: &str, operation: &str, params: &Value) -> PluginResult<()> {
        let (resource, access) = required_grant(operation);
        let allowed = self.grant_matches(name, &resource, access);

        if let Some(mut sandbox) = self.sandboxes.get_mut(name) {
            sandbox.permission_checks += 1;
            if !allowed {
                sandbox.denials += 1;
            }
        }

        self.record(
            AuditCategory::Permission,
            AuditKind::Check,
            name,
            json!({
                "operation": operation,
                "resource": resource,
                "access": access.as_str(),
                "allowed": allowed,
                "params": redact(params),
            }),
        );

        if allowed {
            Ok(())
        } else {
            self.record(
                AuditCategory::Permission,
                AuditKind::Denial,
                name,
                json!({
                    "operation": operation,
                    "resource": resource,
                    "access": access.as_str(),
                }),
            );
            Err(SecurityError::PermissionDenied {
                plugin: name.to_string(),
                operation: operation.to_string(),
                resource,
                access: access.as_str().to_string(),
            }
            .into())
        }
    }

    /// Non-raising, non-auditing permission probe.
    pub fn has_permission(&self, name: &str, operation: &str) -> bool {
        let (resource, access) = required_grant(operation);
        self.grant_matches(name, &resource, access)
    }

    fn grant_matches(&self, name: &str, resource: &str, required: AccessLevel) -> bool {
        self.grants
            .get(name)
            .map(|grants| {
                grants
                    .iter()
                    .any(|g| g.resource == resource && g.access.allows(required))
            })
            .unwrap_or(false)
    }

    /// Query over the audit log, oldest first.
    pub fn audit_log(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        let audit = self.audit.lock();
        let mut events: Vec<AuditEvent> = audit
            .iter()
            .filter(|e| query.category.map_or(true, |c| e.category == c))
            .filter(|e| query.kind.map_or(true, |k| e.kind == k))
            .filter(|e| query.since.map_or(true, |s| e.timestamp >= s))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            let excess = events.len().saturating_sub(limit);
            events.drain(..excess);
        }
        events
    }

    pub fn generate_report(&self) -> SecurityReport {
        let audit = self.audit.lock();

        let mut recent_violations: Vec<AuditEvent> = audit
            .iter()
            .filter(|e| matches!(e.kind, AuditKind::Denial | AuditKind::Violation))
            .cloned()
            .collect();
        let excess = recent_violations.len().saturating_sub(10);
        recent_violations.drain(..excess);

        let mut suspicious_activity = Vec::new();
        let window_start = Utc::now() - chrono::Duration::seconds(DENIAL_WINDOW_SECS);
        let mut denials_by_actor: std::collections::HashMap<&str, usize> =
            std::collections::HashMap::new();
        for event in audit.iter() {
            if event.kind == AuditKind::Denial && event.timestamp >= window_start {
                *denials_by_actor.entry(event.actor.as_str()).or_insert(0) += 1;
            }
        }
        for (actor, count) in denials_by_actor {
            if count >= DENIAL_THRESHOLD {
                suspicious_activity.push(SuspiciousActivity {
                    plugin: actor.to_string(),
                    reason: format!("{count} permission denials in the last {DENIAL_WINDOW_SECS}s"),
                });
            }
        }
        for event in audit.iter().filter(|e| e.kind == AuditKind::Suspicious) {
            suspicious_activity.push(SuspiciousActivity {
                plugin: event.actor.clone(),
                reason: format!("suspicious metadata: {}", event.details),
            });
        }
        suspicious_activity.sort_by(|a, b| a.plugin.cmp(&b.plugin));
        suspicious_activity.dedup_by(|a, b| a.plugin == b.plugin && a.reason == b.reason);

        let mut recommendations = Vec::new();
        for activity in &suspicious_activity {
            recommendations.push(format!(
                "Review plugin '{}': {}",
                activity.plugin, activity.reason
            ));
        }
        if self.level == SecurityLevel::Permissive {
            recommendations.push(
                "Host is running at the permissive security level; \
                 prefer moderate or strict for untrusted plugins"
                    .to_string(),
            );
        }

        SecurityReport {
            generated_at: Utc::now(),
            security_level: self.level.as_str().to_string(),
            active_sandboxes: self.sandboxes.len(),
            total_audit_events: audit.len(),
            recent_violations,
            suspicious_activity,
            recommendations,
        }
    }

    /// Tears down every sandbox and recorded grant.
    pub fn destroy(&self) {
        self.sandboxes.clear();
        self.grants.clear();
    }

    fn record(&self, category: AuditCategory, kind: AuditKind, actor: &str, details: Value) {
        if !self.audit_enabled {
            return;
        }
        let mut audit = self.audit.lock();
        audit.push_back(AuditEvent {
            id: Uuid::new_v4(),
            category,
            kind,
            actor: actor.to_string(),
            details,
            timestamp: Utc::now(),
        });
        while audit.len() > AUDIT_CAPACITY {
            audit.pop_front();
        }
    }
}

/// Maps an operation name onto the `{resource, access}` grant it requires.
///
/// Dotted operations (`service.method`) name their resource directly and
/// derive the access level from the method prefix; anything else requires
/// `execute` on `core`.
fn required_grant(operation: &str) -> (String, AccessLevel) {
    let Some((resource, method)) = operation.split_once('.') else {
        return ("core".to_string(), AccessLevel::Execute);
    };

    const READ_PREFIXES: [&str; 7] = ["get", "read", "list", "query", "has", "fetch", "stat"];
    const WRITE_PREFIXES: [&str; 9] = [
        "set", "put", "write", "save", "delete", "remove", "update", "append", "clear",
    ];

    let access = if READ_PREFIXES.iter().any(|p| method.starts_with(p)) {
        AccessLevel::Read
    } else if WRITE_PREFIXES.iter().any(|p| method.starts_with(p)) {
        AccessLevel::Write
    } else {
        AccessLevel::Execute
    };
    (resource.to_string(), access)
}

/// Replaces values of credential-looking keys before they reach the audit
/// log. Recurses through nested objects and arrays.
fn redact(params: &Value) -> Value {
    const SENSITIVE: [&str; 5] = ["password", "secret", "token", "credential", "apikey"];

    match params {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let lowered = key.to_lowercase().replace(['_', '-'], "");
                    if SENSITIVE.iter().any(|s| lowered.contains(s)) {
                        (key.clone(), Value::String("[redacted]".to_string()))
                    } else {
                        (key.clone(), redact(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}
