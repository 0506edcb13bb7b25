//! Per-plugin resource quotas, allocations, and execution monitoring.
//!
//! Allocation is admission control: activating a plugin whose quota would
//! push aggregate usage over the configured global ceilings is rejected
//! outright rather than degrading every active plugin. Quota overruns seen
//! during execution are recorded as violations and reported; the host does
//! not preempt plugin code, so hard enforcement is a caller-side wrapper.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use atrium_core::HostConfig;

use crate::error::{PluginResult, ResourceError};

/// Policy ceilings one plugin runs under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub max_memory_mb: u64,
    pub max_cpu_percent: u32,
    pub max_execution_time_ms: u64,
    #[serde(default)]
    pub max_network_requests: Option<u32>,
}

impl Default for ResourceQuota {
    fn default() -> Self {
        Self {
            max_memory_mb: 50,
            max_cpu_percent: 10,
            max_execution_time_ms: 30_000,
            max_network_requests: None,
        }
    }
}

/// Aggregate ceilings shared by every active plugin.
#[derive(Debug, Clone)]
pub struct GlobalLimits {
    pub memory_mb: u64,
    pub cpu_percent: u32,
    pub max_active: usize,
}

impl GlobalLimits {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            memory_mb: config.resource_limits.global_memory_mb,
            cpu_percent: config.resource_limits.global_cpu_percent,
            max_active: config.max_plugins,
        }
    }
}

/// A recorded quota overrun.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceViolation {
    pub plugin: String,
    pub kind: ViolationKind,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    ExecutionTime,
}

/// Live tracking record for one active plugin.
struct Allocation {
    quota: ResourceQuota,
    allocated_at: DateTime<Utc>,
    executions: u64,
    total_execution_ms: u64,
    peak_execution_ms: u64,
    violations: Vec<ResourceViolation>,
}

impl Allocation {
    fn new(quota: ResourceQuota) -> Self {
        Self {
            quota,
            allocated_at: Utc::now(),
            executions: 0,
            total_execution_ms: 0,
            peak_execution_ms: 0,
            violations: Vec::new(),
        }
    }
}

/// Read-only snapshot of one plugin's tracked usage.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub plugin: String,
    pub quota: ResourceQuota,
    pub allocated_at: DateTime<Utc>,
    pub executions: u64,
    pub total_execution_ms: u64,
    pub peak_execution_ms: u64,
    pub average_execution_ms: f64,
    pub violation_count: usize,
}

/// Aggregate usage across every active plugin.
#[derive(Debug, Clone, Serialize)]
pub struct GlobalUsage {
    pub memory_mb_allocated: u64,
    pub memory_mb_limit: u64,
    pub cpu_percent_allocated: u32,
    pub cpu_percent_limit: u32,
    pub active_plugins: usize,
    pub max_active_plugins: usize,
}

/// Full usage report produced by [`ResourceManager::generate_report`].
#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub generated_at: DateTime<Utc>,
    pub global: GlobalUsage,
    pub plugins: Vec<ResourceUsage>,
    /// Plugins with at least one recorded violation.
    pub over_quota: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Outcome of one monitored execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSample {
    pub plugin: String,
    pub duration_ms: u64,
    pub exceeded_quota: bool,
}

/// Tracks quotas and live allocations; admits or rejects activations.
pub struct ResourceManager {
    limits: GlobalLimits,
    quotas: DashMap<String, ResourceQuota>,
    allocations: Arc<Mutex<HashMap<String, Allocation>>>,
}

impl ResourceManager {
    pub fn new(limits: GlobalLimits) -> Self {
        Self {
            limits,
            quotas: DashMap::new(),
            allocations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Assigns the quota used the next time `name` is allocated.
    pub fn set_quota(&self, name: &str, quota: ResourceQuota) {
        self.quotas.insert(name.to_string(), quota);
    }

    /// The quota `name` runs under (the default if none was assigned).
    pub fn quota(&self, name: &str) -> ResourceQuota {
        self.quotas
            .get(name)
            .map(|q| q.value().clone())
            .unwrap_or_default()
    }

    /// Admits `name` into the active set, reserving its quota.
    ///
    /// Fails if the aggregate memory or CPU reservation would exceed the
    /// global limits, or if every active slot is taken. Allocating an
    /// already-allocated plugin is a no-op.
    pub fn allocate(&self, name: &str) -> PluginResult<()> {
        let quota = self.quota(name);
        let mut allocations = self.allocations.lock();

        if allocations.contains_key(name) {
            tracing::debug!(plugin = %name, "already allocated");
            return Ok(());
        }

        if allocations.len() >= self.limits.max_active {
            return Err(ResourceError::TooManyActivePlugins {
                plugin: name.to_string(),
                active: allocations.len(),
                limit: self.limits.max_active,
            }
            .into());
        }

        let memory_in_use: u64 = allocations.values().map(|a| a.quota.max_memory_mb).sum();
        if memory_in_use + quota.max_memory_mb > self.limits.memory_mb {
            return Err(ResourceError::GlobalMemoryExceeded {
                plugin: name.to_string(),
                requested_mb: quota.max_memory_mb,
                in_use_mb: memory_in_use,
                limit_mb: self.limits.memory_mb,
            }
            .into());
        }

        let cpu_in_use: u32 = allocations.values().map(|a| a.quota.max_cpu_percent).sum();
        if cpu_in_use + quota.max_cpu_percent > self.limits.cpu_percent {
            return Err(ResourceError::GlobalCpuExceeded {
                plugin: name.to_string(),
                requested_percent: quota.max_cpu_percent,
                in_use_percent: cpu_in_use,
                limit_percent: self.limits.cpu_percent,
            }
            .into());
        }

        allocations.insert(name.to_string(), Allocation::new(quota));
        tracing::debug!(plugin = %name, "resources allocated");
        Ok(())
    }

    /// Returns `name`'s reservation to the global pool. Idempotent.
    pub fn release(&self, name: &str) {
        if self.allocations.lock().remove(name).is_some() {
            tracing::debug!(plugin = %name, "resources released");
        }
    }

    /// Starts timing one execution attributed to `name`.
    ///
    /// The returned monitor records its sample when [`ExecutionMonitor::stop`]
    /// is called, or on drop if the caller unwinds past it, so every exit
    /// path stops it exactly once.
    pub fn create_monitor(&self, name: &str) -> ExecutionMonitor {
        let quota = self.quota(name);
        ExecutionMonitor {
            plugin: name.to_string(),
            max_execution_time_ms: quota.max_execution_time_ms,
            started: Instant::now(),
            allocations: Arc::clone(&self.allocations),
            stopped: false,
        }
    }

    pub fn usage(&self, name: &str) -> Option<ResourceUsage> {
        self.allocations
            .lock()
            .get(name)
            .map(|allocation| snapshot(name, allocation))
    }

    pub fn active_count(&self) -> usize {
        self.allocations.lock().len()
    }

    pub fn generate_report(&self) -> ResourceReport {
        let allocations = self.allocations.lock();

        let mut plugins: Vec<ResourceUsage> = allocations
            .iter()
            .map(|(name, allocation)| snapshot(name, allocation))
            .collect();
        plugins.sort_by(|a, b| a.plugin.cmp(&b.plugin));

        let memory_mb_allocated = allocations.values().map(|a| a.quota.max_memory_mb).sum();
        let cpu_percent_allocated = allocations.values().map(|a| a.quota.max_cpu_percent).sum();

        let over_quota: Vec<String> = plugins
            .iter()
            .filter(|u| u.violation_count > 0)
            .map(|u| u.plugin.clone())
            .collect();

        let mut recommendations = Vec::new();
        if memory_mb_allocated * 10 > self.limits.memory_mb * 8 {
            recommendations.push(format!(
                "Global memory reservation at {memory_mb_allocated}MB of \
                 {}MB; review per-plugin quotas before activating more plugins",
                self.limits.memory_mb
            ));
        }
        for usage in &plugins {
            if usage.violation_count > 0 {
                recommendations.push(format!(
                    "Plugin '{}' exceeded its execution time quota {} time(s); \
                     raise max_execution_time_ms or reduce its workload",
                    usage.plugin, usage.violation_count
                ));
            }
        }

        ResourceReport {
            generated_at: Utc::now(),
            global: GlobalUsage {
                memory_mb_allocated,
                memory_mb_limit: self.limits.memory_mb,
                cpu_percent_allocated,
                cpu_percent_limit: self.limits.cpu_percent,
                active_plugins: allocations.len(),
                max_active_plugins: self.limits.max_active,
            },
            plugins,
            over_quota,
            recommendations,
        }
    }

    /// Drops every allocation and assigned quota.
    pub fn destroy(&self) {
        self.allocations.lock().clear();
        self.quotas.clear();
    }
}

fn snapshot(name: &str, allocation: &Allocation) -> ResourceUsage {
    ResourceUsage {
        plugin: name.to_string(),
        quota: allocation.quota.clone(),
        allocated_at: allocation.allocated_at,
        executions: allocation.executions,
        total_execution_ms: allocation.total_execution_ms,
        peak_execution_ms: allocation.peak_execution_ms,
        average_execution_ms: if allocation.executions == 0 {
            0.0
        } else {
            allocation.total_execution_ms as f64 / allocation.executions as f64
        },
        violation_count: allocation.violations.len(),
    }
}

/// Times one `execute` call and records the sample on stop or drop.
pub struct ExecutionMonitor {
    plugin: String,
    max_execution_time_ms: u64,
    started: Instant,
    allocations: Arc<Mutex<HashMap<String, Allocation>>>,
    stopped: bool,
}

impl ExecutionMonitor {
    /// Stops the monitor and records the sample.
    pub fn stop(mut self) -> ExecutionSample {
        self.finish()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn finish(&mut self) -> ExecutionSample {
        self.stopped = true;
        let duration_ms = self.elapsed_ms();
        let exceeded_quota = duration_ms > self.max_execution_time_ms;

        let mut allocations = self.allocations.lock();
        if let Some(allocation) = allocations.get_mut(&self.plugin) {
            allocation.executions += 1;
            allocation.total_execution_ms += duration_ms;
            allocation.peak_execution_ms = allocation.peak_execution_ms.max(duration_ms);
            if exceeded_quota {
                tracing::warn!(
                    plugin = %self.plugin,
                    duration_ms,
                    quota_ms = self.max_execution_time_ms,
                    "execution time quota exceeded"
                );
                allocation.violations.push(ResourceViolation {
                    plugin: self.plugin.clone(),
                    kind: ViolationKind::ExecutionTime,
                    detail: format!(
                        "execution took {duration_ms}ms, quota is {}ms",
                        self.max_execution_time_ms
                    ),
                    timestamp: Utc::now(),
                });
            }
        }

        ExecutionSample {
            plugin: self.plugin.clone(),
            duration_ms,
            exceeded_quota,
        }
    }
}

impl Drop for ExecutionMonitor {
    fn drop(&mut self) {
        if !self.stopped {
            self.finish();
        }
    }
}
