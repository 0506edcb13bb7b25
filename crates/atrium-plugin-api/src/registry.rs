//! Manifest registry with dependency-ordered loading.
//!
//! The registry owns every validated manifest, indexes by name and category,
//! and derives the non-optional dependency graph. Registration is atomic:
//! the full dependency tree is validated before anything is stored, so a
//! failed `register` leaves the registry untouched.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use atrium_core::Version;

use crate::error::{DependencyError, LifecycleError, ManifestError, PluginError, PluginResult};
use crate::manifest::{PluginCategory, PluginManifest};

/// One scored hit returned by [`PluginRegistry::search`].
#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub manifest: PluginManifest,
    pub score: u32,
}

/// Aggregate counts over the registered manifests.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatistics {
    pub total_plugins: usize,
    pub by_category: HashMap<String, usize>,
    pub by_author: HashMap<String, usize>,
    pub average_dependencies: f64,
    /// Cycle paths found in the dependency graph, if any.
    pub cycles: Vec<Vec<String>>,
}

#[derive(Default)]
struct RegistryState {
    manifests: HashMap<String, PluginManifest>,
    by_category: HashMap<PluginCategory, HashSet<String>>,
    /// plugin name -> names of its non-optional dependencies
    edges: HashMap<String, HashSet<String>>,
    load_order: Option<Vec<String>>,
}

/// Stores validated manifests and answers dependency questions.
pub struct PluginRegistry {
    state: RwLock<RegistryState>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Registers a manifest.
    ///
    /// Re-registering the identical name and version is a no-op; the same
    /// name at a different version is a conflict. Every non-optional
    /// dependency must already be registered at a compatible version.
    pub fn register(&self, manifest: PluginManifest) -> PluginResult<()> {
        let report = manifest.validate();
        if !report.is_valid {
            return Err(ManifestError::Invalid {
                plugin: manifest.name.clone(),
                errors: report.errors,
            }
            .into());
        }

        let mut state = self.state.write();

        if let Some(existing) = state.manifests.get(&manifest.name) {
            if existing.version == manifest.version {
                tracing::debug!(plugin = %manifest.name, "already registered, no-op");
                return Ok(());
            }
            return Err(LifecycleError::VersionConflict {
                plugin: manifest.name.clone(),
                registered: existing.version.clone(),
                offered: manifest.version.clone(),
            }
            .into());
        }

        // Validate the dependency tree before touching any index.
        for dep in manifest.required_dependencies() {
            let Some(found) = state.manifests.get(&dep.name) else {
                return Err(DependencyError::Missing {
                    plugin: manifest.name.clone(),
                    dependency: dep.name.clone(),
                }
                .into());
            };
            if !dependency_version_matches(&found.version, &dep.version) {
                return Err(DependencyError::VersionMismatch {
                    plugin: manifest.name.clone(),
                    dependency: dep.name.clone(),
                    required: dep.version.clone(),
                    found: found.version.clone(),
                }
                .into());
            }
        }

        let name = manifest.name.clone();
        state
            .by_category
            .entry(manifest.category)
            .or_default()
            .insert(name.clone());
        state.edges.insert(
            name.clone(),
            manifest
                .required_dependencies()
                .map(|d| d.name.clone())
                .collect(),
        );
        state.manifests.insert(name.clone(), manifest);
        state.load_order = None;

        tracing::info!(plugin = %name, "plugin registered");
        Ok(())
    }

    /// Removes a manifest. Fails if other registered plugins require it.
    pub fn unregister(&self, name: &str) -> PluginResult<()> {
        let mut state = self.state.write();

        if !state.manifests.contains_key(name) {
            return Err(LifecycleError::NotRegistered {
                plugin: name.to_string(),
            }
            .into());
        }

        let mut dependents: Vec<String> = state
            .edges
            .iter()
            .filter(|(plugin, deps)| plugin.as_str() != name && deps.contains(name))
            .map(|(plugin, _)| plugin.clone())
            .collect();
        if !dependents.is_empty() {
            dependents.sort();
            return Err(DependencyError::RequiredBy {
                plugin: name.to_string(),
                dependents,
            }
            .into());
        }

        let manifest = state.manifests.remove(name).expect("checked above");
        if let Some(members) = state.by_category.get_mut(&manifest.category) {
            members.remove(name);
            if members.is_empty() {
                state.by_category.remove(&manifest.category);
            }
        }
        state.edges.remove(name);
        state.load_order = None;

        tracing::info!(plugin = %name, "plugin unregistered");
        Ok(())
    }

    /// A dependency-respecting order over every registered plugin.
    ///
    /// Cached until the next mutating call. A cycle fails with a
    /// [`DependencyError::Cycle`] naming every plugin on the cycle path.
    pub fn load_order(&self) -> PluginResult<Vec<String>> {
        {
            let state = self.state.read();
            if let Some(order) = &state.load_order {
                return Ok(order.clone());
            }
        }

        let mut state = self.state.write();
        let order = topological_order(&state.edges)?;
        state.load_order = Some(order.clone());
        Ok(order)
    }

    /// Scores manifests against `query` and returns matches best-first.
    ///
    /// Field weights: name 10, category 8, each keyword 5, description 3,
    /// author 2. Matching is case-insensitive substring containment.
    pub fn search(&self, query: &str, limit: Option<usize>) -> Vec<SearchMatch> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }

        let state = self.state.read();
        let mut matches: Vec<SearchMatch> = state
            .manifests
            .values()
            .filter_map(|manifest| {
                let mut score = 0;
                if manifest.name.to_lowercase().contains(&needle) {
                    score += 10;
                }
                if manifest.category.as_str().contains(&needle) {
                    score += 8;
                }
                score += 5
                    * manifest
                        .keywords
                        .iter()
                        .filter(|k| k.to_lowercase().contains(&needle))
                        .count() as u32;
                if manifest.description.to_lowercase().contains(&needle) {
                    score += 3;
                }
                if manifest.author.to_lowercase().contains(&needle) {
                    score += 2;
                }
                (score > 0).then(|| SearchMatch {
                    manifest: manifest.clone(),
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.manifest.name.cmp(&b.manifest.name))
        });
        if let Some(limit) = limit {
            matches.truncate(limit);
        }
        matches
    }

    pub fn manifest(&self, name: &str) -> Option<PluginManifest> {
        self.state.read().manifests.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().manifests.contains_key(name)
    }

    pub fn all_manifests(&self) -> Vec<PluginManifest> {
        let mut all: Vec<_> = self.state.read().manifests.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn plugins_by_category(&self, category: PluginCategory) -> Vec<PluginManifest> {
        let state = self.state.read();
        let mut members: Vec<_> = state
            .by_category
            .get(&category)
            .into_iter()
            .flatten()
            .filter_map(|name| state.manifests.get(name).cloned())
            .collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));
        members
    }

    /// Non-optional dependency names of `name`.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        let state = self.state.read();
        let mut deps: Vec<_> = state
            .edges
            .get(name)
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        deps.sort();
        deps
    }

    /// Registered plugins that list `name` as a required dependency.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let state = self.state.read();
        let mut dependents: Vec<_> = state
            .edges
            .iter()
            .filter(|(plugin, deps)| plugin.as_str() != name && deps.contains(name))
            .map(|(plugin, _)| plugin.clone())
            .collect();
        dependents.sort();
        dependents
    }

    pub fn len(&self) -> usize {
        self.state.read().manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().manifests.is_empty()
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let state = self.state.read();
        let total = state.manifests.len();

        let mut by_category = HashMap::new();
        let mut by_author = HashMap::new();
        let mut dependency_count = 0usize;
        for manifest in state.manifests.values() {
            *by_category
                .entry(manifest.category.as_str().to_string())
                .or_insert(0) += 1;
            if !manifest.author.is_empty() {
                *by_author.entry(manifest.author.clone()).or_insert(0) += 1;
            }
            dependency_count += manifest.dependencies.len();
        }

        let cycles = match topological_order(&state.edges) {
            Ok(_) => Vec::new(),
            Err(PluginError::Dependency(DependencyError::Cycle { path })) => vec![path],
            Err(_) => Vec::new(),
        };

        RegistryStatistics {
            total_plugins: total,
            by_category,
            by_author,
            average_dependencies: if total == 0 {
                0.0
            } else {
                dependency_count as f64 / total as f64
            },
            cycles,
        }
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a registered `found` version satisfies a dependency `required`
/// string: `"*"` matches anything, otherwise caret compatibility.
fn dependency_version_matches(found: &str, required: &str) -> bool {
    if required == "*" {
        return true;
    }
    match (Version::parse(found), Version::parse(required)) {
        (Ok(found), Ok(required)) => found.is_compatible(&required),
        _ => false,
    }
}

/// Depth-first topological sort producing dependencies before dependents.
///
/// The visit stack doubles as the cycle path when a back edge is found.
fn topological_order(edges: &HashMap<String, HashSet<String>>) -> PluginResult<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        node: &str,
        edges: &HashMap<String, HashSet<String>>,
        marks: &mut HashMap<String, Mark>,
        stack: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> PluginResult<()> {
        match marks.get(node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| n == node).unwrap_or(0);
                let mut path: Vec<String> = stack[start..].to_vec();
                path.push(node.to_string());
                return Err(DependencyError::Cycle { path }.into());
            }
            None => {}
        }

        marks.insert(node.to_string(), Mark::Visiting);
        stack.push(node.to_string());

        if let Some(deps) = edges.get(node) {
            let mut deps: Vec<_> = deps.iter().collect();
            deps.sort();
            for dep in deps {
                // Dependencies on unregistered names are caught at
                // registration time; skip them here rather than panic.
                if edges.contains_key(dep.as_str()) {
                    visit(dep, edges, marks, stack, order)?;
                }
            }
        }

        stack.pop();
        marks.insert(node.to_string(), Mark::Done);
        order.push(node.to_string());
        Ok(())
    }

    let mut roots: Vec<_> = edges.keys().collect();
    roots.sort();

    let mut marks = HashMap::new();
    let mut order = Vec::new();
    for root in roots {
        visit(root, edges, &mut marks, &mut Vec::new(), &mut order)?;
    }
    Ok(order)
}
