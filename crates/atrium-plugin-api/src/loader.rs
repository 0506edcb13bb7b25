//! Resolves manifests to runnable plugin instances.
//!
//! The entry point is an explicit contract, never export guessing:
//!
//! - `builtin:<factory>` names a factory registered on the loader; an
//!   unknown factory is a load error.
//! - a path ending in `.wasm` is compiled through the WASM host runtime and
//!   its exports are checked against the required lifecycle set.
//!
//! Resolved modules are cached per plugin name so repeat loads skip
//! resolution; hot reload evicts the cache first.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wasmtime::Module;

use crate::contract::Plugin;
use crate::error::{LoadError, PluginResult};
use crate::manifest::{PluginManifest, ValidationReport};
use crate::resources::ResourceQuota;
use crate::wasm::WasmHost;

/// Host-side constructor for a builtin plugin.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

/// Manifest file names recognized by discovery.
const MANIFEST_FILES: [&str; 2] = ["manifest.json", "plugin.json"];

enum ResolvedModule {
    Builtin { factory: String },
    Wasm { module: Module, sha256: String },
}

/// Loads plugin code from builtin factories or WASM modules.
pub struct PluginLoader {
    wasm: WasmHost,
    factories: DashMap<String, PluginFactory>,
    cache: DashMap<String, Arc<ResolvedModule>>,
}

impl PluginLoader {
    pub fn new() -> PluginResult<Self> {
        Ok(Self {
            wasm: WasmHost::new()?,
            factories: DashMap::new(),
            cache: DashMap::new(),
        })
    }

    /// Registers the factory behind a `builtin:<name>` entry point.
    pub fn register_factory<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Resolves and instantiates the plugin described by `manifest`.
    ///
    /// The resolved module is cached by plugin name; a later `load` for the
    /// same name reuses it without re-reading or re-compiling anything.
    pub fn load(
        &self,
        manifest: &PluginManifest,
        quota: &ResourceQuota,
    ) -> PluginResult<Box<dyn Plugin>> {
        let module = match self.cache.get(&manifest.name) {
            Some(cached) => Arc::clone(cached.value()),
            None => {
                let resolved = Arc::new(self.resolve(manifest)?);
                self.cache
                    .insert(manifest.name.clone(), Arc::clone(&resolved));
                resolved
            }
        };
        self.instantiate(manifest, &module, quota)
    }

    fn resolve(&self, manifest: &PluginManifest) -> PluginResult<ResolvedModule> {
        let entry_point = manifest.entry_point.as_str();

        if let Some(factory) = entry_point.strip_prefix("builtin:") {
            if !self.factories.contains_key(factory) {
                return Err(LoadError::EntryPointNotFound {
                    plugin: manifest.name.clone(),
                    entry_point: entry_point.to_string(),
                }
                .into());
            }
            return Ok(ResolvedModule::Builtin {
                factory: factory.to_string(),
            });
        }

        if Path::new(entry_point)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("wasm"))
        {
            let bytes = std::fs::read(entry_point)?;
            let module = self.wasm.compile(&manifest.name, &bytes)?;
            WasmHost::check_exports(&manifest.name, &module)?;
            let sha256 = hex::encode(Sha256::digest(&bytes));
            tracing::debug!(plugin = %manifest.name, %sha256, "compiled WASM module");
            return Ok(ResolvedModule::Wasm { module, sha256 });
        }

        Err(LoadError::UnsupportedEntryPoint {
            plugin: manifest.name.clone(),
            entry_point: entry_point.to_string(),
        }
        .into())
    }

    fn instantiate(
        &self,
        manifest: &PluginManifest,
        module: &ResolvedModule,
        quota: &ResourceQuota,
    ) -> PluginResult<Box<dyn Plugin>> {
        match module {
            ResolvedModule::Builtin { factory } => {
                let factory = self.factories.get(factory).ok_or_else(|| {
                    LoadError::EntryPointNotFound {
                        plugin: manifest.name.clone(),
                        entry_point: manifest.entry_point.clone(),
                    }
                })?;
                Ok(factory.value()())
            }
            ResolvedModule::Wasm { module, .. } => {
                let plugin = self.wasm.instantiate(manifest.clone(), module, quota)?;
                Ok(Box::new(plugin))
            }
        }
    }

    /// Evicts `name` from the module cache.
    ///
    /// Instance-level cleanup belongs to the manager; this only releases
    /// the loader's compiled-module reference.
    pub fn unload(&self, name: &str) {
        if self.cache.remove(name).is_some() {
            tracing::debug!(plugin = %name, "module evicted from cache");
        }
    }

    /// Evicts any cached module and loads fresh, picking up code changes.
    pub fn hot_reload(
        &self,
        manifest: &PluginManifest,
        quota: &ResourceQuota,
    ) -> PluginResult<Box<dyn Plugin>> {
        self.unload(&manifest.name);
        self.load(manifest, quota)
    }

    /// Scans `paths` for plugin manifests.
    ///
    /// Accepts `manifest.json`/`plugin.json` inside per-plugin directories
    /// and plain `.json` files directly under a search path. Unreadable or
    /// invalid entries are skipped with a warning, never fatal.
    pub fn discover(&self, paths: &[PathBuf]) -> Vec<PluginManifest> {
        let mut found = Vec::new();
        for path in paths {
            let entries = match std::fs::read_dir(path) {
                Ok(entries) => entries,
                Err(error) => {
                    tracing::debug!(path = %path.display(), %error, "skipping search path");
                    continue;
                }
            };

            for entry in entries.flatten() {
                let candidate = entry.path();
                if candidate.is_dir() {
                    for manifest_file in MANIFEST_FILES {
                        let nested = candidate.join(manifest_file);
                        if nested.is_file() {
                            if let Some(manifest) = read_manifest(&nested) {
                                found.push(manifest);
                            }
                            break;
                        }
                    }
                } else if candidate.extension().is_some_and(|ext| ext == "json") {
                    if let Some(manifest) = read_manifest(&candidate) {
                        found.push(manifest);
                    }
                }
            }
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    /// Pre-flight check: can this manifest be loaded, and does the loaded
    /// instance advertise capabilities?
    ///
    /// Leaves the module cache untouched so validation never commits to an
    /// active load.
    pub fn validate(&self, manifest: &PluginManifest) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        match self
            .resolve(manifest)
            .and_then(|module| self.instantiate(manifest, &module, &ResourceQuota::default()))
        {
            Ok(instance) => {
                if instance.capabilities().is_empty() {
                    warnings.push("Plugin advertises no capabilities".to_string());
                }
            }
            Err(error) => errors.push(error.to_string()),
        }

        ValidationReport::from_parts(errors, warnings)
    }

    /// SHA-256 of the cached WASM module bytes, if `name` resolved to one.
    pub fn module_hash(&self, name: &str) -> Option<String> {
        self.cache.get(name).and_then(|module| match module.value().as_ref() {
            ResolvedModule::Wasm { sha256, .. } => Some(sha256.clone()),
            ResolvedModule::Builtin { .. } => None,
        })
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.cache.contains_key(name)
    }

    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self.cache.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

fn read_manifest(path: &Path) -> Option<PluginManifest> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "unreadable manifest, skipping");
            return None;
        }
    };
    let manifest: PluginManifest = match serde_json::from_str(&contents) {
        Ok(manifest) => manifest,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "invalid manifest, skipping");
            return None;
        }
    };
    let report = manifest.validate();
    if !report.is_valid {
        tracing::warn!(
            path = %path.display(),
            errors = ?report.errors,
            "manifest failed validation, skipping"
        );
        return None;
    }
    Some(manifest)
}
