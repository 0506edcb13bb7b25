//! WebAssembly plugin host runtime.
//!
//! Guest modules are plain core-WASM with a small ptr/len JSON ABI:
//!
//! - `alloc(len: i32) -> i32` reserves guest memory for host writes
//! - `init`/`activate`/`deactivate`/`cleanup`: `() -> i32` status codes,
//!   zero meaning success
//! - `execute(op_ptr, op_len, params_ptr, params_len) -> i64` returning the
//!   result JSON as a packed `ptr << 32 | len`, zero meaning null
//!
//! Guests get no WASI and no ambient OS access; the only import is a host
//! `log` function. Isolation is the absence of imports plus fuel metering
//! and a memory limit derived from the plugin's resource quota.

use wasmtime::{
    Caller, Config, Engine, Instance, Linker, Memory, Module, OptLevel, Store, StoreLimits,
    StoreLimitsBuilder,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::contract::{Plugin, REQUIRED_EXPORTS};
use crate::context::PluginContext;
use crate::error::{LoadError, PluginResult};
use crate::manifest::PluginManifest;
use crate::resources::ResourceQuota;

/// Fuel budget granted per exported call.
const CALL_FUEL: u64 = 100_000_000;

const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
const WASM_VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

struct GuestState {
    plugin: String,
    limits: StoreLimits,
}

/// Shared engine every WASM plugin compiles against.
pub struct WasmHost {
    engine: Engine,
}

impl WasmHost {
    pub fn new() -> PluginResult<Self> {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.max_wasm_stack(1024 * 1024);
        config.cranelift_opt_level(OptLevel::Speed);

        let engine = Engine::new(&config)?;
        Ok(Self { engine })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Validates and compiles module bytes.
    ///
    /// The magic/version sniff runs before handing anything to the compiler
    /// so arbitrary files fail fast with a typed error.
    pub fn compile(&self, plugin: &str, bytes: &[u8]) -> PluginResult<Module> {
        if bytes.len() < 8 || bytes[0..4] != WASM_MAGIC || bytes[4..8] != WASM_VERSION {
            return Err(LoadError::InvalidModule {
                plugin: plugin.to_string(),
                reason: "not a WebAssembly module (bad magic or version)".to_string(),
            }
            .into());
        }

        Module::new(&self.engine, bytes).map_err(|e| {
            LoadError::InvalidModule {
                plugin: plugin.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Checks the compiled module against [`REQUIRED_EXPORTS`].
    pub fn check_exports(plugin: &str, module: &Module) -> PluginResult<()> {
        for symbol in REQUIRED_EXPORTS {
            if module.get_export(symbol).is_none() {
                return Err(LoadError::MissingExport {
                    plugin: plugin.to_string(),
                    symbol: symbol.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Instantiates `module` under `quota` and adapts it onto [`Plugin`].
    pub fn instantiate(
        &self,
        manifest: PluginManifest,
        module: &Module,
        quota: &ResourceQuota,
    ) -> PluginResult<WasmPlugin> {
        let plugin = manifest.name.clone();
        let limits = StoreLimitsBuilder::new()
            .memory_size((quota.max_memory_mb as usize) * 1024 * 1024)
            .instances(1)
            .build();

        let mut store = Store::new(
            &self.engine,
            GuestState {
                plugin: plugin.clone(),
                limits,
            },
        );
        store.limiter(|state| &mut state.limits);
        store.set_fuel(CALL_FUEL)?;

        let mut linker: Linker<GuestState> = Linker::new(&self.engine);
        linker
            .func_wrap(
                "env",
                "log",
                |mut caller: Caller<'_, GuestState>, ptr: u32, len: u32| {
                    let message = caller
                        .get_export("memory")
                        .and_then(|e| e.into_memory())
                        .and_then(|memory| {
                            let data = memory.data(&caller);
                            data.get(ptr as usize..(ptr + len) as usize)
                                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                        })
                        .unwrap_or_default();
                    tracing::info!(plugin = %caller.data().plugin, "{message}");
                },
            )
            .map_err(|e| LoadError::Instantiation {
                plugin: plugin.clone(),
                reason: e.to_string(),
            })?;

        let instance =
            linker
                .instantiate(&mut store, module)
                .map_err(|e| LoadError::Instantiation {
                    plugin: plugin.clone(),
                    reason: e.to_string(),
                })?;

        let memory = instance.get_memory(&mut store, "memory").ok_or_else(|| {
            LoadError::Instantiation {
                plugin: plugin.clone(),
                reason: "module exports no memory".to_string(),
            }
        })?;

        Ok(WasmPlugin {
            manifest,
            store,
            instance,
            memory,
        })
    }
}

/// Adapter implementing the plugin contract over a guest module instance.
pub struct WasmPlugin {
    manifest: PluginManifest,
    store: Store<GuestState>,
    instance: Instance,
    memory: Memory,
}

impl WasmPlugin {
    /// Calls a `() -> i32` status-code export.
    fn call_status(&mut self, name: &str) -> anyhow::Result<()> {
        self.store.set_fuel(CALL_FUEL)?;
        let func = self
            .instance
            .get_typed_func::<(), i32>(&mut self.store, name)?;
        let status = func.call(&mut self.store, ())?;
        if status != 0 {
            anyhow::bail!("'{name}' returned status {status}");
        }
        Ok(())
    }

    /// Copies `bytes` into guest memory via the module's `alloc` export.
    fn write_guest(&mut self, bytes: &[u8]) -> anyhow::Result<(u32, u32)> {
        let alloc = self
            .instance
            .get_typed_func::<i32, i32>(&mut self.store, "alloc")?;
        let ptr = alloc.call(&mut self.store, bytes.len() as i32)? as u32;
        self.memory.write(&mut self.store, ptr as usize, bytes)?;
        Ok((ptr, bytes.len() as u32))
    }

    fn read_guest(&mut self, ptr: u32, len: u32) -> anyhow::Result<Vec<u8>> {
        let mut buffer = vec![0u8; len as usize];
        self.memory.read(&self.store, ptr as usize, &mut buffer)?;
        Ok(buffer)
    }
}

#[async_trait]
impl Plugin for WasmPlugin {
    fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    // Guests are fully sandboxed: host services, the event bus, and the
    // context logger stay on the host side of the boundary. The guest's
    // own `log` import is already wired to tracing.
    async fn initialize(&mut self, _context: PluginContext) -> anyhow::Result<()> {
        self.call_status("init")
    }

    async fn activate(&mut self) -> anyhow::Result<()> {
        self.call_status("activate")
    }

    async fn deactivate(&mut self) -> anyhow::Result<()> {
        self.call_status("deactivate")
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        self.call_status("cleanup")
    }

    async fn execute(&mut self, operation: &str, params: Value) -> anyhow::Result<Value> {
        self.store.set_fuel(CALL_FUEL)?;

        let params_bytes = serde_json::to_vec(&params)?;
        let (op_ptr, op_len) = self.write_guest(operation.as_bytes())?;
        let (params_ptr, params_len) = self.write_guest(&params_bytes)?;

        let execute = self
            .instance
            .get_typed_func::<(i32, i32, i32, i32), i64>(&mut self.store, "execute")?;
        let packed = execute.call(
            &mut self.store,
            (
                op_ptr as i32,
                op_len as i32,
                params_ptr as i32,
                params_len as i32,
            ),
        )?;

        if packed == 0 {
            return Ok(Value::Null);
        }
        let ptr = (packed >> 32) as u32;
        let len = (packed & 0xffff_ffff) as u32;
        let bytes = self.read_guest(ptr, len)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn configure(&mut self, _settings: Value) -> anyhow::Result<()> {
        // Guest modules receive settings through execute operations; the
        // lifecycle-level configure is a host-side no-op for them.
        Ok(())
    }
}
