// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! WASM Runtime
//!
//! Wraps the wasmtime `Engine` and exposes the module lifecycle as separate,
//! independently failing phases:
//!
//! 1. [`WasmRuntime::load`] reads the file and parses it as a core module
//! 2. [`WasmRuntime::validate`] runs the validator
//! 3. [`WasmRuntime::instantiate`] compiles, links the granted host
//!    capabilities and instantiates into a fresh `Store`
//!
//! A [`RunningInstance`] owns its store; dropping it tears the whole
//! context down. Nothing instantiated outlives the call that created it.

use super::host_functions::{self, HostState};
use crate::capabilities::{CapabilitySet, HostCapability};
use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, ExecutorResult};
use crate::marshal::{GuestAllocator, GuestMemory};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use wasmparser::{Encoding, Parser, Payload};
use wasmtime::{
    Config, Engine, ExternType, FuncType, Instance, Linker, Memory, Module, Store, Trap,
    TypedFunc, Val,
};

/// Module bytes that passed the load phase
pub struct LoadedModule {
    path: PathBuf,
    bytes: Vec<u8>,
    hash: blake3::Hash,
}

impl LoadedModule {
    /// Short hex digest used in log lines
    pub fn short_hash(&self) -> String {
        hex::encode(&self.hash.as_bytes()[..8])
    }
}

/// The wasmtime-backed module runtime
///
/// The engine is shared; stores, linkers and instances are created per call.
pub struct WasmRuntime {
    engine: Engine,
    config: ExecutorConfig,
    /// Compiled modules keyed by module path, tagged with the content hash
    /// they were compiled from. Only used when
    /// `runtime.cache_compiled_modules` is set; at most one entry per path.
    modules: RwLock<HashMap<PathBuf, (blake3::Hash, Module)>>,
}

impl WasmRuntime {
    /// Create a new runtime with the given configuration
    pub fn new(config: ExecutorConfig) -> ExecutorResult<Self> {
        config.validate()?;

        let mut engine_config = Config::new();
        if config.runtime.fuel_limit.is_some() {
            engine_config.consume_fuel(true);
        }

        let engine = Engine::new(&engine_config)
            .map_err(|e| ExecutorError::Config(format!("failed to create WASM engine: {}", e)))?;

        Ok(Self {
            engine,
            config,
            modules: RwLock::new(HashMap::new()),
        })
    }

    /// Create a runtime with default configuration
    pub fn with_defaults() -> ExecutorResult<Self> {
        Self::new(ExecutorConfig::default())
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Number of compiled modules held by the opt-in cache
    pub fn cached_modules(&self) -> usize {
        self.modules.read().len()
    }

    /// Forget the compiled module cached for `path`
    pub fn evict_module(&self, path: &Path) -> bool {
        self.modules.write().remove(path).is_some()
    }

    /// Read `path` and check that it parses as a core WASM module
    pub fn load(&self, path: &Path) -> ExecutorResult<LoadedModule> {
        let bytes = std::fs::read(path).map_err(|e| ExecutorError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        parse_core_module(&bytes).map_err(|message| ExecutorError::Load {
            path: path.to_path_buf(),
            message,
        })?;

        let hash = blake3::hash(&bytes);
        Ok(LoadedModule {
            path: path.to_path_buf(),
            bytes,
            hash,
        })
    }

    /// Validate a loaded module against the engine's feature set
    pub fn validate(&self, module: &LoadedModule) -> ExecutorResult<()> {
        Module::validate(&self.engine, &module.bytes).map_err(|e| ExecutorError::Validation {
            path: module.path.clone(),
            message: e.to_string(),
        })
    }

    /// Compile a validated module, consulting the cache when enabled
    fn compile(&self, loaded: &LoadedModule) -> ExecutorResult<Module> {
        if self.config.runtime.cache_compiled_modules {
            match self.modules.read().get(&loaded.path) {
                Some((hash, module)) if *hash == loaded.hash => {
                    tracing::debug!(hash = %loaded.short_hash(), "compiled module cache hit");
                    return Ok(module.clone());
                }
                Some(_) => {
                    tracing::debug!(path = ?loaded.path, "module changed on disk, recompiling");
                }
                None => {}
            }
        }

        let module = Module::from_binary(&self.engine, &loaded.bytes).map_err(|e| {
            ExecutorError::Validation {
                path: loaded.path.clone(),
                message: format!("compilation failed: {}", e),
            }
        })?;

        if self.config.runtime.cache_compiled_modules {
            self.modules
                .write()
                .insert(loaded.path.clone(), (loaded.hash, module.clone()));
        }
        Ok(module)
    }

    /// Compile and instantiate with exactly the capabilities in `grants`
    pub fn instantiate(
        &self,
        loaded: &LoadedModule,
        grants: &CapabilitySet,
    ) -> ExecutorResult<RunningInstance> {
        let module = self.compile(loaded)?;
        let path = loaded.path.as_path();

        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        if grants.has(HostCapability::SystemInterface) {
            host_functions::link_system_interface(&mut linker, path)?;
        }
        if grants.has(HostCapability::NeuralNetwork) {
            host_functions::link_neural_network(&mut linker, &module, path)?;
        }

        let mut store = Store::new(&self.engine, HostState::new(&self.config.runtime));
        if let Some(fuel) = self.config.runtime.fuel_limit {
            store.set_fuel(fuel).map_err(|e| ExecutorError::Instantiation {
                path: path.to_path_buf(),
                message: format!("failed to set fuel: {}", e),
            })?;
        }

        let instance =
            linker
                .instantiate(&mut store, &module)
                .map_err(|e| ExecutorError::Instantiation {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;

        tracing::debug!(
            path = ?path,
            hash = %loaded.short_hash(),
            capabilities = %grants,
            "module instantiated"
        );

        Ok(RunningInstance {
            store,
            instance,
            module,
        })
    }
}

/// Walk the payloads of `bytes`, rejecting malformed input and components
fn parse_core_module(bytes: &[u8]) -> Result<(), String> {
    for payload in Parser::new(0).parse_all(bytes) {
        let payload = payload.map_err(|e| e.to_string())?;
        if let Payload::Version {
            encoding: Encoding::Component,
            ..
        } = payload
        {
            return Err("component binaries are not supported, expected a core module".to_string());
        }
    }
    Ok(())
}

/// One instantiated module and the store that owns it
pub struct RunningInstance {
    store: Store<HostState>,
    instance: Instance,
    module: Module,
}

impl RunningInstance {
    /// Function exports in declaration order
    pub fn function_exports(&self) -> Vec<(String, FuncType)> {
        self.module
            .exports()
            .filter_map(|export| match export.ty() {
                ExternType::Func(ty) => Some((export.name().to_string(), ty)),
                _ => None,
            })
            .collect()
    }

    /// Type of the exported function `name`
    pub fn func_type(&mut self, name: &str) -> Option<FuncType> {
        self.instance
            .get_func(&mut self.store, name)
            .map(|func| func.ty(&self.store))
    }

    pub fn memory(&mut self, name: &str) -> Option<Memory> {
        self.instance.get_memory(&mut self.store, name)
    }

    /// Call `name` and return its single result
    pub fn call(&mut self, name: &str, args: &[Val]) -> ExecutorResult<Val> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| ExecutorError::invocation(name, "function is not exported"))?;

        let mut results = [Val::I64(0)];
        func.call(&mut self.store, args, &mut results)
            .map_err(|e| classify_call_error(name, e))?;

        let [result] = results;
        Ok(result)
    }

    /// Borrow the guest heap through `memory` and the allocator export
    pub fn guest(&mut self, memory: Memory, allocator: &str) -> WasmGuest<'_> {
        let allocator_fn = self
            .instance
            .get_typed_func::<i32, i32>(&mut self.store, allocator)
            .ok();

        WasmGuest {
            store: &mut self.store,
            memory,
            allocator: allocator_fn,
            allocator_name: allocator.to_string(),
        }
    }

    /// wasi-nn calls the guest made so far
    pub fn nn_calls(&self) -> u64 {
        self.store.data().nn_calls
    }
}

fn classify_call_error(name: &str, error: wasmtime::Error) -> ExecutorError {
    match error.downcast_ref::<Trap>() {
        Some(trap) => ExecutorError::RuntimeTrap {
            function: name.to_string(),
            message: trap.to_string(),
        },
        None => ExecutorError::invocation(name, format!("{:#}", error)),
    }
}

/// Live view of a guest's linear memory and allocator
pub struct WasmGuest<'a> {
    store: &'a mut Store<HostState>,
    memory: Memory,
    allocator: Option<TypedFunc<i32, i32>>,
    allocator_name: String,
}

impl GuestMemory for WasmGuest<'_> {
    fn data(&self) -> &[u8] {
        self.memory.data(&*self.store)
    }

    fn data_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut *self.store)
    }
}

impl GuestAllocator for WasmGuest<'_> {
    fn allocate(&mut self, size: u32) -> ExecutorResult<u32> {
        let allocator = self.allocator.as_ref().ok_or_else(|| {
            ExecutorError::Allocation(format!(
                "module does not export {}(i32) -> i32",
                self.allocator_name
            ))
        })?;

        let size = i32::try_from(size).map_err(|_| {
            ExecutorError::Allocation(format!("allocation of {} bytes is too large", size))
        })?;

        let offset = allocator.call(&mut *self.store, size).map_err(|e| {
            ExecutorError::Allocation(format!("{} failed: {:#}", self.allocator_name, e))
        })?;

        Ok(offset as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_creation() {
        let runtime = WasmRuntime::with_defaults().unwrap();
        assert_eq!(runtime.cached_modules(), 0);
        assert_eq!(runtime.config().runtime.fuel_limit, None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_core_module(b"not a wasm file").is_err());
        assert!(parse_core_module(&[]).is_err());
    }

    #[test]
    fn test_parse_accepts_empty_module() {
        let empty = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
        assert!(parse_core_module(&empty).is_ok());
    }

    #[test]
    fn test_parse_rejects_component() {
        let component = [0x00, 0x61, 0x73, 0x6d, 0x0d, 0x00, 0x01, 0x00];
        let err = parse_core_module(&component).unwrap_err();
        assert!(err.contains("component"));
    }

    fn write_wat(dir: &tempfile::TempDir, wat: &str) -> PathBuf {
        let path = dir.path().join("module.wasm");
        std::fs::write(&path, wat::parse_str(wat).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_nn_calls_are_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wat(
            &dir,
            r#"
            (module
              (import "wasi_ephemeral_nn" "load"
                (func $load (param i32 i32 i32 i32 i32) (result i32)))
              (func (export "infer_twice") (result i64)
                (drop (call $load (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0)))
                (i64.extend_i32_s
                  (call $load (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0) (i32.const 0)))))
            "#,
        );

        let runtime = WasmRuntime::with_defaults().unwrap();
        let loaded = runtime.load(&path).unwrap();
        let mut running = runtime.instantiate(&loaded, &CapabilitySet::all()).unwrap();
        assert_eq!(running.nn_calls(), 0);

        let result = running.call("infer_twice", &[]).unwrap();
        assert_eq!(result.i64(), Some(6));
        assert_eq!(running.nn_calls(), 2);
    }

    #[test]
    fn test_module_cache_keeps_one_entry_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ExecutorConfig::default();
        config.runtime.cache_compiled_modules = true;
        let runtime = WasmRuntime::new(config).unwrap();

        for n in 0..5 {
            let wat = format!(r#"(module (func (export "n") (result i64) (i64.const {})))"#, n);
            let path = write_wat(&dir, &wat);
            let loaded = runtime.load(&path).unwrap();
            let mut running = runtime.instantiate(&loaded, &CapabilitySet::new()).unwrap();
            assert_eq!(running.call("n", &[]).unwrap().i64(), Some(n));
            assert_eq!(runtime.cached_modules(), 1);
        }

        assert!(runtime.evict_module(&dir.path().join("module.wasm")));
        assert_eq!(runtime.cached_modules(), 0);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = ExecutorConfig::default();
        config.catalog.capacity = 0;
        assert!(matches!(
            WasmRuntime::new(config),
            Err(ExecutorError::Config(_))
        ));
    }
}
