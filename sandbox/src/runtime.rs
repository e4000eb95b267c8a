//! Script runtime: Wasmtime engine, module cache, and invocation.
//!
//! One `ScriptRuntime` is shared by every contract of a manager. Compiled
//! modules are cached by the BLAKE3 hash of their code. Each invocation
//! gets a fresh `Store` and `Instance`, dropped when the call returns.
//!
//! Shared libraries are registered by name and instantiated into the store
//! of each contract that imports them, so library state never outlives a
//! call.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::{Mutex, RwLock};
use tracing::debug;
use wasmtime::{
    Config, Engine, Instance, Linker, Memory, Module, Store, StoreLimits, StoreLimitsBuilder,
    Trap, UpdateDeadline, WasmBacktrace,
};

use ledgerbox_primitives::types::QUERY_ENTRY;
use ledgerbox_primitives::{ContractError, HostValue};

use crate::config::SandboxConfig;
use crate::host_impl::HostState;
use crate::linker::{build_linker, HOST_MODULE};
use crate::marshal::{self, script_to_host};
use crate::memory::{self, HostAllocator, HOST_ALLOC_PAGES, PAGE_SIZE};
use crate::validation::{
    syntax_error, validate_library, validate_library_name, validate_module,
};

/// Data held by a Wasmtime `Store` for one invocation.
pub struct StoreData {
    pub host: HostState,
    pub host_alloc: HostAllocator,
    limits: StoreLimits,
}

/// What an invocation produced, before fees are applied.
#[derive(Debug)]
pub struct Invocation {
    pub outcome: Result<HostValue, ContractError>,
    pub gas_used: u64,
    pub instructions: u64,
    pub logs: Vec<String>,
}

impl Invocation {
    /// Finish an invocation from its host state.
    pub fn from_host(
        host: HostState,
        outcome: Result<HostValue, ContractError>,
        instructions: u64,
    ) -> Self {
        Self {
            outcome,
            gas_used: host.gas_meter.consumed(),
            instructions,
            logs: host.logs,
        }
    }
}

pub struct ScriptRuntime {
    engine: Engine,
    linker: Linker<StoreData>,
    cache: Mutex<HashMap<[u8; 32], Module>>,
    libraries: RwLock<BTreeMap<String, Module>>,
    config: SandboxConfig,
}

impl ScriptRuntime {
    pub fn new(config: SandboxConfig) -> Result<Self, ContractError> {
        let engine = create_engine(&config)?;
        let linker = build_linker(&engine)?;
        Ok(Self {
            engine,
            linker,
            cache: Mutex::new(HashMap::new()),
            libraries: RwLock::new(BTreeMap::new()),
            config,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Compile and validate contract code, reusing a cached module.
    pub fn compile(&self, code: &str) -> Result<Module, ContractError> {
        let bytes = code_bytes(code);
        let key = *blake3::hash(&bytes).as_bytes();
        if let Some(module) = self.cache.lock().get(&key) {
            return Ok(module.clone());
        }

        let module = Module::new(&self.engine, &bytes).map_err(|e| syntax_error(&e))?;
        validate_module(&module, |name| self.library(name))?;

        let mut cache = self.cache.lock();
        if cache.len() >= self.config.module_cache_size {
            cache.clear();
        }
        cache.insert(key, module.clone());
        Ok(module)
    }

    /// Register library code under `name`, replacing any library of that name.
    /// Contracts reach its exports with `(import "<name>" "<export>" ...)`.
    pub fn register_library(&self, name: &str, code: &str) -> Result<(), ContractError> {
        validate_library_name(name)?;
        let bytes = code_bytes(code);
        let module = Module::new(&self.engine, &bytes).map_err(|e| syntax_error(&e))?;
        validate_library(&module)?;
        self.libraries.write().insert(name.to_string(), module);
        // Cached contracts were validated against the previous libraries.
        self.cache.lock().clear();
        Ok(())
    }

    fn library(&self, name: &str) -> Option<Module> {
        self.libraries.read().get(name).cloned()
    }

    /// Run `entry` of `module` with `input` in a fresh store.
    pub fn invoke(&self, module: &Module, host: HostState, entry: &str, input: &str) -> Invocation {
        let max_bytes = self.config.max_memory_pages as usize * PAGE_SIZE;
        let data = StoreData {
            host,
            host_alloc: HostAllocator::default(),
            limits: StoreLimitsBuilder::new().memory_size(max_bytes).build(),
        };
        let mut store = Store::new(&self.engine, data);
        store.limiter(|data| &mut data.limits);
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(|ctx| {
            ctx.data()
                .host
                .interrupt
                .check()
                .map(|()| UpdateDeadline::Continue(1))
                .map_err(anyhow::Error::new)
        });

        let outcome = match store.set_fuel(self.config.fuel_limit) {
            Ok(()) => self.run_entry(&mut store, module, entry, input),
            Err(e) => Err(ContractError::engine_init(format!("cannot set fuel: {}", e))),
        };
        let remaining = store.get_fuel().unwrap_or(0);
        let instructions = self.config.fuel_limit.saturating_sub(remaining);
        Invocation::from_host(store.into_data().host, outcome, instructions)
    }

    fn run_entry(
        &self,
        store: &mut Store<StoreData>,
        module: &Module,
        entry: &str,
        input: &str,
    ) -> Result<HostValue, ContractError> {
        let linker = self.link_libraries(store, module)?;
        let instance = linker
            .instantiate(&mut *store, module)
            .map_err(|e| classify(e, store))?;
        let memory = instance
            .get_memory(&mut *store, "memory")
            .ok_or_else(|| ContractError::script("module has no 'memory' export"))?;
        reserve_host_region(store, &memory)?;

        let func = entry_point(store, &instance, entry)?;

        store.data().host.interrupt.check()?;

        let in_ptr = memory::alloc_and_write(&memory, &mut *store, input.as_bytes())
            .map_err(|code| ContractError::script(format!("cannot pass input: {}", code)))?;
        let slots = memory::alloc_and_write(&memory, &mut *store, &[0u8; 8])
            .map_err(|code| ContractError::script(format!("cannot allocate output slots: {}", code)))?;
        let in_len = i32::try_from(input.len())
            .map_err(|_| ContractError::invalid_argument("input too large"))?;

        let status = func
            .call(&mut *store, (in_ptr, in_len, slots, slots + 4))
            .map_err(|e| classify(e, store))?;
        if status != 0 {
            return Err(ContractError::script(format!("{} returned status {}", entry, status)));
        }

        let bytes = {
            let mem = memory.data(&*store);
            let out_ptr = memory::read_i32(mem, slots);
            let out_len = memory::read_i32(mem, slots + 4);
            let raw = match (out_ptr, out_len) {
                (Ok(_), Ok(0)) => return Ok(HostValue::Null),
                (Ok(ptr), Ok(len)) => memory::read_bytes(mem, ptr, len),
                (Err(code), _) | (_, Err(code)) => Err(code),
            };
            raw.map_err(|code| ContractError::script(format!("invalid return buffer: {}", code)))?
        };
        let value = marshal::decode(&bytes)
            .map_err(|e| ContractError::script(format!("{} returned {}", entry, e)))?;
        script_to_host(&value)
    }
}

impl ScriptRuntime {
    /// The host linker, extended with a fresh instance of each library
    /// `module` imports.
    fn link_libraries(
        &self,
        store: &mut Store<StoreData>,
        module: &Module,
    ) -> Result<Cow<'_, Linker<StoreData>>, ContractError> {
        let names: BTreeSet<&str> = module
            .imports()
            .map(|import| import.module())
            .filter(|name| *name != HOST_MODULE)
            .collect();
        if names.is_empty() {
            return Ok(Cow::Borrowed(&self.linker));
        }

        let mut linker = self.linker.clone();
        for name in names {
            let library = self.library(name).ok_or_else(|| {
                ContractError::script(format!("library '{}' is not registered", name))
            })?;
            let instance =
                Instance::new(&mut *store, &library, &[]).map_err(|e| classify(e, store))?;
            linker
                .instance(&mut *store, name, instance)
                .map_err(|e| ContractError::script(format!("cannot link '{}': {}", name, e)))?;
        }
        Ok(Cow::Owned(linker))
    }
}

/// Create a Wasmtime engine with deterministic configuration.
fn create_engine(config: &SandboxConfig) -> Result<Engine, ContractError> {
    let mut wasm_config = Config::new();

    // Fuel bounds pure compute, epochs bound wall-clock time
    wasm_config.consume_fuel(true);
    wasm_config.epoch_interruption(true);

    // Determinism enforcement
    wasm_config.wasm_threads(false);
    wasm_config.wasm_relaxed_simd(false);
    wasm_config.wasm_simd(false);
    wasm_config.wasm_multi_memory(false);
    wasm_config.cranelift_nan_canonicalization(true);

    let max_bytes = (config.max_memory_pages as u64) * PAGE_SIZE as u64;
    wasm_config.memory_guaranteed_dense_image_size(max_bytes.min(16 * 1024 * 1024));

    Engine::new(&wasm_config)
        .map_err(|e| ContractError::engine_init(format!("cannot create engine: {}", e)))
}

/// Accept hex-encoded binaries as well as WAT text and raw binaries.
fn code_bytes(code: &str) -> Cow<'_, [u8]> {
    let trimmed = code.trim();
    let hex_body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_body.len() >= 8 && hex_body[..8].eq_ignore_ascii_case("0061736d") {
        if let Ok(bytes) = hex::decode(hex_body) {
            return Cow::Owned(bytes);
        }
    }
    Cow::Borrowed(code.as_bytes())
}

/// Grow memory for the host allocation region, after the guest's own pages.
fn reserve_host_region(store: &mut Store<StoreData>, memory: &Memory) -> Result<(), ContractError> {
    let base_pages = memory
        .grow(&mut *store, HOST_ALLOC_PAGES)
        .map_err(|e| ContractError::script(format!("cannot reserve host memory: {}", e)))?;
    store.data_mut().host_alloc = HostAllocator::new(
        base_pages as usize * PAGE_SIZE,
        HOST_ALLOC_PAGES as usize * PAGE_SIZE,
    );
    Ok(())
}

fn entry_point(
    store: &mut Store<StoreData>,
    instance: &Instance,
    entry: &str,
) -> Result<wasmtime::TypedFunc<(i32, i32, i32, i32), i32>, ContractError> {
    if instance.get_export(&mut *store, entry).is_none() {
        let what = if entry == QUERY_ENTRY { "query entry" } else { "entry" };
        return Err(ContractError::script(format!(
            "contract has no {} '{}'",
            what, entry
        )));
    }
    instance
        .get_typed_func::<(i32, i32, i32, i32), i32>(&mut *store, entry)
        .map_err(|e| ContractError::script(format!("bad entry '{}': {}", entry, e)))
}

/// Map a Wasmtime failure onto the contract error taxonomy.
fn classify(err: anyhow::Error, store: &Store<StoreData>) -> ContractError {
    let stack = err.downcast_ref::<WasmBacktrace>().map(|bt| bt.to_string());
    let classified = if let Some(contract_err) = err.downcast_ref::<ContractError>() {
        contract_err.clone()
    } else {
        match err.downcast_ref::<Trap>() {
            Some(Trap::OutOfFuel) => ContractError::gas_exhausted("instruction fuel exhausted"),
            Some(Trap::Interrupt) => store
                .data()
                .host
                .interrupt
                .check()
                .err()
                .unwrap_or_else(|| ContractError::script("execution interrupted")),
            Some(trap) => ContractError::script(trap.to_string()),
            None => ContractError::script(format!("{:#}", err)),
        }
    };
    debug!(
        contract_id = store.data().host.contract_id,
        kind = %classified.kind,
        "guest execution failed"
    );
    match stack {
        Some(stack) if classified.stack.is_none() => classified.with_stack(stack),
        _ => classified,
    }
}
