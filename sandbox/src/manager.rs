//! Contract manager: registry, id allocation, and the public entry points.
//!
//! Every invocation, including nested ones, is registered under a fresh
//! id for as long as it runs. The registry is what makes `cancel(id)` and
//! a bounded `exit()` possible.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};

use ledgerbox_hostapi::{InvocationContext, NestedInvoker};
use ledgerbox_primitives::{ContractError, ContractId, ContractKind, ExecutionResult};

use crate::config::SandboxConfig;
use crate::contract::{Contract, ContractHandle};
use crate::interrupt::{deadline_after, EpochTicker, Interrupt};
use crate::native::NativeProgram;
use crate::query::{QueryContract, ResultSlot};
use crate::runtime::ScriptRuntime;

/// State shared between the manager, its query workers, and running
/// contracts that issue nested calls.
pub struct ManagerShared {
    runtime: ScriptRuntime,
    registry: Mutex<BTreeMap<ContractId, Arc<ContractHandle>>>,
    drained: Condvar,
    next_id: AtomicI64,
    natives: RwLock<HashMap<String, Arc<dyn NativeProgram>>>,
    closed: AtomicBool,
}

impl ManagerShared {
    pub(crate) fn new(config: SandboxConfig) -> Result<Arc<Self>, ContractError> {
        Ok(Arc::new(Self {
            runtime: ScriptRuntime::new(config)?,
            registry: Mutex::new(BTreeMap::new()),
            drained: Condvar::new(),
            next_id: AtomicI64::new(1),
            natives: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn config(&self) -> &SandboxConfig {
        self.runtime.config()
    }

    pub(crate) fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    pub(crate) fn native(&self, name: &str) -> Result<Arc<dyn NativeProgram>, ContractError> {
        self.natives.read().get(name).cloned().ok_or_else(|| {
            ContractError::engine_init(format!("no native program registered as '{}'", name))
        })
    }

    /// Allocate an id and register the contract as in flight.
    fn admit(
        self: &Arc<Self>,
        kind: ContractKind,
        readonly: bool,
        this_address: &str,
    ) -> Result<(Arc<ContractHandle>, RegistrationGuard), ContractError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ContractError::engine_init("contract manager is closed"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ContractHandle::new(id, kind, readonly, this_address.to_string()));
        self.registry.lock().insert(id, Arc::clone(&handle));
        let guard = RegistrationGuard {
            shared: Arc::clone(self),
            id,
        };
        Ok((handle, guard))
    }

    /// Build and run an admitted contract. Deregisters it on return.
    fn run_admitted(
        self: &Arc<Self>,
        handle: Arc<ContractHandle>,
        guard: RegistrationGuard,
        context: InvocationContext,
        interrupt: Interrupt,
    ) -> ExecutionResult {
        let id = handle.id();
        debug!(
            contract_id = id,
            kind = %handle.kind(),
            entry = handle.entry(),
            address = %handle.this_address(),
            "contract started"
        );
        let result = match Contract::create(handle, context, interrupt, self) {
            Ok(contract) => contract.run(self),
            Err(err) => ExecutionResult::failed(id, err),
        };
        debug!(
            contract_id = id,
            gas_used = result.gas_used,
            instructions = result.instructions,
            error = ?result.error_kind(),
            "contract finished"
        );
        drop(guard);
        result
    }

    fn invoke(
        self: &Arc<Self>,
        kind: ContractKind,
        context: InvocationContext,
        readonly: bool,
        parent: Option<&Interrupt>,
    ) -> ExecutionResult {
        let (handle, guard) = match self.admit(kind, readonly, &context.this_address) {
            Ok(admitted) => admitted,
            Err(err) => return ExecutionResult::failed(0, err),
        };
        let budget = self.config().timeout();
        let token = handle.token().clone();
        let interrupt = match parent {
            Some(parent) => parent.nested(token, budget),
            None => Interrupt::new(token, budget),
        };
        self.run_admitted(handle, guard, context, interrupt)
    }

    /// Run a read-only contract on behalf of a running one.
    ///
    /// The child is registered under its own id, inherits the caller's
    /// cancellation, and never outlives the caller's deadline.
    pub(crate) fn run_nested_query(
        self: &Arc<Self>,
        kind: ContractKind,
        context: InvocationContext,
        parent: &Interrupt,
    ) -> ExecutionResult {
        self.invoke(kind, context, true, Some(parent))
    }

    /// Invoker handed to the ledger with a contract-issued transaction.
    pub(crate) fn nested_runner(self: &Arc<Self>, parent: &Interrupt) -> Arc<NestedRunner> {
        Arc::new(NestedRunner {
            shared: Arc::clone(self),
            parent: parent.clone(),
            spent: Mutex::new(Spent::default()),
        })
    }

    fn lookup(&self, id: ContractId) -> Option<Arc<ContractHandle>> {
        self.registry.lock().get(&id).cloned()
    }

    fn deregister(&self, id: ContractId) {
        let mut registry = self.registry.lock();
        registry.remove(&id);
        if registry.is_empty() {
            self.drained.notify_all();
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Spent {
    pub gas: u64,
    pub logs: Vec<String>,
}

/// Runs contracts triggered through `do_transaction` as children of the
/// issuing invocation. Children stop with the issuer's cancellation and
/// deadline.
pub(crate) struct NestedRunner {
    shared: Arc<ManagerShared>,
    parent: Interrupt,
    spent: Mutex<Spent>,
}

impl NestedRunner {
    /// Gas and logs of every child run so far. Resets the tally.
    pub(crate) fn take_spent(&self) -> Spent {
        std::mem::take(&mut *self.spent.lock())
    }
}

impl NestedInvoker for NestedRunner {
    fn execute(&self, kind: ContractKind, context: InvocationContext) -> ExecutionResult {
        let result = self.shared.invoke(kind, context, false, Some(&self.parent));
        let mut spent = self.spent.lock();
        spent.gas = spent.gas.saturating_add(result.gas_used);
        spent.logs.extend(result.logs.iter().cloned());
        result
    }
}

/// Removes a contract from the registry when its invocation ends,
/// whichever way it ends.
pub(crate) struct RegistrationGuard {
    shared: Arc<ManagerShared>,
    id: ContractId,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.shared.deregister(self.id);
    }
}

/// Process-wide owner of the contract engines.
///
/// `execute` and `query` run on the calling thread. `spawn_query` runs on
/// a dedicated worker pool and returns a handle to wait on.
pub struct ContractManager {
    shared: Arc<ManagerShared>,
    ticker: Mutex<Option<EpochTicker>>,
    pool: rayon::ThreadPool,
}

impl ContractManager {
    /// Create the engine, the epoch ticker, and the query workers.
    pub fn initialize(config: SandboxConfig) -> Result<Self, ContractError> {
        let interval = config.checkpoint_interval();
        let workers = config.query_workers.max(1);
        let shared = ManagerShared::new(config)?;
        let ticker = EpochTicker::start(shared.runtime().engine().clone(), interval)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("contract-query-{}", i))
            .build()
            .map_err(|e| ContractError::engine_init(format!("cannot start query workers: {}", e)))?;
        info!(
            timeout_ms = shared.config().timeout_ms,
            fuel_limit = shared.config().fuel_limit,
            query_workers = workers,
            "contract manager initialized"
        );
        Ok(Self {
            shared,
            ticker: Mutex::new(Some(ticker)),
            pool,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        self.shared.config()
    }

    /// Make a native program available under `name`. Replaces any earlier
    /// registration of the same name.
    pub fn register_native(&self, name: impl Into<String>, program: Arc<dyn NativeProgram>) {
        let name = name.into();
        debug!(name = %name, "native program registered");
        self.shared.natives.write().insert(name, program);
    }

    /// Make script library code importable under `name`.
    pub fn register_library(&self, name: &str, code: &str) -> Result<(), ContractError> {
        self.shared.runtime().register_library(name, code)?;
        debug!(name = %name, "script library registered");
        Ok(())
    }

    /// Run `main` of a contract. May mutate ledger state.
    pub fn execute(&self, kind: ContractKind, context: InvocationContext) -> ExecutionResult {
        self.shared.invoke(kind, context, false, None)
    }

    /// Run `query` of a contract in read-only mode.
    pub fn query(&self, kind: ContractKind, context: InvocationContext) -> ExecutionResult {
        self.shared.invoke(kind, context, true, None)
    }

    /// Submit a read-only invocation to the worker pool.
    ///
    /// The id is allocated and registered at submission, so the query can
    /// be cancelled before a worker picks it up. Its deadline starts when it
    /// begins running.
    pub fn spawn_query(
        &self,
        kind: ContractKind,
        context: InvocationContext,
    ) -> Result<QueryContract, ContractError> {
        if kind == ContractKind::Native {
            self.shared.native(&context.code)?;
        }
        let (handle, guard) = self.shared.admit(kind, true, &context.this_address)?;
        let slot = Arc::new(ResultSlot::default());

        let shared = Arc::clone(&self.shared);
        let task_handle = Arc::clone(&handle);
        let task_slot = Arc::clone(&slot);
        self.pool.spawn(move || {
            let interrupt = Interrupt::new(task_handle.token().clone(), shared.config().timeout());
            let result = shared.run_admitted(task_handle, guard, context, interrupt);
            task_slot.fill(result);
        });
        Ok(QueryContract::new(handle, slot))
    }

    /// Request cancellation of an in-flight contract. Returns false for an
    /// unknown or already finished id.
    pub fn cancel(&self, id: ContractId) -> bool {
        match self.shared.lookup(id) {
            Some(handle) => {
                handle.cancel();
                warn!(contract_id = id, "contract cancelled");
                true
            }
            None => false,
        }
    }

    /// Check that code would load, without running it or allocating an id.
    pub fn source_code_check(&self, kind: ContractKind, code: &str) -> Result<(), ContractError> {
        match kind {
            ContractKind::Script => self.shared.runtime().compile(code).map(|_| ()),
            ContractKind::Native => {
                if self.shared.natives.read().contains_key(code) {
                    Ok(())
                } else {
                    Err(ContractError::syntax(
                        format!("unknown native program '{}'", code),
                        None,
                    ))
                }
            }
        }
    }

    /// Look up an in-flight contract.
    pub fn get_contract(&self, id: ContractId) -> Option<Arc<ContractHandle>> {
        self.shared.lookup(id)
    }

    /// Ids of every contract currently in flight, ascending.
    pub fn in_flight(&self) -> Vec<ContractId> {
        self.shared.registry.lock().keys().copied().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop accepting work, cancel whatever is running, and wait for it to
    /// unwind for at most one timeout. Idempotent.
    pub fn exit(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            let running: Vec<Arc<ContractHandle>> =
                self.shared.registry.lock().values().cloned().collect();
            if !running.is_empty() {
                warn!(count = running.len(), "cancelling in-flight contracts");
            }
            for handle in &running {
                handle.cancel();
            }

            let deadline = deadline_after(self.shared.config().timeout());
            let mut registry = self.shared.registry.lock();
            while !registry.is_empty() {
                if self.shared.drained.wait_until(&mut registry, deadline).timed_out() {
                    warn!(remaining = registry.len(), "contracts still running at exit");
                    break;
                }
            }
            drop(registry);
            info!("contract manager closed");
        }
        if let Some(mut ticker) = self.ticker.lock().take() {
            ticker.stop();
        }
    }
}

impl Drop for ContractManager {
    fn drop(&mut self) {
        self.exit();
    }
}
