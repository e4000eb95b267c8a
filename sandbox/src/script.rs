//! Wasm contracts.

use std::sync::Arc;

use wasmtime::Module;

use ledgerbox_hostapi::InvocationContext;
use ledgerbox_primitives::ContractError;

use crate::contract::ContractHandle;
use crate::host_impl::HostState;
use crate::interrupt::Interrupt;
use crate::manager::ManagerShared;
use crate::runtime::{Invocation, ScriptRuntime};

/// A compiled Wasm contract waiting to run.
///
/// The module comes from the shared cache; the store and instance are
/// created by [`ScriptRuntime::invoke`] and live only for the call.
pub struct ScriptEngineContract {
    handle: Arc<ContractHandle>,
    context: InvocationContext,
    interrupt: Interrupt,
    module: Module,
}

impl ScriptEngineContract {
    pub(crate) fn new(
        handle: Arc<ContractHandle>,
        context: InvocationContext,
        interrupt: Interrupt,
        runtime: &ScriptRuntime,
    ) -> Result<Self, ContractError> {
        let module = runtime.compile(&context.code)?;
        Ok(Self {
            handle,
            context,
            interrupt,
            module,
        })
    }

    pub fn handle(&self) -> &Arc<ContractHandle> {
        &self.handle
    }

    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    pub(crate) fn run(self, shared: &Arc<ManagerShared>) -> Invocation {
        let input = self.context.input.clone();
        let entry = self.handle.entry();
        let host = HostState::new(
            self.handle.id(),
            self.context,
            self.handle.is_readonly(),
            self.interrupt,
            Arc::clone(shared),
        );
        shared.runtime().invoke(&self.module, host, entry, &input)
    }
}
