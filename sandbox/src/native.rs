//! Native contracts: Rust programs registered with the manager by name.
//!
//! A native program sees the same host-API catalog as Wasm code, through
//! [`NativeHost::call`]. It cannot be preempted, so cancellation and the
//! deadline are observed at host calls and at explicit
//! [`NativeHost::checkpoint`] calls.

use std::sync::Arc;

use ledgerbox_hostapi::InvocationContext;
use ledgerbox_primitives::{ContractError, ContractId, HostValue};

use crate::contract::ContractHandle;
use crate::host_impl::{self, HostState};
use crate::interrupt::Interrupt;
use crate::manager::ManagerShared;
use crate::runtime::Invocation;

/// Behaviour of a native contract.
pub trait NativeProgram: Send + Sync {
    /// Entry run by `execute`.
    fn main(&self, host: &mut NativeHost<'_>, input: &str) -> Result<HostValue, ContractError>;

    /// Entry run by `query`. Programs without one fail the query.
    fn query(&self, host: &mut NativeHost<'_>, input: &str) -> Result<HostValue, ContractError> {
        let _ = (host, input);
        Err(ContractError::script("native program has no query entry"))
    }
}

/// Host access for a running native program.
pub struct NativeHost<'a> {
    state: &'a mut HostState,
}

impl NativeHost<'_> {
    /// Call a catalog function by name.
    pub fn call(&mut self, name: &str, args: &[HostValue]) -> Result<HostValue, ContractError> {
        let func = host_impl::find(name).ok_or_else(|| {
            ContractError::invalid_argument(format!("unknown host function '{}'", name))
        })?;
        host_impl::dispatch(self.state, func, args)
    }

    pub fn context(&self) -> &InvocationContext {
        &self.state.context
    }

    pub fn contract_id(&self) -> ContractId {
        self.state.contract_id
    }

    pub fn is_readonly(&self) -> bool {
        self.state.readonly
    }

    /// Fail if the invocation was cancelled or ran out of time.
    pub fn checkpoint(&self) -> Result<(), ContractError> {
        self.state.interrupt.check()
    }
}

pub struct NativeContract {
    handle: Arc<ContractHandle>,
    context: InvocationContext,
    interrupt: Interrupt,
    program: Arc<dyn NativeProgram>,
}

impl NativeContract {
    pub(crate) fn new(
        handle: Arc<ContractHandle>,
        context: InvocationContext,
        interrupt: Interrupt,
        program: Arc<dyn NativeProgram>,
    ) -> Self {
        Self {
            handle,
            context,
            interrupt,
            program,
        }
    }

    pub fn handle(&self) -> &Arc<ContractHandle> {
        &self.handle
    }

    pub fn context(&self) -> &InvocationContext {
        &self.context
    }

    pub(crate) fn run(self, shared: &Arc<ManagerShared>) -> Invocation {
        let input = self.context.input.clone();
        let readonly = self.handle.is_readonly();
        let mut state = HostState::new(
            self.handle.id(),
            self.context,
            readonly,
            self.interrupt,
            Arc::clone(shared),
        );
        let outcome = state.interrupt.check().and_then(|()| {
            let mut host = NativeHost { state: &mut state };
            if readonly {
                self.program.query(&mut host, &input)
            } else {
                self.program.main(&mut host, &input)
            }
        });
        Invocation::from_host(state, outcome, 0)
    }
}
