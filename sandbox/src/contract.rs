//! Contract instances.
//!
//! A `Contract` is created by the manager for exactly one invocation and
//! consumed by running it. The variant is fixed by the contract kind: a
//! Wasm module run by the script runtime, or a registered native program.

use std::sync::Arc;

use ledgerbox_hostapi::InvocationContext;
use ledgerbox_primitives::types::{MAIN_ENTRY, QUERY_ENTRY};
use ledgerbox_primitives::{
    calculate_fee, ContractError, ContractId, ContractKind, ErrorKind, ExecutionResult, HostValue,
};

use crate::interrupt::{CancellationToken, Interrupt};
use crate::manager::ManagerShared;
use crate::native::NativeContract;
use crate::runtime::Invocation;
use crate::script::ScriptEngineContract;

/// Registry-visible identity of an in-flight contract.
///
/// Everything here is immutable except the cancellation token, which any
/// thread may set.
#[derive(Debug)]
pub struct ContractHandle {
    id: ContractId,
    kind: ContractKind,
    readonly: bool,
    this_address: String,
    token: CancellationToken,
}

impl ContractHandle {
    pub(crate) fn new(id: ContractId, kind: ContractKind, readonly: bool, this_address: String) -> Self {
        Self {
            id,
            kind,
            readonly,
            this_address,
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ContractId {
        self.id
    }

    pub fn kind(&self) -> ContractKind {
        self.kind
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn this_address(&self) -> &str {
        &self.this_address
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Entry point this invocation runs.
    pub fn entry(&self) -> &'static str {
        if self.readonly {
            QUERY_ENTRY
        } else {
            MAIN_ENTRY
        }
    }
}

/// One contract invocation, tagged by engine.
pub enum Contract {
    Script(ScriptEngineContract),
    Native(NativeContract),
}

impl Contract {
    /// Build the variant for `handle.kind()`.
    ///
    /// Script code is compiled here (`SyntaxError`); a native program must
    /// be registered under the code string (`EngineInitError`).
    pub(crate) fn create(
        handle: Arc<ContractHandle>,
        context: InvocationContext,
        interrupt: Interrupt,
        shared: &ManagerShared,
    ) -> Result<Self, ContractError> {
        match handle.kind() {
            ContractKind::Script => {
                ScriptEngineContract::new(handle, context, interrupt, shared.runtime()).map(Self::Script)
            }
            ContractKind::Native => {
                let program = shared.native(&context.code)?;
                Ok(Self::Native(NativeContract::new(handle, context, interrupt, program)))
            }
        }
    }

    pub fn handle(&self) -> &Arc<ContractHandle> {
        match self {
            Self::Script(c) => c.handle(),
            Self::Native(c) => c.handle(),
        }
    }

    pub fn id(&self) -> ContractId {
        self.handle().id()
    }

    pub fn kind(&self) -> ContractKind {
        self.handle().kind()
    }

    pub fn context(&self) -> &InvocationContext {
        match self {
            Self::Script(c) => c.context(),
            Self::Native(c) => c.context(),
        }
    }

    /// Run to completion and produce the result.
    pub(crate) fn run(self, shared: &Arc<ManagerShared>) -> ExecutionResult {
        let id = self.id();
        let gas_price = self.context().gas_price;
        let invocation = match self {
            Self::Script(c) => c.run(shared),
            Self::Native(c) => c.run(shared),
        };
        finish(id, gas_price, invocation)
    }
}

/// Apply the fee and fold an invocation into its result.
///
/// A fee that cannot be represented fails an otherwise successful
/// invocation with `FeeOverflow`.
pub(crate) fn finish(contract_id: ContractId, gas_price: i64, invocation: Invocation) -> ExecutionResult {
    let Invocation {
        outcome,
        gas_used,
        instructions,
        logs,
    } = invocation;
    let fee = i64::try_from(gas_used)
        .map_err(|_| ContractError::new(ErrorKind::FeeOverflow, format!("gas {} exceeds i64", gas_used)))
        .and_then(|gas| calculate_fee(gas_price, gas));
    let (return_value, error, fee) = match (outcome, fee) {
        (Ok(value), Ok(fee)) => (value, None, fee),
        (Ok(_), Err(err)) => (HostValue::Null, Some(err), 0),
        (Err(err), fee) => (HostValue::Null, Some(err), fee.unwrap_or(0)),
    };
    ExecutionResult {
        contract_id,
        return_value,
        error,
        gas_used,
        instructions,
        fee,
        logs,
    }
}
