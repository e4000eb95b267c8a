//! Host function registration via Wasmtime linker.
//!
//! Every entry of the host-API catalog is registered under the `ledger`
//! module with one shared adapter:
//! 1. Extracts memory from the Caller
//! 2. Reads the JSON argument array and validates the output slots
//! 3. Converts arguments to host values and dispatches
//! 4. Writes the JSON result into the host allocation region
//! 5. Returns an i32 status (0 = OK)
//!
//! ABI problems are reported through the status. Semantic failures are
//! returned as a trap carrying the `ContractError`.

use wasmtime::{Caller, Engine, Linker, Memory};

use ledgerbox_primitives::{ContractError, ErrorCode, HostValue};

use crate::host_impl::{self, HostFunction, HOST_API};
use crate::marshal::{self, host_to_script, script_to_host};
use crate::memory;
use crate::runtime::StoreData;

/// Import module every host function lives in.
pub const HOST_MODULE: &str = "ledger";

/// Why a host call did not complete normally.
enum CallFailure {
    /// Reported to the guest as a status code.
    Status(ErrorCode),
    /// Aborts the invocation.
    Fatal(ContractError),
}

impl From<ErrorCode> for CallFailure {
    fn from(code: ErrorCode) -> Self {
        Self::Status(code)
    }
}

impl From<ContractError> for CallFailure {
    fn from(err: ContractError) -> Self {
        Self::Fatal(err)
    }
}

fn get_memory(caller: &mut Caller<'_, StoreData>) -> Option<Memory> {
    caller.get_export("memory").and_then(|e| e.into_memory())
}

/// Build a linker with the whole catalog registered.
pub fn build_linker(engine: &Engine) -> Result<Linker<StoreData>, ContractError> {
    let mut linker = Linker::new(engine);
    for func in HOST_API {
        linker
            .func_wrap(
                HOST_MODULE,
                func.name,
                move |mut caller: Caller<'_, StoreData>,
                      args_ptr: i32,
                      args_len: i32,
                      out_ptr_ptr: i32,
                      out_len_ptr: i32|
                      -> anyhow::Result<i32> {
                    match call_from_guest(&mut caller, func, args_ptr, args_len, out_ptr_ptr, out_len_ptr) {
                        Ok(()) => Ok(ErrorCode::Ok.as_i32()),
                        Err(CallFailure::Status(code)) => Ok(code.as_i32()),
                        Err(CallFailure::Fatal(err)) => Err(anyhow::Error::new(err)),
                    }
                },
            )
            .map_err(|e| {
                ContractError::engine_init(format!("cannot register host function '{}': {}", func.name, e))
            })?;
    }
    Ok(linker)
}

fn call_from_guest(
    caller: &mut Caller<'_, StoreData>,
    func: &HostFunction,
    args_ptr: i32,
    args_len: i32,
    out_ptr_ptr: i32,
    out_len_ptr: i32,
) -> Result<(), CallFailure> {
    let mem = get_memory(caller).ok_or(ErrorCode::Internal)?;

    let raw_args = {
        let data = mem.data(&*caller);
        memory::validate_range(data.len(), out_ptr_ptr, 4)?;
        memory::validate_range(data.len(), out_len_ptr, 4)?;
        memory::read_bytes(data, args_ptr, args_len)?
    };
    let args = marshal::decode_args(&raw_args)
        .map_err(|_| ErrorCode::InvalidEncoding)?
        .iter()
        .map(script_to_host)
        .collect::<Result<Vec<HostValue>, _>>()?;

    let result = host_impl::dispatch(&mut caller.data_mut().host, func, &args)?;

    let encoded = match result {
        HostValue::Null => Vec::new(),
        value => marshal::encode(&host_to_script(&value)),
    };
    memory::write_output(&mem, &mut *caller, &encoded, out_ptr_ptr, out_len_ptr)?;
    Ok(())
}
