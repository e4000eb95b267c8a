//! Host-API catalog and per-invocation host state.
//!
//! `HOST_API` is the single list of functions a contract may call. The Wasm
//! linker registers every entry under the `ledger` import module; native
//! contracts reach the same entries through `NativeHost::call`. Arguments
//! and results are host values, so both paths share one implementation.
//!
//! Every call goes through [`dispatch`]: checkpoint, read-only check, base
//! gas, then the function body.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use ledgerbox_hostapi::{
    AssetKey, ExecutionConfig, FeeConfig, HostGasMeter, InvocationContext, NestedTransaction,
    Validator,
};
use ledgerbox_primitives::gas::*;
use ledgerbox_primitives::{
    operation_gas, ContractError, ContractId, ErrorKind, HostValue, OperationKind,
    MAX_BLOCK_HASH_OFFSET,
};

use crate::interrupt::Interrupt;
use crate::manager::ManagerShared;

/// Mutable state of one invocation, shared by every host call it makes.
pub struct HostState {
    pub contract_id: ContractId,
    pub context: InvocationContext,
    pub readonly: bool,
    pub interrupt: Interrupt,
    /// Authoritative host-side gas meter.
    pub gas_meter: HostGasMeter,
    pub config: ExecutionConfig,
    /// Lines recorded by `log`, in call order.
    pub logs: Vec<String>,
    manager: Arc<ManagerShared>,
}

impl HostState {
    pub(crate) fn new(
        contract_id: ContractId,
        context: InvocationContext,
        readonly: bool,
        interrupt: Interrupt,
        manager: Arc<ManagerShared>,
    ) -> Self {
        let config = manager.config().execution.clone();
        Self {
            contract_id,
            context,
            readonly,
            interrupt,
            gas_meter: HostGasMeter::new(config.gas_limit),
            config,
            logs: Vec::new(),
            manager,
        }
    }

    /// Record a log line. Lines past the count limit are dropped, long lines
    /// are cut at the length limit.
    fn add_log(&mut self, mut line: String) {
        if self.logs.len() >= self.config.max_log_lines as usize {
            return;
        }
        if line.len() > self.config.max_log_line_len {
            let mut cut = self.config.max_log_line_len;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
        }
        debug!(target: "contract", contract_id = self.contract_id, "{}", line);
        self.logs.push(line);
    }

    fn check_key(&self, key: &str) -> Result<(), ContractError> {
        if key.is_empty() || key.len() > self.config.max_key_len {
            return Err(ContractError::invalid_argument(format!(
                "storage key must be 1..={} bytes, got {}",
                self.config.max_key_len,
                key.len()
            )));
        }
        Ok(())
    }
}

/// Signature shared by every catalog entry.
pub type HostFn = fn(&mut HostState, &[HostValue]) -> Result<HostValue, ContractError>;

/// One entry of the host-API catalog.
#[derive(Clone, Copy)]
pub struct HostFunction {
    pub name: &'static str,
    /// Mutating functions are refused in read-only invocations.
    pub mutates: bool,
    pub call: HostFn,
}

macro_rules! host_fn {
    ($name:literal, $mutates:expr, $call:path) => {
        HostFunction {
            name: $name,
            mutates: $mutates,
            call: $call,
        }
    };
}

pub static HOST_API: &[HostFunction] = &[
    host_fn!("log", false, log),
    host_fn!("get_balance", false, get_balance),
    host_fn!("get_account_asset", false, get_account_asset),
    host_fn!("get_block_hash", false, get_block_hash),
    host_fn!("get_block_number", false, get_block_number),
    host_fn!("get_block_timestamp", false, get_block_timestamp),
    host_fn!("get_caller", false, get_caller),
    host_fn!("get_tx_origin", false, get_tx_origin),
    host_fn!("get_context", false, get_context),
    host_fn!("storage_store", true, storage_store),
    host_fn!("storage_load", false, storage_load),
    host_fn!("storage_delete", true, storage_delete),
    host_fn!("pay_coin", true, pay_coin),
    host_fn!("do_transaction", true, do_transaction),
    host_fn!("contract_query", false, contract_query),
    host_fn!("configure_fee", true, configure_fee),
    host_fn!("get_validators", false, get_validators),
    host_fn!("set_validators", true, set_validators),
    host_fn!("get_ledger_info", false, get_ledger_info),
    host_fn!("get_transaction_info", false, get_transaction_info),
    host_fn!("int64_add", false, int64_add),
    host_fn!("int64_sub", false, int64_sub),
    host_fn!("int64_mul", false, int64_mul),
    host_fn!("int64_div", false, int64_div),
    host_fn!("int64_mod", false, int64_mod),
    host_fn!("int64_compare", false, int64_compare),
];

/// Look up a catalog entry by import name.
pub fn find(name: &str) -> Option<&'static HostFunction> {
    HOST_API.iter().find(|f| f.name == name)
}

/// Run one host call with the checks every call is subject to.
pub fn dispatch(
    state: &mut HostState,
    func: &HostFunction,
    args: &[HostValue],
) -> Result<HostValue, ContractError> {
    state.interrupt.check()?;
    if func.mutates && state.readonly {
        return Err(ContractError::readonly(func.name));
    }
    state.gas_meter.charge(G_HOST_CALL)?;
    (func.call)(state, args)
}

// ── Argument helpers ──

fn arg<'a>(args: &'a [HostValue], index: usize) -> &'a HostValue {
    static NULL: HostValue = HostValue::Null;
    args.get(index).unwrap_or(&NULL)
}

fn str_arg<'a>(args: &'a [HostValue], index: usize, what: &str) -> Result<&'a str, ContractError> {
    arg(args, index)
        .as_str()
        .ok_or_else(|| ContractError::invalid_argument(format!("{} must be a string", what)))
}

fn int_arg(args: &[HostValue], index: usize, what: &str) -> Result<i64, ContractError> {
    arg(args, index)
        .as_i64()
        .ok_or_else(|| ContractError::invalid_argument(format!("{} must be an integer", what)))
}

/// Decimal string or integer, as accepted by the int64 family.
fn int64_arg(args: &[HostValue], index: usize) -> Result<i64, ContractError> {
    match arg(args, index) {
        HostValue::Int(i) => Ok(*i),
        HostValue::String(s) => s.trim().parse::<i64>().map_err(|_| {
            ContractError::invalid_argument(format!("'{}' is not a 64-bit integer", s))
        }),
        other => Err(ContractError::invalid_argument(format!(
            "int64 operand must be a decimal string or integer, got {}",
            other.to_json()
        ))),
    }
}

/// Address argument, defaulting to the running contract.
fn address_arg<'a>(state: &'a HostState, args: &'a [HostValue], index: usize) -> Result<&'a str, ContractError> {
    match arg(args, index) {
        HostValue::Null => Ok(state.context.this_address.as_str()),
        _ => str_arg(args, index, "address"),
    }
}

fn display(value: &HostValue) -> String {
    match value {
        HostValue::String(s) => s.clone(),
        other => other.to_json(),
    }
}

// ── Logging and context ──

fn log(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    let line = args.iter().map(display).collect::<Vec<_>>().join(" ");
    state.gas_meter.charge(gas_cost_log_bytes(line.len()))?;
    state.add_log(line);
    Ok(HostValue::Null)
}

fn get_block_number(state: &mut HostState, _args: &[HostValue]) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_CONTEXT_READ)?;
    Ok(HostValue::Int(state.context.block_number))
}

fn get_block_timestamp(state: &mut HostState, _args: &[HostValue]) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_CONTEXT_READ)?;
    Ok(HostValue::Int(state.context.timestamp))
}

fn get_caller(state: &mut HostState, _args: &[HostValue]) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_CONTEXT_READ)?;
    Ok(HostValue::from(state.context.sender.as_str()))
}

fn get_tx_origin(state: &mut HostState, _args: &[HostValue]) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_CONTEXT_READ)?;
    Ok(HostValue::from(state.context.tx_origin.as_str()))
}

fn get_context(state: &mut HostState, _args: &[HostValue]) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_CONTEXT_READ)?;
    let ctx = &state.context;
    Ok(HostValue::map([
        ("contract_id", HostValue::Int(state.contract_id)),
        ("this_address", HostValue::from(ctx.this_address.as_str())),
        ("sender", HostValue::from(ctx.sender.as_str())),
        ("tx_origin", HostValue::from(ctx.tx_origin.as_str())),
        ("trigger_tx_hash", HostValue::from(ctx.trigger_tx_hash.as_str())),
        ("operation_index", HostValue::Int(i64::from(ctx.operation_index))),
        ("consensus_value_hash", HostValue::from(ctx.consensus_value_hash.as_str())),
        ("timestamp", HostValue::Int(ctx.timestamp)),
        ("block_number", HostValue::Int(ctx.block_number)),
        ("pay_coin_amount", HostValue::Int(ctx.pay_coin_amount)),
        (
            "pay_asset",
            ctx.pay_asset
                .as_ref()
                .map(|a| a.to_host_value())
                .unwrap_or(HostValue::Null),
        ),
        ("gas_price", HostValue::Int(ctx.gas_price)),
        ("readonly", HostValue::Bool(state.readonly)),
    ]))
}

// ── Ledger reads ──

fn get_balance(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_LEDGER_READ)?;
    let address = address_arg(state, args, 0)?;
    Ok(state.context.ledger.balance(address)?.into())
}

fn get_account_asset(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_LEDGER_READ)?;
    let address = address_arg(state, args, 0)?;
    let asset = AssetKey::new(str_arg(args, 1, "issuer")?, str_arg(args, 2, "asset code")?);
    Ok(state.context.ledger.account_asset(address, &asset)?.into())
}

fn get_block_hash(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_LEDGER_READ)?;
    let offset = int_arg(args, 0, "block offset")?;
    if !(1..=MAX_BLOCK_HASH_OFFSET).contains(&offset) {
        return Err(ContractError::invalid_argument(format!(
            "block offset must be in 1..={}, got {}",
            MAX_BLOCK_HASH_OFFSET, offset
        )));
    }
    let block = state.context.block_number - offset;
    if block < 0 {
        return Ok(HostValue::Null);
    }
    Ok(state.context.ledger.block_hash(block)?.into())
}

fn get_validators(state: &mut HostState, _args: &[HostValue]) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_LEDGER_READ)?;
    let validators = state.context.ledger.validators()?;
    Ok(HostValue::Array(
        validators
            .into_iter()
            .map(|v| {
                HostValue::map([
                    ("address", HostValue::from(v.address)),
                    ("pledge", HostValue::Int(v.pledge)),
                ])
            })
            .collect(),
    ))
}

fn get_ledger_info(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_LEDGER_READ)?;
    let block = match arg(args, 0) {
        HostValue::Null => state.context.block_number,
        _ => int_arg(args, 0, "block number")?,
    };
    Ok(state.context.ledger.ledger_info(block)?.unwrap_or_default())
}

fn get_transaction_info(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_LEDGER_READ)?;
    let index = int_arg(args, 0, "transaction index")?;
    Ok(state.context.ledger.transaction_info(index)?.unwrap_or_default())
}

// ── Storage ──

fn storage_load(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    let key = str_arg(args, 0, "storage key")?;
    state.check_key(key)?;
    state.gas_meter.charge(gas_cost_storage_load(key.len()))?;
    let value = state.context.ledger.storage_load(&state.context.this_address, key)?;
    Ok(value.into())
}

fn storage_store(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    let key = str_arg(args, 0, "storage key")?;
    let value = str_arg(args, 1, "storage value")?;
    state.check_key(key)?;
    if value.len() > state.config.max_value_len {
        return Err(ContractError::invalid_argument(format!(
            "storage value exceeds {} bytes",
            state.config.max_value_len
        )));
    }
    state.gas_meter.charge(gas_cost_storage_store(key.len(), value.len()))?;
    state
        .context
        .ledger
        .storage_store(&state.context.this_address, key, value)?;
    Ok(HostValue::Bool(true))
}

fn storage_delete(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    let key = str_arg(args, 0, "storage key")?;
    state.check_key(key)?;
    state.gas_meter.charge(gas_cost_storage_delete(key.len()))?;
    state.context.ledger.storage_delete(&state.context.this_address, key)?;
    Ok(HostValue::Bool(true))
}

// ── Ledger mutations ──

fn pay_coin(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    let dest = str_arg(args, 0, "destination address")?;
    let amount = int64_arg(args, 1)?;
    if amount < 0 {
        return Err(ContractError::invalid_argument("pay_coin amount must not be negative"));
    }
    state.gas_meter.charge(operation_gas(OperationKind::PayCoin) as u64)?;
    state
        .context
        .ledger
        .pay_coin(&state.context.this_address, dest, amount)?;
    Ok(HostValue::Bool(true))
}

fn operation_kind(operation: &HostValue) -> Result<OperationKind, ContractError> {
    match operation.get("type") {
        Some(HostValue::Int(code)) => OperationKind::from_code(*code),
        Some(HostValue::String(name)) => name.parse(),
        _ => Err(ContractError::invalid_argument(
            "operation must be a map with a 'type' name or code",
        )),
    }
}

fn do_transaction(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    let operation = arg(args, 0).clone();
    let kind = operation_kind(&operation)?;
    state.gas_meter.charge(operation_gas(kind) as u64)?;
    state
        .context
        .nested_calls()
        .try_enter(state.config.max_nested_calls)?;
    debug!(
        contract_id = state.contract_id,
        operation = kind.name(),
        "contract issued transaction"
    );
    let runner = state.manager.nested_runner(&state.interrupt);
    let tx = NestedTransaction {
        source: state.context.this_address.clone(),
        kind,
        operation,
        parent: state.context.clone(),
        invoker: runner.clone(),
    };
    let outcome = state.context.ledger.do_transaction(tx);

    // A child stopped by our own cancellation reports as this invocation's
    // interrupt, not as a ledger failure.
    state.interrupt.check()?;
    let spent = runner.take_spent();
    state.gas_meter.charge(spent.gas)?;
    for line in spent.logs {
        state.add_log(line);
    }
    Ok(outcome?)
}

fn contract_query(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    let address = str_arg(args, 0, "contract address")?.to_string();
    let input = match arg(args, 1) {
        HostValue::Null => String::new(),
        other => display(other),
    };
    state.gas_meter.charge(G_NESTED_CALL)?;
    state
        .context
        .nested_calls()
        .try_enter(state.config.max_nested_calls)?;

    let Some(code) = state.context.ledger.contract_code(&address)? else {
        return Ok(HostValue::Null);
    };
    let nested = state.context.nested(address, code.code, input);
    let result = state
        .manager
        .run_nested_query(code.kind, nested, &state.interrupt);
    state.gas_meter.charge(result.gas_used)?;
    for line in &result.logs {
        state.add_log(line.clone());
    }
    result.into_result()
}

fn configure_fee(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    let fee = arg(args, 0);
    let field = |name: &str| {
        fee.get(name).and_then(HostValue::as_i64).ok_or_else(|| {
            ContractError::invalid_argument(format!("fee configuration needs integer '{}'", name))
        })
    };
    let fee = FeeConfig {
        gas_price: field("gas_price")?,
        base_reserve: field("base_reserve")?,
    };
    state.gas_meter.charge(G_STORAGE_STORE)?;
    state.context.ledger.configure_fee(fee)?;
    Ok(HostValue::Bool(true))
}

fn set_validators(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    let entries = arg(args, 0)
        .as_array()
        .ok_or_else(|| ContractError::invalid_argument("validators must be an array"))?;
    let validators = entries
        .iter()
        .map(|entry| {
            let address = entry.get("address").and_then(HostValue::as_str);
            let pledge = entry.get("pledge").and_then(HostValue::as_i64);
            match (address, pledge) {
                (Some(address), Some(pledge)) => Ok(Validator {
                    address: address.to_string(),
                    pledge,
                }),
                _ => Err(ContractError::invalid_argument(
                    "validator entries need 'address' and integer 'pledge'",
                )),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;
    state.gas_meter.charge(G_STORAGE_STORE)?;
    state.context.ledger.set_validators(validators)?;
    Ok(HostValue::Bool(true))
}

// ── 64-bit integer arithmetic ──

fn int64_binary(
    state: &mut HostState,
    args: &[HostValue],
    op: &str,
    apply: fn(i64, i64) -> Option<i64>,
) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_INT64_OP)?;
    let (a, b) = (int64_arg(args, 0)?, int64_arg(args, 1)?);
    apply(a, b)
        .map(|v| HostValue::from(v.to_string()))
        .ok_or_else(|| {
            ContractError::new(
                ErrorKind::ArithmeticOverflow,
                format!("{}({}, {}) overflows 64 bits", op, a, b),
            )
        })
}

fn int64_divisor(args: &[HostValue], op: &str) -> Result<(), ContractError> {
    if int64_arg(args, 1)? == 0 {
        return Err(ContractError::new(
            ErrorKind::DivisionByZero,
            format!("{} by zero", op),
        ));
    }
    Ok(())
}

fn int64_add(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    int64_binary(state, args, "int64_add", i64::checked_add)
}

fn int64_sub(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    int64_binary(state, args, "int64_sub", i64::checked_sub)
}

fn int64_mul(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    int64_binary(state, args, "int64_mul", i64::checked_mul)
}

fn int64_div(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    int64_divisor(args, "int64_div")?;
    int64_binary(state, args, "int64_div", i64::checked_div)
}

fn int64_mod(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    int64_divisor(args, "int64_mod")?;
    int64_binary(state, args, "int64_mod", i64::checked_rem)
}

fn int64_compare(state: &mut HostState, args: &[HostValue]) -> Result<HostValue, ContractError> {
    state.gas_meter.charge(G_INT64_OP)?;
    let ordering = int64_arg(args, 0)?.cmp(&int64_arg(args, 1)?);
    Ok(HostValue::Int(match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}
