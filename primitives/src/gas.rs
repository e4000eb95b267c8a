//! Gas constants for host-API calls.
//!
//! Every host call pays a base cost before it runs. Storage and logging add a
//! per-byte charge; ledger operations that correspond to protocol operations
//! (`pay_coin`, `do_transaction`, `log`) additionally pay their fee-table gas.

/// Base cost charged on entry to any host function.
pub const G_HOST_CALL: u64 = 10;

/// Per-byte cost added to storage and log operations.
pub const G_PER_BYTE: u64 = 3;

/// Base cost for reading ledger state (balances, assets, block data).
pub const G_LEDGER_READ: u64 = 100;

/// Base cost for `storage_load`.
pub const G_STORAGE_LOAD: u64 = 200;

/// Base cost for `storage_store`.
pub const G_STORAGE_STORE: u64 = 500;

/// Base cost for `storage_delete`.
pub const G_STORAGE_DELETE: u64 = 300;

/// Base cost for dispatching a nested invocation.
pub const G_NESTED_CALL: u64 = 1_000;

/// Cost of one host-side 64-bit arithmetic operation.
pub const G_INT64_OP: u64 = 5;

/// Cost of the context accessors (`get_caller`, `get_block_number`, ...).
pub const G_CONTEXT_READ: u64 = 5;

/// Compute the gas cost for a `storage_load`.
pub fn gas_cost_storage_load(key_len: usize) -> u64 {
    G_STORAGE_LOAD.saturating_add((key_len as u64).saturating_mul(G_PER_BYTE))
}

/// Compute the gas cost for a `storage_store`.
pub fn gas_cost_storage_store(key_len: usize, val_len: usize) -> u64 {
    let byte_cost = (key_len.saturating_add(val_len) as u64).saturating_mul(G_PER_BYTE);
    G_STORAGE_STORE.saturating_add(byte_cost)
}

/// Compute the gas cost for a `storage_delete`.
pub fn gas_cost_storage_delete(key_len: usize) -> u64 {
    G_STORAGE_DELETE.saturating_add((key_len as u64).saturating_mul(G_PER_BYTE))
}

/// Per-byte part of a `log` call; the base comes from the fee table.
pub fn gas_cost_log_bytes(msg_len: usize) -> u64 {
    (msg_len as u64).saturating_mul(G_PER_BYTE)
}
