//! Shared helpers for the sandbox integration tests.
//!
//! Contracts are written inline as WAT. Every builder produces a module
//! exporting `memory` plus both `main` and `query` with the guest ABI
//! `(in_ptr, in_len, out_ptr_ptr, out_len_ptr) -> status`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use ledgerbox_hostapi::{InvocationContext, LedgerContext, LedgerError, MemLedger, NestedTransaction};
use ledgerbox_primitives::HostValue;
use ledgerbox_sandbox::{ContractManager, SandboxConfig};

pub const CONTRACT: &str = "buQcontract";
pub const ALICE: &str = "buQalice";
pub const BOB: &str = "buQbob";

pub const BLOCK_NUMBER: i64 = 100;
pub const TIMESTAMP: i64 = 1_700_000_000;

/// Route `tracing` output to the test harness. `RUST_LOG` selects levels.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Managers ──

pub fn manager() -> ContractManager {
    manager_with(SandboxConfig::default())
}

pub fn manager_with(config: SandboxConfig) -> ContractManager {
    init_tracing();
    ContractManager::initialize(config).expect("manager should initialize")
}

/// Config with a short wall-clock budget for interrupt tests.
pub fn short_timeout(timeout_ms: u64) -> SandboxConfig {
    SandboxConfig {
        timeout_ms,
        ..SandboxConfig::default()
    }
}

// ── Ledger and context ──

pub fn ledger() -> Arc<MemLedger> {
    Arc::new(MemLedger::new().with_balance(CONTRACT, 1_000).with_balance(ALICE, 500))
}

/// Context for `code` deployed at `CONTRACT`, called by `ALICE`.
pub fn context(ledger: &Arc<MemLedger>, code: &str, input: &str) -> InvocationContext {
    InvocationContext::new(ledger.clone(), code)
        .with_input(input)
        .with_this_address(CONTRACT)
        .with_sender(ALICE)
        .with_block(BLOCK_NUMBER, TIMESTAMP)
        .with_gas_price(1)
}

/// Apply `payment` transactions by running the contract deployed at
/// `dest_address` with the operation's `input`, as a child of the issuer.
/// Payments to plain accounts do nothing.
pub fn route_payments_to_contracts(ledger: &Arc<MemLedger>) {
    ledger.set_transaction_handler(Arc::new(|tx: NestedTransaction| {
        let dest = tx
            .operation
            .get("dest_address")
            .and_then(HostValue::as_str)
            .ok_or_else(|| LedgerError::Rejected("payment requires dest_address".into()))?;
        let input = tx.operation.get("input").and_then(HostValue::as_str).unwrap_or("");
        let Some(code) = tx.parent.ledger.contract_code(dest)? else {
            return Ok(HostValue::Null);
        };
        tx.execute(code.kind, dest, code.code, input)
            .into_result()
            .map_err(LedgerError::Nested)
    }));
}

/// A `payment` descriptor addressed to `dest`.
pub fn payment(dest: &str, input: &str) -> HostValue {
    HostValue::map([
        ("type", HostValue::from("payment")),
        ("dest_address", HostValue::from(dest)),
        ("input", HostValue::from(input)),
    ])
}

/// Poll until `cond` holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

// ── WAT contracts ──

/// Quote `text` as a WAT string literal body.
fn wat_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for b in text.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:02x}", b)),
        }
    }
    out
}

fn entry_exports(func: &str) -> String {
    format!(
        r#"(export "main" (func {f})) (export "query" (func {f}))"#,
        f = func
    )
}

/// Returns its input unchanged. Input must be a JSON value.
pub fn echo_contract() -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
  (func $run (param $in i32) (param $len i32) (param $out i32) (param $out_len i32) (result i32)
    (i32.store (local.get $out) (local.get $in))
    (i32.store (local.get $out_len) (local.get $len))
    (i32.const 0))
  {})"#,
        entry_exports("$run")
    )
}

/// Calls host functions in order, each with a fixed JSON argument array,
/// and returns the result of the last one. A non-zero host status is
/// returned as the entry status.
pub fn sequence_contract(calls: &[(&str, &str)]) -> String {
    let mut imports = Vec::new();
    for (name, _) in calls {
        if !imports.contains(name) {
            imports.push(*name);
        }
    }
    let imports: String = imports
        .iter()
        .map(|name| {
            format!(
                "  (import \"ledger\" \"{n}\" (func ${n} (param i32 i32 i32 i32) (result i32)))\n",
                n = name
            )
        })
        .collect();

    // Result slots live at 0..8, argument arrays from 16 upward.
    let mut offset = 16usize;
    let mut data = String::new();
    let mut body = String::new();
    for (name, args) in calls {
        data.push_str(&format!(
            "  (data (i32.const {}) \"{}\")\n",
            offset,
            wat_escape(args)
        ));
        body.push_str(&format!(
            "    (local.set $status (call ${} (i32.const {}) (i32.const {}) (i32.const 0) (i32.const 4)))\n\
             \x20   (if (i32.ne (local.get $status) (i32.const 0)) (then (return (local.get $status))))\n",
            name,
            offset,
            args.len()
        ));
        offset += (args.len() + 7) / 8 * 8 + 8;
    }

    format!(
        r#"(module
{imports}  (memory (export "memory") 1)
{data}  (func $run (param $in i32) (param $len i32) (param $out i32) (param $out_len i32) (result i32)
    (local $status i32)
{body}    (i32.store (local.get $out) (i32.load (i32.const 0)))
    (i32.store (local.get $out_len) (i32.load (i32.const 4)))
    (i32.const 0))
  {exports})"#,
        imports = imports,
        data = data,
        body = body,
        exports = entry_exports("$run")
    )
}

/// Calls one host function and returns its result.
pub fn forwarding_contract(func: &str, args_json: &str) -> String {
    sequence_contract(&[(func, args_json)])
}

/// Passes the invocation input straight through as the argument array of
/// `func` and returns its result.
pub fn input_forwarding_contract(func: &str) -> String {
    format!(
        r#"(module
  (import "ledger" "{f}" (func $host (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (func $run (param $in i32) (param $len i32) (param $out i32) (param $out_len i32) (result i32)
    (local $status i32)
    (local.set $status (call $host (local.get $in) (local.get $len) (i32.const 0) (i32.const 4)))
    (if (i32.ne (local.get $status) (i32.const 0)) (then (return (local.get $status))))
    (i32.store (local.get $out) (i32.load (i32.const 0)))
    (i32.store (local.get $out_len) (i32.load (i32.const 4)))
    (i32.const 0))
  {exports})"#,
        f = func,
        exports = entry_exports("$run")
    )
}

/// Never returns.
pub fn spin_contract() -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
  (func $run (param i32 i32 i32 i32) (result i32)
    (loop $spin (br $spin))
    (i32.const 0))
  {})"#,
        entry_exports("$run")
    )
}

/// Traps with `unreachable`.
pub fn trap_contract() -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
  (func $run (param i32 i32 i32 i32) (result i32)
    unreachable)
  {})"#,
        entry_exports("$run")
    )
}

/// Returns `status` without producing output.
pub fn status_contract(status: i32) -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
  (func $run (param i32 i32 i32 i32) (result i32)
    (i32.const {}))
  {})"#,
        status,
        entry_exports("$run")
    )
}

/// Only exports `main`.
pub fn main_only_contract() -> String {
    r#"(module
  (memory (export "memory") 1)
  (func (export "main") (param i32 i32 i32 i32) (result i32)
    (i32.const 0)))"#
        .to_string()
}

/// Tries to grow memory by `pages`; returns status 1 if the grow fails.
pub fn grow_contract(pages: u32) -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
  (func $run (param i32 i32 i32 i32) (result i32)
    (if (i32.eq (memory.grow (i32.const {})) (i32.const -1))
      (then (return (i32.const 1))))
    (i32.const 0))
  {})"#,
        pages,
        entry_exports("$run")
    )
}
