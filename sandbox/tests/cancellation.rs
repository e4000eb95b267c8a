//! Cooperative cancellation of running contracts.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ledgerbox_hostapi::{ContractCode, MemLedger};
use ledgerbox_primitives::{ContractError, ContractKind, ErrorKind, HostValue};
use ledgerbox_sandbox::{ContractManager, NativeHost, NativeProgram, SandboxConfig};

use common::*;

const SPINNER: &str = "buQspinner";

/// Long enough that only cancellation can stop a spinning guest.
fn patient() -> ContractManager {
    manager_with(SandboxConfig {
        fuel_limit: 1 << 40,
        timeout_ms: 30_000,
        ..SandboxConfig::default()
    })
}

fn wait_in_flight(manager: &ContractManager, count: usize) -> Vec<i64> {
    assert!(
        wait_for(Duration::from_secs(5), || manager.in_flight().len() >= count),
        "expected {} contracts in flight",
        count
    );
    manager.in_flight()
}

// ── Test: cancel by id ──

#[test]
fn test_cancel_running_execute() {
    let manager = patient();
    let ledger = ledger();
    let code = spin_contract();

    thread::scope(|s| {
        let running = s.spawn(|| manager.execute(ContractKind::Script, context(&ledger, &code, "")));

        let id = wait_in_flight(&manager, 1)[0];
        assert!(manager.get_contract(id).is_some());
        assert!(manager.cancel(id));

        let result = running.join().unwrap();
        assert_eq!(result.contract_id, id);
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
        assert!(result.error.unwrap().is_interrupt());
        assert!(!manager.cancel(id), "finished contract is deregistered");
    });
    assert!(manager.in_flight().is_empty());
}

#[test]
fn test_cancel_unknown_id() {
    let manager = manager();
    assert!(!manager.cancel(12345));
}

// ── Test: spawned queries ──

#[test]
fn test_cancel_spawned_query() {
    let manager = patient();
    let ledger = ledger();

    let query = manager
        .spawn_query(ContractKind::Script, context(&ledger, &spin_contract(), ""))
        .unwrap();
    assert!(query.try_result().is_none());
    query.cancel();

    let result = query.wait_timeout(Duration::from_secs(5)).expect("query should stop");
    assert_eq!(result.contract_id, query.contract_id());
    assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
    assert!(wait_for(Duration::from_secs(1), || manager.in_flight().is_empty()));
}

#[test]
fn test_spawned_query_result() {
    let manager = manager();
    let ledger = ledger();

    let query = manager
        .spawn_query(ContractKind::Script, context(&ledger, &echo_contract(), "[1,2]"))
        .unwrap();
    let result = query.wait();

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.return_value, HostValue::Array(vec![HostValue::Int(1), HostValue::Int(2)]));
    assert!(query.is_finished());
    assert_eq!(query.try_result(), Some(result));
}

#[test]
fn test_spawned_query_is_readonly() {
    let manager = manager();
    let ledger = ledger();
    let code = forwarding_contract("storage_store", r#"["k","v"]"#);

    let result = manager
        .spawn_query(ContractKind::Script, context(&ledger, &code, ""))
        .unwrap()
        .wait();

    assert_eq!(result.error_kind(), Some(ErrorKind::ReadonlyViolation));
}

// ── Test: nested invocations ──

/// Queries the spinner. A cancelled child is reported instead of failing,
/// as long as the parent itself was not cancelled.
struct Parent;

impl NativeProgram for Parent {
    fn main(&self, host: &mut NativeHost<'_>, _input: &str) -> Result<HostValue, ContractError> {
        match host.call("contract_query", &[SPINNER.into()]) {
            Err(err) if err.kind == ErrorKind::Cancelled => {
                host.checkpoint()?;
                Ok("child cancelled".into())
            }
            other => other,
        }
    }
}

fn spinner_ledger() -> Arc<MemLedger> {
    Arc::new(MemLedger::new().with_contract(
        SPINNER,
        ContractCode {
            kind: ContractKind::Script,
            code: spin_contract(),
        },
    ))
}

#[test]
fn test_cancelling_parent_stops_child() {
    let manager = patient();
    manager.register_native("parent", Arc::new(Parent));
    let ledger = spinner_ledger();

    thread::scope(|s| {
        let running = s.spawn(|| manager.execute(ContractKind::Native, context(&ledger, "parent", "")));

        let ids = wait_in_flight(&manager, 2);
        assert!(manager.cancel(ids[0]));

        let result = running.join().unwrap();
        assert_eq!(result.contract_id, ids[0]);
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
    });
    assert!(manager.in_flight().is_empty());
}

#[test]
fn test_cancelling_child_leaves_parent_running() {
    let manager = patient();
    manager.register_native("parent", Arc::new(Parent));
    let ledger = spinner_ledger();

    thread::scope(|s| {
        let running = s.spawn(|| manager.execute(ContractKind::Native, context(&ledger, "parent", "")));

        let ids = wait_in_flight(&manager, 2);
        assert!(manager.cancel(ids[1]));

        let result = running.join().unwrap();
        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.return_value, HostValue::from("child cancelled"));
    });
}

/// Triggers the spinner through a contract-issued transaction.
struct Trigger;

impl NativeProgram for Trigger {
    fn main(&self, host: &mut NativeHost<'_>, _input: &str) -> Result<HostValue, ContractError> {
        host.call("do_transaction", &[payment(SPINNER, "")])
    }
}

#[test]
fn test_cancelling_issuer_stops_triggered_contract() {
    let manager = patient();
    manager.register_native("trigger", Arc::new(Trigger));
    let ledger = spinner_ledger();
    route_payments_to_contracts(&ledger);

    thread::scope(|s| {
        let running = s.spawn(|| manager.execute(ContractKind::Native, context(&ledger, "trigger", "")));

        let ids = wait_in_flight(&manager, 2);
        let cancelled_at = Instant::now();
        assert!(manager.cancel(ids[0]));

        let result = running.join().unwrap();
        assert!(
            cancelled_at.elapsed() < Duration::from_secs(5),
            "issuer took {:?} to stop",
            cancelled_at.elapsed()
        );
        assert_eq!(result.contract_id, ids[0]);
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
    });
    assert!(manager.in_flight().is_empty());
}

// ── Test: exit ──

#[test]
fn test_exit_cancels_in_flight() {
    let manager = patient();
    let ledger = ledger();

    let query = manager
        .spawn_query(ContractKind::Script, context(&ledger, &spin_contract(), ""))
        .unwrap();
    wait_in_flight(&manager, 1);

    manager.exit();

    assert!(manager.is_closed());
    assert!(manager.in_flight().is_empty());
    let result = query.wait_timeout(Duration::from_secs(5)).expect("query should stop");
    assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));

    let after = manager.execute(ContractKind::Script, context(&ledger, &echo_contract(), "1"));
    assert_eq!(after.error_kind(), Some(ErrorKind::EngineInitError));
    assert_eq!(after.contract_id, 0);
}
