//! `ledgerbox-hostapi`: host-side interfaces for the Ledgerbox contract sandbox.
//!
//! This crate defines what the sandbox needs from its surroundings and the
//! per-invocation data it is given:
//!
//! - `LedgerContext`: the ledger state supplier
//! - `NestedInvoker`: runs contracts triggered by contract-issued transactions
//! - `MemLedger`: in-memory `LedgerContext` for tests and tooling
//! - `InvocationContext`: immutable description of one contract invocation
//! - `NestedCallCounter`: nested-call budget shared by an invocation tree
//! - `HostGasMeter`: authoritative host-side gas enforcement
//! - `ExecutionConfig`: per-invocation resource limits
//! - `LedgerError`: failures reported by the ledger collaborator

pub mod error;
pub mod types;
pub mod gas_meter;
pub mod context;
pub mod ledger;
pub mod mem_ledger;

// Re-export commonly used types at the crate root.
pub use error::LedgerError;
pub use types::{
    AssetAmount, AssetKey, ContractCode, ExecutionConfig, FeeConfig, NestedTransaction, Validator,
};
pub use gas_meter::HostGasMeter;
pub use context::{InvocationContext, NestedCallCounter};
pub use ledger::{LedgerContext, NestedInvoker};
pub use mem_ledger::{MemLedger, TransactionHandler};
