//! `ledgerbox-primitives`: foundational types for the Ledgerbox contract sandbox.
//!
//! This crate provides the canonical host value, the error taxonomy, gas
//! constants, the per-operation fee table, and the execution result type
//! shared by the host API crate and the sandbox runtime.

pub mod types;
pub mod error;
pub mod value;
pub mod gas;
pub mod fee;
pub mod execution;

// Re-export commonly used types at the crate root for convenience.
pub use types::{ContractId, ContractKind, MAX_SAFE_INTEGER, MAX_BLOCK_HASH_OFFSET};
pub use error::{ContractError, ErrorCode, ErrorKind, ResourceKind};
pub use value::HostValue;
pub use fee::{calculate_fee, operation_gas, OperationKind};
pub use execution::ExecutionResult;
