//! `ledgerbox-sandbox`: the contract execution sandbox.
//!
//! Runs untrusted contract code for a ledger node. Script contracts are
//! WebAssembly modules executed by Wasmtime; native contracts are Rust
//! programs registered by name. Both see the same host API and produce the
//! same [`ExecutionResult`].
//!
//! - **Isolation:** a fresh store and instance per invocation
//! - **Determinism:** no SIMD, no threads, NaN canonicalization
//! - **Bounds:** instruction fuel, host gas, linear memory, wall-clock time
//! - **Control:** every in-flight contract can be cancelled by id
//! - **Read-only queries:** mutating host calls fail with `ReadonlyViolation`
//!
//! The entry point is [`ContractManager`].
//!
//! [`ExecutionResult`]: ledgerbox_primitives::ExecutionResult

pub mod config;
pub mod contract;
pub mod host_impl;
pub mod interrupt;
pub mod linker;
pub mod manager;
pub mod marshal;
pub mod memory;
pub mod native;
pub mod query;
pub mod runtime;
pub mod script;
pub mod validation;

pub use config::SandboxConfig;
pub use contract::{Contract, ContractHandle};
pub use host_impl::{HostFunction, HOST_API};
pub use interrupt::{CancellationToken, Interrupt};
pub use linker::HOST_MODULE;
pub use manager::ContractManager;
pub use marshal::ScriptValue;
pub use native::{NativeContract, NativeHost, NativeProgram};
pub use query::QueryContract;
pub use script::ScriptEngineContract;
