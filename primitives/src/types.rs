//! Core type aliases and constants for the contract sandbox.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ContractError, ErrorKind};

/// Process-unique contract identifier. Strictly increasing, never reused.
pub type ContractId = i64;

/// Largest integer a double-precision script number represents exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// How far back `get_block_hash` may look from the current block.
pub const MAX_BLOCK_HASH_OFFSET: i64 = 1024;

/// Name of the guest export invoked by `execute`.
pub const MAIN_ENTRY: &str = "main";

/// Name of the guest export invoked by `query`.
pub const QUERY_ENTRY: &str = "query";

/// Engine that runs a contract.
///
/// The set is closed: the manager dispatches on this tag, never on runtime
/// type discovery. Protocol tags are stable (`0` script, `1` native).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    /// WebAssembly module run inside a per-invocation Wasmtime store.
    Script,
    /// Rust program registered with the manager by name.
    Native,
}

impl ContractKind {
    /// Protocol tag for this kind.
    pub const fn tag(self) -> i32 {
        match self {
            Self::Script => 0,
            Self::Native => 1,
        }
    }

    /// Resolve a protocol tag. Unknown tags cannot be given an engine.
    pub fn from_tag(tag: i32) -> Result<Self, ContractError> {
        match tag {
            0 => Ok(Self::Script),
            1 => Ok(Self::Native),
            other => Err(ContractError::new(
                ErrorKind::EngineInitError,
                format!("unknown contract engine type {}", other),
            )),
        }
    }
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script => write!(f, "script"),
            Self::Native => write!(f, "native"),
        }
    }
}
