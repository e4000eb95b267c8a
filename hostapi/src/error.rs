//! Errors reported by the ledger collaborator.
//!
//! `LedgerError` is what a `LedgerContext` implementation returns. The sandbox
//! converts it into a `ContractError` before it reaches guest code or the
//! caller; a nested invocation's own error passes through unchanged.

use ledgerbox_primitives::{ContractError, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// The paying account cannot cover the amount.
    #[error("insufficient balance in {address}: has {balance}, needs {amount}")]
    InsufficientBalance {
        address: String,
        balance: i64,
        amount: i64,
    },

    /// The request was well-formed but the ledger refused it.
    #[error("ledger rejected request: {0}")]
    Rejected(String),

    /// The ledger does not implement this operation.
    #[error("operation not supported by this ledger: {0}")]
    Unsupported(String),

    /// A nested invocation failed; its error is propagated as-is.
    #[error("nested invocation failed: {0}")]
    Nested(ContractError),

    /// Backend failure unrelated to the request.
    #[error("internal ledger error: {0}")]
    Internal(String),
}

impl From<LedgerError> for ContractError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Nested(inner) => inner,
            other => ContractError::new(ErrorKind::LedgerFailure, other.to_string()),
        }
    }
}
