//! Result of one contract invocation.

use serde::{Deserialize, Serialize};

use crate::error::{ContractError, ErrorKind};
use crate::types::ContractId;
use crate::value::HostValue;

/// Outcome of an `execute` or `query` invocation.
///
/// Written once by the thread that ran the contract. Cancellation and
/// timeout are reported through `error` like any other failure but can be
/// told apart with [`ContractError::is_interrupt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Id the manager assigned, `0` when the invocation never got one.
    pub contract_id: ContractId,
    /// Value returned by the entry point (`Null` on failure).
    pub return_value: HostValue,
    /// Failure, if any.
    pub error: Option<ContractError>,
    /// Host gas consumed by host-API calls.
    pub gas_used: u64,
    /// Engine instructions consumed (Wasmtime fuel).
    pub instructions: u64,
    /// `gas_price * gas_used`.
    pub fee: i64,
    /// Log lines emitted through the `log` host call, in order.
    pub logs: Vec<String>,
}

impl ExecutionResult {
    /// A result that failed before anything ran.
    pub fn failed(contract_id: ContractId, error: ContractError) -> Self {
        Self {
            contract_id,
            return_value: HostValue::Null,
            error: Some(error),
            gas_used: 0,
            instructions: 0,
            fee: 0,
            logs: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Collapse into the return value or the error.
    pub fn into_result(self) -> Result<HostValue, ContractError> {
        match self.error {
            None => Ok(self.return_value),
            Some(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result() {
        let result = ExecutionResult::failed(7, ContractError::cancelled());
        assert!(!result.is_success());
        assert_eq!(result.contract_id, 7);
        assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(result.into_result().unwrap_err().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_successful_into_result() {
        let result = ExecutionResult {
            contract_id: 1,
            return_value: HostValue::Int(3),
            error: None,
            gas_used: 10,
            instructions: 20,
            fee: 0,
            logs: vec!["hi".into()],
        };
        assert!(result.is_success());
        assert_eq!(result.error_kind(), None);
        assert_eq!(result.into_result().unwrap(), HostValue::Int(3));
    }
}
