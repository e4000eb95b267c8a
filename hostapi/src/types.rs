//! Host-side configuration and ledger support types.
//!
//! `ExecutionConfig` bundles the resource limits for a single invocation.
//! The remaining types are the vocabulary of the `LedgerContext` trait.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ledgerbox_primitives::{ContractKind, ExecutionResult, HostValue, OperationKind};

use crate::context::InvocationContext;
use crate::ledger::NestedInvoker;

/// Maximum storage key length in bytes.
pub const MAX_KEY_LEN: usize = 256;

/// Maximum storage value length in bytes.
pub const MAX_VALUE_LEN: usize = 65_536; // 64 KiB

/// Resource limits for a single invocation.
///
/// Enforced by the host gas meter and the host-API implementation; guest
/// code cannot raise them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum host gas one invocation may consume.
    pub gas_limit: u64,
    /// Maximum number of log lines kept per invocation.
    pub max_log_lines: u32,
    /// Maximum length of a single log line in bytes.
    pub max_log_line_len: usize,
    /// Maximum length of a storage key in bytes.
    pub max_key_len: usize,
    /// Maximum length of a storage value in bytes.
    pub max_value_len: usize,
    /// Maximum nested invocations triggered from one originating contract.
    pub max_nested_calls: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            gas_limit: 10_000_000,
            max_log_lines: 256,
            max_log_line_len: 1024,
            max_key_len: MAX_KEY_LEN,
            max_value_len: MAX_VALUE_LEN,
            max_nested_calls: 4,
        }
    }
}

/// Identifies an issued asset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetKey {
    pub issuer: String,
    pub code: String,
}

impl AssetKey {
    pub fn new(issuer: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            code: code.into(),
        }
    }
}

/// An amount of an issued asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub key: AssetKey,
    pub amount: i64,
}

impl AssetAmount {
    pub fn to_host_value(&self) -> HostValue {
        HostValue::map([
            ("issuer", HostValue::from(self.key.issuer.as_str())),
            ("code", HostValue::from(self.key.code.as_str())),
            ("amount", HostValue::Int(self.amount)),
        ])
    }
}

/// Code deployed at a contract account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCode {
    pub kind: ContractKind,
    pub code: String,
}

/// A consensus validator and its pledge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: String,
    pub pledge: i64,
}

/// Fee parameters a privileged contract may reconfigure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    pub gas_price: i64,
    pub base_reserve: i64,
}

/// A transaction requested by a running contract through `do_transaction`.
#[derive(Clone)]
pub struct NestedTransaction {
    /// Contract account issuing the transaction.
    pub source: String,
    /// Operation kind resolved from the descriptor's `type` field.
    pub kind: OperationKind,
    /// The full operation descriptor as supplied by the contract.
    pub operation: HostValue,
    /// Context of the requesting invocation. Use [`InvocationContext::nested`]
    /// to derive the context of any contract this transaction triggers, so
    /// the nested-call budget stays shared.
    pub parent: InvocationContext,
    /// Runs contracts this transaction triggers under the issuer.
    pub invoker: Arc<dyn NestedInvoker>,
}

impl NestedTransaction {
    /// Run the contract at `address` as a child of the issuing invocation.
    pub fn execute(
        &self,
        kind: ContractKind,
        address: impl Into<String>,
        code: impl Into<String>,
        input: impl Into<String>,
    ) -> ExecutionResult {
        self.invoker
            .execute(kind, self.parent.nested(address, code, input))
    }
}

impl fmt::Debug for NestedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedTransaction")
            .field("source", &self.source)
            .field("kind", &self.kind)
            .field("operation", &self.operation)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = ExecutionConfig::default();
        assert_eq!(config.gas_limit, 10_000_000);
        assert_eq!(config.max_log_lines, 256);
        assert_eq!(config.max_log_line_len, 1024);
        assert_eq!(config.max_key_len, MAX_KEY_LEN);
        assert_eq!(config.max_value_len, MAX_VALUE_LEN);
        assert_eq!(config.max_nested_calls, 4);
    }

    #[test]
    fn test_asset_amount_host_value() {
        let amount = AssetAmount {
            key: AssetKey::new("buQissuer", "CNY"),
            amount: 42,
        };
        let v = amount.to_host_value();
        assert_eq!(v.get("code").and_then(HostValue::as_str), Some("CNY"));
        assert_eq!(v.get("amount").and_then(HostValue::as_i64), Some(42));
    }
}
