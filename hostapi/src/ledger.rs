//! The ledger collaborator seen by the host API.
//!
//! The sandbox never touches ledger state directly. Every host function that
//! reads or mutates chain data goes through this trait, so the same contract
//! code runs against a production ledger or [`crate::MemLedger`] in tests.

use ledgerbox_primitives::{ContractKind, ExecutionResult, HostValue};

use crate::context::InvocationContext;
use crate::error::LedgerError;
use crate::types::{AssetKey, ContractCode, FeeConfig, NestedTransaction, Validator};

/// Ledger services available to a running contract.
///
/// Implementations are shared across worker threads. Lookups that find
/// nothing return `Ok(None)`; `Err` is reserved for real failures.
pub trait LedgerContext: Send + Sync {
    /// Native coin balance of an account.
    fn balance(&self, address: &str) -> Result<Option<i64>, LedgerError>;

    /// Balance of an issued asset held by an account.
    fn account_asset(&self, address: &str, asset: &AssetKey) -> Result<Option<i64>, LedgerError>;

    /// Hash of a closed block.
    fn block_hash(&self, block_number: i64) -> Result<Option<String>, LedgerError>;

    fn storage_load(&self, contract: &str, key: &str) -> Result<Option<String>, LedgerError>;

    fn storage_store(&self, contract: &str, key: &str, value: &str) -> Result<(), LedgerError>;

    /// Remove a key. Removing a missing key succeeds.
    fn storage_delete(&self, contract: &str, key: &str) -> Result<(), LedgerError>;

    /// Move native coin between accounts.
    fn pay_coin(&self, from: &str, to: &str, amount: i64) -> Result<(), LedgerError>;

    /// Apply a transaction issued by a contract.
    ///
    /// If the transaction triggers another contract, the implementation runs
    /// it through [`NestedTransaction::execute`] and reports its failure as
    /// [`LedgerError::Nested`].
    fn do_transaction(&self, tx: NestedTransaction) -> Result<HostValue, LedgerError>;

    /// Code deployed at `address`, if it is a contract account.
    fn contract_code(&self, address: &str) -> Result<Option<ContractCode>, LedgerError>;

    fn validators(&self) -> Result<Vec<Validator>, LedgerError>;

    fn set_validators(&self, validators: Vec<Validator>) -> Result<(), LedgerError>;

    fn configure_fee(&self, fee: FeeConfig) -> Result<(), LedgerError>;

    /// Header summary of a closed ledger.
    fn ledger_info(&self, block_number: i64) -> Result<Option<HostValue>, LedgerError>;

    /// A transaction of the current ledger by index.
    fn transaction_info(&self, index: i64) -> Result<Option<HostValue>, LedgerError>;
}

/// Runs a contract triggered by a contract-issued transaction as a child of
/// the issuing invocation.
///
/// The child shares the issuer's cancellation and deadline, and its gas and
/// logs are billed to the issuer once the transaction returns.
pub trait NestedInvoker: Send + Sync {
    fn execute(&self, kind: ContractKind, context: InvocationContext) -> ExecutionResult;
}
