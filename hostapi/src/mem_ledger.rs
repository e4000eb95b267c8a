//! In-memory ledger for testing.
//!
//! `MemLedger` implements `LedgerContext` over `BTreeMap`s behind a single
//! `RwLock`. Contract-issued transactions are forwarded to an optional
//! handler so tests can wire nested invocations back into a manager.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use ledgerbox_primitives::{HostValue, OperationKind};

use crate::error::LedgerError;
use crate::ledger::LedgerContext;
use crate::types::{AssetKey, ContractCode, FeeConfig, NestedTransaction, Validator};

/// Callback that applies a contract-issued transaction.
pub type TransactionHandler =
    Arc<dyn Fn(NestedTransaction) -> Result<HostValue, LedgerError> + Send + Sync>;

#[derive(Debug, Default)]
struct LedgerState {
    balances: BTreeMap<String, i64>,
    assets: BTreeMap<(String, AssetKey), i64>,
    storage: BTreeMap<(String, String), String>,
    block_hashes: BTreeMap<i64, String>,
    contracts: BTreeMap<String, ContractCode>,
    validators: Vec<Validator>,
    fee: Option<FeeConfig>,
    ledgers: BTreeMap<i64, HostValue>,
    transactions: BTreeMap<i64, HostValue>,
}

/// In-memory `LedgerContext`.
///
/// Without a transaction handler, `do_transaction` applies `pay_coin`
/// operations itself and rejects every other kind as unsupported.
#[derive(Default)]
pub struct MemLedger {
    state: RwLock<LedgerState>,
    handler: Mutex<Option<TransactionHandler>>,
}

impl MemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, address: impl Into<String>, amount: i64) -> Self {
        self.state.write().balances.insert(address.into(), amount);
        self
    }

    pub fn with_asset(self, address: impl Into<String>, asset: AssetKey, amount: i64) -> Self {
        self.state.write().assets.insert((address.into(), asset), amount);
        self
    }

    pub fn with_block_hash(self, block_number: i64, hash: impl Into<String>) -> Self {
        self.state.write().block_hashes.insert(block_number, hash.into());
        self
    }

    pub fn with_contract(self, address: impl Into<String>, code: ContractCode) -> Self {
        self.deploy(address, code);
        self
    }

    pub fn with_validators(self, validators: Vec<Validator>) -> Self {
        self.state.write().validators = validators;
        self
    }

    pub fn with_ledger_info(self, block_number: i64, info: HostValue) -> Self {
        self.state.write().ledgers.insert(block_number, info);
        self
    }

    pub fn with_transaction_info(self, index: i64, info: HostValue) -> Self {
        self.state.write().transactions.insert(index, info);
        self
    }

    /// Install code at `address`, replacing anything deployed there.
    pub fn deploy(&self, address: impl Into<String>, code: ContractCode) {
        self.state.write().contracts.insert(address.into(), code);
    }

    pub fn set_transaction_handler(&self, handler: TransactionHandler) {
        *self.handler.lock() = Some(handler);
    }

    pub fn storage_value(&self, contract: &str, key: &str) -> Option<String> {
        self.state
            .read()
            .storage
            .get(&(contract.to_string(), key.to_string()))
            .cloned()
    }

    pub fn balance_of(&self, address: &str) -> i64 {
        self.state.read().balances.get(address).copied().unwrap_or(0)
    }

    pub fn fee_config(&self) -> Option<FeeConfig> {
        self.state.read().fee
    }

    fn apply_pay_coin(&self, tx: &NestedTransaction) -> Result<HostValue, LedgerError> {
        let dest = tx
            .operation
            .get("dest_address")
            .and_then(HostValue::as_str)
            .ok_or_else(|| LedgerError::Rejected("pay_coin requires dest_address".into()))?;
        let amount = tx
            .operation
            .get("amount")
            .and_then(HostValue::as_i64)
            .ok_or_else(|| LedgerError::Rejected("pay_coin requires an integer amount".into()))?;
        self.pay_coin(&tx.source, dest, amount)?;
        Ok(HostValue::Null)
    }
}

impl fmt::Debug for MemLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemLedger")
            .field("state", &*self.state.read())
            .field("has_handler", &self.handler.lock().is_some())
            .finish()
    }
}

impl LedgerContext for MemLedger {
    fn balance(&self, address: &str) -> Result<Option<i64>, LedgerError> {
        Ok(self.state.read().balances.get(address).copied())
    }

    fn account_asset(&self, address: &str, asset: &AssetKey) -> Result<Option<i64>, LedgerError> {
        Ok(self
            .state
            .read()
            .assets
            .get(&(address.to_string(), asset.clone()))
            .copied())
    }

    fn block_hash(&self, block_number: i64) -> Result<Option<String>, LedgerError> {
        Ok(self.state.read().block_hashes.get(&block_number).cloned())
    }

    fn storage_load(&self, contract: &str, key: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.storage_value(contract, key))
    }

    fn storage_store(&self, contract: &str, key: &str, value: &str) -> Result<(), LedgerError> {
        self.state
            .write()
            .storage
            .insert((contract.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn storage_delete(&self, contract: &str, key: &str) -> Result<(), LedgerError> {
        self.state
            .write()
            .storage
            .remove(&(contract.to_string(), key.to_string()));
        Ok(())
    }

    fn pay_coin(&self, from: &str, to: &str, amount: i64) -> Result<(), LedgerError> {
        if amount < 0 {
            return Err(LedgerError::Rejected(format!("negative amount {}", amount)));
        }
        let mut state = self.state.write();
        let balance = state.balances.get(from).copied().unwrap_or(0);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                address: from.to_string(),
                balance,
                amount,
            });
        }
        let dest = state.balances.get(to).copied().unwrap_or(0);
        let credited = dest
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Rejected(format!("balance of {} would overflow", to)))?;
        state.balances.insert(from.to_string(), balance - amount);
        state.balances.insert(to.to_string(), credited);
        Ok(())
    }

    fn do_transaction(&self, tx: NestedTransaction) -> Result<HostValue, LedgerError> {
        // Clone out so the handler may re-enter this ledger.
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(tx),
            None if tx.kind == OperationKind::PayCoin => self.apply_pay_coin(&tx),
            None => Err(LedgerError::Unsupported(format!(
                "operation '{}' without a transaction handler",
                tx.kind.name()
            ))),
        }
    }

    fn contract_code(&self, address: &str) -> Result<Option<ContractCode>, LedgerError> {
        Ok(self.state.read().contracts.get(address).cloned())
    }

    fn validators(&self) -> Result<Vec<Validator>, LedgerError> {
        Ok(self.state.read().validators.clone())
    }

    fn set_validators(&self, validators: Vec<Validator>) -> Result<(), LedgerError> {
        self.state.write().validators = validators;
        Ok(())
    }

    fn configure_fee(&self, fee: FeeConfig) -> Result<(), LedgerError> {
        if fee.gas_price < 0 || fee.base_reserve < 0 {
            return Err(LedgerError::Rejected("fee parameters must be non-negative".into()));
        }
        self.state.write().fee = Some(fee);
        Ok(())
    }

    fn ledger_info(&self, block_number: i64) -> Result<Option<HostValue>, LedgerError> {
        Ok(self.state.read().ledgers.get(&block_number).cloned())
    }

    fn transaction_info(&self, index: i64) -> Result<Option<HostValue>, LedgerError> {
        Ok(self.state.read().transactions.get(&index).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InvocationContext;
    use crate::ledger::NestedInvoker;
    use ledgerbox_primitives::{ContractError, ContractKind, ExecutionResult};

    /// Answers every nested run with the callee's address and sender.
    struct Echo;

    impl NestedInvoker for Echo {
        fn execute(&self, _kind: ContractKind, context: InvocationContext) -> ExecutionResult {
            ExecutionResult {
                return_value: HostValue::Array(vec![
                    HostValue::from(context.this_address),
                    HostValue::from(context.sender),
                ]),
                error: None,
                ..ExecutionResult::failed(0, ContractError::cancelled())
            }
        }
    }

    fn transaction(parent: InvocationContext, kind: OperationKind, operation: HostValue) -> NestedTransaction {
        NestedTransaction {
            source: parent.this_address.clone(),
            kind,
            operation,
            parent,
            invoker: Arc::new(Echo),
        }
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = MemLedger::new();
        assert_eq!(ledger.balance("buQnobody").unwrap(), None);
        assert_eq!(ledger.storage_load("c", "k").unwrap(), None);
        assert_eq!(ledger.contract_code("c").unwrap(), None);
        assert!(ledger.validators().unwrap().is_empty());
    }

    #[test]
    fn test_storage_is_scoped_per_contract() {
        let ledger = MemLedger::new();
        ledger.storage_store("a", "k", "1").unwrap();
        ledger.storage_store("b", "k", "2").unwrap();
        assert_eq!(ledger.storage_load("a", "k").unwrap().as_deref(), Some("1"));
        assert_eq!(ledger.storage_load("b", "k").unwrap().as_deref(), Some("2"));

        ledger.storage_delete("a", "k").unwrap();
        assert_eq!(ledger.storage_value("a", "k"), None);
        // Deleting twice is fine.
        ledger.storage_delete("a", "k").unwrap();
    }

    #[test]
    fn test_pay_coin_moves_balance() {
        let ledger = MemLedger::new().with_balance("alice", 100);
        ledger.pay_coin("alice", "bob", 40).unwrap();
        assert_eq!(ledger.balance_of("alice"), 60);
        assert_eq!(ledger.balance_of("bob"), 40);
    }

    #[test]
    fn test_pay_coin_insufficient_balance() {
        let ledger = MemLedger::new().with_balance("alice", 10);
        let err = ledger.pay_coin("alice", "bob", 11).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { balance: 10, .. }));
        assert_eq!(ledger.balance_of("alice"), 10);
    }

    #[test]
    fn test_pay_coin_credit_overflow() {
        let ledger = MemLedger::new()
            .with_balance("alice", 10)
            .with_balance("bob", i64::MAX);
        assert!(matches!(
            ledger.pay_coin("alice", "bob", 1),
            Err(LedgerError::Rejected(_))
        ));
        assert_eq!(ledger.balance_of("alice"), 10);
    }

    #[test]
    fn test_do_transaction_without_handler() {
        let ledger = Arc::new(MemLedger::new().with_balance("contract", 50));
        let parent = InvocationContext::new(ledger.clone(), "").with_this_address("contract");

        let pay = transaction(
            parent.clone(),
            OperationKind::PayCoin,
            HostValue::map([
                ("type", HostValue::from("pay_coin")),
                ("dest_address", HostValue::from("bob")),
                ("amount", HostValue::Int(20)),
            ]),
        );
        assert_eq!(ledger.do_transaction(pay).unwrap(), HostValue::Null);
        assert_eq!(ledger.balance_of("bob"), 20);

        let issue = transaction(parent, OperationKind::IssueAsset, HostValue::Null);
        assert!(matches!(
            ledger.do_transaction(issue),
            Err(LedgerError::Unsupported(_))
        ));
    }

    #[test]
    fn test_handler_receives_transaction() {
        let ledger = Arc::new(MemLedger::new());
        ledger.set_transaction_handler(Arc::new(|tx: NestedTransaction| {
            Ok(HostValue::from(tx.kind.name()))
        }));
        let parent = InvocationContext::new(ledger.clone(), "");
        let tx = transaction(parent, OperationKind::Log, HostValue::Null);
        assert_eq!(ledger.do_transaction(tx).unwrap(), HostValue::from("log"));
    }

    #[test]
    fn test_handler_runs_triggered_contract_under_issuer() {
        let ledger = Arc::new(MemLedger::new());
        ledger.set_transaction_handler(Arc::new(|tx: NestedTransaction| {
            let result = tx.execute(ContractKind::Script, "callee", "(module)", "");
            result.into_result().map_err(LedgerError::Nested)
        }));
        let parent = InvocationContext::new(ledger.clone(), "").with_this_address("issuer");
        let tx = transaction(parent, OperationKind::Payment, HostValue::Null);

        assert_eq!(
            ledger.do_transaction(tx).unwrap(),
            HostValue::Array(vec![HostValue::from("callee"), HostValue::from("issuer")])
        );
    }

    #[test]
    fn test_configure_fee_rejects_negative() {
        let ledger = MemLedger::new();
        let fee = FeeConfig { gas_price: -1, base_reserve: 0 };
        assert!(ledger.configure_fee(fee).is_err());
        let fee = FeeConfig { gas_price: 5, base_reserve: 10 };
        ledger.configure_fee(fee).unwrap();
        assert_eq!(ledger.fee_config(), Some(fee));
    }
}
