//! The immutable description of one contract invocation.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ledgerbox_primitives::ContractError;

use crate::ledger::LedgerContext;
use crate::types::AssetAmount;

/// Nested-call budget shared by every invocation descending from one
/// originating contract.
///
/// Cloning shares the count. Each nested dispatch takes one unit; the count
/// is never given back, so it bounds the total fan-out of the tree, not only
/// its depth.
#[derive(Debug, Clone, Default)]
pub struct NestedCallCounter(Arc<AtomicU32>);

impl NestedCallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nested calls taken so far.
    pub fn count(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    /// Take one unit of the budget, failing once `limit` units are gone.
    pub fn try_enter(&self, limit: u32) -> Result<u32, ContractError> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .map(|prev| prev + 1)
            .map_err(|_| ContractError::nested_limit(limit))
    }
}

/// Everything a contract sees about the invocation it is running.
///
/// Built once by the ledger (consuming builder), then handed to the manager.
/// The ledger reference is shared, so it outlives every contract holding it.
#[derive(Clone)]
pub struct InvocationContext {
    pub code: String,
    pub input: String,
    pub this_address: String,
    pub sender: String,
    pub tx_origin: String,
    pub trigger_tx_hash: String,
    pub operation_index: i32,
    pub consensus_value_hash: String,
    pub timestamp: i64,
    pub block_number: i64,
    pub ledger: Arc<dyn LedgerContext>,
    pub pay_coin_amount: i64,
    pub pay_asset: Option<AssetAmount>,
    pub gas_price: i64,
    nested_calls: NestedCallCounter,
}

impl InvocationContext {
    pub fn new(ledger: Arc<dyn LedgerContext>, code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            input: String::new(),
            this_address: String::new(),
            sender: String::new(),
            tx_origin: String::new(),
            trigger_tx_hash: String::new(),
            operation_index: 0,
            consensus_value_hash: String::new(),
            timestamp: 0,
            block_number: 0,
            ledger,
            pay_coin_amount: 0,
            pay_asset: None,
            gas_price: 0,
            nested_calls: NestedCallCounter::new(),
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = input.into();
        self
    }

    pub fn with_this_address(mut self, address: impl Into<String>) -> Self {
        self.this_address = address.into();
        self
    }

    /// Sets the sender, and the transaction origin if none was given yet.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        if self.tx_origin.is_empty() {
            self.tx_origin = self.sender.clone();
        }
        self
    }

    pub fn with_tx_origin(mut self, origin: impl Into<String>) -> Self {
        self.tx_origin = origin.into();
        self
    }

    pub fn with_trigger(mut self, tx_hash: impl Into<String>, operation_index: i32) -> Self {
        self.trigger_tx_hash = tx_hash.into();
        self.operation_index = operation_index;
        self
    }

    pub fn with_consensus_value(mut self, hash: impl Into<String>) -> Self {
        self.consensus_value_hash = hash.into();
        self
    }

    pub fn with_block(mut self, block_number: i64, timestamp: i64) -> Self {
        self.block_number = block_number;
        self.timestamp = timestamp;
        self
    }

    pub fn with_payment(mut self, coin_amount: i64, asset: Option<AssetAmount>) -> Self {
        self.pay_coin_amount = coin_amount;
        self.pay_asset = asset;
        self
    }

    pub fn with_gas_price(mut self, gas_price: i64) -> Self {
        self.gas_price = gas_price;
        self
    }

    /// The nested-call budget of the originating invocation.
    pub fn nested_calls(&self) -> &NestedCallCounter {
        &self.nested_calls
    }

    /// Context for an invocation triggered from this one.
    ///
    /// The callee sees this contract as its sender. Ledger, block data,
    /// trigger, gas price and the nested-call budget are shared; payments
    /// are not carried over.
    pub fn nested(
        &self,
        this_address: impl Into<String>,
        code: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            input: input.into(),
            this_address: this_address.into(),
            sender: self.this_address.clone(),
            tx_origin: self.tx_origin.clone(),
            trigger_tx_hash: self.trigger_tx_hash.clone(),
            operation_index: self.operation_index,
            consensus_value_hash: self.consensus_value_hash.clone(),
            timestamp: self.timestamp,
            block_number: self.block_number,
            ledger: Arc::clone(&self.ledger),
            pay_coin_amount: 0,
            pay_asset: None,
            gas_price: self.gas_price,
            nested_calls: self.nested_calls.clone(),
        }
    }
}

impl fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationContext")
            .field("code_len", &self.code.len())
            .field("input", &self.input)
            .field("this_address", &self.this_address)
            .field("sender", &self.sender)
            .field("tx_origin", &self.tx_origin)
            .field("trigger_tx_hash", &self.trigger_tx_hash)
            .field("operation_index", &self.operation_index)
            .field("block_number", &self.block_number)
            .field("timestamp", &self.timestamp)
            .field("pay_coin_amount", &self.pay_coin_amount)
            .field("nested_calls", &self.nested_calls.count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_ledger::MemLedger;
    use ledgerbox_primitives::{ErrorKind, ResourceKind};

    fn context() -> InvocationContext {
        InvocationContext::new(Arc::new(MemLedger::new()), "(module)")
            .with_this_address("buQcontract")
            .with_sender("buQalice")
            .with_block(12, 1_700_000_000)
            .with_payment(5, None)
    }

    #[test]
    fn test_sender_defaults_tx_origin() {
        let ctx = context();
        assert_eq!(ctx.tx_origin, "buQalice");
        let ctx = context().with_tx_origin("buQroot");
        assert_eq!(ctx.tx_origin, "buQroot");
    }

    #[test]
    fn test_counter_limit() {
        let counter = NestedCallCounter::new();
        assert_eq!(counter.try_enter(2).unwrap(), 1);
        assert_eq!(counter.try_enter(2).unwrap(), 2);
        let err = counter.try_enter(2).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::ResourceExceeded(ResourceKind::NestedCallLimitExceeded)
        );
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn test_nested_context_shares_budget() {
        let parent = context();
        let child = parent.nested("buQcallee", "(module)", "{}");
        assert_eq!(child.sender, "buQcontract");
        assert_eq!(child.tx_origin, "buQalice");
        assert_eq!(child.block_number, 12);
        assert_eq!(child.pay_coin_amount, 0);

        child.nested_calls().try_enter(4).unwrap();
        assert_eq!(parent.nested_calls().count(), 1);
    }
}
