//! Handles for queries running on the worker pool.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use ledgerbox_primitives::{ContractId, ExecutionResult};

use crate::contract::ContractHandle;
use crate::interrupt::deadline_after;

/// Write-once cell a worker publishes its result into.
#[derive(Default)]
pub(crate) struct ResultSlot {
    value: Mutex<Option<ExecutionResult>>,
    ready: Condvar,
}

impl ResultSlot {
    pub(crate) fn fill(&self, result: ExecutionResult) {
        let mut value = self.value.lock();
        if value.is_none() {
            *value = Some(result);
            self.ready.notify_all();
        }
    }
}

/// A read-only invocation submitted with `ContractManager::spawn_query`.
pub struct QueryContract {
    handle: Arc<ContractHandle>,
    slot: Arc<ResultSlot>,
}

impl QueryContract {
    pub(crate) fn new(handle: Arc<ContractHandle>, slot: Arc<ResultSlot>) -> Self {
        Self { handle, slot }
    }

    pub fn contract_id(&self) -> ContractId {
        self.handle.id()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.slot.value.lock().is_some()
    }

    /// The result, if the query has finished.
    pub fn try_result(&self) -> Option<ExecutionResult> {
        self.slot.value.lock().clone()
    }

    /// Block until the query finishes.
    pub fn wait(&self) -> ExecutionResult {
        let mut value = self.slot.value.lock();
        loop {
            if let Some(result) = value.as_ref() {
                return result.clone();
            }
            self.slot.ready.wait(&mut value);
        }
    }

    /// Block for at most `timeout`. `None` if the query is still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExecutionResult> {
        let deadline = deadline_after(timeout);
        let mut value = self.slot.value.lock();
        loop {
            if let Some(result) = value.as_ref() {
                return Some(result.clone());
            }
            if self.slot.ready.wait_until(&mut value, deadline).timed_out() {
                return value.clone();
            }
        }
    }
}
