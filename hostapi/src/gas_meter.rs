//! Host-side gas meter.
//!
//! `HostGasMeter` is the authoritative counter for gas charged by host-API
//! calls. Instruction metering inside the guest is done separately by the
//! engine's fuel; both trip `ResourceExceeded(GasExhausted)`.

use ledgerbox_primitives::ContractError;

/// Host-side gas meter for one invocation.
///
/// Gas consumption is checked before applying, so on error the consumed
/// count remains unchanged.
#[derive(Debug, Clone)]
pub struct HostGasMeter {
    limit: u64,
    consumed: u64,
}

impl HostGasMeter {
    pub fn new(limit: u64) -> Self {
        Self { limit, consumed: 0 }
    }

    /// Charge gas. Fails with `GasExhausted` if the limit would be exceeded.
    pub fn charge(&mut self, amount: u64) -> Result<(), ContractError> {
        let new_consumed = match self.consumed.checked_add(amount) {
            Some(v) if v <= self.limit => v,
            _ => {
                return Err(ContractError::gas_exhausted(format!(
                    "host gas limit {} exceeded (consumed {}, requested {})",
                    self.limit, self.consumed, amount
                )))
            }
        };
        self.consumed = new_consumed;
        Ok(())
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}
