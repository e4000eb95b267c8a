//! Per-operation gas table and fee computation.
//!
//! Pure and stateless. Operation kinds carry both their protocol code and a
//! snake_case name so descriptors coming from contracts can use either.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ContractError, ErrorKind};

/// Protocol operation kinds with a fixed gas cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateAccount,
    IssueAsset,
    Payment,
    SetMetadata,
    SetSignerWeight,
    SetThreshold,
    PayCoin,
    Log,
    CreateContract,
}

impl OperationKind {
    pub const ALL: [OperationKind; 9] = [
        Self::CreateAccount,
        Self::IssueAsset,
        Self::Payment,
        Self::SetMetadata,
        Self::SetSignerWeight,
        Self::SetThreshold,
        Self::PayCoin,
        Self::Log,
        Self::CreateContract,
    ];

    /// Protocol code of this operation.
    pub const fn code(self) -> i32 {
        match self {
            Self::CreateAccount => 1,
            Self::IssueAsset => 2,
            Self::Payment => 3,
            Self::SetMetadata => 4,
            Self::SetSignerWeight => 5,
            Self::SetThreshold => 6,
            Self::PayCoin => 7,
            Self::Log => 8,
            Self::CreateContract => 9,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::CreateAccount => "create_account",
            Self::IssueAsset => "issue_asset",
            Self::Payment => "payment",
            Self::SetMetadata => "set_metadata",
            Self::SetSignerWeight => "set_signer_weight",
            Self::SetThreshold => "set_threshold",
            Self::PayCoin => "pay_coin",
            Self::Log => "log",
            Self::CreateContract => "create_contract",
        }
    }

    pub fn from_code(code: i64) -> Result<Self, ContractError> {
        Self::ALL
            .into_iter()
            .find(|k| i64::from(k.code()) == code)
            .ok_or_else(|| unknown_operation(code))
    }
}

impl FromStr for OperationKind {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| unknown_operation(s))
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn unknown_operation(what: impl fmt::Display) -> ContractError {
    ContractError::new(
        ErrorKind::UnknownOperation,
        format!("unknown operation type {}", what),
    )
}

/// Gas charged for one operation of the given kind.
pub const fn operation_gas(kind: OperationKind) -> i64 {
    match kind {
        OperationKind::CreateAccount => 1_000,
        OperationKind::IssueAsset => 5_000,
        OperationKind::Payment => 100,
        OperationKind::SetMetadata => 200,
        OperationKind::SetSignerWeight => 100,
        OperationKind::SetThreshold => 100,
        OperationKind::PayCoin => 100,
        OperationKind::Log => 50,
        OperationKind::CreateContract => 10_000,
    }
}

/// `price * gas`, failing instead of wrapping.
pub fn calculate_fee(price: i64, gas: i64) -> Result<i64, ContractError> {
    if price < 0 || gas < 0 {
        return Err(ContractError::invalid_argument(format!(
            "fee inputs must be non-negative (price={}, gas={})",
            price, gas
        )));
    }
    price.checked_mul(gas).ok_or_else(|| {
        ContractError::new(
            ErrorKind::FeeOverflow,
            format!("fee overflow: {} * {}", price, gas),
        )
    })
}
