//! Error types for the contract sandbox.
//!
//! `ErrorCode` is the small status vocabulary returned to guest code by host
//! functions. `ContractError` is the structured error every invocation failure
//! is converted into before it crosses the sandbox boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Host function status codes seen by the guest.
///
/// Only ABI-level problems are reported this way; semantic failures abort
/// the invocation with a `ContractError`. These repr values are part of the
/// guest ABI and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    BadPointer = 1,
    InvalidEncoding = 2,
    Internal = 3,
}

impl ErrorCode {
    /// Status value written back to the guest.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::BadPointer => write!(f, "ERR_BAD_POINTER"),
            Self::InvalidEncoding => write!(f, "ERR_INVALID_ENCODING"),
            Self::Internal => write!(f, "ERR_INTERNAL"),
        }
    }
}

/// Which execution limit was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Wall-clock budget elapsed.
    TimedOut,
    /// Host gas or instruction fuel ran out.
    GasExhausted,
    /// Too many nested `do_transaction` / `contract_query` calls.
    NestedCallLimitExceeded,
}

/// Classification of an invocation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The engine or contract variant could not be constructed.
    EngineInitError,
    /// Code failed to compile or violates the module ABI.
    SyntaxError,
    /// Uncaught runtime fault or script-authored failure.
    ScriptError,
    /// A mutating host call was made from a read-only invocation.
    ReadonlyViolation,
    /// An execution limit was hit.
    ResourceExceeded(ResourceKind),
    /// 64-bit host arithmetic overflowed.
    ArithmeticOverflow,
    /// 64-bit host division or remainder by zero.
    DivisionByZero,
    /// Cooperative cancellation was requested.
    Cancelled,
    /// An operation kind is not in the fee table.
    UnknownOperation,
    /// `price * gas` is not representable.
    FeeOverflow,
    /// A host call received malformed arguments.
    InvalidArgument,
    /// The ledger collaborator rejected a request.
    LedgerFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EngineInitError => write!(f, "ENGINE_INIT_ERROR"),
            Self::SyntaxError => write!(f, "SYNTAX_ERROR"),
            Self::ScriptError => write!(f, "SCRIPT_ERROR"),
            Self::ReadonlyViolation => write!(f, "READONLY_VIOLATION"),
            Self::ResourceExceeded(ResourceKind::TimedOut) => write!(f, "TIMED_OUT"),
            Self::ResourceExceeded(ResourceKind::GasExhausted) => write!(f, "GAS_EXHAUSTED"),
            Self::ResourceExceeded(ResourceKind::NestedCallLimitExceeded) => {
                write!(f, "NESTED_CALL_LIMIT_EXCEEDED")
            }
            Self::ArithmeticOverflow => write!(f, "ARITHMETIC_OVERFLOW"),
            Self::DivisionByZero => write!(f, "DIVISION_BY_ZERO"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::UnknownOperation => write!(f, "UNKNOWN_OPERATION"),
            Self::FeeOverflow => write!(f, "FEE_OVERFLOW"),
            Self::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            Self::LedgerFailure => write!(f, "LEDGER_FAILURE"),
        }
    }
}

/// Structured invocation failure.
///
/// Engine faults, host-call failures and limit trips are all converted into
/// this type; nothing engine-specific escapes the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ContractError {
    pub kind: ErrorKind,
    pub message: String,
    /// Source position for syntax errors (`line:col` or byte offset).
    pub location: Option<String>,
    /// Best-effort guest stack at the point of failure.
    pub stack: Option<String>,
}

impl ContractError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            stack: None,
        }
    }

    pub fn syntax(message: impl Into<String>, location: Option<String>) -> Self {
        Self {
            location,
            ..Self::new(ErrorKind::SyntaxError, message)
        }
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ScriptError, message)
    }

    pub fn engine_init(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EngineInitError, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn readonly(function: &str) -> Self {
        Self::new(
            ErrorKind::ReadonlyViolation,
            format!("'{}' mutates ledger state and cannot run in a read-only invocation", function),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "execution cancelled")
    }

    pub fn timed_out(budget_ms: u64) -> Self {
        Self::new(
            ErrorKind::ResourceExceeded(ResourceKind::TimedOut),
            format!("execution exceeded {} ms", budget_ms),
        )
    }

    pub fn gas_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExceeded(ResourceKind::GasExhausted), message)
    }

    pub fn nested_limit(limit: u32) -> Self {
        Self::new(
            ErrorKind::ResourceExceeded(ResourceKind::NestedCallLimitExceeded),
            format!("nested call limit of {} reached", limit),
        )
    }

    /// Attach a guest stack description.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Returns true for cancellation and timeout, the outcomes not authored
    /// by the script itself.
    pub fn is_interrupt(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Cancelled | ErrorKind::ResourceExceeded(ResourceKind::TimedOut)
        )
    }
}
