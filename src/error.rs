use thiserror::Error;

use crate::ledger::{AccountId, Amount};

/// Canonical error type for every state-changing ledger operation.
///
/// A rejected operation never leaves partial state behind, so callers can
/// resubmit a corrected request without any cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Caller lacks the privilege the operation requires.
    #[error("account {caller} is not the designated authority")]
    Unauthorized { caller: AccountId },

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("mint requires non-empty attestation metadata")]
    MissingAttestation,

    #[error("insufficient balance in {account}: have {have}, need {need}")]
    InsufficientBalance {
        account: AccountId,
        have: Amount,
        need: Amount,
    },

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    /// The external transfer protocol refused to move custody funds.
    #[error("custody transfer rejected: {0}")]
    CustodyRejected(String),

    #[error("duplicate receipt detected")]
    DuplicateReceipt,
}

impl LedgerError {
    /// Stable machine-readable code surfaced to presentation layers.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Unauthorized { .. } => "unauthorized",
            LedgerError::ZeroAmount => "zero_amount",
            LedgerError::MissingAttestation => "missing_attestation",
            LedgerError::InsufficientBalance { .. } => "insufficient_balance",
            LedgerError::ArithmeticOverflow => "arithmetic_overflow",
            LedgerError::CustodyRejected(_) => "custody_rejected",
            LedgerError::DuplicateReceipt => "duplicate_receipt",
        }
    }

    /// True when the caller was not allowed, as opposed to sending bad input.
    pub fn is_authorization(&self) -> bool {
        matches!(self, LedgerError::Unauthorized { .. })
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
