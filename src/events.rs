use serde::{Deserialize, Serialize};

use crate::ledger::{AccountId, Amount};

/// Record of a committed state change, returned to the caller and appended
/// to the engine's event log for indexers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    CarbonOffsetMinted {
        account: AccountId,
        #[serde(with = "crate::ledger::amount_serde")]
        amount: Amount,
        attestation: String,
    },
    CarbonOffsetBurned {
        account: AccountId,
        #[serde(with = "crate::ledger::amount_serde")]
        amount: Amount,
        #[serde(with = "crate::ledger::amount_serde")]
        remaining_offset: Amount,
    },
    Deposited {
        account: AccountId,
        #[serde(with = "crate::ledger::amount_serde")]
        amount: Amount,
    },
    Withdrawn {
        account: AccountId,
        #[serde(with = "crate::ledger::amount_serde")]
        amount: Amount,
    },
    YieldClaimed {
        account: AccountId,
        #[serde(with = "crate::ledger::amount_serde")]
        amount: Amount,
    },
    EmergencyWithdraw {
        authority: AccountId,
        #[serde(with = "crate::ledger::amount_serde")]
        amount: Amount,
    },
    AuthorityTransferred {
        previous: AccountId,
        new: AccountId,
    },
}

impl LedgerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerEvent::CarbonOffsetMinted { .. } => "CarbonOffsetMinted",
            LedgerEvent::CarbonOffsetBurned { .. } => "CarbonOffsetBurned",
            LedgerEvent::Deposited { .. } => "Deposited",
            LedgerEvent::Withdrawn { .. } => "Withdrawn",
            LedgerEvent::YieldClaimed { .. } => "YieldClaimed",
            LedgerEvent::EmergencyWithdraw { .. } => "EmergencyWithdraw",
            LedgerEvent::AuthorityTransferred { .. } => "AuthorityTransferred",
        }
    }
}
