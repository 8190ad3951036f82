use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{AccountId, Amount};

/// External balance-transfer protocol that moves deposited units in and out
/// of the manager's custody.
///
/// Implementations must either move the full amount or fail without effect.
pub trait Custody {
    /// Pull `amount` from `from` into custody, consuming a prior approval.
    fn pull(&mut self, from: &str, amount: Amount) -> LedgerResult<()>;

    /// Release `amount` from custody to `to`.
    fn release(&mut self, to: &str, amount: Amount) -> LedgerResult<()>;

    /// Units currently held in custody.
    fn held(&self) -> Amount;
}

/// In-process stand-in for the external token: wallet balances, per-owner
/// approvals, and the custody pot.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InMemoryCustody {
    wallets: BTreeMap<AccountId, Amount>,
    allowances: BTreeMap<AccountId, Amount>,
    held: Amount,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wallet_of(&self, owner: &str) -> Amount {
        self.wallets.get(owner).copied().unwrap_or(0)
    }

    pub fn allowance_of(&self, owner: &str) -> Amount {
        self.allowances.get(owner).copied().unwrap_or(0)
    }

    /// Credit external units to a wallet (faucet / bridge-in).
    pub fn fund(&mut self, owner: &str, amount: Amount) -> LedgerResult<()> {
        let balance = self
            .wallet_of(owner)
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.wallets.insert(owner.to_string(), balance);
        Ok(())
    }

    /// Pre-authorize the manager to pull up to `amount` from `owner`.
    pub fn approve(&mut self, owner: &str, amount: Amount) {
        self.allowances.insert(owner.to_string(), amount);
    }
}

impl Custody for InMemoryCustody {
    fn pull(&mut self, from: &str, amount: Amount) -> LedgerResult<()> {
        let allowance = self.allowance_of(from);
        if allowance < amount {
            return Err(LedgerError::CustodyRejected(format!(
                "{from} approved {allowance}, transfer needs {amount}"
            )));
        }
        let wallet = self.wallet_of(from);
        if wallet < amount {
            return Err(LedgerError::CustodyRejected(format!(
                "{from} holds {wallet} external units, transfer needs {amount}"
            )));
        }
        let held = self
            .held
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.wallets.insert(from.to_string(), wallet - amount);
        self.allowances.insert(from.to_string(), allowance - amount);
        self.held = held;
        Ok(())
    }

    fn release(&mut self, to: &str, amount: Amount) -> LedgerResult<()> {
        if self.held < amount {
            return Err(LedgerError::CustodyRejected(format!(
                "custody holds {}, release needs {amount}",
                self.held
            )));
        }
        let wallet = self
            .wallet_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.wallets.insert(to.to_string(), wallet);
        self.held -= amount;
        Ok(())
    }

    fn held(&self) -> Amount {
        self.held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_requires_approval_and_funds() {
        let mut custody = InMemoryCustody::new();
        custody.fund("alice", 100).unwrap();
        assert!(matches!(
            custody.pull("alice", 50),
            Err(LedgerError::CustodyRejected(_))
        ));

        custody.approve("alice", 500);
        assert!(matches!(
            custody.pull("alice", 150),
            Err(LedgerError::CustodyRejected(_))
        ));

        custody.pull("alice", 60).unwrap();
        assert_eq!(custody.wallet_of("alice"), 40);
        assert_eq!(custody.allowance_of("alice"), 440);
        assert_eq!(custody.held(), 60);
    }

    #[test]
    fn release_cannot_exceed_held() {
        let mut custody = InMemoryCustody::new();
        custody.fund("alice", 10).unwrap();
        custody.approve("alice", 10);
        custody.pull("alice", 10).unwrap();
        assert!(custody.release("alice", 11).is_err());
        custody.release("bob", 4).unwrap();
        assert_eq!(custody.wallet_of("bob"), 4);
        assert_eq!(custody.held(), 6);
    }
}
