//! Offset minting and burning on top of the balance ledger.
//!
//! Every minted unit is backed by attestation metadata and mirrored in a
//! per-account offset record plus a global aggregate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::authority::Authority;
use crate::error::{LedgerError, LedgerResult};
use crate::events::LedgerEvent;
use crate::ledger::{AccountId, Amount, BalanceLedger};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OffsetRegistry {
    authority: Authority,
    offsets: BTreeMap<AccountId, Amount>,
    total_offset: Amount,
}

impl OffsetRegistry {
    pub fn new(authority: Authority) -> Self {
        Self {
            authority,
            offsets: BTreeMap::new(),
            total_offset: 0,
        }
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub(crate) fn authority_mut(&mut self) -> &mut Authority {
        &mut self.authority
    }

    pub fn offset_of(&self, account: &str) -> Amount {
        self.offsets.get(account).copied().unwrap_or(0)
    }

    pub fn total_offset(&self) -> Amount {
        self.total_offset
    }

    pub fn records(&self) -> impl Iterator<Item = (&AccountId, &Amount)> {
        self.offsets.iter()
    }

    pub fn mint(
        &mut self,
        ledger: &mut BalanceLedger,
        caller: &str,
        account: &str,
        amount: Amount,
        attestation: &str,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        self.authority.ensure(caller)?;
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        if attestation.trim().is_empty() {
            return Err(LedgerError::MissingAttestation);
        }
        let record = self
            .offset_of(account)
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let total = self
            .total_offset
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        ledger.credit(account, amount)?;
        self.offsets.insert(account.to_string(), record);
        self.total_offset = total;

        info!(account, %amount, total_offset = %total, "offset minted");
        Ok(vec![LedgerEvent::CarbonOffsetMinted {
            account: account.to_string(),
            amount,
            attestation: attestation.to_string(),
        }])
    }

    /// Burn from the caller's own balance.
    ///
    /// The offset record shrinks by the burned amount, floored at zero when
    /// part of the balance came from yield rather than minted offsets.
    pub fn burn(
        &mut self,
        ledger: &mut BalanceLedger,
        caller: &str,
        amount: Amount,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let have = ledger.balance_of(caller);
        if amount > have {
            return Err(LedgerError::InsufficientBalance {
                account: caller.to_string(),
                have,
                need: amount,
            });
        }
        let current = self.offset_of(caller);
        let reduction = amount.min(current);
        let remaining = current - reduction;
        let total = self
            .total_offset
            .checked_sub(reduction)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        ledger.debit(caller, amount)?;
        if self.offsets.contains_key(caller) {
            self.offsets.insert(caller.to_string(), remaining);
        }
        self.total_offset = total;

        info!(account = caller, %amount, remaining_offset = %remaining, "offset burned");
        Ok(vec![LedgerEvent::CarbonOffsetBurned {
            account: caller.to_string(),
            amount,
            remaining_offset: remaining,
        }])
    }

    pub fn summed_offsets(&self) -> Option<Amount> {
        self.offsets
            .values()
            .try_fold(0u128, |acc, v| acc.checked_add(*v))
    }
}
