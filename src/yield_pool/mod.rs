//! Yield-bearing deposit positions.
//!
//! Depositors move external units into custody and accrue linear yield on
//! their principal. Claimed yield is newly issued into the balance ledger;
//! it is never drawn from custody.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::authority::Authority;
use crate::error::{LedgerError, LedgerResult};
use crate::events::LedgerEvent;
use crate::ledger::{AccountId, Amount, BalanceLedger, Timestamp};

pub mod accrual;
pub mod custody;

pub use accrual::{YieldRate, SECONDS_PER_YEAR};
pub use custody::{Custody, InMemoryCustody};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct YieldPosition {
    pub principal: Amount,
    pub deposit_time: Timestamp,
    pub last_claim_time: Timestamp,
    pub total_accumulated: Amount,
}

impl YieldPosition {
    fn opened_at(now: Timestamp) -> Self {
        Self {
            principal: 0,
            deposit_time: now,
            last_claim_time: now,
            total_accumulated: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct YieldManager<C> {
    authority: Authority,
    rate: YieldRate,
    positions: BTreeMap<AccountId, YieldPosition>,
    total_staked: Amount,
    custody: C,
}

impl<C: Custody> YieldManager<C> {
    pub fn new(authority: Authority, rate: YieldRate, custody: C) -> Self {
        Self {
            authority,
            rate,
            positions: BTreeMap::new(),
            total_staked: 0,
            custody,
        }
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub(crate) fn authority_mut(&mut self) -> &mut Authority {
        &mut self.authority
    }

    pub fn rate(&self) -> YieldRate {
        self.rate
    }

    pub fn position(&self, account: &str) -> Option<&YieldPosition> {
        self.positions.get(account)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&AccountId, &YieldPosition)> {
        self.positions.iter()
    }

    pub fn total_staked(&self) -> Amount {
        self.total_staked
    }

    pub fn custody(&self) -> &C {
        &self.custody
    }

    pub fn custody_mut(&mut self) -> &mut C {
        &mut self.custody
    }

    pub fn deposit(
        &mut self,
        caller: &str,
        amount: Amount,
        now: Timestamp,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let mut position = match self.positions.get(caller) {
            None => YieldPosition::opened_at(now),
            // Idle positions restart accrual only; deposit_time stays at the opening.
            Some(existing) if existing.principal == 0 => YieldPosition {
                last_claim_time: existing.last_claim_time.max(now),
                ..existing.clone()
            },
            Some(existing) => existing.clone(),
        };
        position.principal = position
            .principal
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let total = self
            .total_staked
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        self.custody.pull(caller, amount)?;
        self.positions.insert(caller.to_string(), position);
        self.total_staked = total;

        info!(account = caller, %amount, total_staked = %total, "deposited");
        Ok(vec![LedgerEvent::Deposited {
            account: caller.to_string(),
            amount,
        }])
    }

    /// Reduce principal without touching pending yield.
    pub fn withdraw(&mut self, caller: &str, amount: Amount) -> LedgerResult<Vec<LedgerEvent>> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let have = self.position(caller).map(|p| p.principal).unwrap_or(0);
        if amount > have {
            return Err(LedgerError::InsufficientBalance {
                account: caller.to_string(),
                have,
                need: amount,
            });
        }
        let total = self
            .total_staked
            .checked_sub(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;

        self.custody.release(caller, amount)?;
        if let Some(position) = self.positions.get_mut(caller) {
            position.principal = have - amount;
        }
        self.total_staked = total;

        info!(account = caller, %amount, total_staked = %total, "withdrawn");
        Ok(vec![LedgerEvent::Withdrawn {
            account: caller.to_string(),
            amount,
        }])
    }

    pub fn pending_yield(&self, account: &str, now: Timestamp) -> LedgerResult<Amount> {
        match self.position(account) {
            Some(position) => self.rate.accrue(
                position.principal,
                accrual::elapsed_since(position.last_claim_time, now),
            ),
            None => Ok(0),
        }
    }

    /// Mint pending yield into the caller's ledger balance and restart the
    /// accrual clock. Claiming nothing succeeds.
    pub fn claim_yield(
        &mut self,
        ledger: &mut BalanceLedger,
        caller: &str,
        now: Timestamp,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        let pending = self.pending_yield(caller, now)?;
        if let Some(position) = self.positions.get(caller) {
            let accumulated = position
                .total_accumulated
                .checked_add(pending)
                .ok_or(LedgerError::ArithmeticOverflow)?;
            if pending > 0 {
                ledger.credit(caller, pending)?;
            }
            if let Some(position) = self.positions.get_mut(caller) {
                position.total_accumulated = accumulated;
                position.last_claim_time = position.last_claim_time.max(now);
            }
        }

        info!(account = caller, amount = %pending, "yield claimed");
        Ok(vec![LedgerEvent::YieldClaimed {
            account: caller.to_string(),
            amount: pending,
        }])
    }

    /// Sweep the whole custody balance to the authority.
    ///
    /// Positions and `total_staked` are left as they were; reconciling them
    /// afterwards is an operator task.
    pub fn emergency_withdraw(&mut self, caller: &str) -> LedgerResult<Vec<LedgerEvent>> {
        self.authority.ensure(caller)?;
        let amount = self.custody.held();
        if amount > 0 {
            self.custody.release(caller, amount)?;
        }
        warn!(authority = caller, %amount, total_staked = %self.total_staked, "emergency custody sweep");
        Ok(vec![LedgerEvent::EmergencyWithdraw {
            authority: caller.to_string(),
            amount,
        }])
    }

    pub fn summed_principal(&self) -> Option<Amount> {
        self.positions
            .values()
            .try_fold(0u128, |acc, p| acc.checked_add(p.principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tokens;

    const T0: Timestamp = 1_700_000_000;

    fn manager_with(users: &[(&str, Amount)]) -> YieldManager<InMemoryCustody> {
        let mut custody = InMemoryCustody::new();
        for (user, amount) in users {
            custody.fund(user, *amount).unwrap();
            custody.approve(user, *amount);
        }
        YieldManager::new(Authority::new("admin"), YieldRate::new(500), custody)
    }

    #[test]
    fn first_deposit_opens_position() {
        let mut manager = manager_with(&[("user1", tokens(100))]);
        let events = manager.deposit("user1", tokens(100), T0).unwrap();
        let position = manager.position("user1").unwrap();
        assert_eq!(position.principal, tokens(100));
        assert_eq!(position.deposit_time, T0);
        assert_eq!(position.last_claim_time, T0);
        assert_eq!(manager.total_staked(), tokens(100));
        assert_eq!(manager.custody().held(), tokens(100));
        assert_eq!(
            events,
            vec![LedgerEvent::Deposited {
                account: "user1".into(),
                amount: tokens(100),
            }]
        );
    }

    #[test]
    fn one_year_accrues_rate_share_of_principal() {
        let mut manager = manager_with(&[("user1", tokens(100))]);
        manager.deposit("user1", tokens(100), T0).unwrap();
        let pending = manager
            .pending_yield("user1", T0 + SECONDS_PER_YEAR)
            .unwrap();
        assert_eq!(pending, tokens(5));
    }

    #[test]
    fn two_half_year_claims_match_one_full_year() {
        let mut manager = manager_with(&[("user1", tokens(100))]);
        let mut ledger = BalanceLedger::new();
        manager.deposit("user1", tokens(100), T0).unwrap();

        let half = SECONDS_PER_YEAR / 2;
        manager.claim_yield(&mut ledger, "user1", T0 + half).unwrap();
        manager
            .claim_yield(&mut ledger, "user1", T0 + SECONDS_PER_YEAR)
            .unwrap();

        let position = manager.position("user1").unwrap();
        let single = YieldRate::new(500)
            .accrue(tokens(100), SECONDS_PER_YEAR)
            .unwrap();
        assert!(single - position.total_accumulated <= 1);
        assert_eq!(ledger.balance_of("user1"), position.total_accumulated);
        assert_eq!(ledger.total_supply(), position.total_accumulated);
        assert_eq!(position.last_claim_time, T0 + SECONDS_PER_YEAR);
    }

    #[test]
    fn claim_with_nothing_pending_succeeds() {
        let mut manager = manager_with(&[("user1", tokens(1))]);
        let mut ledger = BalanceLedger::new();
        let events = manager.claim_yield(&mut ledger, "user1", T0).unwrap();
        assert_eq!(
            events,
            vec![LedgerEvent::YieldClaimed {
                account: "user1".into(),
                amount: 0,
            }]
        );
        assert!(manager.position("user1").is_none());

        manager.deposit("user1", tokens(1), T0).unwrap();
        manager.claim_yield(&mut ledger, "user1", T0).unwrap();
        assert_eq!(ledger.total_supply(), 0);
    }

    #[test]
    fn claim_clock_never_moves_backwards() {
        let mut manager = manager_with(&[("user1", tokens(10))]);
        let mut ledger = BalanceLedger::new();
        manager.deposit("user1", tokens(10), T0 + 100).unwrap();
        manager.claim_yield(&mut ledger, "user1", T0).unwrap();
        let position = manager.position("user1").unwrap();
        assert_eq!(position.last_claim_time, T0 + 100);
        assert_eq!(position.total_accumulated, 0);
    }

    #[test]
    fn overdrawn_withdraw_changes_nothing() {
        let mut manager = manager_with(&[("user1", tokens(100))]);
        manager.deposit("user1", tokens(100), T0).unwrap();
        let before = manager.clone();
        let err = manager.withdraw("user1", tokens(150)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                account: "user1".into(),
                have: tokens(100),
                need: tokens(150),
            }
        );
        assert_eq!(manager, before);
    }

    #[test]
    fn partial_withdraw_keeps_clock_and_returns_funds() {
        let mut manager = manager_with(&[("user1", tokens(100))]);
        manager.deposit("user1", tokens(100), T0).unwrap();
        manager.withdraw("user1", tokens(40)).unwrap();
        let position = manager.position("user1").unwrap();
        assert_eq!(position.principal, tokens(60));
        assert_eq!(position.last_claim_time, T0);
        assert_eq!(manager.total_staked(), tokens(60));
        assert_eq!(manager.custody().wallet_of("user1"), tokens(40));
        assert_eq!(
            manager.pending_yield("user1", T0 + SECONDS_PER_YEAR).unwrap(),
            tokens(3)
        );
    }

    #[test]
    fn emptied_position_restarts_accrual_but_keeps_opening_time() {
        let mut manager = manager_with(&[("user1", tokens(20))]);
        manager.deposit("user1", tokens(10), T0).unwrap();
        manager.withdraw("user1", tokens(10)).unwrap();
        manager
            .deposit("user1", tokens(10), T0 + SECONDS_PER_YEAR)
            .unwrap();
        let position = manager.position("user1").unwrap();
        assert_eq!(position.deposit_time, T0);
        assert_eq!(position.last_claim_time, T0 + SECONDS_PER_YEAR);
        assert_eq!(
            manager.pending_yield("user1", T0 + SECONDS_PER_YEAR).unwrap(),
            0
        );
    }

    #[test]
    fn deposit_rejected_by_custody_leaves_position_untouched() {
        let mut manager = manager_with(&[("user1", tokens(5))]);
        let before = manager.clone();
        assert!(matches!(
            manager.deposit("user1", tokens(6), T0),
            Err(LedgerError::CustodyRejected(_))
        ));
        assert_eq!(
            manager.deposit("user1", 0, T0),
            Err(LedgerError::ZeroAmount)
        );
        assert_eq!(manager, before);
    }

    #[test]
    fn emergency_withdraw_is_authority_only() {
        let mut manager = manager_with(&[("user1", tokens(100))]);
        manager.deposit("user1", tokens(100), T0).unwrap();
        let err = manager.emergency_withdraw("user1").unwrap_err();
        assert!(err.is_authorization());
        assert_eq!(manager.custody().held(), tokens(100));

        let events = manager.emergency_withdraw("admin").unwrap();
        assert_eq!(
            events,
            vec![LedgerEvent::EmergencyWithdraw {
                authority: "admin".into(),
                amount: tokens(100),
            }]
        );
        assert_eq!(manager.custody().held(), 0);
        assert_eq!(manager.custody().wallet_of("admin"), tokens(100));
        assert_eq!(manager.total_staked(), tokens(100));
        assert!(matches!(
            manager.withdraw("user1", tokens(1)),
            Err(LedgerError::CustodyRejected(_))
        ));
    }

    #[test]
    fn emergency_sweep_of_empty_custody_emits_zero() {
        let mut manager = manager_with(&[]);
        let events = manager.emergency_withdraw("admin").unwrap();
        assert_eq!(
            events,
            vec![LedgerEvent::EmergencyWithdraw {
                authority: "admin".into(),
                amount: 0,
            }]
        );
        assert_eq!(manager.custody().held(), 0);
        assert_eq!(manager.custody().wallet_of("admin"), 0);
    }

    #[test]
    fn claim_after_full_withdraw_pays_nothing_further() {
        let mut manager = manager_with(&[("user1", tokens(100))]);
        let mut ledger = BalanceLedger::new();
        manager.deposit("user1", tokens(100), T0).unwrap();
        manager.withdraw("user1", tokens(100)).unwrap();

        let events = manager
            .claim_yield(&mut ledger, "user1", T0 + SECONDS_PER_YEAR)
            .unwrap();
        assert_eq!(
            events,
            vec![LedgerEvent::YieldClaimed {
                account: "user1".into(),
                amount: 0,
            }]
        );
        assert_eq!(ledger.total_supply(), 0);
        let position = manager.position("user1").unwrap();
        assert_eq!(position.principal, 0);
        assert_eq!(position.total_accumulated, 0);
        assert_eq!(position.last_claim_time, T0 + SECONDS_PER_YEAR);
    }
}
