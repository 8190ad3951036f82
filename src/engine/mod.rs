//! Transaction-submission boundary composing the ledger, the offset registry
//! and the yield manager over one shared balance ledger.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::authority::Authority;
use crate::config::EngineConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::events::LedgerEvent;
use crate::ledger::{build_merkle, AccountId, Amount, BalanceLedger, Timestamp};
use crate::offset::OffsetRegistry;
use crate::yield_pool::{Custody, InMemoryCustody, YieldManager, YieldPosition};

/// Caller-initiated request accepted at the boundary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transaction {
    Mint {
        account: AccountId,
        #[serde(with = "crate::ledger::amount_serde")]
        amount: Amount,
        attestation: String,
    },
    Burn {
        #[serde(with = "crate::ledger::amount_serde")]
        amount: Amount,
    },
    Deposit {
        #[serde(with = "crate::ledger::amount_serde")]
        amount: Amount,
    },
    Withdraw {
        #[serde(with = "crate::ledger::amount_serde")]
        amount: Amount,
    },
    ClaimYield,
    EmergencyWithdraw,
    TransferAuthority {
        new_authority: AccountId,
    },
}

impl Transaction {
    /// Unambiguous byte encoding used for receipt ids and signatures.
    pub fn commitment(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Transaction::Mint {
                account,
                amount,
                attestation,
            } => {
                buf.extend_from_slice(b"mint");
                push_str(&mut buf, account);
                buf.extend_from_slice(&amount.to_le_bytes());
                push_str(&mut buf, attestation);
            }
            Transaction::Burn { amount } => {
                buf.extend_from_slice(b"burn");
                buf.extend_from_slice(&amount.to_le_bytes());
            }
            Transaction::Deposit { amount } => {
                buf.extend_from_slice(b"deposit");
                buf.extend_from_slice(&amount.to_le_bytes());
            }
            Transaction::Withdraw { amount } => {
                buf.extend_from_slice(b"withdraw");
                buf.extend_from_slice(&amount.to_le_bytes());
            }
            Transaction::ClaimYield => buf.extend_from_slice(b"claim_yield"),
            Transaction::EmergencyWithdraw => buf.extend_from_slice(b"emergency_withdraw"),
            Transaction::TransferAuthority { new_authority } => {
                buf.extend_from_slice(b"transfer_authority");
                push_str(&mut buf, new_authority);
            }
        }
        buf
    }
}

fn push_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

const SIGNED_RECEIPT_DOMAIN: &[u8] = b"offset-ledger-tx";
const EXEC_RECEIPT_DOMAIN: &[u8] = b"offset-ledger-exec";

/// Receipt id binding a caller, a transaction and a caller-chosen nonce.
/// This is also the digest signed by [`crate::submit::SignedTransaction`].
pub fn receipt_id(caller: &str, tx: &Transaction, nonce: u64) -> [u8; 32] {
    domain_receipt(SIGNED_RECEIPT_DOMAIN, caller, tx, nonce)
}

/// Receipt id for locally executed calls, keyed by engine height. Kept in a
/// separate domain so it never collides with a signed envelope's digest.
pub fn exec_receipt_id(caller: &str, tx: &Transaction, height: u64) -> [u8; 32] {
    domain_receipt(EXEC_RECEIPT_DOMAIN, caller, tx, height)
}

fn domain_receipt(domain: &[u8], caller: &str, tx: &Transaction, nonce: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update((caller.len() as u64).to_le_bytes());
    hasher.update(caller.as_bytes());
    hasher.update(nonce.to_le_bytes());
    hasher.update(tx.commitment());
    hasher.finalize().into()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EngineMeta {
    pub height: u64,
    pub timestamp: Timestamp,
    pub previous_receipt: Option<[u8; 32]>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub meta: EngineMeta,
    pub balances: BTreeMap<AccountId, Amount>,
    pub total_supply: Amount,
    pub offsets: BTreeMap<AccountId, Amount>,
    pub total_offset: Amount,
    pub positions: BTreeMap<AccountId, YieldPosition>,
    pub total_staked: Amount,
    pub custody_held: Amount,
    pub events: Vec<LedgerEvent>,
    pub state_root: [u8; 32],
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("balances sum to {summed:?} but total supply is {recorded}")]
    Supply { summed: Option<Amount>, recorded: Amount },
    #[error("offset records sum to {summed:?} but total offset is {recorded}")]
    Offset { summed: Option<Amount>, recorded: Amount },
    #[error("principals sum to {summed:?} but total staked is {recorded}")]
    Staking { summed: Option<Amount>, recorded: Amount },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Engine<C = InMemoryCustody> {
    meta: EngineMeta,
    ledger: BalanceLedger,
    offsets: OffsetRegistry,
    yields: YieldManager<C>,
    events: Vec<LedgerEvent>,
    applied_receipts: BTreeSet<[u8; 32]>,
}

impl<C: Custody> Engine<C> {
    pub fn new(config: &EngineConfig, custody: C) -> Self {
        Self {
            meta: EngineMeta::default(),
            ledger: BalanceLedger::new(),
            offsets: OffsetRegistry::new(Authority::new(config.authority.clone())),
            yields: YieldManager::new(
                Authority::new(config.authority.clone()),
                config.rate(),
                custody,
            ),
            events: Vec::new(),
            applied_receipts: BTreeSet::new(),
        }
    }

    pub fn meta(&self) -> &EngineMeta {
        &self.meta
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    pub fn offsets(&self) -> &OffsetRegistry {
        &self.offsets
    }

    pub fn yields(&self) -> &YieldManager<C> {
        &self.yields
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn custody(&self) -> &C {
        self.yields.custody()
    }

    pub fn custody_mut(&mut self) -> &mut C {
        self.yields.custody_mut()
    }

    pub fn authority(&self) -> &AccountId {
        self.offsets.authority().holder()
    }

    pub fn balance_of(&self, account: &str) -> Amount {
        self.ledger.balance_of(account)
    }

    pub fn total_supply(&self) -> Amount {
        self.ledger.total_supply()
    }

    pub fn offset_of(&self, account: &str) -> Amount {
        self.offsets.offset_of(account)
    }

    pub fn total_offset(&self) -> Amount {
        self.offsets.total_offset()
    }

    pub fn position(&self, account: &str) -> Option<&YieldPosition> {
        self.yields.position(account)
    }

    pub fn pending_yield(&self, account: &str, now: Timestamp) -> LedgerResult<Amount> {
        self.yields.pending_yield(account, now)
    }

    pub fn total_staked(&self) -> Amount {
        self.yields.total_staked()
    }

    /// Apply `tx` on behalf of `caller`, deriving the receipt id from the
    /// current height so every accepted call is unique.
    pub fn execute(
        &mut self,
        caller: &str,
        tx: Transaction,
        now: Timestamp,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        let receipt = exec_receipt_id(caller, &tx, self.meta.height);
        self.submit(caller, tx, receipt, now)
    }

    /// Apply `tx` exactly once per `receipt`. A rejected transaction leaves
    /// the engine unchanged and its receipt unused.
    pub fn submit(
        &mut self,
        caller: &str,
        tx: Transaction,
        receipt: [u8; 32],
        now: Timestamp,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        if self.applied_receipts.contains(&receipt) {
            return Err(LedgerError::DuplicateReceipt);
        }
        debug!(caller, ?tx, receipt = %hex::encode(receipt), "submitting transaction");

        let events = match tx {
            Transaction::Mint {
                account,
                amount,
                attestation,
            } => self
                .offsets
                .mint(&mut self.ledger, caller, &account, amount, &attestation)?,
            Transaction::Burn { amount } => self.offsets.burn(&mut self.ledger, caller, amount)?,
            Transaction::Deposit { amount } => self.yields.deposit(caller, amount, now)?,
            Transaction::Withdraw { amount } => self.yields.withdraw(caller, amount)?,
            Transaction::ClaimYield => self.yields.claim_yield(&mut self.ledger, caller, now)?,
            Transaction::EmergencyWithdraw => self.yields.emergency_withdraw(caller)?,
            Transaction::TransferAuthority { new_authority } => {
                self.transfer_authority(caller, &new_authority)?
            }
        };

        self.events.extend(events.iter().cloned());
        self.meta.height += 1;
        self.meta.timestamp = self.meta.timestamp.max(now);
        self.meta.previous_receipt = Some(receipt);
        self.applied_receipts.insert(receipt);
        Ok(events)
    }

    /// Hand both privileged roles to `new_authority` in one step.
    fn transfer_authority(
        &mut self,
        caller: &str,
        new_authority: &str,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        self.offsets.authority().ensure(caller)?;
        self.yields.authority().ensure(caller)?;
        let event = self.offsets.authority_mut().transfer(caller, new_authority)?;
        self.yields.authority_mut().transfer(caller, new_authority)?;
        info!(previous = caller, new = new_authority, "authority transferred");
        Ok(vec![event])
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let summed = self.ledger.summed_balances();
        if summed != Some(self.ledger.total_supply()) {
            return Err(InvariantViolation::Supply {
                summed,
                recorded: self.ledger.total_supply(),
            });
        }
        let summed = self.offsets.summed_offsets();
        if summed != Some(self.offsets.total_offset()) {
            return Err(InvariantViolation::Offset {
                summed,
                recorded: self.offsets.total_offset(),
            });
        }
        let summed = self.yields.summed_principal();
        if summed != Some(self.yields.total_staked()) {
            return Err(InvariantViolation::Staking {
                summed,
                recorded: self.yields.total_staked(),
            });
        }
        Ok(())
    }

    pub fn state_root(&self) -> [u8; 32] {
        let mut leaves = self.ledger.leaves();
        for (account, offset) in self.offsets.records() {
            let mut hasher = Sha256::new();
            hasher.update(b"offset");
            hasher.update(account.as_bytes());
            hasher.update(offset.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        for (account, position) in self.yields.positions() {
            let mut hasher = Sha256::new();
            hasher.update(b"position");
            hasher.update(account.as_bytes());
            hasher.update(position.principal.to_le_bytes());
            hasher.update(position.deposit_time.to_le_bytes());
            hasher.update(position.last_claim_time.to_le_bytes());
            hasher.update(position.total_accumulated.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        let mut hasher = Sha256::new();
        hasher.update(b"totals");
        hasher.update(self.offsets.total_offset().to_le_bytes());
        hasher.update(self.yields.total_staked().to_le_bytes());
        hasher.update(self.yields.custody().held().to_le_bytes());
        leaves.push(hasher.finalize().into());
        build_merkle(leaves)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            meta: self.meta.clone(),
            balances: self
                .ledger
                .accounts()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            total_supply: self.ledger.total_supply(),
            offsets: self
                .offsets
                .records()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            total_offset: self.offsets.total_offset(),
            positions: self
                .yields
                .positions()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            total_staked: self.yields.total_staked(),
            custody_held: self.yields.custody().held(),
            events: self.events.clone(),
            state_root: self.state_root(),
        }
    }
}
