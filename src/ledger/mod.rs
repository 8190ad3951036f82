use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, LedgerResult};

pub type AccountId = String;
pub type Amount = u128;
pub type Timestamp = u64;

pub const DECIMALS: u32 = 18;
pub const UNIT: Amount = 1_000_000_000_000_000_000; // 1 token = 1e18 base units

/// Convert a whole-token quantity into base units.
pub fn tokens(whole: u64) -> Amount {
    Amount::from(whole) * UNIT
}

/// Parse a decimal token quantity such as `"12.5"` into base units.
pub fn parse_amount(raw: &str) -> Option<Amount> {
    let raw = raw.trim();
    let (whole, frac) = match raw.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (raw, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    if frac.len() > DECIMALS as usize
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !frac.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let whole: Amount = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: Amount = if frac.is_empty() {
        0
    } else {
        frac.parse::<Amount>().ok()? * 10u128.pow(DECIMALS - frac.len() as u32)
    };
    whole.checked_mul(UNIT)?.checked_add(frac)
}

/// Render base units as a decimal token quantity without trailing zeros.
pub fn format_amount(amount: Amount) -> String {
    let whole = amount / UNIT;
    let frac = amount % UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{frac:018}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

/// Base-unit amounts carried as decimal strings inside tagged enums.
pub mod amount_serde {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use super::Amount;

    pub fn serialize<S>(value: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Fungible balance store: account balances plus a total-supply counter.
///
/// `credit` and `debit` are the only mutation paths and are crate-private, so
/// the offset registry and the yield manager cannot write balances directly.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceLedger {
    balances: BTreeMap<AccountId, Amount>,
    total_supply: Amount,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &str) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&AccountId, &Amount)> {
        self.balances.iter()
    }

    pub(crate) fn credit(&mut self, account: &str, amount: Amount) -> LedgerResult<()> {
        let balance = self
            .balance_of(account)
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.balances.insert(account.to_string(), balance);
        self.total_supply = supply;
        Ok(())
    }

    pub(crate) fn debit(&mut self, account: &str, amount: Amount) -> LedgerResult<()> {
        let have = self.balance_of(account);
        if have < amount {
            return Err(LedgerError::InsufficientBalance {
                account: account.to_string(),
                have,
                need: amount,
            });
        }
        let supply = self
            .total_supply
            .checked_sub(amount)
            .ok_or(LedgerError::ArithmeticOverflow)?;
        self.balances.insert(account.to_string(), have - amount);
        self.total_supply = supply;
        Ok(())
    }

    /// Sum of every account balance, computed independently of the counter.
    pub fn summed_balances(&self) -> Option<Amount> {
        self.balances
            .values()
            .try_fold(0u128, |acc, v| acc.checked_add(*v))
    }

    pub(crate) fn leaves(&self) -> Vec<[u8; 32]> {
        let mut leaves = Vec::with_capacity(self.balances.len() + 1);
        for (account, balance) in &self.balances {
            let mut hasher = Sha256::new();
            hasher.update(b"acct");
            hasher.update(account.as_bytes());
            hasher.update(balance.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
        let mut hasher = Sha256::new();
        hasher.update(b"supply");
        hasher.update(self.total_supply.to_le_bytes());
        leaves.push(hasher.finalize().into());
        leaves
    }
}

/// Fold hashed leaves pairwise into a single root; odd nodes pair with themselves.
pub(crate) fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"offset-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
