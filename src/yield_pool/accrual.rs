use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{Amount, Timestamp};

pub const BPS_DENOMINATOR: u128 = 10_000;
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// Annual rate parameters for linear, non-compounding accrual.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct YieldRate {
    pub annual_rate_bps: u32,
    pub seconds_per_year: u64,
}

impl YieldRate {
    pub fn new(annual_rate_bps: u32) -> Self {
        Self {
            annual_rate_bps,
            seconds_per_year: SECONDS_PER_YEAR,
        }
    }

    /// `principal * rate_bps * elapsed / (10_000 * seconds_per_year)`, floored.
    pub fn accrue(&self, principal: Amount, elapsed: u64) -> LedgerResult<Amount> {
        if principal == 0 || elapsed == 0 || self.annual_rate_bps == 0 {
            return Ok(0);
        }
        let numerator_factor = u128::from(self.annual_rate_bps)
            .checked_mul(u128::from(elapsed))
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let denominator = BPS_DENOMINATOR
            .checked_mul(u128::from(self.seconds_per_year))
            .ok_or(LedgerError::ArithmeticOverflow)?;
        let amount = mul_div_floor(principal, numerator_factor, denominator)?;
        debug!(%principal, elapsed, rate_bps = self.annual_rate_bps, %amount, "accrued yield");
        Ok(amount)
    }
}

/// Elapsed seconds since the last claim; a clock that reads behind the
/// checkpoint yields zero rather than underflowing.
pub fn elapsed_since(last: Timestamp, now: Timestamp) -> u64 {
    now.saturating_sub(last)
}

/// Exact `floor(a * b / d)` that only fails when the quotient itself does not
/// fit, by splitting `a` into `q * d + r`.
pub fn mul_div_floor(a: u128, b: u128, d: u128) -> LedgerResult<u128> {
    if d == 0 {
        return Err(LedgerError::ArithmeticOverflow);
    }
    let q = a / d;
    let r = a % d;
    let whole = q.checked_mul(b).ok_or(LedgerError::ArithmeticOverflow)?;
    let partial = r.checked_mul(b).ok_or(LedgerError::ArithmeticOverflow)? / d;
    whole
        .checked_add(partial)
        .ok_or(LedgerError::ArithmeticOverflow)
}
