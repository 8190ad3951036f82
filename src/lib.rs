//! Offset token ledger and yield-accrual core.
//!
//! * [`ledger`]: account balances and total supply, mutated only through
//!   crate-private credit/debit primitives.
//! * [`offset`]: authority-gated minting of attested offsets and
//!   caller-initiated burning, with a per-account and global offset tally.
//! * [`yield_pool`]: deposit positions held in external custody, accruing
//!   linear yield that is claimed into the ledger.
//! * [`engine`]: the transaction boundary tying the three together over a
//!   single ledger, with replay protection, an event log and state roots.
//! * [`submit`]: Ed25519-signed envelopes for remote callers.
//!
//! Every operation returns the events it emitted and either applies fully or
//! leaves state untouched.

pub mod authority;
pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod ledger;
pub mod offset;
pub mod submit;
pub mod yield_pool;

mod error;

pub use engine::{Engine, Transaction};
pub use error::{LedgerError, LedgerResult};
pub use events::LedgerEvent;
