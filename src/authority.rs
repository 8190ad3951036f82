use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{LedgerError, LedgerResult};
use crate::events::LedgerEvent;
use crate::ledger::AccountId;

/// The single account allowed to perform privileged operations.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Authority {
    holder: AccountId,
}

impl Authority {
    pub fn new(holder: impl Into<AccountId>) -> Self {
        Self {
            holder: holder.into(),
        }
    }

    pub fn holder(&self) -> &AccountId {
        &self.holder
    }

    pub fn ensure(&self, caller: &str) -> LedgerResult<()> {
        if caller != self.holder {
            warn!(caller, authority = %self.holder, "privileged call rejected");
            return Err(LedgerError::Unauthorized {
                caller: caller.to_string(),
            });
        }
        Ok(())
    }

    pub fn transfer(&mut self, caller: &str, new_holder: &str) -> LedgerResult<LedgerEvent> {
        self.ensure(caller)?;
        let previous = std::mem::replace(&mut self.holder, new_holder.to_string());
        Ok(LedgerEvent::AuthorityTransferred {
            previous,
            new: new_holder.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_holder_passes_and_can_hand_over() {
        let mut authority = Authority::new("admin");
        assert!(authority.ensure("admin").is_ok());
        assert!(authority.ensure("mallory").unwrap_err().is_authorization());

        let event = authority.transfer("admin", "ops").unwrap();
        assert_eq!(
            event,
            LedgerEvent::AuthorityTransferred {
                previous: "admin".into(),
                new: "ops".into(),
            }
        );
        assert!(authority.ensure("admin").is_err());
        assert!(authority.ensure("ops").is_ok());
    }

    #[test]
    fn non_holder_cannot_transfer() {
        let mut authority = Authority::new("admin");
        assert!(authority.transfer("mallory", "mallory").is_err());
        assert_eq!(authority.holder(), "admin");
    }
}
