use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::AccountId;
use crate::yield_pool::{YieldRate, SECONDS_PER_YEAR};

/// Upper bound on the configured annual rate (1000%).
pub const MAX_ANNUAL_RATE_BPS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("authority account must not be empty")]
    EmptyAuthority,
    #[error("annual rate {0} bps exceeds the 100000 bps ceiling")]
    RateTooHigh(u32),
    #[error("seconds_per_year must be greater than zero")]
    ZeroYear,
}

/// Construction parameters for an [`Engine`](crate::engine::Engine).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    pub authority: AccountId,
    pub annual_rate_bps: u32,
    #[serde(default = "default_seconds_per_year")]
    pub seconds_per_year: u64,
}

fn default_seconds_per_year() -> u64 {
    SECONDS_PER_YEAR
}

impl EngineConfig {
    pub fn new(authority: impl Into<AccountId>, annual_rate_bps: u32) -> Self {
        Self {
            authority: authority.into(),
            annual_rate_bps,
            seconds_per_year: SECONDS_PER_YEAR,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.authority.trim().is_empty() {
            return Err(ConfigError::EmptyAuthority);
        }
        if self.annual_rate_bps > MAX_ANNUAL_RATE_BPS {
            return Err(ConfigError::RateTooHigh(self.annual_rate_bps));
        }
        if self.seconds_per_year == 0 {
            return Err(ConfigError::ZeroYear);
        }
        Ok(())
    }

    pub fn rate(&self) -> YieldRate {
        YieldRate {
            annual_rate_bps: self.annual_rate_bps,
            seconds_per_year: self.seconds_per_year,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_per_year_defaults_when_omitted() {
        let config =
            EngineConfig::from_json(r#"{"authority":"admin","annual_rate_bps":500}"#).unwrap();
        assert_eq!(config, EngineConfig::new("admin", 500));
        assert_eq!(config.rate().seconds_per_year, SECONDS_PER_YEAR);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            EngineConfig::from_json(r#"{"authority":" ","annual_rate_bps":500}"#),
            Err(ConfigError::EmptyAuthority)
        ));
        assert!(matches!(
            EngineConfig::from_json(r#"{"authority":"a","annual_rate_bps":100001}"#),
            Err(ConfigError::RateTooHigh(100_001))
        ));
        assert!(matches!(
            EngineConfig::from_json(
                r#"{"authority":"a","annual_rate_bps":1,"seconds_per_year":0}"#
            ),
            Err(ConfigError::ZeroYear)
        ));
        assert!(matches!(
            EngineConfig::from_json("{"),
            Err(ConfigError::Json(_))
        ));
    }
}
