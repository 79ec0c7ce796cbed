//! Queue tuning knobs.
//!
//! `QueueConfig` is deserializable so hosts can embed it in their own config
//! file; absent fields fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub const DEFAULT_CLAIM_TIMEOUT_MINUTES: i64 = 5;
pub const DEFAULT_CLAIM_LIMIT: u32 = 10;
/// One year.
pub const MAX_CLAIM_TIMEOUT_MINUTES: i64 = 365 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueConfig {
    /// Lease length; a claim older than this is treated as released.
    pub claim_timeout_minutes: i64,
    /// Batch size used when a claim request omits `limit`.
    pub default_claim_limit: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            claim_timeout_minutes: DEFAULT_CLAIM_TIMEOUT_MINUTES,
            default_claim_limit: DEFAULT_CLAIM_LIMIT,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.claim_timeout_minutes <= 0 {
            return Err(ConfigError::NonPositiveClaimTimeout(
                self.claim_timeout_minutes,
            ));
        }
        if self.claim_timeout_minutes > MAX_CLAIM_TIMEOUT_MINUTES {
            return Err(ConfigError::ClaimTimeoutTooLarge(self.claim_timeout_minutes));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    NonPositiveClaimTimeout(i64),
    ClaimTimeoutTooLarge(i64),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveClaimTimeout(value) => {
                write!(f, "claim timeout must be positive, got {value} minutes")
            }
            Self::ClaimTimeoutTooLarge(value) => write!(
                f,
                "claim timeout must be at most {MAX_CLAIM_TIMEOUT_MINUTES} minutes, got {value}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::{ConfigError, QueueConfig, MAX_CLAIM_TIMEOUT_MINUTES};

    #[test]
    fn missing_fields_use_defaults() {
        let config: QueueConfig =
            serde_json::from_str(r#"{"claimTimeoutMinutes": 15}"#).expect("valid config json");
        assert_eq!(config.claim_timeout_minutes, 15);
        assert_eq!(config.default_claim_limit, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_positive_timeout() {
        let config = QueueConfig {
            claim_timeout_minutes: 0,
            ..QueueConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositiveClaimTimeout(0))
        );
    }

    #[test]
    fn validate_rejects_timeout_beyond_one_year() {
        let config: QueueConfig =
            serde_json::from_str(r#"{"claimTimeoutMinutes": 9223372036854775807}"#)
                .expect("valid config json");
        assert_eq!(
            config.validate(),
            Err(ConfigError::ClaimTimeoutTooLarge(i64::MAX))
        );

        let at_cap = QueueConfig {
            claim_timeout_minutes: MAX_CLAIM_TIMEOUT_MINUTES,
            ..QueueConfig::default()
        };
        assert!(at_cap.validate().is_ok());
    }
}
