//! Linear settlement backoff.
//!
//! ```text
//! next_retry_at = now + attempt_number × base_backoff
//! ```
//!
//! After `max_attempts` failures the match is marked settlement-failed and
//! left for an operator. A retry time past the end of the calendar saturates
//! to [`DateTime::<Utc>::MAX_UTC`].

use cashmatch_types::{SettlementConfig, constants::MAX_CONFIG_DURATION_SECS};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
        }
    }

    #[must_use]
    pub fn from_config(config: &SettlementConfig) -> Self {
        let base_backoff = Duration::try_seconds(config.base_backoff_secs)
            .unwrap_or_else(|| Duration::seconds(MAX_CONFIG_DURATION_SECS));
        Self::new(config.max_attempts, base_backoff)
    }

    /// When the sweep may try again after attempt `attempt_number` failed.
    #[must_use]
    pub fn next_retry_at(&self, attempt_number: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        self.base_backoff
            .checked_mul(i32::try_from(attempt_number).unwrap_or(i32::MAX))
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True once `failed_attempts` reached the limit.
    #[must_use]
    pub fn is_exhausted(&self, failed_attempts: u32) -> bool {
        failed_attempts >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SettlementConfig::default())
    }
}
