//! Configuration types for CashMatch instances.
//!
//! Every section has a `Default` built from [`crate::constants`], so a
//! config file only needs the fields it overrides.

use serde::{Deserialize, Serialize};

use crate::{CashMatchError, Result, constants};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Identifies this process as a settlement-lock owner.
    pub instance_id: Option<String>,
    pub settlement: SettlementConfig,
    pub withdrawal: WithdrawalPolicy,
    pub provider: ProviderConfig,
    pub webhook: WebhookConfig,
    pub idempotency: IdempotencyConfig,
}

impl EngineConfig {
    /// Reject configurations that would break money-safety invariants.
    pub fn validate(&self) -> Result<()> {
        let s = &self.settlement;
        if s.max_attempts == 0 {
            return Err(CashMatchError::Configuration(
                "settlement.max_attempts must be > 0".into(),
            ));
        }
        for (name, secs) in [
            ("settlement.base_backoff_secs", s.base_backoff_secs),
            ("settlement.lock_ttl_secs", s.lock_ttl_secs),
            ("idempotency.lease_secs", self.idempotency.lease_secs),
        ] {
            duration_in_range(name, secs)?;
        }
        if s.batch_size == 0 {
            return Err(CashMatchError::Configuration(
                "settlement.batch_size must be > 0".into(),
            ));
        }
        if s.sweep_interval_secs == 0 || self.provider.dispatch_interval_secs == 0 {
            return Err(CashMatchError::Configuration(
                "background loop intervals must be > 0".into(),
            ));
        }

        let w = &self.withdrawal;
        if w.min_amount_cents <= 0 || w.max_amount_cents < w.min_amount_cents {
            return Err(CashMatchError::Configuration(format!(
                "withdrawal bounds [{}, {}] are invalid",
                w.min_amount_cents, w.max_amount_cents
            )));
        }
        if w.fraud_review_score > w.fraud_block_score {
            return Err(CashMatchError::Configuration(
                "fraud_review_score must not exceed fraud_block_score".into(),
            ));
        }
        for (name, secs) in [
            ("withdrawal.rate_window_hours", w.rate_window_hours.saturating_mul(3_600)),
            ("withdrawal.cooldown_hours", w.cooldown_hours.saturating_mul(3_600)),
            (
                "withdrawal.new_account_review_days",
                w.new_account_review_days.saturating_mul(86_400),
            ),
        ] {
            if secs != 0 {
                duration_in_range(name, secs)?;
            }
        }

        if self.provider.timeout_ms == 0 {
            return Err(CashMatchError::Configuration(
                "provider.timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

fn duration_in_range(name: &str, secs: i64) -> Result<()> {
    if secs <= 0 || secs > constants::MAX_CONFIG_DURATION_SECS {
        return Err(CashMatchError::Configuration(format!(
            "{name} must be positive and at most {} seconds",
            constants::MAX_CONFIG_DURATION_SECS
        )));
    }
    Ok(())
}

/// Settlement orchestration and background sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub max_attempts: u32,
    pub base_backoff_secs: i64,
    pub batch_size: usize,
    pub lock_ttl_secs: i64,
    pub sweep_interval_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::MAX_SETTLEMENT_ATTEMPTS,
            base_backoff_secs: constants::DEFAULT_SETTLEMENT_BACKOFF_SECS,
            batch_size: constants::DEFAULT_SETTLEMENT_BATCH_SIZE,
            lock_ttl_secs: constants::DEFAULT_SETTLEMENT_LOCK_TTL_SECS,
            sweep_interval_secs: constants::DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

/// Withdrawal gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WithdrawalPolicy {
    pub min_amount_cents: i64,
    pub max_amount_cents: i64,
    pub manual_review_amount_cents: i64,
    pub fraud_block_score: u8,
    pub fraud_review_score: u8,
    pub new_account_review_days: i64,
    pub daily_platform_limit_cents: i64,
    pub rate_window_hours: i64,
    pub cooldown_hours: i64,
    /// Dispatch requests that need no review without waiting for an admin.
    pub auto_approve: bool,
}

impl Default for WithdrawalPolicy {
    fn default() -> Self {
        Self {
            min_amount_cents: constants::MIN_WITHDRAWAL_CENTS,
            max_amount_cents: constants::MAX_WITHDRAWAL_CENTS,
            manual_review_amount_cents: constants::MANUAL_REVIEW_AMOUNT_CENTS,
            fraud_block_score: constants::FRAUD_BLOCK_SCORE,
            fraud_review_score: constants::FRAUD_REVIEW_SCORE,
            new_account_review_days: constants::NEW_ACCOUNT_REVIEW_DAYS,
            daily_platform_limit_cents: constants::DEFAULT_DAILY_PLATFORM_WITHDRAWAL_LIMIT_CENTS,
            rate_window_hours: constants::WITHDRAWAL_RATE_WINDOW_HOURS,
            cooldown_hours: constants::WITHDRAWAL_COOLDOWN_HOURS,
            auto_approve: false,
        }
    }
}

/// Outbound payment-provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
    pub timeout_ms: u64,
    pub dispatch_interval_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: constants::DEFAULT_PROVIDER_NAME.to_string(),
            timeout_ms: constants::DEFAULT_PROVIDER_TIMEOUT_MS,
            dispatch_interval_secs: constants::DEFAULT_DISPATCH_INTERVAL_SECS,
        }
    }
}

/// Inbound webhook verification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// HMAC-SHA256 signing secret shared with the provider.
    #[serde(skip_serializing)]
    pub signing_secret: String,
}

/// Request idempotency keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Seconds an in-flight reservation blocks retries before it may be
    /// taken over.
    pub lease_secs: i64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            lease_secs: constants::DEFAULT_IDEMPOTENCY_LEASE_SECS,
        }
    }
}
