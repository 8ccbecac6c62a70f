//! Withdrawal gate.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. replay of a request already created under the same key
//! 2. input validation (amount bounds, destination)
//! 3. withdrawals kill switch
//! 4. frozen account
//! 5. KYC approved and not withdrawal-locked
//! 6. fraud score (block, or force review)
//! 7. cooldown since the last match participation
//! 8. in one atomic store step: one request per user per rolling window,
//!    platform-wide volume for the current UTC day, then lock the funds and
//!    insert the request
//!
//! A request that passes is created `PENDING`; large amounts, elevated
//! fraud scores and young accounts are flagged for manual review.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use cashmatch_ledger::{
    KillSwitchSource, LedgerStore, WithdrawalCreation, WithdrawalLimits, record_audit,
    require_enabled,
};
use cashmatch_types::{
    Actor, AuditAction, AuditEvent, CashMatchError, Clock, ComplianceProfile, KillSwitch,
    KycStatus, Result, ReviewReason, UserId, WithdrawalPolicy, WithdrawalRequest,
};

/// Read-only view of the identity/compliance subsystem.
#[async_trait]
pub trait ComplianceProvider: Send + Sync {
    async fn profile(&self, user_id: UserId) -> Result<Option<ComplianceProfile>>;
}

/// Profiles held in memory; used by tests and the single-process service.
#[derive(Default)]
pub struct InMemoryComplianceProvider {
    profiles: RwLock<HashMap<UserId, ComplianceProfile>>,
}

impl InMemoryComplianceProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, profile: ComplianceProfile) -> Result<()> {
        self.profiles
            .write()
            .map_err(|_| CashMatchError::Internal("compliance lock poisoned".into()))?
            .insert(profile.user_id, profile);
        Ok(())
    }
}

#[async_trait]
impl ComplianceProvider for InMemoryComplianceProvider {
    async fn profile(&self, user_id: UserId) -> Result<Option<ComplianceProfile>> {
        Ok(self
            .profiles
            .read()
            .map_err(|_| CashMatchError::Internal("compliance lock poisoned".into()))?
            .get(&user_id)
            .cloned())
    }
}

pub struct WithdrawalGate {
    store: Arc<dyn LedgerStore>,
    compliance: Arc<dyn ComplianceProvider>,
    kill_switches: Arc<dyn KillSwitchSource>,
    clock: Arc<dyn Clock>,
    policy: WithdrawalPolicy,
}

impl WithdrawalGate {
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        compliance: Arc<dyn ComplianceProvider>,
        kill_switches: Arc<dyn KillSwitchSource>,
        clock: Arc<dyn Clock>,
        policy: WithdrawalPolicy,
    ) -> Self {
        Self {
            store,
            compliance,
            kill_switches,
            clock,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &WithdrawalPolicy {
        &self.policy
    }

    /// Create a withdrawal request and lock its funds.
    ///
    /// Calling again with the same `idempotency_key` returns the request
    /// created the first time, whatever the other arguments say.
    pub async fn request_withdrawal(
        &self,
        user_id: UserId,
        amount_cents: i64,
        destination: &str,
        idempotency_key: &str,
    ) -> Result<WithdrawalRequest> {
        if idempotency_key.trim().is_empty() {
            return Err(CashMatchError::validation("idempotency key is required"));
        }
        if let Some(existing) = self.store.withdrawal_by_key(user_id, idempotency_key).await? {
            tracing::debug!(withdrawal_id = %existing.id, "withdrawal replayed by key");
            return Ok(existing);
        }

        self.validate_input(amount_cents, destination)?;
        require_enabled(self.kill_switches.as_ref(), KillSwitch::Withdrawals).await?;

        let now = self.clock.now();
        let profile = self
            .compliance
            .profile(user_id)
            .await?
            .ok_or_else(|| blocked("no compliance profile on record"))?;
        let reasons = self.check_compliance(&profile, amount_cents, now)?;

        self.check_cooldown(user_id, now).await?;
        let limits = self.limits(now)?;

        let request = WithdrawalRequest::new(
            user_id,
            amount_cents,
            destination.to_string(),
            idempotency_key.to_string(),
            reasons,
            now,
        );
        let created = self
            .store
            .create_withdrawal(request, limits)
            .await
            .inspect_err(|err| {
                if let CashMatchError::RateLimited { reason } = err {
                    tracing::warn!(user_id = %user_id, amount_cents, %reason, "withdrawal rate limited");
                }
            })?;
        let request = match created {
            WithdrawalCreation::Created { request, balance } => {
                tracing::info!(
                    withdrawal_id = %request.id,
                    user_id = %user_id,
                    amount_cents,
                    requires_manual_review = request.requires_manual_review,
                    locked_cents = balance.locked_cents,
                    "withdrawal requested"
                );
                record_audit(
                    self.store.as_ref(),
                    AuditEvent::new(AuditAction::WithdrawalRequested, Actor::User(user_id), now)
                        .user(user_id)
                        .amount(amount_cents)
                        .metadata(serde_json::json!({
                            "withdrawal_id": request.id,
                            "review_reasons": request.review_reasons,
                        })),
                )
                .await;
                request
            }
            WithdrawalCreation::Existing(existing) => existing,
        };
        Ok(request)
    }

    fn validate_input(&self, amount_cents: i64, destination: &str) -> Result<()> {
        if amount_cents <= 0 {
            return Err(CashMatchError::validation("withdrawal amount must be positive"));
        }
        if amount_cents < self.policy.min_amount_cents || amount_cents > self.policy.max_amount_cents
        {
            return Err(CashMatchError::validation(format!(
                "withdrawal amount {amount_cents} outside [{}, {}]",
                self.policy.min_amount_cents, self.policy.max_amount_cents
            )));
        }
        if destination.trim().is_empty() {
            return Err(CashMatchError::validation("payout destination is required"));
        }
        Ok(())
    }

    /// Hard blocks first, then the reasons that route to manual review.
    fn check_compliance(
        &self,
        profile: &ComplianceProfile,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReviewReason>> {
        if profile.frozen {
            return Err(blocked("account is frozen"));
        }
        if profile.kyc_status != KycStatus::Approved {
            return Err(blocked("identity verification not approved"));
        }
        if profile.withdrawal_locked {
            return Err(blocked("withdrawals locked by compliance"));
        }
        if profile.fraud_score >= self.policy.fraud_block_score {
            return Err(blocked("risk score too high"));
        }

        let mut reasons = Vec::new();
        if amount_cents >= self.policy.manual_review_amount_cents {
            reasons.push(ReviewReason::LargeAmount);
        }
        if profile.fraud_score >= self.policy.fraud_review_score {
            reasons.push(ReviewReason::ElevatedFraudScore);
        }
        if profile.account_age(now) < Duration::days(self.policy.new_account_review_days) {
            reasons.push(ReviewReason::NewAccount);
        }
        Ok(reasons)
    }

    fn limits(&self, now: DateTime<Utc>) -> Result<WithdrawalLimits> {
        let day_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| CashMatchError::Internal("invalid UTC midnight".into()))?
            .and_utc();
        Ok(WithdrawalLimits {
            user_window_start: now - Duration::hours(self.policy.rate_window_hours),
            day_start,
            daily_platform_limit_cents: self.policy.daily_platform_limit_cents,
        })
    }

    async fn check_cooldown(&self, user_id: UserId, now: DateTime<Utc>) -> Result<()> {
        if let Some(last) = self.store.last_participation(user_id).await? {
            if now - last < Duration::hours(self.policy.cooldown_hours) {
                return Err(CashMatchError::RateLimited {
                    reason: format!(
                        "withdrawals open {} hours after the last match",
                        self.policy.cooldown_hours
                    ),
                });
            }
        }
        Ok(())
    }
}

fn blocked(reason: &str) -> CashMatchError {
    CashMatchError::ComplianceBlocked {
        reason: reason.to_string(),
    }
}
