//! Withdrawal approval and payout dispatch.
//!
//! A request leaves `PENDING` through an admin (or, when the policy allows,
//! automatic) approval. Dispatch claims it by moving it to `PROCESSING`
//! before any provider call, then asks the provider whether a payout for
//! this withdrawal already exists. Only when none does is a new one created.
//! The withdrawal id doubles as the provider's idempotency key, so a payout
//! whose response was lost to a timeout is found again instead of re-issued.
//!
//! Provider outcomes:
//! - accepted: `PROCESSING` with the payout id recorded, final result by webhook
//! - refused: `FAILED`, funds unlocked, alert raised
//! - timed out: back to `APPROVED`, warning alert, picked up by the next dispatch
//!
//! Approval and dispatch both stop with `ServiceUnavailable` while the
//! withdrawals kill switch is off; provider webhooks are still applied.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use cashmatch_ledger::{
    KillSwitchSource, LedgerStore, WithdrawalCompletion, WithdrawalUpdate, raise_alert,
    record_audit, require_enabled,
};
use cashmatch_types::{
    Actor, Alert, AlertSeverity, AlertType, AuditAction, AuditEvent, CashMatchError, Clock,
    KillSwitch, ProviderPayout, ProviderPayoutStatus, Result, UserId, WithdrawalId, WithdrawalPolicy,
    WithdrawalRequest, WithdrawalStatus,
};

/// Outbound side of the payment provider.
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    /// Issue a payout. Implementations must treat `request.id` as the
    /// idempotency key.
    async fn create_payout(&self, request: &WithdrawalRequest) -> Result<ProviderPayout>;

    /// The payout previously issued for this withdrawal, if any.
    async fn lookup_payout(&self, withdrawal_id: WithdrawalId) -> Result<Option<ProviderPayout>>;
}

/// How [`InMemoryPayoutProvider`] answers `create_payout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutBehavior {
    Accept,
    /// Pay synchronously, no webhook needed.
    PayImmediately,
    Refuse(String),
    /// Record the payout, then sit on the response for this long.
    Stall(Duration),
}

/// Provider double keeping payouts in memory.
pub struct InMemoryPayoutProvider {
    payouts: Mutex<HashMap<WithdrawalId, ProviderPayout>>,
    behavior: Mutex<PayoutBehavior>,
    create_calls: Mutex<u32>,
}

impl Default for InMemoryPayoutProvider {
    fn default() -> Self {
        Self::new(PayoutBehavior::Accept)
    }
}

impl InMemoryPayoutProvider {
    #[must_use]
    pub fn new(behavior: PayoutBehavior) -> Self {
        Self {
            payouts: Mutex::new(HashMap::new()),
            behavior: Mutex::new(behavior),
            create_calls: Mutex::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: PayoutBehavior) -> Result<()> {
        *self.behavior.lock().map_err(|_| poisoned())? = behavior;
        Ok(())
    }

    /// Number of `create_payout` calls that reached the provider.
    pub fn create_calls(&self) -> Result<u32> {
        Ok(*self.create_calls.lock().map_err(|_| poisoned())?)
    }
}

#[async_trait]
impl PayoutProvider for InMemoryPayoutProvider {
    async fn create_payout(&self, request: &WithdrawalRequest) -> Result<ProviderPayout> {
        let behavior = self.behavior.lock().map_err(|_| poisoned())?.clone();
        *self.create_calls.lock().map_err(|_| poisoned())? += 1;

        let status = match &behavior {
            PayoutBehavior::Refuse(reason) => {
                return Err(CashMatchError::ProviderError {
                    reason: reason.clone(),
                });
            }
            PayoutBehavior::PayImmediately => ProviderPayoutStatus::Paid,
            PayoutBehavior::Accept | PayoutBehavior::Stall(_) => ProviderPayoutStatus::Submitted,
        };
        let payout = {
            let mut payouts = self.payouts.lock().map_err(|_| poisoned())?;
            payouts
                .entry(request.id)
                .or_insert_with(|| ProviderPayout {
                    provider_payout_id: format!("po_{}", Uuid::now_v7().simple()),
                    status,
                })
                .clone()
        };

        if let PayoutBehavior::Stall(delay) = behavior {
            tokio::time::sleep(delay).await;
        }
        Ok(payout)
    }

    async fn lookup_payout(&self, withdrawal_id: WithdrawalId) -> Result<Option<ProviderPayout>> {
        Ok(self
            .payouts
            .lock()
            .map_err(|_| poisoned())?
            .get(&withdrawal_id)
            .cloned())
    }
}

fn poisoned() -> CashMatchError {
    CashMatchError::Internal("payout provider lock poisoned".into())
}

/// What one dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Payout is with the provider; completion arrives by webhook.
    Submitted(WithdrawalRequest),
    Completed(WithdrawalRequest),
    /// Provider refused; funds are back in the wallet.
    Failed(WithdrawalRequest),
    /// Provider call timed out; the request is `APPROVED` again.
    OutcomeUnknown(WithdrawalRequest),
}

pub struct WithdrawalProcessor {
    store: Arc<dyn LedgerStore>,
    provider: Arc<dyn PayoutProvider>,
    kill_switches: Arc<dyn KillSwitchSource>,
    clock: Arc<dyn Clock>,
    policy: WithdrawalPolicy,
    provider_timeout: Duration,
}

impl WithdrawalProcessor {
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        provider: Arc<dyn PayoutProvider>,
        kill_switches: Arc<dyn KillSwitchSource>,
        clock: Arc<dyn Clock>,
        policy: WithdrawalPolicy,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            kill_switches,
            clock,
            policy,
            provider_timeout,
        }
    }

    pub async fn approve(&self, id: WithdrawalId, admin: UserId) -> Result<WithdrawalRequest> {
        self.approve_as(id, Actor::Admin(admin)).await
    }

    /// Approve without a human when the policy allows it and nothing flagged
    /// the request. Returns `None` when it must wait for an admin.
    pub async fn auto_approve(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>> {
        let request = self.find(id).await?;
        if !self.policy.auto_approve || request.requires_manual_review {
            return Ok(None);
        }
        self.approve_as(id, Actor::system("withdrawal_auto_approve"))
            .await
            .map(Some)
    }

    async fn approve_as(&self, id: WithdrawalId, actor: Actor) -> Result<WithdrawalRequest> {
        require_enabled(self.kill_switches.as_ref(), KillSwitch::Withdrawals).await?;
        let now = self.clock.now();
        let request = self
            .store
            .transition_withdrawal(
                id,
                WithdrawalStatus::Pending,
                WithdrawalStatus::Approved,
                WithdrawalUpdate::default(),
                now,
            )
            .await?;
        tracing::info!(withdrawal_id = %id, actor = %actor, "withdrawal approved");
        self.audit(AuditAction::WithdrawalApproved, actor, &request, serde_json::Value::Null)
            .await;
        Ok(request)
    }

    /// Reject a pending or approved request and unlock its funds.
    pub async fn reject(
        &self,
        id: WithdrawalId,
        admin: UserId,
        reason: &str,
    ) -> Result<WithdrawalRequest> {
        let current = self.find(id).await?;
        if !matches!(
            current.status,
            WithdrawalStatus::Pending | WithdrawalStatus::Approved
        ) {
            return Err(CashMatchError::conflict(format!(
                "withdrawal {id} is {}, cannot reject",
                current.status
            )));
        }
        let request = self
            .store
            .release_withdrawal(id, WithdrawalStatus::Rejected, reason, self.clock.now())
            .await?;
        tracing::info!(withdrawal_id = %id, admin = %admin, reason, "withdrawal rejected");
        self.audit(
            AuditAction::WithdrawalRejected,
            Actor::Admin(admin),
            &request,
            serde_json::json!({ "reason": reason }),
        )
        .await;
        Ok(request)
    }

    /// Send an approved request to the provider.
    pub async fn dispatch(&self, id: WithdrawalId) -> Result<DispatchOutcome> {
        let current = self.find(id).await?;
        match current.status {
            WithdrawalStatus::Approved => {}
            WithdrawalStatus::Processing => return Ok(DispatchOutcome::Submitted(current)),
            WithdrawalStatus::Completed => return Ok(DispatchOutcome::Completed(current)),
            WithdrawalStatus::Rejected | WithdrawalStatus::Failed => {
                return Ok(DispatchOutcome::Failed(current));
            }
            WithdrawalStatus::Pending => {
                return Err(CashMatchError::conflict(format!(
                    "withdrawal {id} is not approved"
                )));
            }
        }
        require_enabled(self.kill_switches.as_ref(), KillSwitch::Withdrawals).await?;

        let claimed = self
            .store
            .transition_withdrawal(
                id,
                WithdrawalStatus::Approved,
                WithdrawalStatus::Processing,
                WithdrawalUpdate::default(),
                self.clock.now(),
            )
            .await?;

        let payout = match self.find_or_create_payout(&claimed).await {
            Ok(payout) => payout,
            Err(err @ CashMatchError::ProviderTimeout { .. }) => {
                return self.revert_unknown(&claimed, &err).await;
            }
            Err(CashMatchError::ProviderError { reason }) => {
                return self.fail_dispatch(&claimed, &reason).await;
            }
            Err(err) => {
                // Nothing reached the provider that we know of; retry later.
                self.store
                    .transition_withdrawal(
                        id,
                        WithdrawalStatus::Processing,
                        WithdrawalStatus::Approved,
                        WithdrawalUpdate::default(),
                        self.clock.now(),
                    )
                    .await?;
                return Err(err);
            }
        };

        let request = self
            .store
            .transition_withdrawal(
                id,
                WithdrawalStatus::Processing,
                WithdrawalStatus::Processing,
                WithdrawalUpdate {
                    provider_payout_id: Some(payout.provider_payout_id.clone()),
                    failure_reason: None,
                },
                self.clock.now(),
            )
            .await?;
        tracing::info!(
            withdrawal_id = %id,
            provider_payout_id = %payout.provider_payout_id,
            amount_cents = request.amount_cents,
            "payout dispatched"
        );
        self.audit(
            AuditAction::WithdrawalDispatched,
            Actor::system("withdrawal_processor"),
            &request,
            serde_json::json!({ "provider_payout_id": payout.provider_payout_id }),
        )
        .await;

        match payout.status {
            ProviderPayoutStatus::Submitted => Ok(DispatchOutcome::Submitted(request)),
            ProviderPayoutStatus::Paid => self
                .complete_payout(&payout.provider_payout_id, Some(id))
                .await
                .map(DispatchOutcome::Completed),
            ProviderPayoutStatus::Failed => self
                .fail_payout(&payout.provider_payout_id, Some(id), "provider reported failure")
                .await
                .map(DispatchOutcome::Failed),
        }
    }

    /// Dispatch every approved request. Per-request errors are logged.
    /// Does nothing while withdrawals are switched off.
    pub async fn dispatch_approved(&self) -> Result<Vec<DispatchOutcome>> {
        if let Err(err) =
            require_enabled(self.kill_switches.as_ref(), KillSwitch::Withdrawals).await
        {
            tracing::debug!(error = %err, "withdrawals disabled, dispatch pass skipped");
            return Ok(Vec::new());
        }
        let approved = self
            .store
            .withdrawals_with_status(WithdrawalStatus::Approved)
            .await?;
        let mut outcomes = Vec::with_capacity(approved.len());
        for request in approved {
            match self.dispatch(request.id).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    tracing::warn!(withdrawal_id = %request.id, error = %err, "dispatch failed");
                }
            }
        }
        Ok(outcomes)
    }

    /// Run [`Self::dispatch_approved`] every `interval` until `shutdown`
    /// fires or its sender is dropped. Picks up requests whose dispatch was
    /// deferred or timed out.
    pub async fn run_forever(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?interval, "withdrawal dispatch loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.dispatch_approved().await {
                        Ok(outcomes) if !outcomes.is_empty() => {
                            let unknown = outcomes
                                .iter()
                                .filter(|o| matches!(o, DispatchOutcome::OutcomeUnknown(_)))
                                .count();
                            tracing::info!(dispatched = outcomes.len(), unknown, "withdrawal dispatch pass");
                        }
                        Ok(_) => {}
                        Err(err) => tracing::error!(error = %err, "withdrawal dispatch pass failed"),
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("withdrawal dispatch loop stopping");
                    break;
                }
            }
        }
    }

    /// Provider confirmed the payout: consume the locked funds.
    pub async fn complete_payout(
        &self,
        provider_payout_id: &str,
        withdrawal_id: Option<WithdrawalId>,
    ) -> Result<WithdrawalRequest> {
        let mut request = self.find_for_payout(provider_payout_id, withdrawal_id).await?;
        let now = self.clock.now();

        // A timed-out dispatch left the request APPROVED; the payout exists anyway.
        if request.status == WithdrawalStatus::Approved {
            request = self
                .store
                .transition_withdrawal(
                    request.id,
                    WithdrawalStatus::Approved,
                    WithdrawalStatus::Processing,
                    WithdrawalUpdate::default(),
                    now,
                )
                .await?;
        }
        if request.status == WithdrawalStatus::Processing
            && request.provider_payout_id.as_deref() != Some(provider_payout_id)
        {
            request = self
                .store
                .transition_withdrawal(
                    request.id,
                    WithdrawalStatus::Processing,
                    WithdrawalStatus::Processing,
                    WithdrawalUpdate {
                        provider_payout_id: Some(provider_payout_id.to_string()),
                        failure_reason: None,
                    },
                    now,
                )
                .await?;
        }

        match self.store.complete_withdrawal(request.id, now).await? {
            WithdrawalCompletion::Completed { request, entry } => {
                tracing::info!(
                    withdrawal_id = %request.id,
                    user_id = %request.user_id,
                    amount_cents = request.amount_cents,
                    entry_id = %entry.id,
                    "withdrawal completed"
                );
                self.audit(
                    AuditAction::WithdrawalCompleted,
                    Actor::system("payment_provider"),
                    &request,
                    serde_json::json!({ "provider_payout_id": provider_payout_id }),
                )
                .await;
                Ok(request)
            }
            WithdrawalCompletion::AlreadyCompleted(request) => Ok(request),
        }
    }

    /// Provider reported the payout failed or was returned.
    ///
    /// Unlocks held funds, or credits them back when the withdrawal had
    /// already completed. A request already rejected or failed is left alone.
    pub async fn fail_payout(
        &self,
        provider_payout_id: &str,
        withdrawal_id: Option<WithdrawalId>,
        reason: &str,
    ) -> Result<WithdrawalRequest> {
        let request = self.find_for_payout(provider_payout_id, withdrawal_id).await?;
        let now = self.clock.now();

        let (request, action) = if request.status == WithdrawalStatus::Completed {
            let (request, entry) = self
                .store
                .refund_completed_withdrawal(request.id, reason, now)
                .await?;
            tracing::warn!(
                withdrawal_id = %request.id,
                entry_id = %entry.id,
                amount_cents = request.amount_cents,
                reason,
                "completed payout returned, wallet credited"
            );
            (request, AuditAction::WithdrawalRefunded)
        } else if request.status.holds_funds() {
            let request = self
                .store
                .release_withdrawal(request.id, WithdrawalStatus::Failed, reason, now)
                .await?;
            tracing::warn!(withdrawal_id = %request.id, reason, "payout failed, funds unlocked");
            (request, AuditAction::WithdrawalFailed)
        } else {
            tracing::debug!(withdrawal_id = %request.id, status = %request.status, "payout failure already applied");
            return Ok(request);
        };

        raise_alert(
            self.store.as_ref(),
            Alert::new(
                AlertType::PayoutFailed,
                AlertSeverity::Warning,
                format!("payout {provider_payout_id} failed: {reason}"),
                now,
            )
            .for_user(request.user_id)
            .with_metadata(serde_json::json!({ "withdrawal_id": request.id })),
        )
        .await;
        self.audit(
            action,
            Actor::system("payment_provider"),
            &request,
            serde_json::json!({ "provider_payout_id": provider_payout_id, "reason": reason }),
        )
        .await;
        Ok(request)
    }

    /// Lookup first; create only when the provider has nothing for this id.
    async fn find_or_create_payout(&self, request: &WithdrawalRequest) -> Result<ProviderPayout> {
        let timeout_ms = u64::try_from(self.provider_timeout.as_millis()).unwrap_or(u64::MAX);

        let existing = tokio::time::timeout(self.provider_timeout, self.provider.lookup_payout(request.id))
            .await
            .map_err(|_| CashMatchError::ProviderTimeout {
                operation: "lookup_payout",
                timeout_ms,
            })??;
        if let Some(payout) = existing {
            tracing::info!(
                withdrawal_id = %request.id,
                provider_payout_id = %payout.provider_payout_id,
                "provider already holds a payout, not re-issuing"
            );
            return Ok(payout);
        }

        tokio::time::timeout(self.provider_timeout, self.provider.create_payout(request))
            .await
            .map_err(|_| CashMatchError::ProviderTimeout {
                operation: "create_payout",
                timeout_ms,
            })?
    }

    async fn revert_unknown(
        &self,
        claimed: &WithdrawalRequest,
        err: &CashMatchError,
    ) -> Result<DispatchOutcome> {
        let now = self.clock.now();
        let request = self
            .store
            .transition_withdrawal(
                claimed.id,
                WithdrawalStatus::Processing,
                WithdrawalStatus::Approved,
                WithdrawalUpdate::default(),
                now,
            )
            .await?;
        tracing::warn!(withdrawal_id = %claimed.id, error = %err, "payout outcome unknown");
        raise_alert(
            self.store.as_ref(),
            Alert::new(
                AlertType::PayoutOutcomeUnknown,
                AlertSeverity::Warning,
                format!("payout for {} timed out: {err}", claimed.id),
                now,
            )
            .for_user(claimed.user_id)
            .with_metadata(serde_json::json!({ "withdrawal_id": claimed.id })),
        )
        .await;
        Ok(DispatchOutcome::OutcomeUnknown(request))
    }

    async fn fail_dispatch(&self, claimed: &WithdrawalRequest, reason: &str) -> Result<DispatchOutcome> {
        let now = self.clock.now();
        let request = self
            .store
            .release_withdrawal(claimed.id, WithdrawalStatus::Failed, reason, now)
            .await?;
        tracing::warn!(withdrawal_id = %claimed.id, reason, "provider refused payout");
        raise_alert(
            self.store.as_ref(),
            Alert::new(
                AlertType::PayoutFailed,
                AlertSeverity::Warning,
                format!("provider refused payout for {}: {reason}", claimed.id),
                now,
            )
            .for_user(claimed.user_id),
        )
        .await;
        self.audit(
            AuditAction::WithdrawalFailed,
            Actor::system("withdrawal_processor"),
            &request,
            serde_json::json!({ "reason": reason }),
        )
        .await;
        Ok(DispatchOutcome::Failed(request))
    }

    async fn find(&self, id: WithdrawalId) -> Result<WithdrawalRequest> {
        self.store
            .get_withdrawal(id)
            .await?
            .ok_or_else(|| CashMatchError::not_found("withdrawal", id))
    }

    async fn find_for_payout(
        &self,
        provider_payout_id: &str,
        withdrawal_id: Option<WithdrawalId>,
    ) -> Result<WithdrawalRequest> {
        if let Some(request) = self.store.withdrawal_by_payout_id(provider_payout_id).await? {
            return Ok(request);
        }
        match withdrawal_id {
            Some(id) => self.find(id).await,
            None => Err(CashMatchError::not_found("payout", provider_payout_id)),
        }
    }

    async fn audit(
        &self,
        action: AuditAction,
        actor: Actor,
        request: &WithdrawalRequest,
        metadata: serde_json::Value,
    ) {
        let event = AuditEvent::new(action, actor, self.clock.now())
            .user(request.user_id)
            .amount(request.amount_cents)
            .metadata(serde_json::json!({
                "withdrawal_id": request.id,
                "status": request.status,
                "detail": metadata,
            }));
        record_audit(self.store.as_ref(), event).await;
    }
}

/// Spawn [`WithdrawalProcessor::run_forever`] on the current runtime.
pub fn spawn_withdrawal_dispatch_loop(
    processor: Arc<WithdrawalProcessor>,
    interval: Duration,
    shutdown: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(processor.run_forever(interval, shutdown))
}
