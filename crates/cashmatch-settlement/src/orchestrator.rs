//! Settlement orchestrator.
//!
//! The single entry point for paying out a match, whichever path asked:
//! the last score submission, an explicit settle call, or the background
//! sweep.
//!
//! ## State Machine (per match)
//!
//! ```text
//!   COMPLETED ──lock──▶ SETTLING ──apply ok──▶ RELEASED
//!       ▲                  │
//!       │ backoff elapsed  │ failure (attempt n < max)
//!       └──── FAILED(n) ◀──┘
//!                  │ attempt n == max
//!                  ▼
//!         SETTLEMENT_FAILED (terminal, critical alert)
//! ```
//!
//! The released escrow is the proof of payment: every entry point checks it
//! before doing anything, and the store re-checks it inside the same atomic
//! unit that credits wallets.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use cashmatch_ledger::{
    ApplyOutcome, KillSwitchSource, LedgerStore, raise_alert, record_audit, require_enabled,
};
use cashmatch_payout::compute_payouts;
use cashmatch_types::{
    Actor, Alert, AlertSeverity, AlertType, AttemptStatus, AuditAction, AuditEvent,
    CashMatchError, Clock, Escrow, KillSwitch, MatchId, MatchPlayer, MatchStatus, PayoutPlan,
    Result, SettlementAttempt, SettlementTrigger, UserId,
};

use crate::lock::{LockManager, LockOutcome};
use crate::retry::RetryPolicy;

/// What one `settle` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Payouts applied by this call.
    Settled(PayoutPlan),
    /// Escrow was already released; nothing was written.
    AlreadySettled(Escrow),
    /// Another owner is settling right now.
    Locked { holder: String },
    /// Attempt recorded as failed. `escalated` once retries are exhausted.
    Failed {
        attempt_number: u32,
        reason: String,
        escalated: bool,
    },
}

impl SettlementOutcome {
    /// Settled now or earlier.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_) | Self::AlreadySettled(_))
    }
}

/// Result of a score submission.
#[derive(Debug, Clone)]
pub struct ScoreSubmission {
    pub player: MatchPlayer,
    pub match_completed: bool,
    /// Present when the submission completed the match and settlement ran.
    pub settlement: Option<SettlementOutcome>,
}

pub struct SettlementOrchestrator {
    store: Arc<dyn LedgerStore>,
    kill_switches: Arc<dyn KillSwitchSource>,
    clock: Arc<dyn Clock>,
    locks: LockManager,
    retry: RetryPolicy,
}

impl SettlementOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        kill_switches: Arc<dyn KillSwitchSource>,
        clock: Arc<dyn Clock>,
        locks: LockManager,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            kill_switches,
            clock,
            locks,
            retry,
        }
    }

    #[must_use]
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Record a player's final score and settle once the last one is in.
    ///
    /// The score is kept even when settlement is disabled or fails; the
    /// auto-settlement sweep finishes the job later.
    pub async fn submit_score(
        &self,
        user_id: UserId,
        match_id: MatchId,
        score: i64,
        time_taken_ms: Option<u64>,
    ) -> Result<ScoreSubmission> {
        let receipt = self
            .store
            .record_score(match_id, user_id, score, time_taken_ms, self.clock.now())
            .await?;
        tracing::info!(
            match_id = %match_id,
            user_id = %user_id,
            score,
            match_completed = receipt.match_completed,
            "score recorded"
        );

        let settlement = if receipt.match_completed {
            match self.settle(match_id, SettlementTrigger::ScoreSubmission).await {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    tracing::warn!(
                        match_id = %match_id,
                        error = %err,
                        "settlement deferred to the sweep"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(ScoreSubmission {
            player: receipt.player,
            match_completed: receipt.match_completed,
            settlement,
        })
    }

    /// Settle a completed match. Safe to call any number of times.
    pub async fn settle(
        &self,
        match_id: MatchId,
        trigger: SettlementTrigger,
    ) -> Result<SettlementOutcome> {
        require_enabled(self.kill_switches.as_ref(), KillSwitch::Settlement).await?;

        let game = self
            .store
            .get_match(match_id)
            .await?
            .ok_or_else(|| CashMatchError::not_found("match", match_id))?;
        let escrow = self
            .store
            .escrow(match_id)
            .await?
            .ok_or_else(|| CashMatchError::not_found("escrow", match_id))?;
        if escrow.is_released() {
            return Ok(SettlementOutcome::AlreadySettled(escrow));
        }
        if game.status != MatchStatus::Completed {
            return Err(CashMatchError::conflict(format!(
                "match {match_id} is {}, cannot settle",
                game.status
            )));
        }

        let owner = match self.locks.acquire(match_id).await? {
            LockOutcome::Acquired { owner } => owner,
            LockOutcome::Held { holder } => return Ok(SettlementOutcome::Locked { holder }),
        };

        let applied = self.apply_locked(match_id, &owner).await;
        self.locks.release(match_id, &owner).await;

        match applied {
            Ok((plan, ApplyOutcome::Applied { .. })) => {
                self.record_success(&plan, trigger).await;
                Ok(SettlementOutcome::Settled(plan))
            }
            Ok((_, ApplyOutcome::AlreadyReleased(escrow))) => {
                Ok(SettlementOutcome::AlreadySettled(escrow))
            }
            Err(CashMatchError::SettlementLocked { holder, .. }) => {
                Ok(SettlementOutcome::Locked { holder })
            }
            Err(err) => self.record_failure(match_id, trigger, &err).await,
        }
    }

    /// Re-read under the lock, compute, and apply in one store call.
    async fn apply_locked(&self, match_id: MatchId, owner: &str) -> Result<(PayoutPlan, ApplyOutcome)> {
        let game = self
            .store
            .get_match(match_id)
            .await?
            .ok_or_else(|| CashMatchError::not_found("match", match_id))?;
        let escrow = self
            .store
            .escrow(match_id)
            .await?
            .ok_or_else(|| CashMatchError::not_found("escrow", match_id))?;
        let players = self.store.players(match_id).await?;

        let plan = compute_payouts(&game, &players, escrow.total_pot_cents)?;
        let outcome = self
            .store
            .apply_settlement(&plan, owner, self.clock.now())
            .await?;
        Ok((plan, outcome))
    }

    /// Runs after the escrow was released; errors are logged, never returned.
    async fn record_success(&self, plan: &PayoutPlan, trigger: SettlementTrigger) {
        let now = self.clock.now();
        let attempt_number = match self.success_attempt(plan.match_id, trigger, now).await {
            Ok(number) => Some(number),
            Err(err) => {
                tracing::error!(
                    match_id = %plan.match_id,
                    %trigger,
                    error = %err,
                    "settled but the attempt record was not written"
                );
                None
            }
        };

        tracing::info!(
            match_id = %plan.match_id,
            %trigger,
            attempt_number = ?attempt_number,
            total_pot_cents = plan.total_pot_cents,
            rake_cents = plan.rake_cents,
            paid_cents = plan.payout_total(),
            unallocated_cents = plan.unallocated_cents(),
            digest = %plan.digest,
            "match settled"
        );
        record_audit(
            self.store.as_ref(),
            AuditEvent::new(AuditAction::MatchSettled, Actor::system("settlement"), now)
                .in_match(plan.match_id)
                .amount(plan.payout_total())
                .metadata(serde_json::json!({
                    "trigger": trigger,
                    "rake_cents": plan.rake_cents,
                    "net_pot_cents": plan.net_pot_cents,
                    "payout_digest": plan.digest,
                })),
        )
        .await;
    }

    async fn success_attempt(
        &self,
        match_id: MatchId,
        trigger: SettlementTrigger,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let attempt_number = self.next_attempt_number(match_id).await?;
        self.store
            .record_attempt(SettlementAttempt {
                match_id,
                attempt_number,
                status: AttemptStatus::Success,
                trigger,
                error_message: None,
                next_retry_at: None,
                created_at: now,
            })
            .await?;
        Ok(attempt_number)
    }

    async fn record_failure(
        &self,
        match_id: MatchId,
        trigger: SettlementTrigger,
        err: &CashMatchError,
    ) -> Result<SettlementOutcome> {
        let now = self.clock.now();
        let history = self.store.attempts(match_id).await?;
        let attempt_number = attempt_count(&history) + 1;
        let failed = u32::try_from(
            history
                .iter()
                .filter(|a| a.status == AttemptStatus::Failed)
                .count(),
        )
        .unwrap_or(u32::MAX)
        .saturating_add(1);
        let escalated = self.retry.is_exhausted(failed);
        let reason = err.to_string();

        self.store
            .record_attempt(SettlementAttempt {
                match_id,
                attempt_number,
                status: AttemptStatus::Failed,
                trigger,
                error_message: Some(reason.clone()),
                next_retry_at: (!escalated).then(|| self.retry.next_retry_at(attempt_number, now)),
                created_at: now,
            })
            .await?;

        if escalated {
            self.store.mark_settlement_failed(match_id).await?;
            tracing::error!(
                match_id = %match_id,
                %trigger,
                attempt_number,
                error = %err,
                "settlement retries exhausted"
            );
            raise_alert(
                self.store.as_ref(),
                Alert::new(
                    AlertType::SettlementFailed,
                    AlertSeverity::Critical,
                    format!("settlement failed after {failed} attempts: {reason}"),
                    now,
                )
                .for_match(match_id),
            )
            .await;
            record_audit(
                self.store.as_ref(),
                AuditEvent::new(
                    AuditAction::SettlementEscalated,
                    Actor::system("settlement"),
                    now,
                )
                .in_match(match_id)
                .metadata(serde_json::json!({ "error": reason })),
            )
            .await;
        } else {
            tracing::warn!(
                match_id = %match_id,
                %trigger,
                attempt_number,
                error = %err,
                "settlement attempt failed"
            );
        }

        Ok(SettlementOutcome::Failed {
            attempt_number,
            reason,
            escalated,
        })
    }

    async fn next_attempt_number(&self, match_id: MatchId) -> Result<u32> {
        Ok(attempt_count(&self.store.attempts(match_id).await?) + 1)
    }
}

fn attempt_count(history: &[SettlementAttempt]) -> u32 {
    u32::try_from(history.len()).unwrap_or(u32::MAX)
}
