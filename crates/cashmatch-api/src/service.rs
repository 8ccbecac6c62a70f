//! # CashMatchService
//!
//! The one object a transport layer talks to. It owns every component of
//! the engine, built from a single [`EngineConfig`] and a set of injected
//! ports ([`ServiceDeps`]).
//!
//! Operations that move money on a client's behalf (join, settle, withdraw)
//! take an idempotency key and return an [`IdempotentResponse`]: the stored
//! status and JSON body, replayed verbatim on a retry with the same key.
//! Everything else returns typed values.
//!
//! Caller identity is taken as given. Authentication happens in front of
//! this facade; authorization against match ownership happens here.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use cashmatch_ledger::{
    EntryCollector, InMemoryKillSwitches, InMemoryStore, KillSwitchSource, LedgerStore, Wallet,
};
use cashmatch_payout::verify_payout_digest;
use cashmatch_settlement::{
    AutoSettlementJob, ComplianceProvider, DispatchOutcome, IdempotencyGuard,
    IdempotentResponse, InMemoryComplianceProvider, InMemoryPayoutProvider, LedgerReconciler,
    LockManager, PayoutProvider, ReconciliationReport, RetryPolicy, ScoreSubmission,
    SettlementOrchestrator, SettlementOutcome, WebhookAck, WebhookProcessor, WithdrawalGate,
    WithdrawalProcessor, spawn_auto_settlement_loop, spawn_withdrawal_dispatch_loop,
};
use cashmatch_types::{
    Actor, Alert, AuditEvent, CashMatchError, Clock, DepositIntent, EngineConfig,
    KillSwitchFlags, LedgerEntry, Match, MatchId, MatchParams, PlayerPayout, Result, SettlementTrigger, SystemClock, UserId,
    WalletBalance, WithdrawalId, WithdrawalRequest,
};

const ROUTE_JOIN: &str = "POST /matches/{id}/join";
const ROUTE_SETTLE: &str = "POST /matches/{id}/settle";
const ROUTE_WITHDRAW: &str = "POST /withdrawals";

/// External ports the engine runs against.
pub struct ServiceDeps {
    pub store: Arc<dyn LedgerStore>,
    pub kill_switches: Arc<dyn KillSwitchSource>,
    pub compliance: Arc<dyn ComplianceProvider>,
    pub payout_provider: Arc<dyn PayoutProvider>,
    pub clock: Arc<dyn Clock>,
}

impl ServiceDeps {
    /// Single-process wiring: in-memory store, all switches on, no
    /// compliance profiles, a provider that accepts every payout.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            kill_switches: Arc::new(InMemoryKillSwitches::new(KillSwitchFlags::default())),
            compliance: Arc::new(InMemoryComplianceProvider::new()),
            payout_provider: Arc::new(InMemoryPayoutProvider::default()),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Re-derivation of a released escrow's payout fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementVerification {
    pub match_id: MatchId,
    pub stored_digest: String,
    pub payouts: Vec<PlayerPayout>,
    pub digest_matches: bool,
}

/// The loops started by [`CashMatchService::start_background`].
pub struct BackgroundTasks {
    stops: Vec<oneshot::Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Signal every loop and wait for it to finish its current pass.
    pub async fn shutdown(self) {
        for stop in self.stops {
            let _ = stop.send(());
        }
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "background task ended abnormally");
            }
        }
    }
}

pub struct CashMatchService {
    store: Arc<dyn LedgerStore>,
    kill_switches: Arc<dyn KillSwitchSource>,
    wallet: Arc<Wallet>,
    collector: EntryCollector,
    orchestrator: Arc<SettlementOrchestrator>,
    guard: IdempotencyGuard,
    gate: WithdrawalGate,
    withdrawals: Arc<WithdrawalProcessor>,
    webhooks: WebhookProcessor,
    reconciler: LedgerReconciler,
    auto_settlement: Arc<AutoSettlementJob>,
    sweep_interval: Duration,
    dispatch_interval: Duration,
}

impl CashMatchService {
    pub fn new(config: &EngineConfig, deps: ServiceDeps) -> Result<Self> {
        config.validate()?;
        let ServiceDeps {
            store,
            kill_switches,
            compliance,
            payout_provider,
            clock,
        } = deps;

        let instance_id = config
            .instance_id
            .clone()
            .unwrap_or_else(|| format!("cashmatch-{}", std::process::id()));
        let locks = LockManager::new(
            store.clone(),
            clock.clone(),
            instance_id.clone(),
            chrono::Duration::seconds(config.settlement.lock_ttl_secs),
        );
        let orchestrator = Arc::new(SettlementOrchestrator::new(
            store.clone(),
            kill_switches.clone(),
            clock.clone(),
            locks,
            RetryPolicy::from_config(&config.settlement),
        ));
        let wallet = Arc::new(Wallet::new(
            store.clone(),
            kill_switches.clone(),
            clock.clone(),
        ));
        let withdrawals = Arc::new(WithdrawalProcessor::new(
            store.clone(),
            payout_provider,
            kill_switches.clone(),
            clock.clone(),
            config.withdrawal.clone(),
            Duration::from_millis(config.provider.timeout_ms),
        ));
        if config.webhook.signing_secret.is_empty() {
            tracing::warn!("webhook signing secret is empty; every webhook will be rejected");
        }

        tracing::info!(
            instance_id = %instance_id,
            provider = %config.provider.name,
            max_attempts = config.settlement.max_attempts,
            auto_approve = config.withdrawal.auto_approve,
            "cashmatch service configured"
        );

        Ok(Self {
            collector: EntryCollector::new(store.clone(), clock.clone()),
            guard: IdempotencyGuard::new(
                store.clone(),
                clock.clone(),
                chrono::Duration::seconds(config.idempotency.lease_secs),
            ),
            gate: WithdrawalGate::new(
                store.clone(),
                compliance,
                kill_switches.clone(),
                clock.clone(),
                config.withdrawal.clone(),
            ),
            webhooks: WebhookProcessor::new(
                store.clone(),
                wallet.clone(),
                withdrawals.clone(),
                clock.clone(),
                config.provider.name.clone(),
                config.webhook.signing_secret.clone(),
            ),
            reconciler: LedgerReconciler::new(store.clone(), clock.clone()),
            auto_settlement: Arc::new(AutoSettlementJob::new(
                store.clone(),
                orchestrator.clone(),
                kill_switches.clone(),
                clock,
                config.settlement.batch_size,
            )),
            store,
            kill_switches,
            wallet,
            orchestrator,
            withdrawals,
            sweep_interval: Duration::from_secs(config.settlement.sweep_interval_secs),
            dispatch_interval: Duration::from_secs(config.provider.dispatch_interval_secs),
        })
    }

    // -----------------------------------------------------------------------
    // Wallet
    // -----------------------------------------------------------------------

    pub async fn create_deposit_intent(
        &self,
        user_id: UserId,
        amount_cents: i64,
        provider_intent_id: impl Into<String>,
    ) -> Result<DepositIntent> {
        self.wallet
            .create_deposit_intent(user_id, amount_cents, provider_intent_id.into())
            .await
    }

    pub async fn balance(&self, user_id: UserId) -> Result<WalletBalance> {
        self.wallet.balance(user_id).await
    }

    pub async fn ledger(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        self.wallet.history(user_id).await
    }

    // -----------------------------------------------------------------------
    // Matches
    // -----------------------------------------------------------------------

    pub async fn create_match(&self, creator_id: UserId, params: MatchParams) -> Result<Match> {
        self.collector.create_match(creator_id, params).await
    }

    pub async fn join_match(
        &self,
        user_id: UserId,
        match_id: MatchId,
        idempotency_key: &str,
    ) -> Result<IdempotentResponse> {
        self.guard
            .execute(idempotency_key, user_id, ROUTE_JOIN, || async move {
                let receipt = self.collector.join(user_id, match_id).await?;
                Ok(json!({
                    "player": receipt.player,
                    "entry": receipt.entry,
                    "escrow": receipt.escrow,
                    "match_status": receipt.match_status,
                    "balance": receipt.balance,
                }))
            })
            .await
    }

    pub async fn start_match(&self, actor: &Actor, match_id: MatchId) -> Result<Match> {
        self.collector.start(actor, match_id).await
    }

    /// Cancel before start. Returns the refund entries.
    pub async fn cancel_match(
        &self,
        actor: &Actor,
        match_id: MatchId,
    ) -> Result<(Match, Vec<LedgerEntry>)> {
        let receipt = self.collector.cancel(actor, match_id).await?;
        Ok((receipt.cancelled, receipt.refunds))
    }

    pub async fn submit_score(
        &self,
        user_id: UserId,
        match_id: MatchId,
        score: i64,
        time_taken_ms: Option<u64>,
    ) -> Result<ScoreSubmission> {
        self.orchestrator
            .submit_score(user_id, match_id, score, time_taken_ms)
            .await
    }

    /// Explicit settle. Players of the match, its creator, admins, and the
    /// system may call it; a released escrow answers `already_settled`.
    pub async fn settle_match(
        &self,
        actor: &Actor,
        match_id: MatchId,
        idempotency_key: &str,
    ) -> Result<IdempotentResponse> {
        self.authorize_settle(actor, match_id).await?;
        let caller = match actor {
            Actor::User(id) | Actor::Admin(id) => *id,
            Actor::System(_) => UserId::SYSTEM,
        };

        self.guard
            .execute(idempotency_key, caller, ROUTE_SETTLE, || async move {
                match self
                    .orchestrator
                    .settle(match_id, SettlementTrigger::Manual)
                    .await?
                {
                    SettlementOutcome::Settled(plan) => {
                        Ok(json!({ "status": "settled", "plan": plan }))
                    }
                    SettlementOutcome::AlreadySettled(escrow) => {
                        Ok(json!({ "status": "already_settled", "escrow": escrow }))
                    }
                    SettlementOutcome::Locked { holder } => {
                        Err(CashMatchError::SettlementLocked { match_id, holder })
                    }
                    SettlementOutcome::Failed { reason, .. } => {
                        Err(CashMatchError::SettlementFailed { match_id, reason })
                    }
                }
            })
            .await
    }

    async fn authorize_settle(&self, actor: &Actor, match_id: MatchId) -> Result<()> {
        let Actor::User(user_id) = actor else {
            return Ok(());
        };
        let game = self
            .store
            .get_match(match_id)
            .await?
            .ok_or_else(|| CashMatchError::not_found("match", match_id))?;
        if game.creator_id == *user_id {
            return Ok(());
        }
        let seated = self
            .store
            .players(match_id)
            .await?
            .iter()
            .any(|p| p.user_id == *user_id);
        if seated {
            Ok(())
        } else {
            Err(CashMatchError::Forbidden {
                reason: format!("{user_id} is not part of {match_id}"),
            })
        }
    }

    /// Recompute the payout fingerprint from the seats as paid and compare it
    /// with the one stored at release.
    pub async fn verify_settlement(&self, match_id: MatchId) -> Result<SettlementVerification> {
        let escrow = self
            .store
            .escrow(match_id)
            .await?
            .ok_or_else(|| CashMatchError::not_found("escrow", match_id))?;
        let Some(stored_digest) = escrow.payout_digest.clone() else {
            return Err(CashMatchError::conflict(format!(
                "escrow for {match_id} is {} and has no payout digest",
                escrow.status
            )));
        };

        let mut players = self.store.players(match_id).await?;
        players.sort_by_key(|p| (p.placement, p.seat));
        let payouts: Vec<PlayerPayout> = players
            .into_iter()
            .filter_map(|p| {
                Some(PlayerPayout {
                    user_id: p.user_id,
                    placement: p.placement?,
                    result: p.result?,
                    payout_cents: p.payout_cents?,
                })
            })
            .collect();

        let digest_matches = verify_payout_digest(
            match_id,
            escrow.total_pot_cents,
            escrow.rake_cents,
            escrow.net_pot_cents,
            &payouts,
            &stored_digest,
        );
        if !digest_matches {
            tracing::error!(match_id = %match_id, "payout digest does not match applied payouts");
        }
        Ok(SettlementVerification {
            match_id,
            stored_digest,
            payouts,
            digest_matches,
        })
    }

    // -----------------------------------------------------------------------
    // Withdrawals
    // -----------------------------------------------------------------------

    /// Gate, lock funds, and under `auto_approve` dispatch straight away.
    pub async fn request_withdrawal(
        &self,
        user_id: UserId,
        amount_cents: i64,
        destination: &str,
        idempotency_key: &str,
    ) -> Result<IdempotentResponse> {
        self.guard
            .execute(idempotency_key, user_id, ROUTE_WITHDRAW, || async move {
                let request = self
                    .gate
                    .request_withdrawal(user_id, amount_cents, destination, idempotency_key)
                    .await?;
                let latest = match self.withdrawals.auto_approve(request.id).await? {
                    Some(approved) => self.dispatch_or_keep(approved).await,
                    None => request,
                };
                Ok(json!({ "withdrawal": latest }))
            })
            .await
    }

    /// Admin approval, followed by an immediate dispatch attempt.
    pub async fn approve_withdrawal(
        &self,
        admin_id: UserId,
        withdrawal_id: WithdrawalId,
    ) -> Result<WithdrawalRequest> {
        let approved = self.withdrawals.approve(withdrawal_id, admin_id).await?;
        Ok(self.dispatch_or_keep(approved).await)
    }

    pub async fn reject_withdrawal(
        &self,
        admin_id: UserId,
        withdrawal_id: WithdrawalId,
        reason: &str,
    ) -> Result<WithdrawalRequest> {
        self.withdrawals
            .reject(withdrawal_id, admin_id, reason)
            .await
    }

    /// Push every approved withdrawal to the provider.
    pub async fn dispatch_approved(&self) -> Result<Vec<DispatchOutcome>> {
        self.withdrawals.dispatch_approved().await
    }

    /// A dispatch failure leaves the request approved for the next sweep.
    async fn dispatch_or_keep(&self, approved: WithdrawalRequest) -> WithdrawalRequest {
        match self.withdrawals.dispatch(approved.id).await {
            Ok(
                DispatchOutcome::Submitted(w)
                | DispatchOutcome::Completed(w)
                | DispatchOutcome::Failed(w)
                | DispatchOutcome::OutcomeUnknown(w),
            ) => w,
            Err(err) => {
                tracing::warn!(
                    withdrawal_id = %approved.id,
                    error = %err,
                    "dispatch deferred"
                );
                approved
            }
        }
    }

    // -----------------------------------------------------------------------
    // Provider webhooks
    // -----------------------------------------------------------------------

    pub async fn handle_webhook(&self, raw_body: &[u8], signature: &str) -> Result<WebhookAck> {
        self.webhooks.handle(raw_body, signature).await
    }

    // -----------------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------------

    pub async fn kill_switch_flags(&self) -> Result<KillSwitchFlags> {
        self.kill_switches.flags().await
    }

    /// Newest first.
    pub async fn alerts(&self, limit: usize) -> Result<Vec<Alert>> {
        self.store.recent_alerts(limit).await
    }

    /// Newest first; `None` for the whole platform.
    pub async fn audit_log(
        &self,
        user_id: Option<UserId>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>> {
        self.store.audit_log(user_id, limit).await
    }

    pub async fn reconcile(&self) -> Result<ReconciliationReport> {
        self.reconciler.run().await
    }

    #[must_use]
    pub fn auto_settlement_job(&self) -> Arc<AutoSettlementJob> {
        self.auto_settlement.clone()
    }

    /// Start the auto-settlement sweep and the approved-withdrawal dispatch
    /// loop on the current runtime. Both run a pass immediately, then on
    /// their configured intervals.
    #[must_use]
    pub fn start_background(&self) -> BackgroundTasks {
        let (settle_stop, settle_rx) = oneshot::channel();
        let (dispatch_stop, dispatch_rx) = oneshot::channel();
        let handles = vec![
            spawn_auto_settlement_loop(self.auto_settlement.clone(), self.sweep_interval, settle_rx),
            spawn_withdrawal_dispatch_loop(
                self.withdrawals.clone(),
                self.dispatch_interval,
                dispatch_rx,
            ),
        ];
        BackgroundTasks {
            stops: vec![settle_stop, dispatch_stop],
            handles,
        }
    }
}
