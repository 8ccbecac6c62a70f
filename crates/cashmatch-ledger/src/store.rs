//! The store contract.
//!
//! Every compound money mutation is a single method here. Implementations
//! must execute each method atomically (one serializable transaction, or one
//! conditional `UPDATE … WHERE available_cents >= $amount`); callers never
//! read a balance and write it back themselves.

use async_trait::async_trait;
use cashmatch_types::{
    Alert, AuditEvent, DepositIntent, Escrow, IdempotencyRecord, LedgerEntry, Match, MatchId,
    MatchPlayer, MatchStatus, PayoutPlan, ProviderEvent, Result, SettlementAttempt,
    SettlementLock, StoredResponse, UserId, WalletBalance, WithdrawalId, WithdrawalRequest,
    WithdrawalStatus,
};
use chrono::{DateTime, Duration, Utc};

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

/// Everything one successful join changed.
#[derive(Debug, Clone)]
pub struct JoinReceipt {
    pub player: MatchPlayer,
    pub entry: LedgerEntry,
    pub escrow: Escrow,
    pub match_status: MatchStatus,
    pub balance: WalletBalance,
}

/// Result of recording one player's score.
#[derive(Debug, Clone)]
pub struct ScoreReceipt {
    pub player: MatchPlayer,
    /// True when this score was the last one and the match is now completed.
    pub match_completed: bool,
}

#[derive(Debug, Clone)]
pub struct CancelReceipt {
    pub cancelled: Match,
    pub refunds: Vec<LedgerEntry>,
}

#[derive(Debug, Clone)]
pub enum DepositCompletion {
    Credited {
        intent: DepositIntent,
        entry: LedgerEntry,
    },
    AlreadyCompleted(DepositIntent),
}

#[derive(Debug, Clone)]
pub enum LockAcquisition {
    Acquired {
        lock: SettlementLock,
        /// An expired lock that was taken over.
        replaced: Option<SettlementLock>,
    },
    Held(SettlementLock),
}

#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    Applied {
        escrow: Escrow,
        entries: Vec<LedgerEntry>,
    },
    /// Escrow was already released; nothing was written.
    AlreadyReleased(Escrow),
}

#[derive(Debug, Clone)]
pub enum WithdrawalCreation {
    Created {
        request: WithdrawalRequest,
        balance: WalletBalance,
    },
    /// A request with the same `(user, idempotency_key)` exists; no funds moved.
    Existing(WithdrawalRequest),
}

/// Volume limits `create_withdrawal` enforces in the same step that locks
/// the funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WithdrawalLimits {
    /// The user may have no request created after this instant.
    pub user_window_start: DateTime<Utc>,
    /// Platform volume counts requests created at or after this instant.
    pub day_start: DateTime<Utc>,
    pub daily_platform_limit_cents: i64,
}

impl WithdrawalLimits {
    /// No rate window and no platform cap.
    #[cfg(any(test, feature = "test-helpers"))]
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            user_window_start: DateTime::<Utc>::MAX_UTC,
            day_start: DateTime::<Utc>::MAX_UTC,
            daily_platform_limit_cents: i64::MAX,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WithdrawalCompletion {
    Completed {
        request: WithdrawalRequest,
        entry: LedgerEntry,
    },
    AlreadyCompleted(WithdrawalRequest),
}

#[derive(Debug, Clone)]
pub enum IdempotencyReservation {
    Reserved,
    /// An in-flight reservation older than the lease was replaced by this one.
    Reclaimed(IdempotencyRecord),
    Existing(IdempotencyRecord),
}

/// Non-monetary fields a status transition may set.
#[derive(Debug, Clone, Default)]
pub struct WithdrawalUpdate {
    pub provider_payout_id: Option<String>,
    pub failure_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Repository traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Zero balance for users with no ledger history.
    async fn balance(&self, user_id: UserId) -> Result<WalletBalance>;

    /// All entries for a user, oldest first.
    async fn ledger_entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>>;

    /// Every user that owns a wallet.
    async fn wallet_users(&self) -> Result<Vec<UserId>>;

    /// Insert a pending intent; `provider_intent_id` must be unique.
    async fn create_deposit_intent(&self, intent: DepositIntent) -> Result<()>;

    async fn deposit_intent(&self, provider_intent_id: &str) -> Result<Option<DepositIntent>>;

    /// Atomically: pending → completed, credit available, append a `deposit` entry.
    async fn complete_deposit(
        &self,
        provider_intent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DepositCompletion>;

    /// pending → failed. No funds move.
    async fn fail_deposit(&self, provider_intent_id: &str, now: DateTime<Utc>)
    -> Result<DepositIntent>;
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Insert a waiting match and its empty pending escrow.
    async fn insert_match(&self, new_match: Match) -> Result<()>;

    async fn get_match(&self, match_id: MatchId) -> Result<Option<Match>>;

    async fn escrow(&self, match_id: MatchId) -> Result<Option<Escrow>>;

    /// Seats ordered by join order.
    async fn players(&self, match_id: MatchId) -> Result<Vec<MatchPlayer>>;

    /// Atomically: check seat/status/funds, debit the fee, append a
    /// `match_entry` entry, seat the player, grow escrow, and move the match
    /// to starting when it fills.
    async fn join_match(
        &self,
        match_id: MatchId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<JoinReceipt>;

    /// waiting|starting → active, requires `min_players` seats.
    async fn start_match(&self, match_id: MatchId, now: DateTime<Utc>) -> Result<Match>;

    /// Record a final score once; completes the match when every seat has one.
    async fn record_score(
        &self,
        match_id: MatchId,
        user_id: UserId,
        score: i64,
        time_taken_ms: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<ScoreReceipt>;

    /// Atomically: cancel a waiting/starting match, refund every seat with a
    /// `match_refund` entry, and mark the escrow refunded.
    async fn cancel_match(&self, match_id: MatchId, now: DateTime<Utc>) -> Result<CancelReceipt>;

    /// Most recent `joined_at` across all of the user's seats.
    async fn last_participation(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>>;

    /// Every escrow, any status.
    async fn escrows(&self) -> Result<Vec<Escrow>>;

    /// Ledger entries that reference the match, oldest first.
    async fn match_ledger_entries(&self, match_id: MatchId) -> Result<Vec<LedgerEntry>>;
}

#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Take the lock if free or expired.
    async fn try_acquire_lock(
        &self,
        match_id: MatchId,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockAcquisition>;

    /// Release if still held by `owner`. Returns whether a lock was removed.
    async fn release_lock(&self, match_id: MatchId, owner: &str) -> Result<bool>;

    /// Remove and return every lock whose TTL has passed.
    async fn reap_expired_locks(&self, now: DateTime<Utc>) -> Result<Vec<SettlementLock>>;

    /// Atomically apply a payout plan: credit each payout > 0 with a
    /// `match_payout` entry, update every seat, and release the escrow.
    ///
    /// Fenced by the lock: fails with `SettlementLocked` unless `owner`
    /// holds an unexpired lock for the match. Re-checks the escrow status
    /// inside the same unit and reports [`ApplyOutcome::AlreadyReleased`]
    /// without writing if another path got there first.
    async fn apply_settlement(
        &self,
        plan: &PayoutPlan,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome>;

    async fn record_attempt(&self, attempt: SettlementAttempt) -> Result<()>;

    async fn attempts(&self, match_id: MatchId) -> Result<Vec<SettlementAttempt>>;

    /// Terminal: the sweep stops picking the match up.
    async fn mark_settlement_failed(&self, match_id: MatchId) -> Result<()>;

    /// Completed matches with pending escrow, not terminally failed, and
    /// whose latest failed attempt's `next_retry_at` has passed.
    async fn unsettled_matches(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<MatchId>>;
}

#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// Atomically: check `limits`, move available → locked and insert the
    /// request. A replayed `(user, idempotency_key)` returns `Existing`
    /// before any limit is checked; a limit hit is `RateLimited`.
    async fn create_withdrawal(
        &self,
        request: WithdrawalRequest,
        limits: WithdrawalLimits,
    ) -> Result<WithdrawalCreation>;

    async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>>;

    async fn withdrawal_by_key(
        &self,
        user_id: UserId,
        idempotency_key: &str,
    ) -> Result<Option<WithdrawalRequest>>;

    async fn withdrawal_by_payout_id(
        &self,
        provider_payout_id: &str,
    ) -> Result<Option<WithdrawalRequest>>;

    /// Status change that moves no money (approve, dispatch, timeout revert).
    /// `from == to` only updates the fields in `update`. Fails with
    /// `StateConflict` unless the current status is `from`.
    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
        update: WithdrawalUpdate,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalRequest>;

    /// Atomically move to `rejected`/`failed` and unlock the funds.
    async fn release_withdrawal(
        &self,
        id: WithdrawalId,
        to: WithdrawalStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalRequest>;

    /// Atomically: processing → completed, consume locked funds, append a
    /// `withdrawal` entry.
    async fn complete_withdrawal(
        &self,
        id: WithdrawalId,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalCompletion>;

    /// Atomically: completed → failed and credit the amount back with a
    /// `withdrawal_refund` entry (payout returned after completion).
    async fn refund_completed_withdrawal(
        &self,
        id: WithdrawalId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(WithdrawalRequest, LedgerEntry)>;

    async fn withdrawals_for_user(&self, user_id: UserId) -> Result<Vec<WithdrawalRequest>>;

    async fn withdrawals_with_status(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalRequest>>;
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Insert an in-flight record unless one exists for the triple. An
    /// in-flight record reserved before `stale_before` is replaced and
    /// returned as `Reclaimed`.
    async fn reserve_key(
        &self,
        key: &str,
        user_id: UserId,
        route: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<IdempotencyReservation>;

    /// Store the final response for a reserved key.
    async fn complete_key(
        &self,
        key: &str,
        user_id: UserId,
        route: &str,
        response: StoredResponse,
    ) -> Result<()>;

    async fn get_key(
        &self,
        key: &str,
        user_id: UserId,
        route: &str,
    ) -> Result<Option<IdempotencyRecord>>;
}

#[async_trait]
pub trait ProviderEventStore: Send + Sync {
    /// Insert-first dedupe. `false` if `(provider, event_id)` already exists.
    async fn insert_event(&self, event: ProviderEvent) -> Result<bool>;

    /// Mark processed, recording the handler error if any.
    async fn finish_event(
        &self,
        provider_name: &str,
        provider_event_id: &str,
        processing_error: Option<String>,
    ) -> Result<()>;

    async fn get_event(
        &self,
        provider_name: &str,
        provider_event_id: &str,
    ) -> Result<Option<ProviderEvent>>;
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: Alert) -> Result<()>;

    /// Newest first.
    async fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>>;
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;

    /// Newest first, optionally restricted to events about one user.
    async fn audit_log(&self, user_id: Option<UserId>, limit: usize) -> Result<Vec<AuditEvent>>;
}

/// The full store surface. Components hold an `Arc<dyn LedgerStore>`.
pub trait LedgerStore:
    WalletStore
    + MatchStore
    + SettlementStore
    + WithdrawalStore
    + IdempotencyStore
    + ProviderEventStore
    + AlertSink
    + AuditSink
{
}

impl<T> LedgerStore for T where
    T: WalletStore
        + MatchStore
        + SettlementStore
        + WithdrawalStore
        + IdempotencyStore
        + ProviderEventStore
        + AlertSink
        + AuditSink
{
}

/// Raise an alert, logging instead of failing if the sink is down.
///
/// Alert delivery must never turn a handled failure into an unhandled one.
pub async fn raise_alert(sink: &dyn LedgerStore, alert: Alert) {
    let alert_type = alert.alert_type;
    if let Err(err) = sink.raise(alert).await {
        tracing::error!(?alert_type, error = %err, "failed to raise alert");
    }
}

/// Record an audit event, logging instead of failing if the sink is down.
pub async fn record_audit(sink: &dyn LedgerStore, event: AuditEvent) {
    let action = event.action;
    if let Err(err) = sink.record(event).await {
        tracing::error!(?action, error = %err, "failed to record audit event");
    }
}
