//! In-memory [`LedgerStore`](crate::LedgerStore).
//!
//! One mutex guards the whole state, so every trait method runs as a single
//! critical section. Methods that touch several wallets stage their changes
//! on copies and commit only after every step has succeeded: either the full
//! operation lands or nothing does.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use cashmatch_types::{
    Alert, AuditEvent, CashMatchError, DepositIntent, DepositStatus, Escrow, EscrowStatus,
    IdempotencyRecord, IdempotencyState, LedgerEntry, LedgerEntryType, Match, MatchId,
    MatchPlayer, MatchStatus, PayoutPlan, ProviderEvent, Result, SettlementAttempt,
    AttemptStatus, SettlementLock, StoredResponse, UserId, WalletBalance, WithdrawalId,
    WithdrawalRequest, WithdrawalStatus,
};
use chrono::{DateTime, Duration, Utc};

use crate::store::{
    AlertSink, ApplyOutcome, AuditSink, CancelReceipt, DepositCompletion, IdempotencyReservation,
    IdempotencyStore, JoinReceipt, LockAcquisition, MatchStore, ProviderEventStore, ScoreReceipt,
    SettlementStore, WalletStore, WithdrawalCompletion, WithdrawalCreation, WithdrawalLimits,
    WithdrawalStore, WithdrawalUpdate,
};

type IdempotencyKey = (String, UserId, String);

#[derive(Default)]
struct State {
    wallets: HashMap<UserId, WalletBalance>,
    entries: Vec<LedgerEntry>,
    /// Keyed by `provider_intent_id`.
    deposits: HashMap<String, DepositIntent>,
    matches: HashMap<MatchId, Match>,
    escrows: HashMap<MatchId, Escrow>,
    players: HashMap<MatchId, Vec<MatchPlayer>>,
    locks: HashMap<MatchId, SettlementLock>,
    attempts: HashMap<MatchId, Vec<SettlementAttempt>>,
    withdrawals: HashMap<WithdrawalId, WithdrawalRequest>,
    withdrawal_keys: HashMap<(UserId, String), WithdrawalId>,
    idempotency: HashMap<IdempotencyKey, IdempotencyRecord>,
    provider_events: HashMap<(String, String), ProviderEvent>,
    alerts: Vec<Alert>,
    audit: Vec<AuditEvent>,
    /// Fault injection: `record_attempt` fails while set.
    reject_attempts: bool,
}

impl State {
    fn wallet(&self, user_id: UserId) -> WalletBalance {
        self.wallets
            .get(&user_id)
            .copied()
            .unwrap_or_else(|| WalletBalance::new(user_id))
    }

    fn find_match(&self, match_id: MatchId) -> Result<&Match> {
        self.matches
            .get(&match_id)
            .ok_or_else(|| CashMatchError::not_found("match", match_id))
    }

    fn find_escrow(&self, match_id: MatchId) -> Result<&Escrow> {
        self.escrows
            .get(&match_id)
            .ok_or_else(|| CashMatchError::not_found("escrow", match_id))
    }

    fn find_withdrawal(&self, id: WithdrawalId) -> Result<&WithdrawalRequest> {
        self.withdrawals
            .get(&id)
            .ok_or_else(|| CashMatchError::not_found("withdrawal", id))
    }

    /// Requests created at or after `since`, excluding rejected or failed ones.
    fn platform_volume_since(&self, since: DateTime<Utc>) -> i64 {
        self.withdrawals
            .values()
            .filter(|w| w.created_at >= since && !w.status.releases_funds())
            .map(|w| w.amount_cents)
            .sum()
    }

    fn seats(&self, match_id: MatchId) -> &[MatchPlayer] {
        self.players.get(&match_id).map_or(&[], Vec::as_slice)
    }

    /// Write staged wallets and append their entries in one step.
    fn commit(
        &mut self,
        wallets: impl IntoIterator<Item = WalletBalance>,
        entries: &[LedgerEntry],
    ) {
        for wallet in wallets {
            self.wallets.insert(wallet.user_id, wallet);
        }
        self.entries.extend_from_slice(entries);
    }
}

/// Entry reflecting `wallet` after the change was applied.
fn entry_for(
    wallet: &WalletBalance,
    entry_type: LedgerEntryType,
    magnitude_cents: i64,
    match_id: Option<MatchId>,
    reference: Option<String>,
    now: DateTime<Utc>,
) -> LedgerEntry {
    LedgerEntry::new(
        wallet.user_id,
        entry_type,
        magnitude_cents,
        wallet.total_cents(),
        match_id,
        reference,
        now,
    )
}

/// Process-local store for tests, demos, and single-node deployments.
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| CashMatchError::Internal("store lock poisoned".into()))
    }

    /// Alerts raised so far, oldest first.
    pub fn alerts(&self) -> Result<Vec<Alert>> {
        Ok(self.state()?.alerts.clone())
    }

    /// Audit trail so far, oldest first.
    pub fn audit_events(&self) -> Result<Vec<AuditEvent>> {
        Ok(self.state()?.audit.clone())
    }

    /// Credit a completed deposit directly, bypassing the provider flow.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn fund(&self, user_id: UserId, amount_cents: i64, now: DateTime<Utc>) -> Result<LedgerEntry> {
        let mut state = self.state()?;
        let mut wallet = state.wallet(user_id);
        wallet.credit(amount_cents)?;
        let entry = entry_for(
            &wallet,
            LedgerEntryType::Deposit,
            amount_cents,
            None,
            Some("test-funding".into()),
            now,
        );
        state.commit([wallet], std::slice::from_ref(&entry));
        Ok(entry)
    }

    /// Overwrite a wallet without a ledger entry, to simulate drift.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn force_balance(&self, user_id: UserId, available_cents: i64, locked_cents: i64) -> Result<()> {
        let mut state = self.state()?;
        let mut wallet = state.wallet(user_id);
        wallet.available_cents = available_cents;
        wallet.locked_cents = locked_cents;
        state.wallets.insert(user_id, wallet);
        Ok(())
    }

    /// Make every `record_attempt` call fail until switched back.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn reject_attempt_writes(&self, reject: bool) -> Result<()> {
        self.state()?.reject_attempts = reject;
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Wallets and deposits
// ---------------------------------------------------------------------------

#[async_trait]
impl WalletStore for InMemoryStore {
    async fn balance(&self, user_id: UserId) -> Result<WalletBalance> {
        Ok(self.state()?.wallet(user_id))
    }

    async fn ledger_entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .state()?
            .entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn wallet_users(&self) -> Result<Vec<UserId>> {
        let mut users: Vec<UserId> = self.state()?.wallets.keys().copied().collect();
        users.sort();
        Ok(users)
    }

    async fn create_deposit_intent(&self, intent: DepositIntent) -> Result<()> {
        let mut state = self.state()?;
        if state.deposits.contains_key(&intent.provider_intent_id) {
            return Err(CashMatchError::conflict(format!(
                "deposit intent {} already exists",
                intent.provider_intent_id
            )));
        }
        state.deposits.insert(intent.provider_intent_id.clone(), intent);
        Ok(())
    }

    async fn deposit_intent(&self, provider_intent_id: &str) -> Result<Option<DepositIntent>> {
        Ok(self.state()?.deposits.get(provider_intent_id).cloned())
    }

    async fn complete_deposit(
        &self,
        provider_intent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DepositCompletion> {
        let mut state = self.state()?;
        let mut intent = state
            .deposits
            .get(provider_intent_id)
            .cloned()
            .ok_or_else(|| CashMatchError::not_found("deposit intent", provider_intent_id))?;

        match intent.status {
            DepositStatus::Completed => return Ok(DepositCompletion::AlreadyCompleted(intent)),
            DepositStatus::Failed => {
                return Err(CashMatchError::conflict(format!(
                    "deposit intent {provider_intent_id} already failed"
                )));
            }
            DepositStatus::Pending => {}
        }

        let mut wallet = state.wallet(intent.user_id);
        wallet.credit(intent.amount_cents)?;
        let entry = entry_for(
            &wallet,
            LedgerEntryType::Deposit,
            intent.amount_cents,
            None,
            Some(intent.id.to_string()),
            now,
        );
        intent.status = DepositStatus::Completed;
        intent.updated_at = now;

        state.commit([wallet], std::slice::from_ref(&entry));
        state
            .deposits
            .insert(provider_intent_id.to_string(), intent.clone());
        Ok(DepositCompletion::Credited { intent, entry })
    }

    async fn fail_deposit(
        &self,
        provider_intent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DepositIntent> {
        let mut state = self.state()?;
        let intent = state
            .deposits
            .get_mut(provider_intent_id)
            .ok_or_else(|| CashMatchError::not_found("deposit intent", provider_intent_id))?;
        match intent.status {
            DepositStatus::Failed => {}
            DepositStatus::Completed => {
                return Err(CashMatchError::conflict(format!(
                    "deposit intent {provider_intent_id} already completed"
                )));
            }
            DepositStatus::Pending => {
                intent.status = DepositStatus::Failed;
                intent.updated_at = now;
            }
        }
        Ok(intent.clone())
    }
}

// ---------------------------------------------------------------------------
// Matches and escrow
// ---------------------------------------------------------------------------

#[async_trait]
impl MatchStore for InMemoryStore {
    async fn insert_match(&self, new_match: Match) -> Result<()> {
        let mut state = self.state()?;
        if state.matches.contains_key(&new_match.id) {
            return Err(CashMatchError::conflict(format!(
                "match {} already exists",
                new_match.id
            )));
        }
        state.escrows.insert(new_match.id, Escrow::new(new_match.id));
        state.players.insert(new_match.id, Vec::new());
        state.matches.insert(new_match.id, new_match);
        Ok(())
    }

    async fn get_match(&self, match_id: MatchId) -> Result<Option<Match>> {
        Ok(self.state()?.matches.get(&match_id).cloned())
    }

    async fn escrow(&self, match_id: MatchId) -> Result<Option<Escrow>> {
        Ok(self.state()?.escrows.get(&match_id).cloned())
    }

    async fn players(&self, match_id: MatchId) -> Result<Vec<MatchPlayer>> {
        Ok(self.state()?.seats(match_id).to_vec())
    }

    async fn join_match(
        &self,
        match_id: MatchId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<JoinReceipt> {
        let mut state = self.state()?;
        let mut game = state.find_match(match_id)?.clone();
        let seats = state.seats(match_id);

        if seats.iter().any(|p| p.user_id == user_id) {
            return Err(CashMatchError::AlreadyJoined { match_id, user_id });
        }
        let seated = u32::try_from(seats.len())
            .map_err(|_| CashMatchError::Internal("seat count overflow".into()))?;
        if seated >= game.max_players {
            return Err(CashMatchError::MatchFull(match_id));
        }
        if game.status != MatchStatus::Waiting {
            return Err(CashMatchError::conflict(format!(
                "match {match_id} is {}, not accepting players",
                game.status
            )));
        }

        let mut wallet = state.wallet(user_id);
        wallet.debit(game.entry_fee_cents)?;
        let mut escrow = state.find_escrow(match_id)?.clone();
        escrow.add_entry(game.entry_fee_cents)?;

        let player = MatchPlayer::new(match_id, user_id, seated + 1, now);
        if seated + 1 == game.max_players {
            game.transition(MatchStatus::Starting)?;
        }
        let entry = entry_for(
            &wallet,
            LedgerEntryType::MatchEntry,
            game.entry_fee_cents,
            Some(match_id),
            None,
            now,
        );

        state.commit([wallet], std::slice::from_ref(&entry));
        state.escrows.insert(match_id, escrow.clone());
        state
            .players
            .entry(match_id)
            .or_default()
            .push(player.clone());
        let match_status = game.status;
        state.matches.insert(match_id, game);

        Ok(JoinReceipt {
            player,
            entry,
            escrow,
            match_status,
            balance: wallet,
        })
    }

    async fn start_match(&self, match_id: MatchId, _now: DateTime<Utc>) -> Result<Match> {
        let mut state = self.state()?;
        let mut game = state.find_match(match_id)?.clone();
        let seated = state.seats(match_id).len();
        if (seated as u64) < u64::from(game.min_players) {
            return Err(CashMatchError::conflict(format!(
                "match {match_id} needs {} players, has {seated}",
                game.min_players
            )));
        }
        game.transition(MatchStatus::Active)?;
        state.matches.insert(match_id, game.clone());
        Ok(game)
    }

    async fn record_score(
        &self,
        match_id: MatchId,
        user_id: UserId,
        score: i64,
        time_taken_ms: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<ScoreReceipt> {
        let mut state = self.state()?;
        let mut game = state.find_match(match_id)?.clone();
        if game.status != MatchStatus::Active {
            return Err(CashMatchError::conflict(format!(
                "match {match_id} is {}, scores are closed",
                game.status
            )));
        }

        let mut seats = state.seats(match_id).to_vec();
        let seat = seats
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or_else(|| CashMatchError::not_found("match player", user_id))?;
        if seat.has_score() {
            return Err(CashMatchError::conflict(format!(
                "{user_id} already submitted a score for {match_id}"
            )));
        }
        seat.score = Some(score);
        seat.time_taken_ms = time_taken_ms;
        let player = seat.clone();

        let match_completed = seats.iter().all(MatchPlayer::has_score);
        if match_completed {
            game.transition(MatchStatus::Completed)?;
            game.completed_at = Some(now);
            state.matches.insert(match_id, game);
        }
        state.players.insert(match_id, seats);

        Ok(ScoreReceipt {
            player,
            match_completed,
        })
    }

    async fn cancel_match(&self, match_id: MatchId, now: DateTime<Utc>) -> Result<CancelReceipt> {
        let mut state = self.state()?;
        let mut game = state.find_match(match_id)?.clone();
        game.transition(MatchStatus::Cancelled)?;
        let mut escrow = state.find_escrow(match_id)?.clone();

        let seats = state.seats(match_id).to_vec();
        let refunded: i64 = game.entry_fee_cents * seats.len() as i64;
        if refunded != escrow.total_pot_cents {
            return Err(CashMatchError::LedgerInvariantViolation {
                reason: format!(
                    "escrow for {match_id} holds {} but seats paid {refunded}",
                    escrow.total_pot_cents
                ),
            });
        }

        let mut wallets = Vec::with_capacity(seats.len());
        let mut refunds = Vec::with_capacity(seats.len());
        for seat in &seats {
            let mut wallet = state.wallet(seat.user_id);
            wallet.credit(game.entry_fee_cents)?;
            refunds.push(entry_for(
                &wallet,
                LedgerEntryType::MatchRefund,
                game.entry_fee_cents,
                Some(match_id),
                None,
                now,
            ));
            wallets.push(wallet);
        }
        escrow.mark_refunded(now)?;

        state.commit(wallets, &refunds);
        state.escrows.insert(match_id, escrow);
        state.matches.insert(match_id, game.clone());

        Ok(CancelReceipt {
            cancelled: game,
            refunds,
        })
    }

    async fn last_participation(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .state()?
            .players
            .values()
            .flatten()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.joined_at)
            .max())
    }

    async fn escrows(&self) -> Result<Vec<Escrow>> {
        Ok(self.state()?.escrows.values().cloned().collect())
    }

    async fn match_ledger_entries(&self, match_id: MatchId) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .state()?
            .entries
            .iter()
            .filter(|e| e.match_id == Some(match_id))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[async_trait]
impl SettlementStore for InMemoryStore {
    async fn try_acquire_lock(
        &self,
        match_id: MatchId,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LockAcquisition> {
        let mut state = self.state()?;
        let replaced = match state.locks.get(&match_id) {
            Some(held) if !held.is_expired(now) && held.locked_by != owner => {
                return Ok(LockAcquisition::Held(held.clone()));
            }
            Some(held) if held.is_expired(now) => Some(held.clone()),
            _ => None,
        };
        let lock = SettlementLock {
            match_id,
            locked_by: owner.to_string(),
            locked_at: now,
            expires_at: now + ttl,
        };
        state.locks.insert(match_id, lock.clone());
        Ok(LockAcquisition::Acquired { lock, replaced })
    }

    async fn release_lock(&self, match_id: MatchId, owner: &str) -> Result<bool> {
        let mut state = self.state()?;
        match state.locks.get(&match_id) {
            Some(held) if held.locked_by == owner => {
                state.locks.remove(&match_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reap_expired_locks(&self, now: DateTime<Utc>) -> Result<Vec<SettlementLock>> {
        let mut state = self.state()?;
        let expired: Vec<MatchId> = state
            .locks
            .values()
            .filter(|l| l.is_expired(now))
            .map(|l| l.match_id)
            .collect();
        Ok(expired
            .into_iter()
            .filter_map(|id| state.locks.remove(&id))
            .collect())
    }

    async fn apply_settlement(
        &self,
        plan: &PayoutPlan,
        owner: &str,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome> {
        let mut state = self.state()?;
        let match_id = plan.match_id;

        match state.locks.get(&match_id) {
            Some(held) if held.locked_by == owner && !held.is_expired(now) => {}
            held => {
                return Err(CashMatchError::SettlementLocked {
                    match_id,
                    holder: held.map_or_else(|| "nobody".to_string(), |l| l.locked_by.clone()),
                });
            }
        }

        let game = state.find_match(match_id)?;
        if game.status != MatchStatus::Completed {
            return Err(CashMatchError::conflict(format!(
                "match {match_id} is {}, cannot settle",
                game.status
            )));
        }
        let mut escrow = state.find_escrow(match_id)?.clone();
        match escrow.status {
            EscrowStatus::Released => return Ok(ApplyOutcome::AlreadyReleased(escrow)),
            EscrowStatus::Refunded => {
                return Err(CashMatchError::conflict(format!(
                    "escrow for {match_id} was refunded"
                )));
            }
            EscrowStatus::Pending => {}
        }

        let reject = |reason: String| CashMatchError::SettlementFailed { match_id, reason };
        if plan.total_pot_cents != escrow.total_pot_cents {
            return Err(reject(format!(
                "plan pot {} does not match escrow {}",
                plan.total_pot_cents, escrow.total_pot_cents
            )));
        }
        if plan.rake_cents < 0 || plan.rake_cents + plan.net_pot_cents != plan.total_pot_cents {
            return Err(reject("rake and net pot do not add up to the pot".into()));
        }
        if plan.payouts.iter().any(|p| p.payout_cents < 0) {
            return Err(reject("negative payout".into()));
        }
        if plan.payout_total() > plan.net_pot_cents {
            return Err(reject(format!(
                "payouts {} exceed net pot {}",
                plan.payout_total(),
                plan.net_pot_cents
            )));
        }

        let mut seats = state.seats(match_id).to_vec();
        if seats.len() != plan.payouts.len() {
            return Err(reject(format!(
                "plan covers {} players, match has {}",
                plan.payouts.len(),
                seats.len()
            )));
        }
        for seat in &mut seats {
            let payout = plan
                .payout_for(seat.user_id)
                .ok_or_else(|| reject(format!("{} missing from plan", seat.user_id)))?;
            seat.placement = Some(payout.placement);
            seat.result = Some(payout.result);
            seat.payout_cents = Some(payout.payout_cents);
        }

        let mut wallets = Vec::new();
        let mut entries = Vec::new();
        for payout in plan.payouts.iter().filter(|p| p.payout_cents > 0) {
            let mut wallet = state.wallet(payout.user_id);
            wallet.credit(payout.payout_cents)?;
            entries.push(entry_for(
                &wallet,
                LedgerEntryType::MatchPayout,
                payout.payout_cents,
                Some(match_id),
                None,
                now,
            ));
            wallets.push(wallet);
        }
        escrow.release(plan.rake_cents, plan.net_pot_cents, plan.digest.clone(), now)?;

        state.commit(wallets, &entries);
        state.players.insert(match_id, seats);
        state.escrows.insert(match_id, escrow.clone());
        Ok(ApplyOutcome::Applied { escrow, entries })
    }

    async fn record_attempt(&self, attempt: SettlementAttempt) -> Result<()> {
        let mut state = self.state()?;
        if state.reject_attempts {
            return Err(CashMatchError::Io("settlement attempt write refused".into()));
        }
        state
            .attempts
            .entry(attempt.match_id)
            .or_default()
            .push(attempt);
        Ok(())
    }

    async fn attempts(&self, match_id: MatchId) -> Result<Vec<SettlementAttempt>> {
        Ok(self
            .state()?
            .attempts
            .get(&match_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_settlement_failed(&self, match_id: MatchId) -> Result<()> {
        let mut state = self.state()?;
        let game = state
            .matches
            .get_mut(&match_id)
            .ok_or_else(|| CashMatchError::not_found("match", match_id))?;
        game.settlement_failed = true;
        Ok(())
    }

    async fn unsettled_matches(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<MatchId>> {
        let state = self.state()?;
        let mut due: Vec<&Match> = state
            .matches
            .values()
            .filter(|m| m.status == MatchStatus::Completed && !m.settlement_failed)
            .filter(|m| {
                state
                    .escrows
                    .get(&m.id)
                    .is_some_and(|e| e.status == EscrowStatus::Pending)
            })
            .filter(|m| {
                let last_failed = state
                    .attempts
                    .get(&m.id)
                    .and_then(|a| a.iter().rev().find(|a| a.status == AttemptStatus::Failed));
                match last_failed {
                    Some(attempt) => attempt.next_retry_at.is_some_and(|at| at <= now),
                    None => true,
                }
            })
            .collect();
        due.sort_by_key(|m| (m.completed_at, m.id));
        Ok(due.into_iter().take(limit).map(|m| m.id).collect())
    }
}

// ---------------------------------------------------------------------------
// Withdrawals
// ---------------------------------------------------------------------------

#[async_trait]
impl WithdrawalStore for InMemoryStore {
    async fn create_withdrawal(
        &self,
        request: WithdrawalRequest,
        limits: WithdrawalLimits,
    ) -> Result<WithdrawalCreation> {
        let mut state = self.state()?;
        let key = (request.user_id, request.idempotency_key.clone());
        if let Some(existing) = state
            .withdrawal_keys
            .get(&key)
            .and_then(|id| state.withdrawals.get(id))
        {
            return Ok(WithdrawalCreation::Existing(existing.clone()));
        }

        let recent = state
            .withdrawals
            .values()
            .any(|w| w.user_id == request.user_id && w.created_at > limits.user_window_start);
        if recent {
            return Err(CashMatchError::RateLimited {
                reason: "a withdrawal was already requested in the current window".into(),
            });
        }
        let used = state.platform_volume_since(limits.day_start);
        if used.saturating_add(request.amount_cents) > limits.daily_platform_limit_cents {
            return Err(CashMatchError::RateLimited {
                reason: "platform daily withdrawal limit reached".into(),
            });
        }

        let mut wallet = state.wallet(request.user_id);
        wallet.lock(request.amount_cents)?;

        state.wallets.insert(wallet.user_id, wallet);
        state.withdrawal_keys.insert(key, request.id);
        state.withdrawals.insert(request.id, request.clone());
        Ok(WithdrawalCreation::Created {
            request,
            balance: wallet,
        })
    }

    async fn get_withdrawal(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>> {
        Ok(self.state()?.withdrawals.get(&id).cloned())
    }

    async fn withdrawal_by_key(
        &self,
        user_id: UserId,
        idempotency_key: &str,
    ) -> Result<Option<WithdrawalRequest>> {
        let state = self.state()?;
        Ok(state
            .withdrawal_keys
            .get(&(user_id, idempotency_key.to_string()))
            .and_then(|id| state.withdrawals.get(id))
            .cloned())
    }

    async fn withdrawal_by_payout_id(
        &self,
        provider_payout_id: &str,
    ) -> Result<Option<WithdrawalRequest>> {
        Ok(self
            .state()?
            .withdrawals
            .values()
            .find(|w| w.provider_payout_id.as_deref() == Some(provider_payout_id))
            .cloned())
    }

    async fn transition_withdrawal(
        &self,
        id: WithdrawalId,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
        update: WithdrawalUpdate,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalRequest> {
        let mut state = self.state()?;
        let current = state.find_withdrawal(id)?;
        if current.status != from {
            return Err(CashMatchError::conflict(format!(
                "withdrawal {id} is {}, expected {from}",
                current.status
            )));
        }
        if (from != to && !from.can_transition_to(to)) || !to.holds_funds() {
            return Err(CashMatchError::conflict(format!(
                "withdrawal {id} cannot move from {from} to {to} without moving funds"
            )));
        }

        let mut request = current.clone();
        request.status = to;
        request.updated_at = now;
        if let Some(payout_id) = update.provider_payout_id {
            request.provider_payout_id = Some(payout_id);
        }
        if let Some(reason) = update.failure_reason {
            request.failure_reason = Some(reason);
        }
        state.withdrawals.insert(id, request.clone());
        Ok(request)
    }

    async fn release_withdrawal(
        &self,
        id: WithdrawalId,
        to: WithdrawalStatus,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalRequest> {
        let mut state = self.state()?;
        let mut request = state.find_withdrawal(id)?.clone();
        if !to.releases_funds()
            || !request.status.holds_funds()
            || !request.status.can_transition_to(to)
        {
            return Err(CashMatchError::conflict(format!(
                "withdrawal {id} cannot move from {} to {to}",
                request.status
            )));
        }

        let mut wallet = state.wallet(request.user_id);
        wallet.unlock(request.amount_cents)?;
        request.status = to;
        request.failure_reason = Some(reason.to_string());
        request.updated_at = now;

        state.wallets.insert(wallet.user_id, wallet);
        state.withdrawals.insert(id, request.clone());
        Ok(request)
    }

    async fn complete_withdrawal(
        &self,
        id: WithdrawalId,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalCompletion> {
        let mut state = self.state()?;
        let mut request = state.find_withdrawal(id)?.clone();
        if request.status == WithdrawalStatus::Completed {
            return Ok(WithdrawalCompletion::AlreadyCompleted(request));
        }
        if request.status != WithdrawalStatus::Processing {
            return Err(CashMatchError::conflict(format!(
                "withdrawal {id} is {}, cannot complete",
                request.status
            )));
        }

        let mut wallet = state.wallet(request.user_id);
        wallet.consume_locked(request.amount_cents)?;
        let entry = entry_for(
            &wallet,
            LedgerEntryType::Withdrawal,
            request.amount_cents,
            None,
            Some(id.to_string()),
            now,
        );
        request.status = WithdrawalStatus::Completed;
        request.updated_at = now;

        state.commit([wallet], std::slice::from_ref(&entry));
        state.withdrawals.insert(id, request.clone());
        Ok(WithdrawalCompletion::Completed { request, entry })
    }

    async fn refund_completed_withdrawal(
        &self,
        id: WithdrawalId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(WithdrawalRequest, LedgerEntry)> {
        let mut state = self.state()?;
        let mut request = state.find_withdrawal(id)?.clone();
        if request.status != WithdrawalStatus::Completed {
            return Err(CashMatchError::conflict(format!(
                "withdrawal {id} is {}, only completed payouts can be returned",
                request.status
            )));
        }

        let mut wallet = state.wallet(request.user_id);
        wallet.credit(request.amount_cents)?;
        let entry = entry_for(
            &wallet,
            LedgerEntryType::WithdrawalRefund,
            request.amount_cents,
            None,
            Some(id.to_string()),
            now,
        );
        request.status = WithdrawalStatus::Failed;
        request.failure_reason = Some(reason.to_string());
        request.updated_at = now;

        state.commit([wallet], std::slice::from_ref(&entry));
        state.withdrawals.insert(id, request.clone());
        Ok((request, entry))
    }

    async fn withdrawals_for_user(&self, user_id: UserId) -> Result<Vec<WithdrawalRequest>> {
        let mut found: Vec<WithdrawalRequest> = self
            .state()?
            .withdrawals
            .values()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|w| (w.created_at, w.id));
        Ok(found)
    }

    async fn withdrawals_with_status(
        &self,
        status: WithdrawalStatus,
    ) -> Result<Vec<WithdrawalRequest>> {
        let mut found: Vec<WithdrawalRequest> = self
            .state()?
            .withdrawals
            .values()
            .filter(|w| w.status == status)
            .cloned()
            .collect();
        found.sort_by_key(|w| (w.created_at, w.id));
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Idempotency, provider events, sinks
// ---------------------------------------------------------------------------

#[async_trait]
impl IdempotencyStore for InMemoryStore {
    async fn reserve_key(
        &self,
        key: &str,
        user_id: UserId,
        route: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<IdempotencyReservation> {
        let mut state = self.state()?;
        let slot = (key.to_string(), user_id, route.to_string());
        let fresh = IdempotencyRecord::in_flight(key, user_id, route, now);
        match state.idempotency.get(&slot) {
            Some(existing) if existing.is_stale(stale_before) => {
                let previous = existing.clone();
                state.idempotency.insert(slot, fresh);
                Ok(IdempotencyReservation::Reclaimed(previous))
            }
            Some(existing) => Ok(IdempotencyReservation::Existing(existing.clone())),
            None => {
                state.idempotency.insert(slot, fresh);
                Ok(IdempotencyReservation::Reserved)
            }
        }
    }

    async fn complete_key(
        &self,
        key: &str,
        user_id: UserId,
        route: &str,
        response: StoredResponse,
    ) -> Result<()> {
        let mut state = self.state()?;
        let record = state
            .idempotency
            .get_mut(&(key.to_string(), user_id, route.to_string()))
            .ok_or_else(|| CashMatchError::not_found("idempotency key", key))?;
        record.state = IdempotencyState::Completed { response };
        Ok(())
    }

    async fn get_key(
        &self,
        key: &str,
        user_id: UserId,
        route: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        Ok(self
            .state()?
            .idempotency
            .get(&(key.to_string(), user_id, route.to_string()))
            .cloned())
    }
}

#[async_trait]
impl ProviderEventStore for InMemoryStore {
    async fn insert_event(&self, event: ProviderEvent) -> Result<bool> {
        let mut state = self.state()?;
        let key = (event.provider_name.clone(), event.provider_event_id.clone());
        if state.provider_events.contains_key(&key) {
            return Ok(false);
        }
        state.provider_events.insert(key, event);
        Ok(true)
    }

    async fn finish_event(
        &self,
        provider_name: &str,
        provider_event_id: &str,
        processing_error: Option<String>,
    ) -> Result<()> {
        let mut state = self.state()?;
        let event = state
            .provider_events
            .get_mut(&(provider_name.to_string(), provider_event_id.to_string()))
            .ok_or_else(|| CashMatchError::not_found("provider event", provider_event_id))?;
        event.processed = true;
        event.processing_error = processing_error;
        Ok(())
    }

    async fn get_event(
        &self,
        provider_name: &str,
        provider_event_id: &str,
    ) -> Result<Option<ProviderEvent>> {
        Ok(self
            .state()?
            .provider_events
            .get(&(provider_name.to_string(), provider_event_id.to_string()))
            .cloned())
    }
}

#[async_trait]
impl AlertSink for InMemoryStore {
    async fn raise(&self, alert: Alert) -> Result<()> {
        self.state()?.alerts.push(alert);
        Ok(())
    }

    async fn recent_alerts(&self, limit: usize) -> Result<Vec<Alert>> {
        Ok(self.state()?.alerts.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.state()?.audit.push(event);
        Ok(())
    }

    async fn audit_log(&self, user_id: Option<UserId>, limit: usize) -> Result<Vec<AuditEvent>> {
        Ok(self
            .state()?
            .audit
            .iter()
            .rev()
            .filter(|e| user_id.is_none() || e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
