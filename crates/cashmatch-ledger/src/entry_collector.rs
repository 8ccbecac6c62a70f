//! Entry collection: match lifecycle up to the first score.
//!
//! Joining debits the entry fee from the player's available balance into
//! the match escrow in one store call. Cancelling before start returns every
//! fee with a `match_refund` entry.

use std::sync::Arc;

use cashmatch_types::{
    Actor, AuditAction, AuditEvent, CashMatchError, Clock, Match, MatchId, MatchParams, Result,
    UserId,
};

use crate::store::{CancelReceipt, JoinReceipt, LedgerStore, record_audit};

pub struct EntryCollector {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl EntryCollector {
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create_match(&self, creator_id: UserId, params: MatchParams) -> Result<Match> {
        params.validate()?;
        let now = self.clock.now();
        let new_match = Match::from_params(creator_id, params, now);
        self.store.insert_match(new_match.clone()).await?;

        tracing::info!(
            match_id = %new_match.id,
            creator_id = %creator_id,
            entry_fee_cents = new_match.entry_fee_cents,
            payout_model = %new_match.payout_model,
            "match created"
        );
        record_audit(
            self.store.as_ref(),
            AuditEvent::new(AuditAction::MatchCreated, Actor::User(creator_id), now)
                .user(creator_id)
                .in_match(new_match.id),
        )
        .await;
        Ok(new_match)
    }

    /// Take a seat, paying the entry fee into escrow.
    pub async fn join(&self, user_id: UserId, match_id: MatchId) -> Result<JoinReceipt> {
        let now = self.clock.now();
        let receipt = self.store.join_match(match_id, user_id, now).await?;

        tracing::info!(
            match_id = %match_id,
            user_id = %user_id,
            seat = receipt.player.seat,
            pot_cents = receipt.escrow.total_pot_cents,
            status = %receipt.match_status,
            "entry fee collected"
        );
        record_audit(
            self.store.as_ref(),
            AuditEvent::new(AuditAction::MatchEntryCollected, Actor::User(user_id), now)
                .user(user_id)
                .in_match(match_id)
                .amount(-receipt.entry.amount_cents),
        )
        .await;
        Ok(receipt)
    }

    /// Creator starts a match that reached its minimum player count.
    pub async fn start(&self, actor: &Actor, match_id: MatchId) -> Result<Match> {
        let current = self.find(match_id).await?;
        authorize(actor, &current)?;
        let started = self.store.start_match(match_id, self.clock.now()).await?;
        tracing::info!(match_id = %match_id, actor = %actor, "match started");
        Ok(started)
    }

    /// Cancel before start and refund every seat.
    pub async fn cancel(&self, actor: &Actor, match_id: MatchId) -> Result<CancelReceipt> {
        let current = self.find(match_id).await?;
        authorize(actor, &current)?;
        let now = self.clock.now();
        let receipt = self.store.cancel_match(match_id, now).await?;

        let refunded: i64 = receipt.refunds.iter().map(|e| e.amount_cents).sum();
        tracing::info!(
            match_id = %match_id,
            actor = %actor,
            refunds = receipt.refunds.len(),
            refunded_cents = refunded,
            "match cancelled"
        );
        record_audit(
            self.store.as_ref(),
            AuditEvent::new(AuditAction::MatchCancelled, actor.clone(), now)
                .in_match(match_id)
                .amount(refunded),
        )
        .await;
        Ok(receipt)
    }

    async fn find(&self, match_id: MatchId) -> Result<Match> {
        self.store
            .get_match(match_id)
            .await?
            .ok_or_else(|| CashMatchError::not_found("match", match_id))
    }
}

/// Only the creator, an admin, or the system may start or cancel.
fn authorize(actor: &Actor, target: &Match) -> Result<()> {
    match actor {
        Actor::User(user_id) if *user_id != target.creator_id => Err(CashMatchError::Forbidden {
            reason: format!("only the creator can manage {}", target.id),
        }),
        _ => Ok(()),
    }
}
