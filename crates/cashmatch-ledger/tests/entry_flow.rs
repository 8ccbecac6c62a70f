//! Entry collection against the in-memory store.

use std::sync::Arc;

use cashmatch_ledger::{
    EntryCollector, InMemoryKillSwitches, InMemoryStore, MatchStore, Wallet, WalletStore,
};
use cashmatch_types::{
    Actor, AuditAction, CashMatchError, EscrowStatus, LedgerEntryType, ManualClock, MatchParams,
    MatchStatus, PayoutConfig, PayoutModel, UserId,
};
use chrono::Utc;
use rust_decimal::Decimal;

struct Harness {
    store: Arc<InMemoryStore>,
    wallet: Wallet,
    collector: EntryCollector,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    Harness {
        wallet: Wallet::new(
            store.clone(),
            Arc::new(InMemoryKillSwitches::default()),
            clock.clone(),
        ),
        collector: EntryCollector::new(store.clone(), clock),
        store,
    }
}

impl Harness {
    async fn funded_user(&self, cents: i64) -> UserId {
        let user = UserId::new();
        let intent_id = format!("pi_{}", user.0);
        self.wallet
            .create_deposit_intent(user, cents, intent_id.clone())
            .await
            .unwrap();
        self.wallet.credit_deposit(&intent_id).await.unwrap();
        user
    }
}

fn params(max_players: u32) -> MatchParams {
    MatchParams {
        entry_fee_cents: 500,
        min_players: 2,
        max_players,
        payout_model: PayoutModel::WinnerTakeAll,
        payout_config: PayoutConfig::default(),
        rake_percent: Decimal::new(5, 0),
    }
}

#[tokio::test]
async fn cancel_refunds_every_seat() {
    let h = harness();
    let creator = h.funded_user(1_000).await;
    let other = h.funded_user(1_000).await;
    let game = h.collector.create_match(creator, params(4)).await.unwrap();

    h.collector.join(creator, game.id).await.unwrap();
    h.collector.join(other, game.id).await.unwrap();
    assert_eq!(h.wallet.balance(other).await.unwrap().available_cents, 500);

    let receipt = h
        .collector
        .cancel(&Actor::User(creator), game.id)
        .await
        .unwrap();
    assert_eq!(receipt.cancelled.status, MatchStatus::Cancelled);
    assert_eq!(receipt.refunds.len(), 2);
    assert!(receipt
        .refunds
        .iter()
        .all(|e| e.entry_type == LedgerEntryType::MatchRefund && e.amount_cents == 500));

    for user in [creator, other] {
        assert_eq!(h.wallet.balance(user).await.unwrap().available_cents, 1_000);
    }
    let escrow = h.store.escrow(game.id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Refunded);

    let err = h.collector.join(other, game.id).await.unwrap_err();
    assert!(matches!(err, CashMatchError::StateConflict { .. }));
}

#[tokio::test]
async fn only_the_creator_manages_a_match() {
    let h = harness();
    let creator = h.funded_user(1_000).await;
    let stranger = h.funded_user(1_000).await;
    let game = h.collector.create_match(creator, params(4)).await.unwrap();

    let err = h
        .collector
        .cancel(&Actor::User(stranger), game.id)
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 403);

    assert!(h
        .collector
        .cancel(&Actor::Admin(stranger), game.id)
        .await
        .is_ok());
}

#[tokio::test]
async fn start_requires_min_players() {
    let h = harness();
    let creator = h.funded_user(1_000).await;
    let second = h.funded_user(1_000).await;
    let game = h.collector.create_match(creator, params(4)).await.unwrap();
    h.collector.join(creator, game.id).await.unwrap();

    let actor = Actor::User(creator);
    assert!(matches!(
        h.collector.start(&actor, game.id).await,
        Err(CashMatchError::StateConflict { .. })
    ));

    h.collector.join(second, game.id).await.unwrap();
    let started = h.collector.start(&actor, game.id).await.unwrap();
    assert_eq!(started.status, MatchStatus::Active);
    assert!(h.collector.cancel(&actor, game.id).await.is_err());
}

#[tokio::test]
async fn broke_player_cannot_join() {
    let h = harness();
    let creator = h.funded_user(1_000).await;
    let broke = h.funded_user(300).await;
    let game = h.collector.create_match(creator, params(2)).await.unwrap();

    let err = h.collector.join(broke, game.id).await.unwrap_err();
    assert_eq!(
        err,
        CashMatchError::InsufficientFunds {
            needed: 500,
            available: 300
        }
    );
    assert_eq!(h.wallet.balance(broke).await.unwrap().available_cents, 300);
    assert!(h.store.players(game.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn ledger_sums_to_balance_after_a_join() {
    let h = harness();
    let creator = h.funded_user(2_000).await;
    let game = h.collector.create_match(creator, params(2)).await.unwrap();
    h.collector.join(creator, game.id).await.unwrap();

    let balance = h.store.balance(creator).await.unwrap();
    let sum: i64 = h
        .store
        .ledger_entries(creator)
        .await
        .unwrap()
        .iter()
        .map(|e| e.amount_cents)
        .sum();
    assert_eq!(sum, balance.total_cents());

    let actions: Vec<AuditAction> = h
        .store
        .audit_events()
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert!(actions.contains(&AuditAction::MatchCreated));
    assert!(actions.contains(&AuditAction::MatchEntryCollected));
}

#[tokio::test]
async fn invalid_params_are_rejected() {
    let h = harness();
    let mut bad = params(4);
    bad.min_players = 1;
    let err = h
        .collector
        .create_match(UserId::new(), bad)
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 400);
}
