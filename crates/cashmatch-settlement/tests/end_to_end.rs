//! Full money flows against the in-memory store: deposits by webhook, match
//! entry, settlement from every trigger, withdrawals through the provider.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use rust_decimal::Decimal;

use cashmatch_ledger::{
    EntryCollector, InMemoryKillSwitches, InMemoryStore, LedgerStore, MatchStore,
    ProviderEventStore, SettlementStore, Wallet, WalletStore, WithdrawalCreation,
    WithdrawalLimits, WithdrawalStore,
};
use cashmatch_settlement::{
    AutoSettlementJob, DispatchOutcome, InMemoryComplianceProvider, InMemoryPayoutProvider,
    LedgerReconciler, LockManager, PayoutBehavior, PayoutProvider, RetryPolicy,
    SettlementOrchestrator, SettlementOutcome, WebhookAck, WebhookProcessor, WithdrawalGate,
    WithdrawalProcessor, sign_payload,
};
use cashmatch_types::{
    Actor, AlertSeverity, AlertType, Clock, ComplianceProfile, EscrowStatus, KillSwitch,
    KillSwitchFlags, ManualClock, Match, MatchId, MatchParams, MatchStatus, PayoutConfig,
    PayoutModel, ReviewReason, SettlementTrigger, UserId, WithdrawalPolicy, WithdrawalRequest,
    WithdrawalStatus,
};

const SECRET: &str = "whsec_e2e";

struct Platform {
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    switches: Arc<InMemoryKillSwitches>,
    compliance: Arc<InMemoryComplianceProvider>,
    provider: Arc<InMemoryPayoutProvider>,
    wallet: Arc<Wallet>,
    collector: EntryCollector,
    orchestrator: Arc<SettlementOrchestrator>,
    job: AutoSettlementJob,
    gate: WithdrawalGate,
    processor: Arc<WithdrawalProcessor>,
    webhooks: WebhookProcessor,
    reconciler: LedgerReconciler,
}

fn platform() -> Platform {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new("2026-05-04T09:00:00Z".parse().unwrap()));
    let switches = Arc::new(InMemoryKillSwitches::new(KillSwitchFlags::default()));
    let compliance = Arc::new(InMemoryComplianceProvider::new());
    let provider = Arc::new(InMemoryPayoutProvider::default());

    let wallet = Arc::new(Wallet::new(store.clone(), switches.clone(), clock.clone()));
    let locks = LockManager::new(store.clone(), clock.clone(), "node-a", Duration::seconds(120));
    let orchestrator = Arc::new(SettlementOrchestrator::new(
        store.clone(),
        switches.clone(),
        clock.clone(),
        locks,
        RetryPolicy::default(),
    ));
    let processor = Arc::new(WithdrawalProcessor::new(
        store.clone(),
        provider.clone(),
        switches.clone(),
        clock.clone(),
        WithdrawalPolicy::default(),
        StdDuration::from_millis(100),
    ));

    Platform {
        collector: EntryCollector::new(store.clone(), clock.clone()),
        job: AutoSettlementJob::new(
            store.clone(),
            orchestrator.clone(),
            switches.clone(),
            clock.clone(),
            50,
        ),
        gate: WithdrawalGate::new(
            store.clone(),
            compliance.clone(),
            switches.clone(),
            clock.clone(),
            WithdrawalPolicy::default(),
        ),
        webhooks: WebhookProcessor::new(
            store.clone(),
            wallet.clone(),
            processor.clone(),
            clock.clone(),
            "stripe",
            SECRET,
        ),
        reconciler: LedgerReconciler::new(store.clone(), clock.clone()),
        store,
        clock,
        switches,
        compliance,
        provider,
        wallet,
        orchestrator,
        processor,
    }
}

fn params(players: u32, model: PayoutModel) -> MatchParams {
    MatchParams {
        entry_fee_cents: 500,
        min_players: 2,
        max_players: players,
        payout_model: model,
        payout_config: PayoutConfig::default(),
        rake_percent: Decimal::new(5, 0),
    }
}

impl Platform {
    async fn webhook(&self, body: serde_json::Value) -> WebhookAck {
        let raw = body.to_string();
        let signature = sign_payload(SECRET, raw.as_bytes()).unwrap();
        self.webhooks.handle(raw.as_bytes(), &signature).await.unwrap()
    }

    /// Deposit through the provider flow: intent, then signed webhook.
    async fn deposit(&self, user: UserId, cents: i64) -> String {
        let intent = format!("pi_{}", UserId::new().0.simple());
        self.wallet
            .create_deposit_intent(user, cents, intent.clone())
            .await
            .unwrap();
        let ack = self
            .webhook(serde_json::json!({
                "id": format!("evt_{intent}"),
                "type": "deposit.succeeded",
                "data": { "provider_intent_id": intent },
            }))
            .await;
        assert_eq!(ack, WebhookAck::Processed);
        intent
    }

    async fn funded(&self, cents: i64) -> UserId {
        let user = UserId::new();
        self.deposit(user, cents).await;
        user
    }

    /// Verified, year-old account for withdrawals.
    fn verify(&self, user: UserId) {
        self.compliance
            .set(ComplianceProfile::verified(user, self.clock.now() - Duration::days(365)))
            .unwrap();
    }

    /// Seat everyone, start, submit scores in order. Returns the outcome
    /// the final submission produced.
    async fn play(
        &self,
        match_id: MatchId,
        players: &[UserId],
        scores: &[i64],
    ) -> Option<SettlementOutcome> {
        for player in players {
            self.collector.join(*player, match_id).await.unwrap();
        }
        let game = self.store.get_match(match_id).await.unwrap().unwrap();
        if game.status != MatchStatus::Active {
            self.collector
                .start(&Actor::User(game.creator_id), match_id)
                .await
                .unwrap();
        }
        let mut last = None;
        for (player, score) in players.iter().zip(scores) {
            last = self
                .orchestrator
                .submit_score(*player, match_id, *score, Some(60_000))
                .await
                .unwrap()
                .settlement;
        }
        last
    }

    async fn entry_count(&self, users: &[UserId]) -> usize {
        let mut total = 0;
        for user in users {
            total += self.store.ledger_entries(*user).await.unwrap().len();
        }
        total
    }

    async fn available(&self, user: UserId) -> i64 {
        self.store.balance(user).await.unwrap().available_cents
    }

    async fn assert_reconciled(&self) {
        let report = self.reconciler.run().await.unwrap();
        assert!(report.is_clean(), "{:?}", report.mismatches);
    }
}

#[tokio::test]
async fn winner_take_all_settles_on_last_score() {
    let p = platform();
    let mut players = Vec::new();
    for _ in 0..4 {
        players.push(p.funded(1_000).await);
    }
    let game = p
        .collector
        .create_match(players[0], params(4, PayoutModel::WinnerTakeAll))
        .await
        .unwrap();

    let outcome = p.play(game.id, &players, &[900, 950, 880, 850]).await;
    let Some(SettlementOutcome::Settled(plan)) = outcome else {
        panic!("expected settlement, got {outcome:?}");
    };
    assert_eq!(plan.total_pot_cents, 2_000);
    assert_eq!(plan.rake_cents, 100);
    assert_eq!(plan.net_pot_cents, 1_900);
    assert_eq!(plan.payout_for(players[1]).unwrap().payout_cents, 1_900);

    assert_eq!(p.available(players[1]).await, 2_400);
    for loser in [players[0], players[2], players[3]] {
        assert_eq!(p.available(loser).await, 500);
    }
    let escrow = p.store.escrow(game.id).await.unwrap().unwrap();
    assert_eq!(escrow.status, EscrowStatus::Released);
    assert_eq!(escrow.payout_digest.as_deref(), Some(plan.digest.as_str()));
    p.assert_reconciled().await;
}

#[tokio::test]
async fn large_withdrawal_from_young_account_needs_review() {
    let p = platform();
    let user = p.funded(150_000).await;
    p.compliance
        .set(ComplianceProfile::verified(user, p.clock.now() - Duration::days(10)))
        .unwrap();

    let request = p
        .gate
        .request_withdrawal(user, 100_000, "acct_1", "wd-b")
        .await
        .unwrap();
    assert!(request.requires_manual_review);
    assert!(request.review_reasons.contains(&ReviewReason::LargeAmount));
    assert!(request.review_reasons.contains(&ReviewReason::NewAccount));

    let balance = p.store.balance(user).await.unwrap();
    assert_eq!((balance.available_cents, balance.locked_cents), (50_000, 100_000));
    p.assert_reconciled().await;
}

#[tokio::test]
async fn settling_twice_writes_nothing() {
    let p = platform();
    let players = [p.funded(1_000).await, p.funded(1_000).await];
    let game = p
        .collector
        .create_match(players[0], params(2, PayoutModel::WinnerTakeAll))
        .await
        .unwrap();
    let first = p.play(game.id, &players, &[10, 20]).await.unwrap();
    assert!(matches!(first, SettlementOutcome::Settled(_)));

    let entries_before = p.entry_count(&players).await;
    let again = p
        .orchestrator
        .settle(game.id, SettlementTrigger::Manual)
        .await
        .unwrap();
    assert!(matches!(again, SettlementOutcome::AlreadySettled(_)));
    assert!(again.is_settled());
    assert_eq!(p.entry_count(&players).await, entries_before);
    assert_eq!(p.available(players[1]).await, 500 + 950);
}

#[tokio::test]
async fn disabled_settlement_sweeps_nothing() {
    let p = platform();
    let players = [p.funded(1_000).await, p.funded(1_000).await];
    let game = p
        .collector
        .create_match(players[0], params(2, PayoutModel::WinnerTakeAll))
        .await
        .unwrap();

    p.switches.set(KillSwitch::Settlement, false).unwrap();
    let outcome = p.play(game.id, &players, &[30, 20]).await;
    assert!(outcome.is_none(), "settlement must be deferred");
    assert_eq!(
        p.store.get_match(game.id).await.unwrap().unwrap().status,
        MatchStatus::Completed
    );

    let entries_before = p.entry_count(&players).await;
    let report = p.job.run_once().await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(p.entry_count(&players).await, entries_before);
    assert!(p.store.attempts(game.id).await.unwrap().is_empty());

    p.switches.set(KillSwitch::Settlement, true).unwrap();
    let report = p.job.run_once().await.unwrap();
    assert_eq!((report.processed, report.settled), (1, 1));
    assert_eq!(p.available(players[0]).await, 500 + 950);
    p.assert_reconciled().await;
}

#[tokio::test]
async fn duplicate_deposit_webhook_credits_once() {
    let p = platform();
    let user = UserId::new();
    let intent = p.deposit(user, 2_500).await;

    let ack = p
        .webhook(serde_json::json!({
            "id": format!("evt_{intent}"),
            "type": "deposit.succeeded",
            "data": { "provider_intent_id": intent },
        }))
        .await;
    assert_eq!(ack, WebhookAck::Duplicate);
    assert_eq!(p.available(user).await, 2_500);
    assert_eq!(p.store.ledger_entries(user).await.unwrap().len(), 1);
}

#[tokio::test]
async fn bad_signature_is_rejected_before_recording() {
    let p = platform();
    let body = br#"{"id":"evt_forged","type":"deposit.succeeded","data":{}}"#;
    let err = p.webhooks.handle(body, "sha256=00ff").await.unwrap_err();
    assert_eq!(err.http_status(), 401);
    assert!(p
        .store
        .get_event("stripe", "evt_forged")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn failing_webhook_handler_is_recorded_and_alerted() {
    let p = platform();
    let ack = p
        .webhook(serde_json::json!({
            "id": "evt_orphan",
            "type": "deposit.succeeded",
            "data": { "provider_intent_id": "pi_unknown" },
        }))
        .await;
    assert!(matches!(ack, WebhookAck::Failed { .. }));

    let event = p.store.get_event("stripe", "evt_orphan").await.unwrap().unwrap();
    assert!(event.processed);
    assert!(event.processing_error.is_some());
    assert!(p.store.alerts().unwrap().iter().any(|a| {
        a.alert_type == AlertType::WebhookProcessingFailed && a.severity == AlertSeverity::Critical
    }));

    let unknown = p
        .webhook(serde_json::json!({ "id": "evt_misc", "type": "customer.updated", "data": {} }))
        .await;
    assert_eq!(unknown, WebhookAck::Ignored);
}

#[tokio::test]
async fn cancellation_refunds_and_reconciles() {
    let p = platform();
    let players = [p.funded(800).await, p.funded(800).await];
    let game = p
        .collector
        .create_match(players[0], params(3, PayoutModel::WinnerTakeAll))
        .await
        .unwrap();
    for player in players {
        p.collector.join(player, game.id).await.unwrap();
    }
    p.collector
        .cancel(&Actor::User(players[0]), game.id)
        .await
        .unwrap();

    for player in players {
        assert_eq!(p.available(player).await, 800);
    }
    let err = p
        .orchestrator
        .settle(game.id, SettlementTrigger::Manual)
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 400);
    p.assert_reconciled().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_settle_pays_exactly_once() {
    let p = platform();
    let players = [p.funded(1_000).await, p.funded(1_000).await];
    let game = p
        .collector
        .create_match(players[0], params(2, PayoutModel::WinnerTakeAll))
        .await
        .unwrap();
    p.switches.set(KillSwitch::Settlement, false).unwrap();
    p.play(game.id, &players, &[5, 9]).await;
    p.switches.set(KillSwitch::Settlement, true).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = p.orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.settle(game.id, SettlementTrigger::Manual).await
        }));
    }
    let mut settled = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            SettlementOutcome::Settled(_) => settled += 1,
            SettlementOutcome::AlreadySettled(_) | SettlementOutcome::Locked { .. } => {}
            other @ SettlementOutcome::Failed { .. } => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(settled, 1);
    assert_eq!(p.available(players[1]).await, 500 + 950);
    p.assert_reconciled().await;
}

#[tokio::test]
async fn sweep_recovers_match_behind_orphaned_lock() {
    let p = platform();
    let players = [p.funded(1_000).await, p.funded(1_000).await];
    let game = p
        .collector
        .create_match(players[0], params(2, PayoutModel::WinnerTakeAll))
        .await
        .unwrap();
    p.switches.set(KillSwitch::Settlement, false).unwrap();
    p.play(game.id, &players, &[1, 2]).await;
    p.switches.set(KillSwitch::Settlement, true).unwrap();

    // A crashed instance left its lock behind.
    p.store
        .try_acquire_lock(game.id, "node-dead:1", Duration::seconds(120), p.clock.now())
        .await
        .unwrap();
    let blocked = p.job.run_once().await.unwrap();
    assert_eq!((blocked.locked, blocked.settled), (1, 0));

    p.clock.advance(Duration::minutes(5));
    let report = p.job.run_once().await.unwrap();
    assert_eq!((report.reaped_locks, report.settled), (1, 1));
    assert!(p
        .store
        .alerts()
        .unwrap()
        .iter()
        .any(|a| a.alert_type == AlertType::OrphanedSettlementLock));
    p.assert_reconciled().await;
}

#[tokio::test]
async fn settlement_stands_when_its_attempt_record_is_lost() {
    let p = platform();
    let players = [p.funded(1_000).await, p.funded(1_000).await];
    let game = p
        .collector
        .create_match(players[0], params(2, PayoutModel::WinnerTakeAll))
        .await
        .unwrap();

    p.store.reject_attempt_writes(true).unwrap();
    let outcome = p.play(game.id, &players, &[10, 20]).await;
    assert!(matches!(outcome, Some(SettlementOutcome::Settled(_))), "{outcome:?}");
    assert!(p.store.attempts(game.id).await.unwrap().is_empty());
    assert_eq!(p.available(players[1]).await, 500 + 950);

    p.store.reject_attempt_writes(false).unwrap();
    let again = p
        .orchestrator
        .settle(game.id, SettlementTrigger::Manual)
        .await
        .unwrap();
    assert!(matches!(again, SettlementOutcome::AlreadySettled(_)));
    assert_eq!(p.available(players[1]).await, 500 + 950);
    p.assert_reconciled().await;
}

#[tokio::test]
async fn retries_back_off_then_escalate() {
    let p = platform();
    let players = [p.funded(1_000).await, p.funded(1_000).await];

    // Splits above 100% cannot be paid; every attempt fails the same way.
    let mut game = Match::from_params(players[0], params(2, PayoutModel::Top3), p.clock.now());
    game.payout_config.splits = Some(vec![Decimal::new(8, 1), Decimal::new(5, 1)]);
    p.store.insert_match(game.clone()).await.unwrap();

    let first = p.play(game.id, &players, &[3, 4]).await;
    assert!(matches!(
        first,
        Some(SettlementOutcome::Failed { attempt_number: 1, escalated: false, .. })
    ));

    // Backoff not elapsed yet.
    assert_eq!(p.job.run_once().await.unwrap().processed, 0);

    let mut escalated = 0;
    for _ in 0..4 {
        p.clock.advance(Duration::minutes(10));
        let report = p.job.run_once().await.unwrap();
        assert_eq!(report.processed, 1);
        escalated += report.escalated;
    }
    assert_eq!(escalated, 1);

    let attempts = p.store.attempts(game.id).await.unwrap();
    assert_eq!(attempts.len(), 5);
    assert!(attempts.last().unwrap().next_retry_at.is_none());
    assert!(p.store.get_match(game.id).await.unwrap().unwrap().settlement_failed);
    assert!(p.store.alerts().unwrap().iter().any(|a| {
        a.alert_type == AlertType::SettlementFailed && a.severity == AlertSeverity::Critical
    }));

    p.clock.advance(Duration::hours(1));
    assert_eq!(p.job.run_once().await.unwrap().processed, 0);
    assert_eq!(
        p.store.escrow(game.id).await.unwrap().unwrap().status,
        EscrowStatus::Pending
    );
    p.assert_reconciled().await;
}

#[tokio::test]
async fn withdrawal_round_trip_through_provider_webhook() {
    let p = platform();
    let user = p.funded(20_000).await;
    p.verify(user);
    let admin = UserId::new();

    let request = p
        .gate
        .request_withdrawal(user, 5_000, "acct_9", "wd-1")
        .await
        .unwrap();
    p.processor.approve(request.id, admin).await.unwrap();
    let DispatchOutcome::Submitted(dispatched) = p.processor.dispatch(request.id).await.unwrap()
    else {
        panic!("expected submission");
    };
    let payout_id = dispatched.provider_payout_id.clone().unwrap();

    let ack = p
        .webhook(serde_json::json!({
            "id": "evt_po_ok",
            "type": "payout.succeeded",
            "data": { "payout_id": payout_id },
        }))
        .await;
    assert_eq!(ack, WebhookAck::Processed);

    let done = p.store.get_withdrawal(request.id).await.unwrap().unwrap();
    assert_eq!(done.status, WithdrawalStatus::Completed);
    let balance = p.store.balance(user).await.unwrap();
    assert_eq!((balance.available_cents, balance.locked_cents), (15_000, 0));
    p.assert_reconciled().await;
}

#[tokio::test]
async fn failed_payout_webhook_unlocks_and_alerts() {
    let p = platform();
    let user = p.funded(20_000).await;
    p.verify(user);

    let request = p
        .gate
        .request_withdrawal(user, 5_000, "acct_9", "wd-2")
        .await
        .unwrap();
    p.processor.approve(request.id, UserId::new()).await.unwrap();
    p.processor.dispatch(request.id).await.unwrap();
    let payout_id = p
        .store
        .get_withdrawal(request.id)
        .await
        .unwrap()
        .unwrap()
        .provider_payout_id
        .unwrap();

    let ack = p
        .webhook(serde_json::json!({
            "id": "evt_po_fail",
            "type": "payout.failed",
            "data": { "payout_id": payout_id, "failure_reason": "account_closed" },
        }))
        .await;
    assert_eq!(ack, WebhookAck::Processed);

    let failed = p.store.get_withdrawal(request.id).await.unwrap().unwrap();
    assert_eq!(failed.status, WithdrawalStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("account_closed"));
    assert_eq!(p.available(user).await, 20_000);
    assert!(p
        .store
        .alerts()
        .unwrap()
        .iter()
        .any(|a| a.alert_type == AlertType::PayoutFailed));
    p.assert_reconciled().await;
}

#[tokio::test]
async fn timed_out_payout_is_found_not_reissued() {
    let p = platform();
    let user = p.funded(20_000).await;
    p.verify(user);
    p.provider
        .set_behavior(PayoutBehavior::Stall(StdDuration::from_secs(5)))
        .unwrap();

    let request = p
        .gate
        .request_withdrawal(user, 5_000, "acct_9", "wd-3")
        .await
        .unwrap();
    p.processor.approve(request.id, UserId::new()).await.unwrap();
    let outcome = p.processor.dispatch(request.id).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::OutcomeUnknown(ref r) if r.status == WithdrawalStatus::Approved));
    assert!(p
        .store
        .alerts()
        .unwrap()
        .iter()
        .any(|a| a.alert_type == AlertType::PayoutOutcomeUnknown));

    // The provider did pay; its webhook arrives before our retry.
    let payout = p.provider.lookup_payout(request.id).await.unwrap().unwrap();
    let ack = p
        .webhook(serde_json::json!({
            "id": "evt_po_late",
            "type": "payout.succeeded",
            "data": {
                "payout_id": payout.provider_payout_id,
                "withdrawal_id": request.id.to_string(),
            },
        }))
        .await;
    assert_eq!(ack, WebhookAck::Processed);
    assert_eq!(
        p.store.get_withdrawal(request.id).await.unwrap().unwrap().status,
        WithdrawalStatus::Completed
    );

    p.provider.set_behavior(PayoutBehavior::Accept).unwrap();
    let again = p.processor.dispatch(request.id).await.unwrap();
    assert!(matches!(again, DispatchOutcome::Completed(_)));
    assert!(p.processor.dispatch_approved().await.unwrap().is_empty());
    assert_eq!(p.provider.create_calls().unwrap(), 1);
    assert_eq!(p.store.balance(user).await.unwrap().total_cents(), 15_000);
    p.assert_reconciled().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_withdrawals_cannot_over_lock() {
    let store = Arc::new(InMemoryStore::new());
    let user = UserId::new();
    store.fund(user, 5_000, chrono::Utc::now()).unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let store: Arc<dyn LedgerStore> = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .create_withdrawal(
                    WithdrawalRequest::new(
                        user,
                        1_000,
                        "acct".into(),
                        format!("key-{i}"),
                        vec![],
                        chrono::Utc::now(),
                    ),
                    WithdrawalLimits::unbounded(),
                )
                .await
        }));
    }
    let mut created = 0;
    for handle in handles {
        if let Ok(WithdrawalCreation::Created { .. }) = handle.await.unwrap() {
            created += 1;
        }
    }
    assert_eq!(created, 5);
    let balance = store.balance(user).await.unwrap();
    assert_eq!((balance.available_cents, balance.locked_cents), (0, 5_000));
}

#[tokio::test]
async fn withdrawal_waits_out_match_cooldown() {
    let p = platform();
    let players = [p.funded(20_000).await, p.funded(20_000).await];
    p.verify(players[0]);
    let game = p
        .collector
        .create_match(players[0], params(2, PayoutModel::WinnerTakeAll))
        .await
        .unwrap();
    p.play(game.id, &players, &[50, 40]).await;

    let err = p
        .gate
        .request_withdrawal(players[0], 5_000, "acct", "wd-c")
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 429);

    p.clock.advance(Duration::hours(25));
    p.gate
        .request_withdrawal(players[0], 5_000, "acct", "wd-c")
        .await
        .unwrap();
}
