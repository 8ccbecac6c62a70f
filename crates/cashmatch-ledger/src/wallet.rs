//! Wallet plane: deposit intents, provider-confirmed credits, and balance
//! queries.

use std::sync::Arc;

use cashmatch_types::{
    Actor, AuditAction, AuditEvent, CashMatchError, Clock, DepositIntent, KillSwitch,
    LedgerEntry, Result, UserId, WalletBalance,
};

use crate::kill_switch::{KillSwitchSource, require_enabled};
use crate::store::{DepositCompletion, LedgerStore, record_audit};

pub struct Wallet {
    store: Arc<dyn LedgerStore>,
    kill_switches: Arc<dyn KillSwitchSource>,
    clock: Arc<dyn Clock>,
}

impl Wallet {
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        kill_switches: Arc<dyn KillSwitchSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            kill_switches,
            clock,
        }
    }

    /// Register a provider payment the user is about to make.
    ///
    /// No funds move until the provider confirms it via webhook.
    pub async fn create_deposit_intent(
        &self,
        user_id: UserId,
        amount_cents: i64,
        provider_intent_id: String,
    ) -> Result<DepositIntent> {
        require_enabled(self.kill_switches.as_ref(), KillSwitch::Deposits).await?;
        if amount_cents <= 0 {
            return Err(CashMatchError::validation("deposit amount must be positive"));
        }
        if provider_intent_id.is_empty() {
            return Err(CashMatchError::validation("provider intent id is required"));
        }

        let intent = DepositIntent::new(user_id, amount_cents, provider_intent_id, self.clock.now());
        self.store.create_deposit_intent(intent.clone()).await?;
        tracing::info!(
            user_id = %user_id,
            amount_cents,
            provider_intent_id = %intent.provider_intent_id,
            "deposit intent created"
        );
        Ok(intent)
    }

    /// Credit a provider-confirmed deposit. Replays are no-ops.
    pub async fn credit_deposit(&self, provider_intent_id: &str) -> Result<DepositCompletion> {
        let outcome = self
            .store
            .complete_deposit(provider_intent_id, self.clock.now())
            .await?;
        if let DepositCompletion::Credited { intent, entry } = &outcome {
            tracing::info!(
                user_id = %intent.user_id,
                amount_cents = intent.amount_cents,
                balance_after_cents = entry.balance_after_cents,
                "deposit credited"
            );
            record_audit(
                self.store.as_ref(),
                AuditEvent::new(
                    AuditAction::DepositCredited,
                    Actor::system("webhook"),
                    self.clock.now(),
                )
                .user(intent.user_id)
                .amount(intent.amount_cents)
                .metadata(serde_json::json!({ "provider_intent_id": provider_intent_id })),
            )
            .await;
        }
        Ok(outcome)
    }

    /// Mark a deposit the provider reported as failed. No funds move.
    pub async fn fail_deposit(&self, provider_intent_id: &str) -> Result<DepositIntent> {
        let intent = self
            .store
            .fail_deposit(provider_intent_id, self.clock.now())
            .await?;
        tracing::info!(user_id = %intent.user_id, provider_intent_id, "deposit failed");
        record_audit(
            self.store.as_ref(),
            AuditEvent::new(
                AuditAction::DepositFailed,
                Actor::system("webhook"),
                self.clock.now(),
            )
            .user(intent.user_id)
            .amount(intent.amount_cents),
        )
        .await;
        Ok(intent)
    }

    pub async fn balance(&self, user_id: UserId) -> Result<WalletBalance> {
        self.store.balance(user_id).await
    }

    /// Ledger entries for the user, oldest first.
    pub async fn history(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        self.store.ledger_entries(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryKillSwitches, InMemoryStore};
    use crate::WalletStore as _;
    use cashmatch_types::ManualClock;
    use chrono::Utc;

    fn wallet() -> (Wallet, Arc<InMemoryStore>, Arc<InMemoryKillSwitches>) {
        let store = Arc::new(InMemoryStore::new());
        let switches = Arc::new(InMemoryKillSwitches::default());
        let wallet = Wallet::new(
            store.clone(),
            switches.clone(),
            Arc::new(ManualClock::new(Utc::now())),
        );
        (wallet, store, switches)
    }

    #[tokio::test]
    async fn deposit_credit_is_applied_once() {
        let (wallet, store, _) = wallet();
        let user = UserId::new();
        wallet
            .create_deposit_intent(user, 2_500, "pi_1".into())
            .await
            .unwrap();
        assert_eq!(wallet.balance(user).await.unwrap().available_cents, 0);

        let first = wallet.credit_deposit("pi_1").await.unwrap();
        assert!(matches!(first, DepositCompletion::Credited { .. }));
        let second = wallet.credit_deposit("pi_1").await.unwrap();
        assert!(matches!(second, DepositCompletion::AlreadyCompleted(_)));

        assert_eq!(wallet.balance(user).await.unwrap().available_cents, 2_500);
        assert_eq!(wallet.history(user).await.unwrap().len(), 1);
        assert_eq!(store.audit_events().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deposits_kill_switch_blocks_intents() {
        let (wallet, store, switches) = wallet();
        switches.set(KillSwitch::Deposits, false).unwrap();
        let err = wallet
            .create_deposit_intent(UserId::new(), 1_000, "pi_2".into())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert!(store.deposit_intent("pi_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_deposit_cannot_be_credited() {
        let (wallet, _, _) = wallet();
        let user = UserId::new();
        wallet
            .create_deposit_intent(user, 1_000, "pi_3".into())
            .await
            .unwrap();
        wallet.fail_deposit("pi_3").await.unwrap();
        assert!(wallet.credit_deposit("pi_3").await.is_err());
        assert!(wallet.balance(user).await.unwrap().is_zero());
    }
}
