//! Per-match settlement lock.
//!
//! Only the lock holder may apply payouts for a match. Each acquisition gets
//! a fresh owner token (`<instance>:<uuid>`), and each lock carries a TTL
//! so a crashed holder cannot block settlement forever: once `expires_at`
//! passes, the next caller takes the lock over and the sweep reaps it.

use std::sync::Arc;

use cashmatch_ledger::{LedgerStore, LockAcquisition, raise_alert};
use cashmatch_types::{
    Alert, AlertSeverity, AlertType, Clock, MatchId, Result, SettlementLock,
};
use chrono::Duration;
use uuid::Uuid;

/// Result of one acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired { owner: String },
    /// A live owner holds the lock; the caller must not settle.
    Held { holder: String },
}

pub struct LockManager {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    instance_id: String,
    ttl: Duration,
}

impl LockManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        instance_id: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            instance_id: instance_id.into(),
            ttl,
        }
    }

    pub async fn acquire(&self, match_id: MatchId) -> Result<LockOutcome> {
        let owner = format!("{}:{}", self.instance_id, Uuid::now_v7());
        let outcome = self
            .store
            .try_acquire_lock(match_id, &owner, self.ttl, self.clock.now())
            .await?;
        match outcome {
            LockAcquisition::Acquired { replaced, .. } => {
                if let Some(stale) = replaced {
                    tracing::warn!(
                        match_id = %match_id,
                        stale_owner = %stale.locked_by,
                        expired_at = %stale.expires_at,
                        "took over expired settlement lock"
                    );
                }
                Ok(LockOutcome::Acquired { owner })
            }
            LockAcquisition::Held(held) => {
                tracing::debug!(match_id = %match_id, holder = %held.locked_by, "settlement lock held");
                Ok(LockOutcome::Held {
                    holder: held.locked_by,
                })
            }
        }
    }

    /// Release, logging rather than failing: an unreleased lock expires.
    pub async fn release(&self, match_id: MatchId, owner: &str) {
        match self.store.release_lock(match_id, owner).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(match_id = %match_id, owner, "settlement lock was no longer ours");
            }
            Err(err) => {
                tracing::error!(match_id = %match_id, owner, error = %err, "failed to release settlement lock");
            }
        }
    }

    /// Remove expired locks, raising one warning alert per orphan.
    pub async fn reap_expired(&self) -> Result<Vec<SettlementLock>> {
        let now = self.clock.now();
        let reaped = self.store.reap_expired_locks(now).await?;
        for lock in &reaped {
            tracing::warn!(
                match_id = %lock.match_id,
                owner = %lock.locked_by,
                locked_at = %lock.locked_at,
                "reaped orphaned settlement lock"
            );
            raise_alert(
                self.store.as_ref(),
                Alert::new(
                    AlertType::OrphanedSettlementLock,
                    AlertSeverity::Warning,
                    format!("settlement lock held by {} expired", lock.locked_by),
                    now,
                )
                .for_match(lock.match_id)
                .with_metadata(serde_json::json!({
                    "locked_by": lock.locked_by,
                    "locked_at": lock.locked_at,
                    "expires_at": lock.expires_at,
                })),
            )
            .await;
        }
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashmatch_ledger::InMemoryStore;
    use cashmatch_types::ManualClock;
    use chrono::Utc;

    fn manager(store: Arc<InMemoryStore>, clock: Arc<ManualClock>) -> LockManager {
        LockManager::new(store, clock, "node-a", Duration::seconds(30))
    }

    #[tokio::test]
    async fn second_acquire_sees_holder() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let locks = manager(store, clock);
        let match_id = MatchId::new();

        let LockOutcome::Acquired { owner } = locks.acquire(match_id).await.unwrap() else {
            panic!("first acquire must succeed");
        };
        assert!(owner.starts_with("node-a:"));
        assert_eq!(
            locks.acquire(match_id).await.unwrap(),
            LockOutcome::Held {
                holder: owner.clone()
            }
        );

        locks.release(match_id, &owner).await;
        assert!(matches!(
            locks.acquire(match_id).await.unwrap(),
            LockOutcome::Acquired { .. }
        ));
    }

    #[tokio::test]
    async fn reaper_clears_expired_and_alerts() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let locks = manager(store.clone(), clock.clone());
        let match_id = MatchId::new();
        locks.acquire(match_id).await.unwrap();

        assert!(locks.reap_expired().await.unwrap().is_empty());
        clock.advance(Duration::seconds(31));
        let reaped = locks.reap_expired().await.unwrap();
        assert_eq!(reaped.len(), 1);

        let alerts = store.alerts().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::OrphanedSettlementLock);
        assert_eq!(alerts[0].match_id, Some(match_id));
    }
}
