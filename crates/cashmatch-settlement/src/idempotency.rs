//! Request idempotency guard.
//!
//! Each money-affecting write carries a caller-chosen key. The first request
//! for a `(key, user, route)` triple reserves it and executes; its outcome,
//! success or error, is stored and replayed verbatim to every retry. A retry
//! that arrives while the first request is still running is refused with
//! `RequestInProgress` instead of executing a second time.
//!
//! A reservation is a lease. If its request was dropped mid-flight, or its
//! outcome could not be stored, the key stays in flight only until the lease
//! runs out; the next retry then takes it over and executes. Guarded
//! operations must therefore be safe to run again for the same key.
//!
//! Reusing a key with a different request body is not detected: the first
//! outcome is replayed.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use cashmatch_ledger::{IdempotencyReservation, LedgerStore};
use cashmatch_types::{
    CashMatchError, Clock, IdempotencyState, Result, StoredResponse, UserId,
    constants::MAX_IDEMPOTENCY_KEY_LEN,
};

/// The response to hand back, and whether it came from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotentResponse {
    pub response: StoredResponse,
    pub replayed: bool,
}

pub struct IdempotencyGuard {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    lease: Duration,
}

impl IdempotencyGuard {
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, lease: Duration) -> Self {
        Self { store, clock, lease }
    }

    /// Run `operation` at most once per `(key, user_id, route)`.
    ///
    /// Returns `Err` only when the guard itself refuses: a malformed key, a
    /// request still in flight, or a store failure before execution.
    pub async fn execute<F, Fut>(
        &self,
        key: &str,
        user_id: UserId,
        route: &str,
        operation: F,
    ) -> Result<IdempotentResponse>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<serde_json::Value>> + Send,
    {
        validate_key(key)?;

        let now = self.clock.now();
        let stale_before = now
            .checked_sub_signed(self.lease)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match self
            .store
            .reserve_key(key, user_id, route, now, stale_before)
            .await?
        {
            IdempotencyReservation::Existing(record) => {
                return match record.state {
                    IdempotencyState::Completed { response } => {
                        tracing::debug!(key, user_id = %user_id, route, "replaying stored response");
                        Ok(IdempotentResponse {
                            response,
                            replayed: true,
                        })
                    }
                    IdempotencyState::InFlight => Err(CashMatchError::RequestInProgress {
                        key: key.to_string(),
                    }),
                };
            }
            IdempotencyReservation::Reclaimed(previous) => {
                tracing::warn!(
                    key,
                    user_id = %user_id,
                    route,
                    reserved_at = %previous.created_at,
                    "in-flight reservation expired, executing again"
                );
            }
            IdempotencyReservation::Reserved => {}
        }

        let response = match operation().await {
            Ok(body) => StoredResponse::ok(body),
            Err(err) => {
                tracing::info!(key, route, code = err.code(), "storing error outcome");
                StoredResponse::from_error(&err)
            }
        };

        if let Err(err) = self
            .store
            .complete_key(key, user_id, route, response.clone())
            .await
        {
            tracing::error!(key, route, error = %err, "failed to persist idempotent response");
        }

        Ok(IdempotentResponse {
            response,
            replayed: false,
        })
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(CashMatchError::validation("idempotency key is required"));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(CashMatchError::validation(format!(
            "idempotency key longer than {MAX_IDEMPOTENCY_KEY_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use cashmatch_ledger::{IdempotencyStore, InMemoryStore};
    use cashmatch_types::ManualClock;

    fn guard() -> (IdempotencyGuard, Arc<InMemoryStore>) {
        let (guard, store, _) = guard_with_clock();
        (guard, store)
    }

    fn guard_with_clock() -> (IdempotencyGuard, Arc<InMemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let guard = IdempotencyGuard::new(store.clone(), clock.clone(), Duration::minutes(5));
        (guard, store, clock)
    }

    #[tokio::test]
    async fn executes_once_and_replays() {
        let (guard, _) = guard();
        let user = UserId::new();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let result = guard
                .execute("key-1", user, "withdraw", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::json!({ "withdrawal": "wd-1" }))
                })
                .await
                .unwrap();
            assert_eq!(result.response.status, 200);
            assert_eq!(result.response.body["withdrawal"], "wd-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn error_outcomes_are_replayed_too() {
        let (guard, _) = guard();
        let user = UserId::new();
        let first = guard
            .execute("key-2", user, "join", || async {
                Err(CashMatchError::InsufficientFunds {
                    needed: 500,
                    available: 0,
                })
            })
            .await
            .unwrap();
        assert_eq!(first.response.status, 400);
        assert!(!first.replayed);

        let second = guard
            .execute("key-2", user, "join", || async {
                Ok(serde_json::json!({ "joined": true }))
            })
            .await
            .unwrap();
        assert!(second.replayed);
        assert_eq!(second.response, first.response);
        assert_eq!(second.response.body["error"], "CM_ERR_200");
    }

    #[tokio::test]
    async fn in_flight_duplicate_is_refused() {
        let (guard, store) = guard();
        let user = UserId::new();
        let now = Utc::now();
        store
            .reserve_key("key-3", user, "withdraw", now, now - Duration::minutes(5))
            .await
            .unwrap();

        let err = guard
            .execute("key-3", user, "withdraw", || async { Ok(serde_json::Value::Null) })
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 409);
    }

    #[tokio::test]
    async fn dropped_request_frees_its_key_after_the_lease() {
        let (guard, _, clock) = guard_with_clock();
        let user = UserId::new();
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(10),
            guard.execute("key-4", user, "withdraw", || async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(serde_json::Value::Null)
            }),
        )
        .await;
        assert!(abandoned.is_err());

        clock.advance(Duration::minutes(1));
        let err = guard
            .execute("key-4", user, "withdraw", || async { Ok(serde_json::Value::Null) })
            .await
            .unwrap_err();
        assert!(matches!(err, CashMatchError::RequestInProgress { .. }));

        clock.advance(Duration::minutes(5));
        let retried = guard
            .execute("key-4", user, "withdraw", || async {
                Ok(serde_json::json!({ "withdrawal": "wd-4" }))
            })
            .await
            .unwrap();
        assert!(!retried.replayed);
        assert_eq!(retried.response.body["withdrawal"], "wd-4");

        clock.advance(Duration::days(30));
        let replayed = guard
            .execute("key-4", user, "withdraw", || async { Ok(serde_json::Value::Null) })
            .await
            .unwrap();
        assert!(replayed.replayed);
        assert_eq!(replayed.response.body["withdrawal"], "wd-4");
    }

    #[tokio::test]
    async fn keys_are_scoped_by_user_and_route() {
        let (guard, _) = guard();
        let (a, b) = (UserId::new(), UserId::new());
        let calls = AtomicU32::new(0);
        for (user, route) in [(a, "join"), (b, "join"), (a, "settle")] {
            guard
                .execute("same", user, route, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::Value::Null)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn malformed_keys_are_rejected() {
        let (guard, _) = guard();
        let long = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        for key in ["", "   ", long.as_str()] {
            let err = guard
                .execute(key, UserId::new(), "join", || async { Ok(serde_json::Value::Null) })
                .await
                .unwrap_err();
            assert_eq!(err.http_status(), 400);
        }
    }
}
