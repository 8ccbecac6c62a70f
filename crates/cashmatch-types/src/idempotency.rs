//! Stored outcomes for client-retried write requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CashMatchError, UserId};

/// The response a request produced, replayed verbatim on retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

impl StoredResponse {
    #[must_use]
    pub fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    /// Error outcomes are stored too, so a retry sees the same refusal.
    #[must_use]
    pub fn from_error(err: &CashMatchError) -> Self {
        Self {
            status: err.http_status(),
            body: serde_json::json!({
                "error": err.code(),
                "message": err.to_string(),
            }),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IdempotencyState {
    /// Reserved by a request that has not finished yet.
    InFlight,
    Completed { response: StoredResponse },
}

/// Unique per `(key, user_id, route)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub user_id: UserId,
    pub route: String,
    pub state: IdempotencyState,
    /// When the current reservation was taken.
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    #[must_use]
    pub fn in_flight(key: &str, user_id: UserId, route: &str, now: DateTime<Utc>) -> Self {
        Self {
            key: key.to_string(),
            user_id,
            route: route.to_string(),
            state: IdempotencyState::InFlight,
            created_at: now,
        }
    }

    /// In flight and reserved before `cutoff`. Completed records never expire.
    #[must_use]
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        matches!(self.state, IdempotencyState::InFlight) && self.created_at < cutoff
    }

    #[must_use]
    pub fn response(&self) -> Option<&StoredResponse> {
        match &self.state {
            IdempotencyState::InFlight => None,
            IdempotencyState::Completed { response } => Some(response),
        }
    }
}
