//! Operator alerts raised on critical or terminal failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AlertId, MatchId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Settlement exhausted its retries.
    SettlementFailed,
    /// A settlement lock outlived its TTL and was reaped.
    OrphanedSettlementLock,
    /// Provider refused a payout.
    PayoutFailed,
    /// Provider call timed out; payout outcome unknown.
    PayoutOutcomeUnknown,
    /// A webhook handler errored after the event was recorded.
    WebhookProcessingFailed,
    /// Σ ledger entries disagrees with a wallet balance.
    LedgerMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub user_id: Option<UserId>,
    pub match_id: Option<MatchId>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    #[must_use]
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AlertId::new(),
            alert_type,
            severity,
            message: message.into(),
            user_id: None,
            match_id: None,
            metadata: serde_json::Value::Null,
            created_at: now,
        }
    }

    #[must_use]
    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn for_match(mut self, match_id: MatchId) -> Self {
        self.match_id = Some(match_id);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
