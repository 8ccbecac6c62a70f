//! Audit log of every money-moving or compliance-relevant action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AuditEventId, MatchId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DepositCredited,
    DepositFailed,
    MatchCreated,
    MatchEntryCollected,
    MatchCancelled,
    MatchSettled,
    SettlementEscalated,
    WithdrawalRequested,
    WithdrawalApproved,
    WithdrawalRejected,
    WithdrawalDispatched,
    WithdrawalCompleted,
    WithdrawalFailed,
    WithdrawalRefunded,
    KillSwitchChanged,
}

/// Who performed an action: a user, an admin, or the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    User(UserId),
    Admin(UserId),
    System(String),
}

impl Actor {
    #[must_use]
    pub fn system(component: &str) -> Self {
        Self::System(component.to_string())
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "{id}"),
            Self::Admin(id) => write!(f, "admin:{}", id.0),
            Self::System(name) => write!(f, "system:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub action: AuditAction,
    pub actor: Actor,
    pub user_id: Option<UserId>,
    pub match_id: Option<MatchId>,
    pub amount_cents: Option<i64>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(action: AuditAction, actor: Actor, now: DateTime<Utc>) -> Self {
        Self {
            id: AuditEventId::new(),
            action,
            actor,
            user_id: None,
            match_id: None,
            amount_cents: None,
            metadata: serde_json::Value::Null,
            created_at: now,
        }
    }

    #[must_use]
    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn in_match(mut self, match_id: MatchId) -> Self {
        self.match_id = Some(match_id);
        self
    }

    #[must_use]
    pub fn amount(mut self, amount_cents: i64) -> Self {
        self.amount_cents = Some(amount_cents);
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
