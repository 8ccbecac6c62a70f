//! Deposit intents created with the payment provider.
//!
//! A deposit intent is opened before the user pays. Funds move only when
//! the provider's `deposit.succeeded` webhook completes the intent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DepositIntentId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositIntent {
    pub id: DepositIntentId,
    pub user_id: UserId,
    pub amount_cents: i64,
    /// The provider's handle for this payment (e.g. a payment-intent id).
    pub provider_intent_id: String,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DepositIntent {
    #[must_use]
    pub fn new(
        user_id: UserId,
        amount_cents: i64,
        provider_intent_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DepositIntentId::new(),
            user_id,
            amount_cents,
            provider_intent_id,
            status: DepositStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
