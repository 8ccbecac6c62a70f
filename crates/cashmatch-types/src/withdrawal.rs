//! Withdrawal requests.
//!
//! ## State Machine
//!
//! ```text
//!   PENDING ──approve──▶ APPROVED ──dispatch──▶ PROCESSING ──webhook ok──▶ COMPLETED
//!      │                  │   ▲                    │
//!      │ reject           │   └──── timeout ───────┤
//!      ▼                  ▼                        ▼ provider failure
//!   REJECTED ◀────────────┘                      FAILED
//! ```
//!
//! Funds are locked at creation. `REJECTED` and `FAILED` unlock them,
//! `COMPLETED` consumes them into a `withdrawal` ledger entry. A payout the
//! provider returns after completion moves `COMPLETED → FAILED` and is
//! credited back with a `withdrawal_refund` entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{UserId, WithdrawalId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Processing,
    Completed,
    Rejected,
    Failed,
}

impl WithdrawalStatus {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Approved | Self::Rejected)
                | (Self::Approved, Self::Processing | Self::Rejected)
                | (
                    Self::Processing,
                    Self::Approved | Self::Completed | Self::Failed
                )
                | (Self::Completed, Self::Failed)
        )
    }

    /// Rejected or failed: funds went back to available.
    #[must_use]
    pub fn releases_funds(&self) -> bool {
        matches!(self, Self::Rejected | Self::Failed)
    }

    /// Funds are still sitting in `locked_cents`.
    #[must_use]
    pub fn holds_funds(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::Processing)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Failed)
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Why a request was routed to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    LargeAmount,
    ElevatedFraudScore,
    NewAccount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub amount_cents: i64,
    /// Opaque payout destination token (bank account / card reference).
    pub destination: String,
    pub status: WithdrawalStatus,
    pub requires_manual_review: bool,
    pub review_reasons: Vec<ReviewReason>,
    pub idempotency_key: String,
    pub provider_payout_id: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WithdrawalRequest {
    #[must_use]
    pub fn new(
        user_id: UserId,
        amount_cents: i64,
        destination: String,
        idempotency_key: String,
        review_reasons: Vec<ReviewReason>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WithdrawalId::new(),
            user_id,
            amount_cents,
            destination,
            status: WithdrawalStatus::Pending,
            requires_manual_review: !review_reasons.is_empty(),
            review_reasons,
            idempotency_key,
            provider_payout_id: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
