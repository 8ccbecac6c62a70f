//! Settlement records: computed payout plans, retry attempts, and the
//! per-match mutual-exclusion lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MatchId, PlayerResult, UserId};

/// Which path asked for settlement. All of them go through one orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementTrigger {
    /// Last score of the match was submitted.
    ScoreSubmission,
    /// A client or operator called settle/finalize explicitly.
    Manual,
    /// The background sweep.
    AutoJob,
}

impl std::fmt::Display for SettlementTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScoreSubmission => write!(f, "score_submission"),
            Self::Manual => write!(f, "manual"),
            Self::AutoJob => write!(f, "auto_job"),
        }
    }
}

/// One player's computed outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerPayout {
    pub user_id: UserId,
    /// 1-based rank after sorting.
    pub placement: u32,
    pub result: PlayerResult,
    pub payout_cents: i64,
}

/// Output of the payout calculator for one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPlan {
    pub match_id: MatchId,
    pub total_pot_cents: i64,
    pub rake_cents: i64,
    pub net_pot_cents: i64,
    /// Sorted by placement.
    pub payouts: Vec<PlayerPayout>,
    /// Hex SHA-256 fingerprint of the plan.
    pub digest: String,
}

impl PayoutPlan {
    /// Sum of all payouts.
    #[must_use]
    pub fn payout_total(&self) -> i64 {
        self.payouts.iter().map(|p| p.payout_cents).sum()
    }

    /// Cents lost to floor rounding; absorbed by the platform.
    #[must_use]
    pub fn unallocated_cents(&self) -> i64 {
        self.net_pot_cents - self.payout_total()
    }

    #[must_use]
    pub fn payout_for(&self, user_id: UserId) -> Option<&PlayerPayout> {
        self.payouts.iter().find(|p| p.user_id == user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
}

/// Audit row for one settlement try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementAttempt {
    pub match_id: MatchId,
    /// 1-based, counts every recorded attempt for the match.
    pub attempt_number: u32,
    pub status: AttemptStatus,
    pub trigger: SettlementTrigger,
    pub error_message: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Exclusive right to compute and apply payouts for one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementLock {
    pub match_id: MatchId,
    pub locked_by: String,
    pub locked_at: DateTime<Utc>,
    /// After this instant the holder is presumed dead and the lock may be taken.
    pub expires_at: DateTime<Utc>,
}

impl SettlementLock {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_totals() {
        let plan = PayoutPlan {
            match_id: MatchId::new(),
            total_pot_cents: 1_000,
            rake_cents: 50,
            net_pot_cents: 950,
            payouts: vec![
                PlayerPayout {
                    user_id: UserId::new(),
                    placement: 1,
                    result: PlayerResult::Win,
                    payout_cents: 475,
                },
                PlayerPayout {
                    user_id: UserId::new(),
                    placement: 2,
                    result: PlayerResult::Win,
                    payout_cents: 474,
                },
            ],
            digest: String::new(),
        };
        assert_eq!(plan.payout_total(), 949);
        assert_eq!(plan.unallocated_cents(), 1);
    }

    #[test]
    fn lock_expiry() {
        let now = Utc::now();
        let lock = SettlementLock {
            match_id: MatchId::new(),
            locked_by: "worker-1".into(),
            locked_at: now,
            expires_at: now + chrono::Duration::seconds(30),
        };
        assert!(!lock.is_expired(now));
        assert!(lock.is_expired(now + chrono::Duration::seconds(30)));
    }
}
