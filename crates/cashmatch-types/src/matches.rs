//! Match and seat model.
//!
//! ## Match lifecycle
//!
//! ```text
//!   WAITING ──full──▶ STARTING ──start──▶ ACTIVE ──all scored──▶ COMPLETED
//!      │                  │
//!      └──── cancel ──────┴──────────▶ CANCELLED
//! ```
//!
//! `WAITING → ACTIVE` is also allowed when the creator starts a match that
//! reached `min_players` without filling up.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CashMatchError, MatchId, MatchPlayerId, Result, UserId};

/// Lifecycle state of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Waiting,
    Starting,
    Active,
    Completed,
    Cancelled,
}

impl MatchStatus {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Waiting, Self::Starting | Self::Active | Self::Cancelled)
                | (Self::Starting, Self::Active | Self::Cancelled)
                | (Self::Active, Self::Completed)
        )
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "WAITING"),
            Self::Starting => write!(f, "STARTING"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// How the net pot is divided among finishers.
///
/// Serialized as the lobby's string name. Names this engine does not know
/// are preserved in [`PayoutModel::Other`] and paid out as winner-take-all.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PayoutModel {
    WinnerTakeAll,
    Top3,
    Percentile,
    Other(String),
}

impl From<String> for PayoutModel {
    fn from(value: String) -> Self {
        match value.as_str() {
            "winner_take_all" => Self::WinnerTakeAll,
            "top3" => Self::Top3,
            "percentile" => Self::Percentile,
            _ => Self::Other(value),
        }
    }
}

impl From<PayoutModel> for String {
    fn from(value: PayoutModel) -> Self {
        match value {
            PayoutModel::WinnerTakeAll => "winner_take_all".to_string(),
            PayoutModel::Top3 => "top3".to_string(),
            PayoutModel::Percentile => "percentile".to_string(),
            PayoutModel::Other(name) => name,
        }
    }
}

impl std::fmt::Display for PayoutModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from(self.clone()))
    }
}

/// Model-specific tuning supplied by the lobby.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutConfig {
    /// Overrides the `top3` fractions (e.g. `["0.5", "0.3", "0.2"]`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splits: Option<Vec<Decimal>>,
}

impl PayoutConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(splits) = &self.splits {
            if splits.is_empty() {
                return Err(CashMatchError::validation("payout splits must not be empty"));
            }
            if splits.iter().any(Decimal::is_sign_negative) {
                return Err(CashMatchError::validation("payout splits must be non-negative"));
            }
            let sum: Decimal = splits.iter().sum();
            if sum > Decimal::ONE {
                return Err(CashMatchError::validation(format!(
                    "payout splits sum to {sum}, above 1"
                )));
            }
        }
        Ok(())
    }
}

/// Parameters for creating a match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchParams {
    pub entry_fee_cents: i64,
    pub min_players: u32,
    pub max_players: u32,
    pub payout_model: PayoutModel,
    #[serde(default)]
    pub payout_config: PayoutConfig,
    /// Platform cut in percent, e.g. `5` or `7.5`.
    pub rake_percent: Decimal,
}

impl MatchParams {
    pub fn validate(&self) -> Result<()> {
        if self.entry_fee_cents <= 0 {
            return Err(CashMatchError::validation("entry fee must be positive"));
        }
        if self.min_players < 2 {
            return Err(CashMatchError::validation("a cash match needs at least 2 players"));
        }
        if self.max_players < self.min_players {
            return Err(CashMatchError::validation(format!(
                "max_players {} below min_players {}",
                self.max_players, self.min_players
            )));
        }
        if self.rake_percent.is_sign_negative() || self.rake_percent >= Decimal::ONE_HUNDRED {
            return Err(CashMatchError::validation(format!(
                "rake_percent {} outside [0, 100)",
                self.rake_percent
            )));
        }
        self.payout_config.validate()
    }
}

/// A cash match as seen by the settlement engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Match {
    pub id: MatchId,
    pub creator_id: UserId,
    pub entry_fee_cents: i64,
    pub min_players: u32,
    pub max_players: u32,
    pub payout_model: PayoutModel,
    pub payout_config: PayoutConfig,
    pub rake_percent: Decimal,
    pub status: MatchStatus,
    /// Terminal flag: settlement exhausted its retries and needs an operator.
    pub settlement_failed: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Match {
    #[must_use]
    pub fn from_params(creator_id: UserId, params: MatchParams, now: DateTime<Utc>) -> Self {
        Self {
            id: MatchId::new(),
            creator_id,
            entry_fee_cents: params.entry_fee_cents,
            min_players: params.min_players,
            max_players: params.max_players,
            payout_model: params.payout_model,
            payout_config: params.payout_config,
            rake_percent: params.rake_percent,
            status: MatchStatus::Waiting,
            settlement_failed: false,
            created_at: now,
            completed_at: None,
        }
    }

    /// Move to `target`, rejecting illegal lifecycle jumps.
    pub fn transition(&mut self, target: MatchStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(CashMatchError::conflict(format!(
                "match {} cannot go from {} to {target}",
                self.id, self.status
            )));
        }
        self.status = target;
        Ok(())
    }
}

/// Outcome label for one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerResult {
    Win,
    Loss,
    Tie,
}

/// One player's seat in a match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MatchPlayer {
    pub id: MatchPlayerId,
    pub match_id: MatchId,
    pub user_id: UserId,
    /// Join order within the match, the last-resort tie-breaker.
    pub seat: u32,
    pub joined_at: DateTime<Utc>,
    pub score: Option<i64>,
    pub time_taken_ms: Option<u64>,
    pub result: Option<PlayerResult>,
    pub payout_cents: Option<i64>,
    pub placement: Option<u32>,
}

impl MatchPlayer {
    #[must_use]
    pub fn new(match_id: MatchId, user_id: UserId, seat: u32, joined_at: DateTime<Utc>) -> Self {
        Self {
            id: MatchPlayerId::new(),
            match_id,
            user_id,
            seat,
            joined_at,
            score: None,
            time_taken_ms: None,
            result: None,
            payout_cents: None,
            placement: None,
        }
    }

    #[must_use]
    pub fn has_score(&self) -> bool {
        self.score.is_some()
    }
}
