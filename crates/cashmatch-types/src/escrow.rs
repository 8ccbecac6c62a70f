//! Per-match escrow.
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐  settlement   ┌──────────┐
//!   │ PENDING ├──────────────▶│ RELEASED │
//!   └────┬────┘               └──────────┘
//!        │ match cancelled
//!        ▼
//!   ┌──────────┐
//!   │ REFUNDED │
//!   └──────────┘
//! ```
//!
//! Transitions are one-way. A released escrow is the proof that payouts for
//! the match were applied, so every settlement path checks it first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CashMatchError, MatchId, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Collecting entry fees / awaiting settlement.
    Pending,
    /// Payouts applied. **Irreversible.**
    Released,
    /// Match cancelled; every entry fee returned.
    Refunded,
}

impl EscrowStatus {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!((self, target), (Self::Pending, Self::Released | Self::Refunded))
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Released => write!(f, "RELEASED"),
            Self::Refunded => write!(f, "REFUNDED"),
        }
    }
}

/// Pooled entry fees for one match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Escrow {
    pub match_id: MatchId,
    pub total_pot_cents: i64,
    /// Set at release.
    pub rake_cents: i64,
    /// Set at release.
    pub net_pot_cents: i64,
    pub status: EscrowStatus,
    pub released_at: Option<DateTime<Utc>>,
    /// Hex SHA-256 over the applied payouts.
    pub payout_digest: Option<String>,
}

impl Escrow {
    #[must_use]
    pub fn new(match_id: MatchId) -> Self {
        Self {
            match_id,
            total_pot_cents: 0,
            rake_cents: 0,
            net_pot_cents: 0,
            status: EscrowStatus::Pending,
            released_at: None,
            payout_digest: None,
        }
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.status == EscrowStatus::Released
    }

    /// Grow the pot by one entry fee. Only legal while pending.
    pub fn add_entry(&mut self, fee_cents: i64) -> Result<()> {
        if self.status != EscrowStatus::Pending {
            return Err(CashMatchError::conflict(format!(
                "escrow for {} is {}, cannot collect entries",
                self.match_id, self.status
            )));
        }
        self.total_pot_cents += fee_cents;
        Ok(())
    }

    /// Finalize as released with the computed split.
    pub fn release(
        &mut self,
        rake_cents: i64,
        net_pot_cents: i64,
        payout_digest: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.transition(EscrowStatus::Released)?;
        self.rake_cents = rake_cents;
        self.net_pot_cents = net_pot_cents;
        self.released_at = Some(now);
        self.payout_digest = Some(payout_digest);
        Ok(())
    }

    pub fn mark_refunded(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(EscrowStatus::Refunded)?;
        self.released_at = Some(now);
        Ok(())
    }

    fn transition(&mut self, target: EscrowStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(CashMatchError::conflict(format!(
                "escrow for {} is {}, cannot become {target}",
                self.match_id, self.status
            )));
        }
        self.status = target;
        Ok(())
    }
}
