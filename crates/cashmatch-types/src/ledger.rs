//! Append-only ledger entries.
//!
//! Each balance-changing operation appends exactly one [`LedgerEntry`] per
//! affected user. Locking funds for a withdrawal moves cents between
//! `available` and `locked` without changing the total, so it appends
//! nothing. For every user:
//!
//! ```text
//! Σ entry.amount_cents == available_cents + locked_cents
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerEntryId, MatchId, UserId};

/// Why the balance moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    /// Provider-confirmed deposit (credit).
    Deposit,
    /// Completed payout to an external destination (debit of locked funds).
    Withdrawal,
    /// Funds returned after a completed withdrawal bounced (credit).
    WithdrawalRefund,
    /// Entry fee collected into escrow (debit).
    MatchEntry,
    /// Prize credited from a released escrow (credit).
    MatchPayout,
    /// Entry fee returned from a cancelled match (credit).
    MatchRefund,
}

impl LedgerEntryType {
    /// Whether entries of this type carry a positive amount.
    #[must_use]
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::Deposit | Self::WithdrawalRefund | Self::MatchPayout | Self::MatchRefund
        )
    }
}

impl std::fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deposit => write!(f, "deposit"),
            Self::Withdrawal => write!(f, "withdrawal"),
            Self::WithdrawalRefund => write!(f, "withdrawal_refund"),
            Self::MatchEntry => write!(f, "match_entry"),
            Self::MatchPayout => write!(f, "match_payout"),
            Self::MatchRefund => write!(f, "match_refund"),
        }
    }
}

/// One immutable row of the wallet ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub user_id: UserId,
    /// Signed: credits positive, debits negative.
    pub amount_cents: i64,
    /// The user's total (available + locked) after this entry.
    pub balance_after_cents: i64,
    pub entry_type: LedgerEntryType,
    pub match_id: Option<MatchId>,
    /// Deposit intent or withdrawal id this entry settles, if any.
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build an entry, signing `magnitude_cents` by the entry type.
    #[must_use]
    pub fn new(
        user_id: UserId,
        entry_type: LedgerEntryType,
        magnitude_cents: i64,
        balance_after_cents: i64,
        match_id: Option<MatchId>,
        reference: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let amount_cents = if entry_type.is_credit() {
            magnitude_cents.abs()
        } else {
            -magnitude_cents.abs()
        };
        Self {
            id: LedgerEntryId::new(),
            user_id,
            amount_cents,
            balance_after_cents,
            entry_type,
            match_id,
            reference,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_sign_follows_type() {
        let user = UserId::new();
        let now = Utc::now();
        let debit = LedgerEntry::new(user, LedgerEntryType::MatchEntry, 500, 500, None, None, now);
        assert_eq!(debit.amount_cents, -500);
        let credit = LedgerEntry::new(user, LedgerEntryType::MatchPayout, -1900, 2400, None, None, now);
        assert_eq!(credit.amount_cents, 1900);
    }

    #[test]
    fn entry_type_display_is_snake_case() {
        assert_eq!(LedgerEntryType::WithdrawalRefund.to_string(), "withdrawal_refund");
        let json = serde_json::to_string(&LedgerEntryType::MatchPayout).unwrap();
        assert_eq!(json, "\"match_payout\"");
    }
}
