//! Globally unique identifiers used throughout CashMatch.
//!
//! All entity IDs use UUIDv7 for time-ordered lexicographic sorting. The
//! `Display` form carries a short entity prefix (`match:`, `wd:` …) so log
//! lines stay unambiguous when several IDs appear in one event.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Parse from the canonical hyphenated form (no prefix).
            #[must_use]
            pub fn parse(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a user / wallet owner.
    UserId,
    "user"
);

uuid_id!(
    /// Unique identifier for a cash match.
    MatchId,
    "match"
);

uuid_id!(
    /// Unique identifier for one player's seat in a match.
    MatchPlayerId,
    "mp"
);

uuid_id!(
    /// Unique identifier for an immutable ledger entry.
    LedgerEntryId,
    "le"
);

uuid_id!(
    /// Unique identifier for a withdrawal request.
    WithdrawalId,
    "wd"
);

uuid_id!(
    /// Unique identifier for a deposit intent created with the payment provider.
    DepositIntentId,
    "dep"
);

uuid_id!(AlertId, "alert");

uuid_id!(AuditEventId, "audit");

impl UserId {
    /// The reserved system actor used for background jobs and webhooks.
    pub const SYSTEM: Self = Self(Uuid::nil());

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.0.is_nil()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = MatchId::new();
        let b = MatchId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn display_carries_prefix() {
        let id = WithdrawalId::new();
        assert!(id.to_string().starts_with("wd:"));
        assert!(UserId::new().to_string().starts_with("user:"));
    }

    #[test]
    fn parse_accepts_bare_uuid() {
        let id = DepositIntentId::new();
        let parsed = DepositIntentId::parse(&id.0.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(DepositIntentId::parse("not-a-uuid").is_none());
    }

    #[test]
    fn system_user_is_nil() {
        assert!(UserId::SYSTEM.is_system());
        assert!(!UserId::new().is_system());
    }

    #[test]
    fn serde_is_transparent() {
        let id = MatchId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.0));
        let back: MatchId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
