//! Payout fingerprint.
//!
//! A SHA-256 over the plan's inputs and every payout in placement order.
//! Stored on the escrow at release so a re-run of the calculator can be
//! checked against what was actually paid.

use cashmatch_types::{MatchId, PlayerPayout, PlayerResult};
use sha2::{Digest, Sha256};

/// Hex digest over the pot split and payouts.
#[must_use]
pub fn compute_payout_digest(
    match_id: MatchId,
    total_pot_cents: i64,
    rake_cents: i64,
    net_pot_cents: i64,
    payouts: &[PlayerPayout],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"cashmatch:payout:v1:");
    hasher.update(match_id.0.as_bytes());
    hasher.update(total_pot_cents.to_le_bytes());
    hasher.update(rake_cents.to_le_bytes());
    hasher.update(net_pot_cents.to_le_bytes());
    hasher.update((payouts.len() as u64).to_le_bytes());

    for payout in payouts {
        hasher.update(payout.user_id.0.as_bytes());
        hasher.update(payout.placement.to_le_bytes());
        hasher.update([result_tag(payout.result)]);
        hasher.update(payout.payout_cents.to_le_bytes());
    }

    hex::encode(hasher.finalize())
}

#[must_use]
pub fn verify_payout_digest(
    match_id: MatchId,
    total_pot_cents: i64,
    rake_cents: i64,
    net_pot_cents: i64,
    payouts: &[PlayerPayout],
    expected: &str,
) -> bool {
    compute_payout_digest(match_id, total_pot_cents, rake_cents, net_pot_cents, payouts) == expected
}

fn result_tag(result: PlayerResult) -> u8 {
    match result {
        PlayerResult::Win => 1,
        PlayerResult::Loss => 2,
        PlayerResult::Tie => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashmatch_types::UserId;

    fn payouts() -> Vec<PlayerPayout> {
        vec![
            PlayerPayout {
                user_id: UserId::from_bytes([2; 16]),
                placement: 1,
                result: PlayerResult::Win,
                payout_cents: 1_900,
            },
            PlayerPayout {
                user_id: UserId::from_bytes([3; 16]),
                placement: 2,
                result: PlayerResult::Loss,
                payout_cents: 0,
            },
        ]
    }

    #[test]
    fn digest_is_stable_and_hex() {
        let id = MatchId::from_bytes([1; 16]);
        let a = compute_payout_digest(id, 2_000, 100, 1_900, &payouts());
        let b = compute_payout_digest(id, 2_000, 100, 1_900, &payouts());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(verify_payout_digest(id, 2_000, 100, 1_900, &payouts(), &a));
    }

    #[test]
    fn digest_changes_with_any_payout() {
        let id = MatchId::from_bytes([1; 16]);
        let base = compute_payout_digest(id, 2_000, 100, 1_900, &payouts());
        let mut shifted = payouts();
        shifted[0].payout_cents -= 1;
        assert_ne!(base, compute_payout_digest(id, 2_000, 100, 1_900, &shifted));
        let other_match = MatchId::from_bytes([9; 16]);
        assert_ne!(base, compute_payout_digest(other_match, 2_000, 100, 1_900, &payouts()));
    }
}
