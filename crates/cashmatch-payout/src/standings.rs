//! Final standings.
//!
//! Order: score descending, then `time_taken_ms` ascending (a missing time
//! sorts after every recorded time), then join order.

use std::cmp::Ordering;

use cashmatch_types::{CashMatchError, MatchPlayer, Result};

/// Rank players best-first. Every player must have a score.
pub fn rank_players(players: &[MatchPlayer]) -> Result<Vec<&MatchPlayer>> {
    if let Some(missing) = players.iter().find(|p| !p.has_score()) {
        return Err(CashMatchError::conflict(format!(
            "{} has no score for {}",
            missing.user_id, missing.match_id
        )));
    }
    let mut ranked: Vec<&MatchPlayer> = players.iter().collect();
    ranked.sort_by(|a, b| compare_standing(a, b));
    Ok(ranked)
}

fn compare_standing(a: &MatchPlayer, b: &MatchPlayer) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| compare_time(a.time_taken_ms, b.time_taken_ms))
        .then_with(|| a.seat.cmp(&b.seat))
}

fn compare_time(a: Option<u64>, b: Option<u64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Same score and same time: indistinguishable apart from join order.
#[must_use]
pub fn same_standing(a: &MatchPlayer, b: &MatchPlayer) -> bool {
    a.score == b.score && a.time_taken_ms == b.time_taken_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashmatch_types::{MatchId, UserId};
    use chrono::Utc;

    fn player(seat: u32, score: Option<i64>, time: Option<u64>) -> MatchPlayer {
        let mut p = MatchPlayer::new(MatchId::from_bytes([1; 16]), UserId::new(), seat, Utc::now());
        p.score = score;
        p.time_taken_ms = time;
        p
    }

    #[test]
    fn score_then_time_then_seat() {
        let players = vec![
            player(1, Some(80), Some(5_000)),
            player(2, Some(90), Some(9_000)),
            player(3, Some(90), Some(7_000)),
            player(4, Some(80), None),
            player(5, Some(80), Some(5_000)),
        ];
        let seats: Vec<u32> = rank_players(&players)
            .unwrap()
            .iter()
            .map(|p| p.seat)
            .collect();
        assert_eq!(seats, vec![3, 2, 1, 5, 4]);
    }

    #[test]
    fn missing_score_is_rejected() {
        let players = vec![player(1, Some(10), None), player(2, None, None)];
        assert!(matches!(
            rank_players(&players),
            Err(CashMatchError::StateConflict { .. })
        ));
    }
}
