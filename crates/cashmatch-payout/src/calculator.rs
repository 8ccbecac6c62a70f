//! Payout models.
//!
//! ```text
//! rake    = floor(total_pot × rake_percent / 100)
//! net_pot = total_pot − rake
//! ```
//!
//! | model             | prize shares by rank                                  |
//! |-------------------|-------------------------------------------------------|
//! | `winner_take_all` | rank 1 gets `net_pot`                                 |
//! | `top3`            | `[0.6, 0.3, 0.1]` (or configured splits) × `net_pot`  |
//! | `percentile`      | top ⌈n/2⌉ split `net_pot` evenly                      |
//! | anything else     | treated as `winner_take_all`                          |
//!
//! Every share is floored. The cents lost to flooring are never handed out.

use cashmatch_types::{
    CashMatchError, Match, MatchPlayer, PayoutConfig, PayoutModel, PayoutPlan, PlayerPayout,
    PlayerResult, Result,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::digest::compute_payout_digest;
use crate::standings::{rank_players, same_standing};

/// Default `top3` fractions.
const TOP3_SPLITS: [Decimal; 3] = [
    Decimal::from_parts(6, 0, 0, false, 1),
    Decimal::from_parts(3, 0, 0, false, 1),
    Decimal::from_parts(1, 0, 0, false, 1),
];

/// Platform cut in cents, floored.
pub fn compute_rake(total_pot_cents: i64, rake_percent: Decimal) -> Result<i64> {
    floor_cents(Decimal::from(total_pot_cents) * rake_percent / Decimal::ONE_HUNDRED)
}

/// Compute the full payout plan for a completed match.
///
/// `players` must all have scores. Output payouts are in placement order.
pub fn compute_payouts(
    game: &Match,
    players: &[MatchPlayer],
    total_pot_cents: i64,
) -> Result<PayoutPlan> {
    if players.is_empty() {
        return Err(CashMatchError::validation(format!("{} has no players", game.id)));
    }
    if total_pot_cents < 0 {
        return Err(CashMatchError::validation("pot cannot be negative"));
    }

    let rake_cents = compute_rake(total_pot_cents, game.rake_percent)?;
    let net_pot_cents = total_pot_cents - rake_cents;
    let ranked = rank_players(players)?;
    let shares = prize_shares(&game.payout_model, &game.payout_config, net_pot_cents, ranked.len())?;

    let mut payouts = Vec::with_capacity(ranked.len());
    for (index, player) in ranked.iter().enumerate() {
        let placement = u32::try_from(index + 1)
            .map_err(|_| CashMatchError::Internal("placement overflow".into()))?;
        payouts.push(PlayerPayout {
            user_id: player.user_id,
            placement,
            result: PlayerResult::Loss,
            payout_cents: shares.get(index).copied().unwrap_or(0),
        });
    }

    let results: Vec<PlayerResult> = ranked
        .iter()
        .zip(&payouts)
        .map(|(player, payout)| {
            if payout.payout_cents > 0 {
                PlayerResult::Win
            } else if ranked
                .iter()
                .zip(&payouts)
                .any(|(other, paid)| paid.payout_cents > 0 && same_standing(player, other))
            {
                PlayerResult::Tie
            } else {
                PlayerResult::Loss
            }
        })
        .collect();
    for (payout, result) in payouts.iter_mut().zip(results) {
        payout.result = result;
    }

    let paid: i64 = payouts.iter().map(|p| p.payout_cents).sum();
    if paid > net_pot_cents {
        return Err(CashMatchError::SettlementFailed {
            match_id: game.id,
            reason: format!("payouts {paid} exceed net pot {net_pot_cents}"),
        });
    }

    let digest = compute_payout_digest(
        game.id,
        total_pot_cents,
        rake_cents,
        net_pot_cents,
        &payouts,
    );
    tracing::debug!(
        match_id = %game.id,
        model = %game.payout_model,
        total_pot_cents,
        rake_cents,
        net_pot_cents,
        unallocated_cents = net_pot_cents - paid,
        "payouts computed"
    );

    Ok(PayoutPlan {
        match_id: game.id,
        total_pot_cents,
        rake_cents,
        net_pot_cents,
        payouts,
        digest,
    })
}

/// Prize per rank position, best first. Positions past the end get nothing.
fn prize_shares(
    model: &PayoutModel,
    config: &PayoutConfig,
    net_pot_cents: i64,
    players: usize,
) -> Result<Vec<i64>> {
    match model {
        PayoutModel::WinnerTakeAll => Ok(vec![net_pot_cents]),
        PayoutModel::Top3 => {
            config.validate()?;
            let splits = config.splits.as_deref().unwrap_or(&TOP3_SPLITS);
            splits
                .iter()
                .take(players)
                .map(|split| floor_cents(Decimal::from(net_pot_cents) * *split))
                .collect()
        }
        PayoutModel::Percentile => {
            let winners = players.div_ceil(2);
            let divisor = i64::try_from(winners)
                .map_err(|_| CashMatchError::Internal("player count overflow".into()))?;
            Ok(vec![net_pot_cents / divisor; winners])
        }
        PayoutModel::Other(name) => {
            tracing::warn!(model = %name, "unknown payout model, paying winner-take-all");
            Ok(vec![net_pot_cents])
        }
    }
}

fn floor_cents(value: Decimal) -> Result<i64> {
    value
        .floor()
        .to_i64()
        .ok_or_else(|| CashMatchError::Internal(format!("{value} does not fit in cents")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashmatch_types::{MatchParams, UserId};
    use chrono::Utc;

    fn game(model: PayoutModel, rake: i64) -> Match {
        Match::from_params(
            UserId::new(),
            MatchParams {
                entry_fee_cents: 500,
                min_players: 2,
                max_players: 8,
                payout_model: model,
                payout_config: PayoutConfig::default(),
                rake_percent: Decimal::new(rake, 0),
            },
            Utc::now(),
        )
    }

    fn seated(game: &Match, scores: &[(i64, Option<u64>)]) -> Vec<MatchPlayer> {
        scores
            .iter()
            .enumerate()
            .map(|(i, (score, time))| {
                let seat = u32::try_from(i + 1).unwrap();
                let mut p = MatchPlayer::new(game.id, UserId::new(), seat, Utc::now());
                p.score = Some(*score);
                p.time_taken_ms = *time;
                p
            })
            .collect()
    }

    fn pot(players: &[MatchPlayer]) -> i64 {
        500 * players.len() as i64
    }

    #[test]
    fn winner_take_all_four_players() {
        let g = game(PayoutModel::WinnerTakeAll, 5);
        let players = seated(&g, &[(900, None), (950, None), (880, None), (850, None)]);
        let plan = compute_payouts(&g, &players, pot(&players)).unwrap();

        assert_eq!(plan.total_pot_cents, 2_000);
        assert_eq!(plan.rake_cents, 100);
        assert_eq!(plan.net_pot_cents, 1_900);
        assert_eq!(plan.payouts[0].user_id, players[1].user_id);
        assert_eq!(plan.payouts[0].payout_cents, 1_900);
        assert_eq!(plan.payouts[0].result, PlayerResult::Win);
        assert!(plan.payouts[1..].iter().all(|p| p.payout_cents == 0));
        assert!(plan.payouts[1..].iter().all(|p| p.result == PlayerResult::Loss));
        assert_eq!(plan.payout_total(), plan.net_pot_cents);
    }

    #[test]
    fn faster_time_breaks_score_tie() {
        let g = game(PayoutModel::WinnerTakeAll, 0);
        let players = seated(&g, &[(100, Some(9_000)), (100, Some(4_000))]);
        let plan = compute_payouts(&g, &players, pot(&players)).unwrap();
        assert_eq!(plan.payouts[0].user_id, players[1].user_id);
        assert_eq!(plan.payouts[0].payout_cents, 1_000);
        assert_eq!(plan.payouts[1].result, PlayerResult::Loss);
    }

    #[test]
    fn exact_tie_goes_to_join_order_and_is_labelled() {
        let g = game(PayoutModel::WinnerTakeAll, 0);
        let players = seated(&g, &[(100, Some(4_000)), (100, Some(4_000)), (10, None)]);
        let plan = compute_payouts(&g, &players, pot(&players)).unwrap();
        assert_eq!(plan.payouts[0].user_id, players[0].user_id);
        assert_eq!(plan.payouts[1].result, PlayerResult::Tie);
        assert_eq!(plan.payouts[2].result, PlayerResult::Loss);
    }

    #[test]
    fn top3_floors_each_share() {
        let g = game(PayoutModel::Top3, 5);
        let players = seated(&g, &[(5, None), (4, None), (3, None), (2, None), (1, None)]);
        let plan = compute_payouts(&g, &players, pot(&players)).unwrap();

        assert_eq!(plan.net_pot_cents, 2_375);
        let cents: Vec<i64> = plan.payouts.iter().map(|p| p.payout_cents).collect();
        assert_eq!(cents, vec![1_425, 712, 237, 0, 0]);
        assert_eq!(plan.unallocated_cents(), 1);
    }

    #[test]
    fn top3_with_two_players_pays_two_splits() {
        let g = game(PayoutModel::Top3, 0);
        let players = seated(&g, &[(5, None), (4, None)]);
        let plan = compute_payouts(&g, &players, pot(&players)).unwrap();
        let cents: Vec<i64> = plan.payouts.iter().map(|p| p.payout_cents).collect();
        assert_eq!(cents, vec![600, 300]);
    }

    #[test]
    fn top3_uses_configured_splits() {
        let mut g = game(PayoutModel::Top3, 0);
        g.payout_config.splits = Some(vec![Decimal::new(5, 1), Decimal::new(5, 1)]);
        let players = seated(&g, &[(5, None), (4, None), (3, None)]);
        let plan = compute_payouts(&g, &players, pot(&players)).unwrap();
        let cents: Vec<i64> = plan.payouts.iter().map(|p| p.payout_cents).collect();
        assert_eq!(cents, vec![750, 750, 0]);
    }

    #[test]
    fn percentile_pays_top_half_evenly() {
        let g = game(PayoutModel::Percentile, 5);
        let players = seated(&g, &[(5, None), (4, None), (3, None), (2, None), (1, None)]);
        let plan = compute_payouts(&g, &players, pot(&players)).unwrap();
        let cents: Vec<i64> = plan.payouts.iter().map(|p| p.payout_cents).collect();
        assert_eq!(cents, vec![791, 791, 791, 0, 0]);
        assert!(plan.payout_total() <= plan.net_pot_cents);
    }

    #[test]
    fn unknown_model_falls_back_to_winner_take_all() {
        let g = game(PayoutModel::Other("bracket".into()), 5);
        let players = seated(&g, &[(1, None), (2, None)]);
        let plan = compute_payouts(&g, &players, pot(&players)).unwrap();
        assert_eq!(plan.payouts[0].user_id, players[1].user_id);
        assert_eq!(plan.payouts[0].payout_cents, plan.net_pot_cents);
    }

    #[test]
    fn rake_is_floored() {
        assert_eq!(compute_rake(1_999, Decimal::new(5, 0)).unwrap(), 99);
        assert_eq!(compute_rake(1_000, Decimal::new(75, 1)).unwrap(), 75);
        assert_eq!(compute_rake(1_000, Decimal::ZERO).unwrap(), 0);
    }

    #[test]
    fn digest_matches_payouts() {
        let g = game(PayoutModel::Top3, 5);
        let players = seated(&g, &[(5, None), (4, None), (3, None)]);
        let plan = compute_payouts(&g, &players, pot(&players)).unwrap();
        assert!(crate::verify_payout_digest(
            g.id,
            plan.total_pot_cents,
            plan.rake_cents,
            plan.net_pot_cents,
            &plan.payouts,
            &plan.digest,
        ));
        let again = compute_payouts(&g, &players, pot(&players)).unwrap();
        assert_eq!(plan.digest, again.digest);
    }
}
