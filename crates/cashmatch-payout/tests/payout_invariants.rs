//! Randomized invariants over every payout model.

use cashmatch_payout::compute_payouts;
use cashmatch_types::{
    Match, MatchParams, MatchPlayer, PayoutConfig, PayoutModel, PlayerResult, UserId,
};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;

fn models() -> Vec<PayoutModel> {
    vec![
        PayoutModel::WinnerTakeAll,
        PayoutModel::Top3,
        PayoutModel::Percentile,
        PayoutModel::Other("ladder".into()),
    ]
}

fn random_match(rng: &mut impl Rng, model: PayoutModel) -> (Match, Vec<MatchPlayer>, i64) {
    let players = rng.gen_range(2..=12u32);
    let fee = rng.gen_range(1..=100_000i64);
    // Rake in tenths of a percent, 0.0 ..= 30.0.
    let rake = Decimal::new(rng.gen_range(0..=300), 1);
    let game = Match::from_params(
        UserId::new(),
        MatchParams {
            entry_fee_cents: fee,
            min_players: 2,
            max_players: players,
            payout_model: model,
            payout_config: PayoutConfig::default(),
            rake_percent: rake,
        },
        Utc::now(),
    );
    let seats = (1..=players)
        .map(|seat| {
            let mut p = MatchPlayer::new(game.id, UserId::new(), seat, Utc::now());
            // Narrow score range so ties happen.
            p.score = Some(rng.gen_range(0..5));
            p.time_taken_ms = if rng.gen_bool(0.8) {
                Some(rng.gen_range(1_000..1_005))
            } else {
                None
            };
            p
        })
        .collect();
    (game, seats, fee * i64::from(players))
}

#[test]
fn payouts_never_exceed_net_pot() {
    let mut rng = rand::thread_rng();
    for _ in 0..500 {
        for model in models() {
            let exact = matches!(model, PayoutModel::WinnerTakeAll | PayoutModel::Other(_));
            let (game, players, pot) = random_match(&mut rng, model);
            let plan = compute_payouts(&game, &players, pot).unwrap();

            assert_eq!(plan.rake_cents + plan.net_pot_cents, pot);
            assert!(plan.rake_cents >= 0);
            assert!(plan.payouts.iter().all(|p| p.payout_cents >= 0));
            assert!(plan.payout_total() <= plan.net_pot_cents);
            if exact {
                assert_eq!(plan.payout_total(), plan.net_pot_cents);
            }
        }
    }
}

#[test]
fn every_player_is_placed_once() {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let (game, players, pot) = random_match(&mut rng, PayoutModel::Top3);
        let plan = compute_payouts(&game, &players, pot).unwrap();

        assert_eq!(plan.payouts.len(), players.len());
        let placements: Vec<u32> = plan.payouts.iter().map(|p| p.placement).collect();
        let expected: Vec<u32> = (1..=u32::try_from(players.len()).unwrap()).collect();
        assert_eq!(placements, expected);
        for player in &players {
            assert!(plan.payout_for(player.user_id).is_some());
        }
    }
}

#[test]
fn winners_are_exactly_the_paid_players() {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let (game, players, pot) = random_match(&mut rng, PayoutModel::Percentile);
        let plan = compute_payouts(&game, &players, pot).unwrap();
        for payout in &plan.payouts {
            assert_eq!(payout.result == PlayerResult::Win, payout.payout_cents > 0);
        }
    }
}

#[test]
fn higher_placement_never_earns_less() {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        for model in models() {
            let (game, players, pot) = random_match(&mut rng, model);
            let plan = compute_payouts(&game, &players, pot).unwrap();
            for pair in plan.payouts.windows(2) {
                assert!(pair[0].payout_cents >= pair[1].payout_cents);
            }
        }
    }
}
