//! # cashmatch-payout
//!
//! **Pure deterministic payout calculator for CashMatch.**
//!
//! This crate is the compute plane of settlement: it takes a completed
//! match, its seated players with final scores, and the pot, and produces a
//! [`PayoutPlan`](cashmatch_types::PayoutPlan). It has:
//!
//! - **Zero side effects**: no store access, no wallet mutation, no clock
//! - **Deterministic output**: same standings -> same plan and same digest
//! - **Floor rounding**: payouts never exceed the net pot; leftover cents
//!   stay with the platform

pub mod calculator;
pub mod digest;
pub mod standings;

pub use calculator::{compute_payouts, compute_rake};
pub use digest::{compute_payout_digest, verify_payout_digest};
pub use standings::rank_players;
