//! # cashmatch-types
//!
//! Shared types, errors, and configuration for the **CashMatch** settlement
//! and wallet-ledger engine.
//!
//! This crate is the leaf dependency of the workspace: every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`UserId`], [`MatchId`], [`MatchPlayerId`], [`LedgerEntryId`],
//!   [`WithdrawalId`], [`DepositIntentId`], [`AlertId`], [`AuditEventId`]
//! - **Wallet model**: [`WalletBalance`], [`LedgerEntry`], [`LedgerEntryType`]
//! - **Match model**: [`Match`], [`MatchPlayer`], [`MatchStatus`], [`PayoutModel`]
//! - **Escrow model**: [`Escrow`], [`EscrowStatus`]
//! - **Settlement model**: [`SettlementAttempt`], [`SettlementLock`], [`PlayerPayout`]
//! - **Withdrawal model**: [`WithdrawalRequest`], [`WithdrawalStatus`]
//! - **Deposits**: [`DepositIntent`], [`DepositStatus`]
//! - **Idempotency**: [`IdempotencyRecord`], [`StoredResponse`]
//! - **Provider events**: [`ProviderEvent`], [`ProviderPayout`]
//! - **Operator surface**: [`Alert`], [`AuditEvent`], [`KillSwitchFlags`]
//! - **Compliance facts**: [`ComplianceProfile`], [`KycStatus`]
//! - **Configuration**: [`EngineConfig`] and its sections
//! - **Errors**: [`CashMatchError`] with `CM_ERR_` prefix codes
//! - **Time**: the [`Clock`] abstraction
//! - **Constants**: system-wide limits and defaults

pub mod alert;
pub mod audit;
pub mod balance;
pub mod clock;
pub mod compliance;
pub mod config;
pub mod constants;
pub mod deposit;
pub mod error;
pub mod escrow;
pub mod idempotency;
pub mod ids;
pub mod kill_switch;
pub mod ledger;
pub mod matches;
pub mod provider;
pub mod settlement;
pub mod withdrawal;

// Re-export all primary types at crate root for ergonomic imports:
//   use cashmatch_types::{Match, Escrow, WalletBalance, ...};

pub use alert::*;
pub use audit::*;
pub use balance::*;
pub use clock::*;
pub use compliance::*;
pub use config::*;
pub use deposit::*;
pub use error::*;
pub use escrow::*;
pub use idempotency::*;
pub use ids::*;
pub use kill_switch::*;
pub use ledger::*;
pub use matches::*;
pub use provider::*;
pub use settlement::*;
pub use withdrawal::*;

// Constants are accessed via `cashmatch_types::constants::FOO`
// (not re-exported to avoid name collisions).
