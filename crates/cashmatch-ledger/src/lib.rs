//! # cashmatch-ledger
//!
//! **Wallet plane**: the append-only ledger, per-match escrow collection,
//! kill switches, and the store contract every other component builds on.
//!
//! ## Architecture
//!
//! Handlers are stateless; the persistent store is the only coordination
//! substrate. Each method on the store traits in [`store`] is one atomic
//! unit: it validates and mutates in a single step so two concurrent
//! callers can never both pass a balance check against the same cents.
//!
//! 1. **[`store`]**: the async repository contract (`LedgerStore` and its parts)
//! 2. **[`InMemoryStore`]**: a single-mutex implementation of that contract
//! 3. **[`EntryCollector`]**: create/join/start/cancel; debits wallets into escrow
//! 4. **[`Wallet`]**: deposit intents and balance/ledger queries
//! 5. **[`KillSwitchSource`]**: injected platform flags, fail-closed
//!
//! ## Join Flow
//!
//! ```text
//! API → EntryCollector.join() → LedgerStore.join_match()
//!     [ check fee ≤ available → debit → match_entry entry → seat → escrow += fee ]
//! ```

pub mod entry_collector;
pub mod kill_switch;
pub mod memory;
pub mod store;
pub mod wallet;

pub use entry_collector::EntryCollector;
pub use kill_switch::{InMemoryKillSwitches, KillSwitchSource, require_enabled};
pub use memory::InMemoryStore;
pub use store::*;
pub use wallet::Wallet;
