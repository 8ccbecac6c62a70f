//! # cashmatch-api
//!
//! Service facade over the CashMatch engine and the process-level ambient
//! stack: configuration loading and tracing setup.
//!
//! ```text
//! transport ─▶ CashMatchService ─┬─▶ Wallet / EntryCollector      (cashmatch-ledger)
//!                                ├─▶ SettlementOrchestrator        (cashmatch-settlement)
//!                                ├─▶ WithdrawalGate → Processor    (cashmatch-settlement)
//!                                └─▶ WebhookProcessor              (cashmatch-settlement)
//! ```
//!
//! The host process owns the runtime. It builds the service from
//! [`load_config`] and its own store and provider adapters, installs tracing
//! with [`init_tracing`], and calls [`CashMatchService::start_background`]
//! to run the auto-settlement sweep and approved-withdrawal dispatch.

pub mod config;
pub mod service;
pub mod telemetry;

pub use config::load_config;
pub use service::{BackgroundTasks, CashMatchService, ServiceDeps, SettlementVerification};
pub use telemetry::init_tracing;
