//! # cashmatch-settlement
//!
//! **Finality plane**: everything that moves money out of escrow or out of
//! the platform.
//!
//! ## Architecture
//!
//! Every settlement trigger funnels into one [`SettlementOrchestrator`]:
//! 1. Checks the settlement kill switch
//! 2. Short-circuits if the escrow is already released (no double payout)
//! 3. Takes the per-match TTL lock ([`LockManager`])
//! 4. Runs the pure payout calculator and applies it in one store call
//! 5. Records the attempt; retries back off linearly ([`RetryPolicy`]) and
//!    escalate to an operator alert after the last one
//!
//! Outbound money goes through the [`WithdrawalGate`] (ordered
//! compliance/limit checks, then funds locked) and the
//! [`WithdrawalProcessor`] (approval and provider dispatch). Provider
//! outcomes come back through the [`WebhookProcessor`]. The
//! [`LedgerReconciler`] re-derives every balance from the ledger.
//!
//! ```text
//! score submission ─┐
//! manual settle ────┼──▶ SettlementOrchestrator ──▶ LedgerStore.apply_settlement
//! AutoSettlementJob ┘
//! ```

pub mod auto_settle;
pub mod idempotency;
pub mod lock;
pub mod orchestrator;
pub mod reconciliation;
pub mod retry;
pub mod webhook;
pub mod withdrawal_gate;
pub mod withdrawal_processor;

pub use auto_settle::{AutoSettlementJob, SweepReport, spawn_auto_settlement_loop};
pub use idempotency::{IdempotencyGuard, IdempotentResponse};
pub use lock::{LockManager, LockOutcome};
pub use orchestrator::{ScoreSubmission, SettlementOrchestrator, SettlementOutcome};
pub use reconciliation::{LedgerReconciler, ReconciliationReport};
pub use retry::RetryPolicy;
pub use webhook::{WebhookAck, WebhookProcessor, sign_payload, verify_signature};
pub use withdrawal_gate::{ComplianceProvider, InMemoryComplianceProvider, WithdrawalGate};
pub use withdrawal_processor::{
    DispatchOutcome, InMemoryPayoutProvider, PayoutBehavior, PayoutProvider, WithdrawalProcessor,
    spawn_withdrawal_dispatch_loop,
};
