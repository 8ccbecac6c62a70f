//! Ledger reconciliation.
//!
//! Re-derives every cached figure from the append-only ledger:
//!
//! ```text
//! ∀ wallet:  Σ entries.amount == available + locked
//! ∀ escrow:  Σ match_entry == total_pot
//!            released → rake + net == total_pot, Σ match_payout ≤ net
//!            refunded → Σ match_refund == total_pot
//!            pending  → no payouts, no refunds
//! Σ wallet.locked == Σ withdrawals still holding funds
//! ```
//!
//! Any disagreement means money was created or destroyed. Each one raises a
//! critical alert; nothing is repaired automatically.

use std::sync::Arc;

use cashmatch_ledger::{LedgerStore, raise_alert};
use cashmatch_types::{
    Alert, AlertSeverity, AlertType, CashMatchError, Clock, Escrow, EscrowStatus, LedgerEntry,
    LedgerEntryType, Result, WithdrawalStatus,
};

/// One invariant that did not hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// `user:…`, `match:…`, or `platform`.
    pub subject: String,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub wallets_checked: usize,
    pub escrows_checked: usize,
    pub mismatches: Vec<Mismatch>,
}

impl ReconciliationReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }

    fn flag(&mut self, subject: impl ToString, detail: String) {
        self.mismatches.push(Mismatch {
            subject: subject.to_string(),
            detail,
        });
    }
}

pub struct LedgerReconciler {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl LedgerReconciler {
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Check every invariant and alert on each mismatch.
    pub async fn run(&self) -> Result<ReconciliationReport> {
        let mut report = ReconciliationReport::default();
        self.check_wallets(&mut report).await?;
        self.check_escrows(&mut report).await?;

        if report.is_clean() {
            tracing::info!(
                wallets = report.wallets_checked,
                escrows = report.escrows_checked,
                "ledger reconciled"
            );
        } else {
            let now = self.clock.now();
            for mismatch in &report.mismatches {
                tracing::error!(
                    subject = %mismatch.subject,
                    detail = %mismatch.detail,
                    "ledger mismatch"
                );
                raise_alert(
                    self.store.as_ref(),
                    Alert::new(
                        AlertType::LedgerMismatch,
                        AlertSeverity::Critical,
                        format!("{}: {}", mismatch.subject, mismatch.detail),
                        now,
                    ),
                )
                .await;
            }
        }
        Ok(report)
    }

    /// Like [`run`](Self::run), but any mismatch is an error.
    pub async fn verify(&self) -> Result<ReconciliationReport> {
        let report = self.run().await?;
        if let Some(first) = report.mismatches.first() {
            return Err(CashMatchError::LedgerInvariantViolation {
                reason: format!(
                    "{} mismatch(es), first {}: {}",
                    report.mismatches.len(),
                    first.subject,
                    first.detail
                ),
            });
        }
        Ok(report)
    }

    async fn check_wallets(&self, report: &mut ReconciliationReport) -> Result<()> {
        let mut total_locked = 0i64;
        for user_id in self.store.wallet_users().await? {
            let balance = self.store.balance(user_id).await?;
            let entries = self.store.ledger_entries(user_id).await?;
            let summed: i64 = entries.iter().map(|e| e.amount_cents).sum();
            report.wallets_checked += 1;
            total_locked += balance.locked_cents;

            if summed != balance.total_cents() {
                report.flag(
                    user_id,
                    format!(
                        "ledger sums to {summed}, wallet holds {} (available {}, locked {})",
                        balance.total_cents(),
                        balance.available_cents,
                        balance.locked_cents
                    ),
                );
            }
            if let Some(last) = entries.last() {
                if last.balance_after_cents != balance.total_cents() {
                    report.flag(
                        user_id,
                        format!(
                            "last entry {} records balance {}, wallet holds {}",
                            last.id,
                            last.balance_after_cents,
                            balance.total_cents()
                        ),
                    );
                }
            }
            if balance.available_cents < 0 || balance.locked_cents < 0 {
                report.flag(user_id, "negative wallet component".to_string());
            }
        }

        let mut held = 0i64;
        for status in [
            WithdrawalStatus::Pending,
            WithdrawalStatus::Approved,
            WithdrawalStatus::Processing,
        ] {
            held += self
                .store
                .withdrawals_with_status(status)
                .await?
                .iter()
                .map(|w| w.amount_cents)
                .sum::<i64>();
        }
        if held != total_locked {
            report.flag(
                "platform",
                format!("wallets lock {total_locked}, open withdrawals hold {held}"),
            );
        }
        Ok(())
    }

    async fn check_escrows(&self, report: &mut ReconciliationReport) -> Result<()> {
        for escrow in self.store.escrows().await? {
            let entries = self.store.match_ledger_entries(escrow.match_id).await?;
            report.escrows_checked += 1;
            for detail in escrow_mismatches(&escrow, &entries) {
                report.flag(escrow.match_id, detail);
            }
        }
        Ok(())
    }
}

fn escrow_mismatches(escrow: &Escrow, entries: &[LedgerEntry]) -> Vec<String> {
    let sum_of = |kind: LedgerEntryType| -> i64 {
        entries
            .iter()
            .filter(|e| e.entry_type == kind)
            .map(|e| e.amount_cents.abs())
            .sum()
    };
    let collected = sum_of(LedgerEntryType::MatchEntry);
    let paid = sum_of(LedgerEntryType::MatchPayout);
    let refunded = sum_of(LedgerEntryType::MatchRefund);

    let mut found = Vec::new();
    if collected != escrow.total_pot_cents {
        found.push(format!(
            "collected {collected} in entry fees, escrow pot is {}",
            escrow.total_pot_cents
        ));
    }
    match escrow.status {
        EscrowStatus::Pending => {
            if paid != 0 || refunded != 0 {
                found.push(format!(
                    "pending escrow already paid {paid} and refunded {refunded}"
                ));
            }
        }
        EscrowStatus::Released => {
            if escrow.rake_cents + escrow.net_pot_cents != escrow.total_pot_cents {
                found.push(format!(
                    "rake {} + net {} != pot {}",
                    escrow.rake_cents, escrow.net_pot_cents, escrow.total_pot_cents
                ));
            }
            if paid > escrow.net_pot_cents {
                found.push(format!(
                    "paid {paid} exceeds net pot {}",
                    escrow.net_pot_cents
                ));
            }
            if refunded != 0 {
                found.push(format!("released escrow also refunded {refunded}"));
            }
        }
        EscrowStatus::Refunded => {
            if refunded != escrow.total_pot_cents || paid != 0 {
                found.push(format!(
                    "refunded {refunded} and paid {paid} from a pot of {}",
                    escrow.total_pot_cents
                ));
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashmatch_ledger::{InMemoryStore, WithdrawalLimits, WithdrawalStore};
    use cashmatch_types::{ManualClock, MatchId, UserId, WithdrawalRequest};
    use chrono::Utc;

    fn reconciler(store: &Arc<InMemoryStore>) -> LedgerReconciler {
        LedgerReconciler::new(store.clone(), Arc::new(ManualClock::new(Utc::now())))
    }

    #[tokio::test]
    async fn funded_wallets_with_open_withdrawal_reconcile() {
        let store = Arc::new(InMemoryStore::new());
        let user = UserId::new();
        store.fund(user, 5_000, Utc::now()).unwrap();
        store
            .create_withdrawal(
                WithdrawalRequest::new(user, 2_000, "acct".into(), "k".into(), vec![], Utc::now()),
                WithdrawalLimits::unbounded(),
            )
            .await
            .unwrap();

        let report = reconciler(&store).verify().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.wallets_checked, 1);
    }

    #[tokio::test]
    async fn tampered_balance_is_flagged_and_alerted() {
        let store = Arc::new(InMemoryStore::new());
        let user = UserId::new();
        store.fund(user, 5_000, Utc::now()).unwrap();
        store.force_balance(user, 6_000, 0).unwrap();

        let report = reconciler(&store).run().await.unwrap();
        assert!(!report.is_clean());
        assert!(report.mismatches.iter().any(|m| m.subject == user.to_string()));
        assert!(store
            .alerts()
            .unwrap()
            .iter()
            .any(|a| a.alert_type == AlertType::LedgerMismatch && a.severity == AlertSeverity::Critical));

        let err = reconciler(&store).verify().await.unwrap_err();
        assert!(matches!(err, CashMatchError::LedgerInvariantViolation { .. }));
    }

    #[test]
    fn escrow_rules() {
        let match_id = MatchId::new();
        let mut escrow = Escrow::new(match_id);
        escrow.add_entry(1_000).unwrap();
        let entry = |kind, amount| {
            LedgerEntry::new(UserId::new(), kind, amount, 0, Some(match_id), None, Utc::now())
        };
        let fee = entry(LedgerEntryType::MatchEntry, 1_000);
        assert!(escrow_mismatches(&escrow, std::slice::from_ref(&fee)).is_empty());

        let early_payout = entry(LedgerEntryType::MatchPayout, 500);
        assert_eq!(escrow_mismatches(&escrow, &[fee.clone(), early_payout]).len(), 1);

        escrow.release(50, 950, "digest".into(), Utc::now()).unwrap();
        let payout = entry(LedgerEntryType::MatchPayout, 950);
        assert!(escrow_mismatches(&escrow, &[fee.clone(), payout]).is_empty());
        let overpaid = entry(LedgerEntryType::MatchPayout, 960);
        assert_eq!(escrow_mismatches(&escrow, &[fee, overpaid]).len(), 1);
    }
}
