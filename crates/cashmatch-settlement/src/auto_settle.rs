//! Background settlement sweep.
//!
//! Catches every completed match that no foreground path managed to
//! settle: a crashed handler, a disabled kill switch, or a failed attempt
//! whose backoff has elapsed. Each run first reaps expired settlement locks
//! so matches orphaned by a dead instance become eligible again.
//!
//! The job keeps no state between runs; the store is the only record.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use cashmatch_ledger::{KillSwitchSource, LedgerStore};
use cashmatch_types::{Clock, KillSwitch, Result, SettlementTrigger};

use crate::orchestrator::{SettlementOrchestrator, SettlementOutcome};

/// Counts for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub settled: usize,
    pub already_settled: usize,
    pub locked: usize,
    pub failed: usize,
    pub escalated: usize,
    pub reaped_locks: usize,
}

pub struct AutoSettlementJob {
    store: Arc<dyn LedgerStore>,
    orchestrator: Arc<SettlementOrchestrator>,
    kill_switches: Arc<dyn KillSwitchSource>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl AutoSettlementJob {
    #[must_use]
    pub fn new(
        store: Arc<dyn LedgerStore>,
        orchestrator: Arc<SettlementOrchestrator>,
        kill_switches: Arc<dyn KillSwitchSource>,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            orchestrator,
            kill_switches,
            clock,
            batch_size,
        }
    }

    /// One sweep. With settlement disabled, does nothing and reports zeros.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        if !self
            .kill_switches
            .flags()
            .await?
            .is_enabled(KillSwitch::Settlement)
        {
            tracing::debug!("settlement disabled, sweep skipped");
            return Ok(report);
        }

        report.reaped_locks = self.orchestrator.locks().reap_expired().await?.len();

        let due = self
            .store
            .unsettled_matches(self.clock.now(), self.batch_size)
            .await?;
        for match_id in due {
            report.processed += 1;
            match self
                .orchestrator
                .settle(match_id, SettlementTrigger::AutoJob)
                .await
            {
                Ok(SettlementOutcome::Settled(_)) => report.settled += 1,
                Ok(SettlementOutcome::AlreadySettled(_)) => report.already_settled += 1,
                Ok(SettlementOutcome::Locked { .. }) => report.locked += 1,
                Ok(SettlementOutcome::Failed { escalated, .. }) => {
                    if escalated {
                        report.escalated += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(match_id = %match_id, error = %err, "auto-settlement skipped match");
                    report.failed += 1;
                }
            }
        }

        if report.processed > 0 || report.reaped_locks > 0 {
            tracing::info!(
                processed = report.processed,
                settled = report.settled,
                already_settled = report.already_settled,
                locked = report.locked,
                failed = report.failed,
                escalated = report.escalated,
                reaped_locks = report.reaped_locks,
                "auto-settlement sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` fires or its sender is dropped.
    pub async fn run_forever(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?interval, "auto-settlement loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        tracing::error!(error = %err, "auto-settlement sweep failed");
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("auto-settlement loop stopping");
                    break;
                }
            }
        }
    }
}

/// Spawn [`AutoSettlementJob::run_forever`] on the current runtime.
pub fn spawn_auto_settlement_loop(
    job: Arc<AutoSettlementJob>,
    interval: Duration,
    shutdown: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(job.run_forever(interval, shutdown))
}
