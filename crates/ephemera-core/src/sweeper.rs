//! Periodic reconciliation between the store and armed timers

use ephemera_store::AuditEventType;
use ephemera_util::ResourceId;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{CoreResult, LifecycleScheduler, SweepAction};

/// What one pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Overdue records deleted
    pub expired: usize,

    /// Live records that had no timers
    pub rearmed: usize,

    /// Timer sets whose record had vanished
    pub orphans: usize,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Safety net that catches whatever the timers missed: deadlines passed
/// while the process was busy or a deletion that failed to persist.
pub struct ReconciliationSweeper {
    scheduler: Arc<LifecycleScheduler>,
    interval: Duration,
}

impl ReconciliationSweeper {
    pub fn new(scheduler: Arc<LifecycleScheduler>, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
        }
    }

    /// Run one reconciliation pass
    pub async fn sweep_once(&self) -> CoreResult<SweepReport> {
        let mut ids: BTreeSet<ResourceId> = self
            .scheduler
            .store()
            .list_resources()?
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.extend(self.scheduler.armed_ids());

        let mut report = SweepReport::default();
        for id in &ids {
            match self.scheduler.reconcile(id).await {
                Ok(SweepAction::Expired) => report.expired += 1,
                Ok(SweepAction::Rearmed) => report.rearmed += 1,
                Ok(SweepAction::OrphanCancelled) => report.orphans += 1,
                Ok(SweepAction::Untouched) => {}
                Err(e) => warn!(resource_id = %id, error = %e, "Reconciliation failed for resource"),
            }
        }

        if report.is_clean() {
            debug!(checked = ids.len(), "Sweep found nothing to do");
        } else {
            info!(
                checked = ids.len(),
                expired = report.expired,
                rearmed = report.rearmed,
                orphans = report.orphans,
                "Sweep reconciled resources"
            );
        }

        self.scheduler.audit(AuditEventType::SweepCompleted {
            expired: report.expired,
            rearmed: report.rearmed,
            orphans: report.orphans,
        });

        Ok(report)
    }

    /// Sweep every interval until `shutdown` turns true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = self.interval.as_secs(), "Reconciliation sweeper started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(error = %e, "Sweep failed, retrying next interval");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reconciliation sweeper stopped");
    }
}
