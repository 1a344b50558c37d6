//! Deletion and warning timers

use chrono::{DateTime, Local};
use ephemera_api::{DeletionReason, NoticeKind};
use ephemera_config::LifecyclePolicy;
use ephemera_host_api::{HostError, HostResult, ResourceHost};
use ephemera_store::{AuditEvent, AuditEventType, Store};
use ephemera_util::{remaining_until, Clock, ResourceId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{CoreError, CoreEvent, CoreResult, KeyedLocks, PlannedWarning, TimerPlan};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Timers armed for one resource. Replaced as a whole on every schedule.
struct TimerSet {
    generation: u64,
    deletion: Option<JoinHandle<()>>,
    warnings: Vec<JoinHandle<()>>,
}

impl TimerSet {
    fn abort(self) {
        if let Some(handle) = self.deletion {
            handle.abort();
        }
        for handle in self.warnings {
            handle.abort();
        }
    }
}

#[derive(Default)]
struct TimerTable {
    next_generation: u64,
    sets: HashMap<ResourceId, TimerSet>,
}

/// Outcome of the deletion path for one id
#[derive(Debug)]
pub enum Expiry {
    /// Record removed and the resource destroyed
    Deleted,

    /// Record removed, but the destroy capability failed
    DestroyFailed(HostError),

    /// No live record; nothing was done
    Absent,
}

/// Result of rebuilding timers from the store at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub rearmed: usize,
    pub expired: usize,
}

/// What a reconciliation pass did for one id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SweepAction {
    Expired,
    Rearmed,
    OrphanCancelled,
    Untouched,
}

/// Owns the in-memory timers of every live resource.
///
/// The store is the source of truth: a timer only ever acts after
/// re-reading the record under the per-id lock, and the deletion path
/// treats a missing record as already done.
pub struct LifecycleScheduler {
    store: Arc<dyn Store>,
    host: Arc<dyn ResourceHost>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
    locks: Arc<KeyedLocks>,
    timers: Mutex<TimerTable>,
    events: broadcast::Sender<CoreEvent>,
    this: Weak<LifecycleScheduler>,
}

impl LifecycleScheduler {
    pub fn new(
        policy: LifecyclePolicy,
        store: Arc<dyn Store>,
        host: Arc<dyn ResourceHost>,
        clock: Arc<dyn Clock>,
        locks: Arc<KeyedLocks>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            warnings = policy.warnings.len(),
            capability_timeout_secs = policy.capability_timeout.as_secs(),
            "Lifecycle scheduler initialized"
        );

        Arc::new_cyclic(|this| Self {
            store,
            host,
            clock,
            policy,
            locks,
            timers: Mutex::new(TimerTable::default()),
            events,
            this: this.clone(),
        })
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Arm timers for `id`, replacing any armed set. A deadline that has
    /// already passed runs the deletion path right away.
    pub async fn schedule(&self, id: &ResourceId, delete_at: DateTime<Local>) -> CoreResult<()> {
        let _guard = self.locks.lock(id).await;
        self.schedule_locked(id, delete_at).await
    }

    /// Cancel outstanding timers without destroying anything
    pub async fn cancel(&self, id: &ResourceId) -> bool {
        let _guard = self.locks.lock(id).await;
        self.cancel_timers(id)
    }

    /// Push the deadline of `id` back by `additional` and re-arm its timers
    pub async fn extend(
        &self,
        id: &ResourceId,
        additional: Duration,
    ) -> CoreResult<DateTime<Local>> {
        let _guard = self.locks.lock(id).await;

        let mut resource = self
            .store
            .get_resource(id)?
            .ok_or_else(|| CoreError::NotFound(id.clone()))?;

        let now = self.clock.now();
        if resource.is_expired(now) {
            self.expire_locked(id, DeletionReason::Expired).await?;
            return Err(CoreError::NotFound(id.clone()));
        }

        let new_delete_at = chrono::Duration::from_std(additional)
            .ok()
            .and_then(|d| resource.delete_at.checked_add_signed(d))
            .ok_or(CoreError::InvalidDuration {
                requested: additional,
                min: self.policy.min_duration,
                max: self.policy.max_duration,
            })?;

        resource.delete_at = new_delete_at;
        self.store.put_resource(&resource)?;
        self.arm(id, TimerPlan::new(new_delete_at, now, &self.policy.warnings));

        info!(
            resource_id = %id,
            extended_by_secs = additional.as_secs(),
            delete_at = %new_delete_at,
            "Resource extended"
        );

        self.audit(AuditEventType::ResourceExtended {
            resource_id: id.clone(),
            extended_by_secs: additional.as_secs(),
            new_delete_at,
        });
        self.publish(CoreEvent::ResourceExtended {
            id: id.clone(),
            delete_at: new_delete_at,
        });

        Ok(new_delete_at)
    }

    /// Run the deletion path for `id`
    pub async fn expire(&self, id: &ResourceId, reason: DeletionReason) -> CoreResult<Expiry> {
        let _guard = self.locks.lock(id).await;
        self.expire_locked(id, reason).await
    }

    /// Rebuild timers from the store; overdue records are deleted at once
    pub async fn recover(&self) -> CoreResult<RecoveryReport> {
        let ids: Vec<ResourceId> = self
            .store
            .list_resources()?
            .into_iter()
            .map(|r| r.id)
            .collect();

        let mut report = RecoveryReport::default();

        for id in ids {
            let _guard = self.locks.lock(&id).await;

            // Re-read under the lock; the listing may already be stale
            let Some(resource) = self.store.get_resource(&id)? else {
                continue;
            };

            let now = self.clock.now();
            if resource.is_expired(now) {
                match self.expire_locked(&id, DeletionReason::ExpiredAtStartup).await {
                    Ok(_) => report.expired += 1,
                    Err(e) => {
                        warn!(resource_id = %id, error = %e, "Startup deletion failed, sweeper will retry");
                    }
                }
            } else {
                self.arm(&id, TimerPlan::new(resource.delete_at, now, &self.policy.warnings));
                report.rearmed += 1;
            }
        }

        info!(
            rearmed = report.rearmed,
            expired = report.expired,
            "Timers recovered from store"
        );
        self.audit(AuditEventType::RecoveryCompleted {
            rearmed: report.rearmed,
            expired: report.expired,
        });

        Ok(report)
    }

    /// Abort every armed timer. Records stay in the store for the next start.
    pub fn shutdown(&self) {
        let sets: Vec<TimerSet> = self.table().sets.drain().map(|(_, set)| set).collect();
        let count = sets.len();
        for set in sets {
            set.abort();
        }
        info!(count, "Scheduler stopped, timers cancelled");
    }

    /// Store and host both report healthy
    pub fn is_healthy(&self) -> bool {
        self.store.is_healthy() && self.host.is_healthy()
    }

    pub fn has_timers(&self, id: &ResourceId) -> bool {
        self.table().sets.contains_key(id)
    }

    /// Ids with an armed timer set, in no particular order
    pub fn armed_ids(&self) -> Vec<ResourceId> {
        self.table().sets.keys().cloned().collect()
    }

    // Crate-internal API for the engine, freeze gate and sweeper. Every
    // `*_locked` method expects the caller to hold the per-id lock.

    pub(crate) fn locks(&self) -> &Arc<KeyedLocks> {
        &self.locks
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<CoreEvent> {
        self.events.clone()
    }

    pub(crate) async fn schedule_locked(
        &self,
        id: &ResourceId,
        delete_at: DateTime<Local>,
    ) -> CoreResult<()> {
        let plan = TimerPlan::new(delete_at, self.clock.now(), &self.policy.warnings);
        if plan.is_due() {
            self.expire_locked(id, DeletionReason::Expired).await?;
        } else {
            self.arm(id, plan);
        }
        Ok(())
    }

    pub(crate) async fn expire_locked(
        &self,
        id: &ResourceId,
        reason: DeletionReason,
    ) -> CoreResult<Expiry> {
        if self.store.get_resource(id)?.is_none() {
            self.cancel_timers(id);
            debug!(resource_id = %id, ?reason, "Deletion skipped, record already gone");
            return Ok(Expiry::Absent);
        }

        // No warning may follow the deletion notice. A failed store delete
        // leaves an expired record, which the sweeper picks up.
        self.cancel_timers(id);

        if self.policy.notify_deletion {
            self.send_notice(id, NoticeKind::Deleted).await;
        }

        let destroy_error = match self.call_host(self.host.destroy(id)).await {
            Ok(()) => None,
            Err(e) => {
                warn!(resource_id = %id, error = %e, "Destroy failed, removing record anyway");
                self.audit(AuditEventType::DestroyFailed {
                    resource_id: id.clone(),
                    error: e.to_string(),
                });
                Some(e)
            }
        };

        if let Err(e) = self.store.delete_resource(id) {
            error!(resource_id = %id, error = %e, "Failed to remove record, sweeper will retry");
            return Err(e.into());
        }

        info!(resource_id = %id, ?reason, "Resource deleted");
        self.audit(AuditEventType::ResourceDeleted {
            resource_id: id.clone(),
            reason,
        });
        self.publish(CoreEvent::ResourceDeleted {
            id: id.clone(),
            reason,
        });

        Ok(match destroy_error {
            Some(e) => Expiry::DestroyFailed(e),
            None => Expiry::Deleted,
        })
    }

    /// Bring timers for `id` in line with its record
    pub(crate) async fn reconcile(&self, id: &ResourceId) -> CoreResult<SweepAction> {
        let _guard = self.locks.lock(id).await;
        let now = self.clock.now();

        let action = match self.store.get_resource(id)? {
            None => {
                if self.cancel_timers(id) {
                    debug!(resource_id = %id, "Orphan timers cancelled");
                    SweepAction::OrphanCancelled
                } else {
                    SweepAction::Untouched
                }
            }
            Some(resource) if resource.is_expired(now) => {
                self.expire_locked(id, DeletionReason::Swept).await?;
                SweepAction::Expired
            }
            Some(resource) if !self.has_timers(id) => {
                self.arm(id, TimerPlan::new(resource.delete_at, now, &self.policy.warnings));
                SweepAction::Rearmed
            }
            Some(_) => SweepAction::Untouched,
        };

        Ok(action)
    }

    /// Deliver a notice, logging failures. Returns whether it was delivered.
    pub(crate) async fn send_notice(&self, id: &ResourceId, kind: NoticeKind) -> bool {
        match self.call_host(self.host.notify(id, kind)).await {
            Ok(()) => {
                debug!(resource_id = %id, notice = %kind, "Notice delivered");
                true
            }
            Err(e) => {
                warn!(resource_id = %id, notice = %kind, error = %e, "Notice failed");
                false
            }
        }
    }

    pub(crate) fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::at(event, self.clock.now())) {
            warn!(error = %e, "Failed to append audit event");
        }
    }

    pub(crate) fn publish(&self, event: CoreEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn cancel_timers(&self, id: &ResourceId) -> bool {
        let removed = self.table().sets.remove(id);
        match removed {
            Some(set) => {
                set.abort();
                true
            }
            None => false,
        }
    }

    fn arm(&self, id: &ResourceId, plan: TimerPlan) {
        let mut table = self.table();
        table.next_generation += 1;
        let generation = table.next_generation;

        let deletion = self.spawn_deletion(id.clone(), generation, plan.deletion_in);
        let warnings = plan
            .warnings
            .iter()
            .map(|w| self.spawn_warning(id.clone(), generation, plan.delete_at, *w))
            .collect();

        let previous = table.sets.insert(
            id.clone(),
            TimerSet {
                generation,
                deletion: Some(deletion),
                warnings,
            },
        );
        if let Some(previous) = previous {
            previous.abort();
        }

        debug!(
            resource_id = %id,
            delete_at = %plan.delete_at,
            warnings = plan.warnings.len(),
            generation,
            "Timers armed"
        );
    }

    fn spawn_deletion(&self, id: ResourceId, generation: u64, delay: Duration) -> JoinHandle<()> {
        let this = self.this.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(scheduler) = this.upgrade() {
                scheduler.fire_deletion(id, generation).await;
            }
        })
    }

    fn spawn_warning(
        &self,
        id: ResourceId,
        generation: u64,
        delete_at: DateTime<Local>,
        warning: PlannedWarning,
    ) -> JoinHandle<()> {
        let this = self.this.clone();
        tokio::spawn(async move {
            tokio::time::sleep(warning.fire_in).await;
            if let Some(scheduler) = this.upgrade() {
                scheduler
                    .fire_warning(id, generation, delete_at, warning.seconds_before)
                    .await;
            }
        })
    }

    async fn fire_deletion(&self, id: ResourceId, generation: u64) {
        let _guard = self.locks.lock(&id).await;

        {
            let mut table = self.table();
            match table.sets.get_mut(&id) {
                Some(set) if set.generation == generation => {
                    // Detach our own handle so the deletion path cannot abort us
                    set.deletion.take();
                }
                _ => {
                    debug!(resource_id = %id, generation, "Superseded deletion timer ignored");
                    return;
                }
            }
        }

        let now = self.clock.now();
        match self.store.get_resource(&id) {
            Ok(Some(resource)) if !resource.is_expired(now) => {
                // Wall clock is behind the timer; wait for the recorded deadline
                self.arm(&id, TimerPlan::new(resource.delete_at, now, &self.policy.warnings));
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(resource_id = %id, error = %e, "Deletion timer could not read record, sweeper will retry");
                return;
            }
        }

        if let Err(e) = self.expire_locked(&id, DeletionReason::Expired).await {
            error!(resource_id = %id, error = %e, "Timed deletion failed");
        }
    }

    async fn fire_warning(
        &self,
        id: ResourceId,
        generation: u64,
        delete_at: DateTime<Local>,
        seconds_before: u64,
    ) {
        let _guard = self.locks.lock(&id).await;

        if !self.is_current(&id, generation) {
            debug!(resource_id = %id, generation, "Superseded warning timer ignored");
            return;
        }

        self.send_notice(&id, NoticeKind::Warning { seconds_before })
            .await;

        let remaining = remaining_until(delete_at, self.clock.now());
        info!(resource_id = %id, seconds_before, remaining_secs = remaining.as_secs(), "Warning issued");

        self.audit(AuditEventType::WarningIssued {
            resource_id: id.clone(),
            seconds_before,
        });
        self.publish(CoreEvent::WarningIssued {
            id,
            seconds_before,
            remaining,
        });
    }

    fn is_current(&self, id: &ResourceId, generation: u64) -> bool {
        self.table()
            .sets
            .get(id)
            .is_some_and(|set| set.generation == generation)
    }

    async fn call_host<F>(&self, call: F) -> HostResult<()>
    where
        F: Future<Output = HostResult<()>>,
    {
        let limit = self.policy.capability_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(HostError::Timeout(limit)))
    }

    fn table(&self) -> MutexGuard<'_, TimerTable> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LifecycleScheduler {
    fn drop(&mut self) {
        let table = self.timers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, set) in table.sets.drain() {
            set.abort();
        }
    }
}
