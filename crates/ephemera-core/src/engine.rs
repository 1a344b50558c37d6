//! Core lifecycle engine

use chrono::{DateTime, Local};
use ephemera_api::{DeletionReason, NoticeKind, Resource, ResourceInfo};
use ephemera_config::LifecyclePolicy;
use ephemera_host_api::ResourceHost;
use ephemera_store::{AuditEventType, Store};
use ephemera_util::{Clock, IdentityId, ResourceId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::{
    CoreError, CoreEvent, CoreResult, Expiry, FreezeGate, KeyedLocks, LifecycleScheduler,
    ReconciliationSweeper, RecoveryReport,
};

/// Entry point for collaborators: create, extend, expire, freeze and
/// inspect ephemeral resources.
pub struct CoreEngine {
    policy: LifecyclePolicy,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyedLocks>,
    scheduler: Arc<LifecycleScheduler>,
    freeze: FreezeGate,
}

impl CoreEngine {
    pub fn new(
        policy: LifecyclePolicy,
        store: Arc<dyn Store>,
        host: Arc<dyn ResourceHost>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        let scheduler = LifecycleScheduler::new(
            policy.clone(),
            store.clone(),
            host,
            clock.clone(),
            locks.clone(),
        );
        let freeze = FreezeGate::new(
            &policy,
            store.clone(),
            clock.clone(),
            locks.clone(),
            scheduler.event_sender(),
        );

        info!(
            min_duration_secs = policy.min_duration.as_secs(),
            max_duration_secs = policy.max_duration.as_secs(),
            "Core engine initialized"
        );

        Self {
            policy,
            store,
            clock,
            locks,
            scheduler,
            freeze,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub fn scheduler(&self) -> &Arc<LifecycleScheduler> {
        &self.scheduler
    }

    /// Sweeper sharing this engine's scheduler, at the configured interval
    pub fn sweeper(&self) -> ReconciliationSweeper {
        ReconciliationSweeper::new(self.scheduler.clone(), self.policy.sweep_interval)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.scheduler.subscribe()
    }

    /// Rebuild timers from the store. Call once at startup.
    pub async fn recover(&self) -> CoreResult<RecoveryReport> {
        self.scheduler.recover().await
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub fn is_healthy(&self) -> bool {
        self.scheduler.is_healthy()
    }

    /// Create a resource with a freshly generated id
    pub async fn create_resource(
        &self,
        title: impl Into<String>,
        delete_at: DateTime<Local>,
        creator: IdentityId,
        members: impl IntoIterator<Item = IdentityId>,
    ) -> CoreResult<ResourceId> {
        let id = ResourceId::generate();
        self.register_resource(id.clone(), title, delete_at, creator, members)
            .await?;
        Ok(id)
    }

    /// Start managing a resource whose id the collaborator already assigned
    pub async fn register_resource(
        &self,
        id: ResourceId,
        title: impl Into<String>,
        delete_at: DateTime<Local>,
        creator: IdentityId,
        members: impl IntoIterator<Item = IdentityId>,
    ) -> CoreResult<()> {
        let now = self.clock.now();
        let lifetime = (delete_at - now).to_std().unwrap_or(Duration::ZERO);
        self.check_duration(lifetime)?;

        let resource = Resource::new(id, title, now, delete_at, creator, members);
        let id = &resource.id;

        let _guard = self.locks.lock(id).await;

        if self.store.get_resource(id)?.is_some() {
            return Err(CoreError::AlreadyExists(id.clone()));
        }

        self.store.put_resource(&resource)?;
        self.scheduler.schedule_locked(id, delete_at).await?;

        info!(
            resource_id = %id,
            title = %resource.title,
            delete_at = %delete_at,
            members = resource.member_ids.len(),
            "Resource created"
        );

        self.scheduler.audit(AuditEventType::ResourceCreated {
            resource_id: id.clone(),
            title: resource.title.clone(),
            delete_at,
        });
        self.scheduler.publish(CoreEvent::ResourceCreated {
            id: id.clone(),
            title: resource.title.clone(),
            delete_at,
        });

        if self.policy.notify_creation {
            self.scheduler.send_notice(id, NoticeKind::Created).await;
        }

        Ok(())
    }

    /// Push the deadline back by `duration`. Returns the new deadline.
    pub async fn extend_resource(
        &self,
        id: &ResourceId,
        duration: Duration,
    ) -> CoreResult<DateTime<Local>> {
        self.check_duration(duration)?;
        self.scheduler.extend(id, duration).await
    }

    /// Delete now, regardless of the deadline.
    ///
    /// A `DestroyFailure` means the record is already gone but the
    /// collaborator could not destroy the underlying resource.
    pub async fn expire_now(&self, id: &ResourceId) -> CoreResult<()> {
        match self.scheduler.expire(id, DeletionReason::Manual).await? {
            Expiry::Deleted => Ok(()),
            Expiry::DestroyFailed(source) => Err(CoreError::DestroyFailure {
                id: id.clone(),
                source,
            }),
            Expiry::Absent => Err(CoreError::NotFound(id.clone())),
        }
    }

    /// Time left before deletion
    pub async fn query_remaining(&self, id: &ResourceId) -> CoreResult<Duration> {
        let resource = self.live_resource(id).await?;
        Ok(resource.remaining(self.clock.now()))
    }

    /// Suppress collaborator writes for `duration`. Returns the end of the window.
    pub async fn freeze(&self, id: &ResourceId, duration: Duration) -> CoreResult<DateTime<Local>> {
        self.check_duration(duration)?;
        self.live_resource(id).await?;
        self.freeze.freeze(id, duration).await
    }

    pub async fn unfreeze(&self, id: &ResourceId) -> CoreResult<()> {
        self.freeze.unfreeze(id).await.map(|_| ())
    }

    /// Unknown ids are not frozen
    pub async fn is_frozen(&self, id: &ResourceId) -> CoreResult<bool> {
        self.freeze.is_frozen(id).await
    }

    pub async fn describe(&self, id: &ResourceId) -> CoreResult<ResourceInfo> {
        let resource = self.live_resource(id).await?;
        Ok(resource.to_info(self.clock.now()))
    }

    /// Every live resource, soonest deadline first
    pub fn list_resources(&self) -> CoreResult<Vec<ResourceInfo>> {
        let now = self.clock.now();
        let mut infos: Vec<ResourceInfo> = self
            .store
            .list_resources()?
            .into_iter()
            .filter(|r| !r.is_expired(now))
            .map(|r| r.to_info(now))
            .collect();
        infos.sort_by_key(|info| info.delete_at);
        Ok(infos)
    }

    /// The record for `id` if it is live. A record found past its deadline
    /// is deleted on the spot and reported as not found.
    async fn live_resource(&self, id: &ResourceId) -> CoreResult<Resource> {
        let resource = self
            .store
            .get_resource(id)?
            .ok_or_else(|| CoreError::NotFound(id.clone()))?;

        if resource.is_expired(self.clock.now()) {
            debug!(resource_id = %id, "Queried resource is past its deadline");
            self.scheduler.expire(id, DeletionReason::Expired).await?;
            return Err(CoreError::NotFound(id.clone()));
        }

        Ok(resource)
    }

    fn check_duration(&self, requested: Duration) -> CoreResult<()> {
        if self.policy.allows(requested) {
            Ok(())
        } else {
            Err(CoreError::InvalidDuration {
                requested,
                min: self.policy.min_duration,
                max: self.policy.max_duration,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ephemera_host_api::MockHost;
    use ephemera_store::SqliteStore;
    use crate::testing::FlakyStore;
    use ephemera_util::TokioClock;

    struct Harness {
        engine: CoreEngine,
        store: Arc<SqliteStore>,
        host: MockHost,
        clock: Arc<TokioClock>,
    }

    fn harness() -> Harness {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let host = MockHost::new();
        let clock = Arc::new(TokioClock::new());
        let engine = CoreEngine::new(
            LifecyclePolicy::default(),
            store.clone(),
            Arc::new(host.clone()),
            clock.clone(),
        );
        Harness {
            engine,
            store,
            host,
            clock,
        }
    }

    impl Harness {
        fn in_secs(&self, secs: i64) -> DateTime<Local> {
            self.clock.now() + chrono::Duration::seconds(secs)
        }

        async fn create(&self, lifetime_secs: i64) -> ResourceId {
            self.engine
                .create_resource(
                    "Retro",
                    self.in_secs(lifetime_secs),
                    IdentityId::from(1),
                    [IdentityId::from(1), IdentityId::from(2), IdentityId::from(3)],
                )
                .await
                .unwrap()
        }
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn create_schedules_and_notifies() {
        let h = harness();
        let mut events = h.engine.subscribe();
        let id = h.create(600).await;

        assert_eq!(h.engine.query_remaining(&id).await.unwrap(), Duration::from_secs(600));
        assert_eq!(h.host.notices_for(&id), vec![NoticeKind::Created]);
        assert!(h.engine.scheduler().has_timers(&id));
        assert!(h.engine.is_healthy());
        assert!(matches!(
            events.recv().await.unwrap(),
            CoreEvent::ResourceCreated { .. }
        ));

        advance(601).await;
        assert!(matches!(
            h.engine.query_remaining(&id).await,
            Err(CoreError::NotFound(_))
        ));
        assert_eq!(h.host.destroy_count(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_down() {
        let h = harness();
        let id = h.create(600).await;

        advance(100).await;
        assert_eq!(h.engine.query_remaining(&id).await.unwrap(), Duration::from_secs(500));
    }

    #[tokio::test(start_paused = true)]
    async fn lifetime_bounds_are_enforced() {
        let h = harness();

        let too_short = h
            .engine
            .create_resource("x", h.in_secs(30), IdentityId::from(1), Vec::new())
            .await;
        assert!(matches!(too_short, Err(CoreError::InvalidDuration { .. })));

        let too_long = h
            .engine
            .create_resource("x", h.in_secs(8 * 24 * 3600), IdentityId::from(1), Vec::new())
            .await;
        assert!(matches!(too_long, Err(CoreError::InvalidDuration { .. })));

        let in_past = h
            .engine
            .create_resource("x", h.in_secs(-60), IdentityId::from(1), Vec::new())
            .await;
        assert!(matches!(in_past, Err(CoreError::InvalidDuration { .. })));

        assert!(h.store.list_resources().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn register_rejects_duplicates() {
        let h = harness();
        let id = ResourceId::new("chat-42");

        h.engine
            .register_resource(id.clone(), "a", h.in_secs(600), IdentityId::from(1), Vec::new())
            .await
            .unwrap();
        let again = h
            .engine
            .register_resource(id.clone(), "b", h.in_secs(900), IdentityId::from(1), Vec::new())
            .await;

        assert!(matches!(again, Err(CoreError::AlreadyExists(_))));
        assert_eq!(h.engine.describe(&id).await.unwrap().title, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn extend_validates_and_advances() {
        let h = harness();
        let id = h.create(600).await;

        let invalid = h.engine.extend_resource(&id, Duration::from_secs(1)).await;
        assert!(matches!(invalid, Err(CoreError::InvalidDuration { .. })));

        h.engine.extend_resource(&id, Duration::from_secs(600)).await.unwrap();
        h.engine.extend_resource(&id, Duration::from_secs(300)).await.unwrap();
        assert_eq!(h.engine.query_remaining(&id).await.unwrap(), Duration::from_secs(1500));

        let missing = h
            .engine
            .extend_resource(&ResourceId::new("missing"), Duration::from_secs(600))
            .await;
        assert!(matches!(missing, Err(CoreError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn expire_now_deletes_once() {
        let h = harness();
        let id = h.create(600).await;

        h.engine.expire_now(&id).await.unwrap();
        assert!(matches!(h.engine.expire_now(&id).await, Err(CoreError::NotFound(_))));
        assert_eq!(h.host.destroy_count(&id), 1);
        assert_eq!(h.host.notice_count(&id, NoticeKind::Deleted), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expire_now_reports_destroy_failure() {
        let h = harness();
        let id = h.create(600).await;
        h.host.set_fail_destroy(true);

        let result = h.engine.expire_now(&id).await;
        assert!(matches!(result, Err(CoreError::DestroyFailure { .. })));
        assert!(h.store.get_resource(&id).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn freeze_is_independent_of_deadline() {
        let h = harness();
        let id = h.create(600).await;

        h.engine.freeze(&id, Duration::from_secs(120)).await.unwrap();
        assert!(h.engine.is_frozen(&id).await.unwrap());
        assert_eq!(h.engine.query_remaining(&id).await.unwrap(), Duration::from_secs(600));

        advance(120).await;
        assert!(!h.engine.is_frozen(&id).await.unwrap());
        assert_eq!(h.engine.query_remaining(&id).await.unwrap(), Duration::from_secs(480));

        let invalid = h.engine.freeze(&id, Duration::from_secs(10)).await;
        assert!(matches!(invalid, Err(CoreError::InvalidDuration { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn freeze_then_unfreeze() {
        let h = harness();
        let id = h.create(600).await;

        let until = h.engine.freeze(&id, Duration::from_secs(300)).await.unwrap();
        assert_eq!(h.engine.describe(&id).await.unwrap().frozen_until, Some(until));

        h.engine.unfreeze(&id).await.unwrap();
        assert!(!h.engine.is_frozen(&id).await.unwrap());
        assert!(!h.engine.is_frozen(&ResourceId::new("missing")).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn describe_and_list() {
        let h = harness();
        let later = h.create(900).await;
        let sooner = h.create(300).await;

        let info = h.engine.describe(&sooner).await.unwrap();
        assert_eq!(info.title, "Retro");
        assert_eq!(info.member_count, 3);
        assert_eq!(info.remaining, Duration::from_secs(300));
        assert_eq!(info.creator_id, IdentityId::from(1));

        let listed: Vec<ResourceId> = h
            .engine
            .list_resources()
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(listed, vec![sooner, later]);
    }

    #[tokio::test(start_paused = true)]
    async fn overdue_record_is_deleted_on_query() {
        let h = harness();
        let id = h.create(600).await;

        // Timers lost, as after a crash before recovery
        h.engine.scheduler().cancel(&id).await;
        advance(601).await;
        assert!(h.store.get_resource(&id).unwrap().is_some());

        assert!(matches!(h.engine.describe(&id).await, Err(CoreError::NotFound(_))));
        assert!(h.store.get_resource(&id).unwrap().is_none());
        assert_eq!(h.host.destroy_count(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn creation_notice_can_be_disabled() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let host = MockHost::new();
        let clock = Arc::new(TokioClock::new());
        let policy = LifecyclePolicy {
            notify_creation: false,
            ..LifecyclePolicy::default()
        };
        let engine = CoreEngine::new(policy, store, Arc::new(host.clone()), clock.clone());

        let id = engine
            .create_resource(
                "quiet",
                clock.now() + chrono::Duration::seconds(600),
                IdentityId::from(1),
                Vec::new(),
            )
            .await
            .unwrap();
        assert!(host.notices_for(&id).is_empty());
    }

    fn flaky_engine() -> (CoreEngine, Arc<FlakyStore>, MockHost, Arc<TokioClock>) {
        let store = Arc::new(FlakyStore::new());
        let host = MockHost::new();
        let clock = Arc::new(TokioClock::new());
        let engine = CoreEngine::new(
            LifecyclePolicy::default(),
            store.clone(),
            Arc::new(host.clone()),
            clock.clone(),
        );
        (engine, store, host, clock)
    }

    #[tokio::test(start_paused = true)]
    async fn failed_extend_keeps_deadline_and_timers() {
        let (engine, store, host, clock) = flaky_engine();
        let delete_at = clock.now() + chrono::Duration::seconds(600);
        let id = engine
            .create_resource("Retro", delete_at, IdentityId::from(1), Vec::new())
            .await
            .unwrap();

        store.set_fail_put(true);
        let result = engine.extend_resource(&id, Duration::from_secs(600)).await;
        assert!(matches!(result, Err(CoreError::Persistence(_))));
        store.set_fail_put(false);

        assert_eq!(engine.describe(&id).await.unwrap().delete_at, delete_at);
        assert!(engine.scheduler().has_timers(&id));

        // Original timers still fire at the original deadline
        advance(601).await;
        assert!(store.get_resource(&id).unwrap().is_none());
        assert_eq!(host.destroy_count(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_create_arms_nothing() {
        let (engine, store, host, clock) = flaky_engine();
        store.set_fail_put(true);

        let id = ResourceId::new("chat-7");
        let result = engine
            .register_resource(
                id.clone(),
                "Retro",
                clock.now() + chrono::Duration::seconds(600),
                IdentityId::from(1),
                Vec::new(),
            )
            .await;

        assert!(matches!(result, Err(CoreError::Persistence(_))));
        assert!(!engine.scheduler().has_timers(&id));
        assert!(host.notices_for(&id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delete_reaches_expire_now_caller() {
        let (engine, store, host, clock) = flaky_engine();
        let id = engine
            .create_resource(
                "Retro",
                clock.now() + chrono::Duration::seconds(600),
                IdentityId::from(1),
                Vec::new(),
            )
            .await
            .unwrap();

        store.set_fail_delete(true);
        let result = engine.expire_now(&id).await;
        assert!(matches!(result, Err(CoreError::Persistence(_))));
        assert!(store.get_resource(&id).unwrap().is_some());
        assert_eq!(host.destroy_count(&id), 1);

        store.set_fail_delete(false);
        engine.expire_now(&id).await.unwrap();
        assert!(store.get_resource(&id).unwrap().is_none());
    }
}
