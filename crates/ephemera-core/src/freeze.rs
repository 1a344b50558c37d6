//! Freeze windows
//!
//! A frozen resource rejects collaborator-facing writes until its window
//! closes. Freezing never touches the deletion schedule.

use chrono::{DateTime, Local};
use ephemera_config::LifecyclePolicy;
use ephemera_store::{AuditEvent, AuditEventType, Store};
use ephemera_util::{Clock, ResourceId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{CoreError, CoreEvent, CoreResult, KeyedLocks};

pub struct FreezeGate {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    locks: Arc<KeyedLocks>,
    events: broadcast::Sender<CoreEvent>,
    min_duration: Duration,
    max_duration: Duration,
}

impl FreezeGate {
    pub fn new(
        policy: &LifecyclePolicy,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        locks: Arc<KeyedLocks>,
        events: broadcast::Sender<CoreEvent>,
    ) -> Self {
        Self {
            store,
            clock,
            locks,
            events,
            min_duration: policy.min_duration,
            max_duration: policy.max_duration,
        }
    }

    /// Freeze `id` for `duration` from now, replacing any current window
    pub async fn freeze(&self, id: &ResourceId, duration: Duration) -> CoreResult<DateTime<Local>> {
        let _guard = self.locks.lock(id).await;

        let mut resource = self
            .store
            .get_resource(id)?
            .ok_or_else(|| CoreError::NotFound(id.clone()))?;

        let until = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|d| self.clock.now().checked_add_signed(d))
            .ok_or(CoreError::InvalidDuration {
                requested: duration,
                min: self.min_duration,
                max: self.max_duration,
            })?;

        resource.frozen_until = Some(until);
        self.store.put_resource(&resource)?;

        info!(resource_id = %id, until = %until, "Resource frozen");
        self.audit(AuditEventType::Frozen {
            resource_id: id.clone(),
            until,
        });
        let _ = self.events.send(CoreEvent::Frozen {
            id: id.clone(),
            until,
        });

        Ok(until)
    }

    /// Clear the freeze window. Returns whether one was active.
    pub async fn unfreeze(&self, id: &ResourceId) -> CoreResult<bool> {
        let _guard = self.locks.lock(id).await;

        let mut resource = self
            .store
            .get_resource(id)?
            .ok_or_else(|| CoreError::NotFound(id.clone()))?;

        let was_frozen = resource.is_frozen_at(self.clock.now());
        if resource.frozen_until.take().is_none() {
            debug!(resource_id = %id, "Unfreeze on resource that was not frozen");
            return Ok(false);
        }

        self.store.put_resource(&resource)?;
        self.cleared(id);

        Ok(was_frozen)
    }

    /// Whether writes to `id` are currently suppressed. Unknown ids are not
    /// frozen. A lapsed window is cleared from the record on first look.
    pub async fn is_frozen(&self, id: &ResourceId) -> CoreResult<bool> {
        let _guard = self.locks.lock(id).await;

        let Some(mut resource) = self.store.get_resource(id)? else {
            return Ok(false);
        };

        let now = self.clock.now();
        if resource.is_frozen_at(now) {
            return Ok(true);
        }

        if resource.frozen_until.take().is_some() {
            self.store.put_resource(&resource)?;
            debug!(resource_id = %id, "Freeze window lapsed");
            self.cleared(id);
        }

        Ok(false)
    }

    fn cleared(&self, id: &ResourceId) {
        info!(resource_id = %id, "Resource unfrozen");
        self.audit(AuditEventType::Unfrozen {
            resource_id: id.clone(),
        });
        let _ = self.events.send(CoreEvent::Unfrozen { id: id.clone() });
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::at(event, self.clock.now())) {
            warn!(error = %e, "Failed to append audit event");
        }
    }
}
