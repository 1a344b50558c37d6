//! Mock resource host for testing

use async_trait::async_trait;
use ephemera_api::NoticeKind;
use ephemera_util::ResourceId;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{HostError, HostResult, ResourceHost};

/// Mock host that records every call for unit/integration testing
#[derive(Clone, Default)]
pub struct MockHost {
    notices: Arc<Mutex<Vec<(ResourceId, NoticeKind)>>>,
    destroyed: Arc<Mutex<Vec<ResourceId>>>,

    /// Configure notify to fail
    pub fail_notify: Arc<Mutex<bool>>,

    /// Configure destroy to fail
    pub fail_destroy: Arc<Mutex<bool>>,

    /// Simulated latency of destroy calls
    pub destroy_delay: Arc<Mutex<Option<Duration>>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notices delivered so far, in order
    pub fn notices(&self) -> Vec<(ResourceId, NoticeKind)> {
        self.notices.lock().unwrap().clone()
    }

    /// Notices delivered for one resource, in order
    pub fn notices_for(&self, id: &ResourceId) -> Vec<NoticeKind> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|(rid, _)| rid == id)
            .map(|(_, kind)| *kind)
            .collect()
    }

    /// How many times `kind` was delivered for `id`
    pub fn notice_count(&self, id: &ResourceId, kind: NoticeKind) -> usize {
        self.notices_for(id).iter().filter(|k| **k == kind).count()
    }

    /// Every destroy call attempted, including failed ones
    pub fn destroyed(&self) -> Vec<ResourceId> {
        self.destroyed.lock().unwrap().clone()
    }

    pub fn destroy_count(&self, id: &ResourceId) -> usize {
        self.destroyed.lock().unwrap().iter().filter(|d| *d == id).count()
    }

    pub fn set_fail_notify(&self, fail: bool) {
        *self.fail_notify.lock().unwrap() = fail;
    }

    pub fn set_fail_destroy(&self, fail: bool) {
        *self.fail_destroy.lock().unwrap() = fail;
    }

    pub fn set_destroy_delay(&self, delay: Option<Duration>) {
        *self.destroy_delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl ResourceHost for MockHost {
    async fn notify(&self, id: &ResourceId, kind: NoticeKind) -> HostResult<()> {
        if *self.fail_notify.lock().unwrap() {
            return Err(HostError::NotifyFailed("Mock notify failure".into()));
        }

        self.notices.lock().unwrap().push((id.clone(), kind));
        Ok(())
    }

    async fn destroy(&self, id: &ResourceId) -> HostResult<()> {
        let delay = *self.destroy_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.destroyed.lock().unwrap().push(id.clone());

        if *self.fail_destroy.lock().unwrap() {
            return Err(HostError::DestroyFailed("Mock destroy failure".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_notices_and_destroys() {
        let host = MockHost::new();
        let id = ResourceId::new("chat-1");

        host.notify(&id, NoticeKind::Created).await.unwrap();
        host.notify(&id, NoticeKind::Warning { seconds_before: 60 }).await.unwrap();
        host.destroy(&id).await.unwrap();
        host.destroy(&id).await.unwrap();

        assert_eq!(
            host.notices_for(&id),
            vec![NoticeKind::Created, NoticeKind::Warning { seconds_before: 60 }]
        );
        assert_eq!(host.destroy_count(&id), 2);
    }

    #[tokio::test]
    async fn mock_failures() {
        let host = MockHost::new();
        let id = ResourceId::new("chat-1");
        host.set_fail_notify(true);
        host.set_fail_destroy(true);

        assert!(host.notify(&id, NoticeKind::Deleted).await.is_err());
        assert!(matches!(
            host.destroy(&id).await,
            Err(HostError::DestroyFailed(_))
        ));

        assert!(host.notices().is_empty());
        assert_eq!(host.destroy_count(&id), 1, "failed attempts are still recorded");
    }
}
