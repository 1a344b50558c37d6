//! Store wrapper with switchable write failures

use ephemera_api::Resource;
use ephemera_store::{AuditEvent, SqliteStore, Store, StoreError, StoreResult};
use ephemera_util::ResourceId;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory store whose `put_resource` and `delete_resource` can be told
/// to fail. Reads and the audit log always work.
pub(crate) struct FlakyStore {
    inner: SqliteStore,
    fail_put: AtomicBool,
    fail_delete: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().unwrap(),
            fail_put: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_fail_put(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    fn injected(&self, op: &str) -> StoreError {
        StoreError::Database(format!("{op}: disk I/O error"))
    }
}

impl Store for FlakyStore {
    fn put_resource(&self, resource: &Resource) -> StoreResult<()> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(self.injected("put"));
        }
        self.inner.put_resource(resource)
    }

    fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<Resource>> {
        self.inner.get_resource(id)
    }

    fn delete_resource(&self, id: &ResourceId) -> StoreResult<bool> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(self.injected("delete"));
        }
        self.inner.delete_resource(id)
    }

    fn list_resources(&self) -> StoreResult<Vec<Resource>> {
        self.inner.list_resources()
    }

    fn append_audit(&self, event: AuditEvent) -> StoreResult<()> {
        self.inner.append_audit(event)
    }

    fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        self.inner.recent_audits(limit)
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }
}
