//! Store trait definitions

use ephemera_api::Resource;
use ephemera_util::ResourceId;

use crate::{AuditEvent, StoreResult};

/// Main store trait
pub trait Store: Send + Sync {
    // Resource records

    /// Insert or replace a resource record
    fn put_resource(&self, resource: &Resource) -> StoreResult<()>;

    /// Look up a resource record
    fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<Resource>>;

    /// Remove a resource record, returning whether one was present
    fn delete_resource(&self, id: &ResourceId) -> StoreResult<bool>;

    /// All stored resource records
    fn list_resources(&self) -> StoreResult<Vec<Resource>>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
