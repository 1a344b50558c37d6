//! SQLite-based store implementation

use chrono::{DateTime, Local};
use ephemera_api::Resource;
use ephemera_util::{IdentityId, ResourceId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{AuditEvent, Store, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Live resources; absence means deleted
            CREATE TABLE IF NOT EXISTS resources (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                delete_at TEXT NOT NULL,
                creator_id TEXT NOT NULL,
                member_ids_json TEXT NOT NULL DEFAULT '[]',
                frozen_until TEXT
            );

            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Indexes
            CREATE INDEX IF NOT EXISTS idx_resources_delete_at ON resources(delete_at);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

/// Columns as stored, before timestamp and member decoding
struct ResourceRow {
    id: String,
    title: String,
    created_at: String,
    delete_at: String,
    creator_id: String,
    member_ids_json: String,
    frozen_until: Option<String>,
}

const RESOURCE_COLUMNS: &str =
    "id, title, created_at, delete_at, creator_id, member_ids_json, frozen_until";

impl ResourceRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            created_at: row.get(2)?,
            delete_at: row.get(3)?,
            creator_id: row.get(4)?,
            member_ids_json: row.get(5)?,
            frozen_until: row.get(6)?,
        })
    }

    fn into_resource(self) -> StoreResult<Resource> {
        let parse = |field: &str, value: &str| -> StoreResult<DateTime<Local>> {
            DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Local))
                .map_err(|e| StoreError::Corrupt {
                    id: self.id.clone(),
                    message: format!("{}: {}", field, e),
                })
        };

        let created_at = parse("created_at", &self.created_at)?;
        let delete_at = parse("delete_at", &self.delete_at)?;
        let frozen_until = self
            .frozen_until
            .as_deref()
            .map(|s| parse("frozen_until", s))
            .transpose()?;
        let member_ids: BTreeSet<IdentityId> = serde_json::from_str(&self.member_ids_json)?;

        Ok(Resource {
            id: ResourceId::new(self.id),
            title: self.title,
            created_at,
            delete_at,
            creator_id: IdentityId::new(self.creator_id),
            member_ids,
            frozen_until,
        })
    }
}

impl Store for SqliteStore {
    fn put_resource(&self, resource: &Resource) -> StoreResult<()> {
        let conn = self.conn()?;
        let members_json = serde_json::to_string(&resource.member_ids)?;

        conn.execute(
            r#"
            INSERT INTO resources
                (id, title, created_at, delete_at, creator_id, member_ids_json, frozen_until)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id)
            DO UPDATE SET
                title = excluded.title,
                created_at = excluded.created_at,
                delete_at = excluded.delete_at,
                creator_id = excluded.creator_id,
                member_ids_json = excluded.member_ids_json,
                frozen_until = excluded.frozen_until
            "#,
            params![
                resource.id.as_str(),
                resource.title,
                resource.created_at.to_rfc3339(),
                resource.delete_at.to_rfc3339(),
                resource.creator_id.as_str(),
                members_json,
                resource.frozen_until.map(|t| t.to_rfc3339()),
            ],
        )?;

        debug!(resource_id = %resource.id, delete_at = %resource.delete_at, "Resource stored");
        Ok(())
    }

    fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<Resource>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                &format!("SELECT {} FROM resources WHERE id = ?", RESOURCE_COLUMNS),
                [id.as_str()],
                ResourceRow::from_row,
            )
            .optional()?;

        row.map(ResourceRow::into_resource).transpose()
    }

    fn delete_resource(&self, id: &ResourceId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM resources WHERE id = ?", [id.as_str()])?;

        debug!(resource_id = %id, removed, "Resource delete");
        Ok(removed > 0)
    }

    fn list_resources(&self) -> StoreResult<Vec<Resource>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM resources ORDER BY delete_at",
            RESOURCE_COLUMNS
        ))?;
        let rows = stmt.query_map([], ResourceRow::from_row)?;

        let mut resources = Vec::new();
        for row in rows {
            match row?.into_resource() {
                Ok(resource) => resources.push(resource),
                // One bad row must not hide every other resource from recovery
                Err(e) => warn!(error = %e, "Skipping unreadable resource record"),
            }
        }

        Ok(resources)
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .unwrap_or_else(|_| ephemera_util::now());
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use ephemera_api::DeletionReason;

    fn sample(id: &str) -> Resource {
        let created = Local.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        Resource::new(
            ResourceId::new(id),
            "Standup",
            created,
            created + ChronoDuration::minutes(10),
            IdentityId::from(7),
            [IdentityId::from(7), IdentityId::from(8)],
        )
    }

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
        assert!(store.list_resources().unwrap().is_empty());
    }

    #[test]
    fn test_put_get_resource() {
        let store = SqliteStore::in_memory().unwrap();
        let resource = sample("chat-1");

        store.put_resource(&resource).unwrap();
        let loaded = store.get_resource(&resource.id).unwrap().unwrap();
        assert_eq!(loaded, resource);

        assert!(store.get_resource(&ResourceId::new("missing")).unwrap().is_none());
    }

    #[test]
    fn test_put_is_upsert() {
        let store = SqliteStore::in_memory().unwrap();
        let mut resource = sample("chat-1");
        store.put_resource(&resource).unwrap();

        resource.delete_at += ChronoDuration::minutes(5);
        resource.frozen_until = Some(resource.created_at + ChronoDuration::minutes(2));
        store.put_resource(&resource).unwrap();

        let all = store.list_resources().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].delete_at, resource.delete_at);
        assert_eq!(all[0].frozen_until, resource.frozen_until);
    }

    #[test]
    fn test_delete_reports_presence() {
        let store = SqliteStore::in_memory().unwrap();
        let resource = sample("chat-1");
        store.put_resource(&resource).unwrap();

        assert!(store.delete_resource(&resource.id).unwrap());
        assert!(!store.delete_resource(&resource.id).unwrap());
        assert!(store.get_resource(&resource.id).unwrap().is_none());
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ephemera.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put_resource(&sample("chat-1")).unwrap();
            store.put_resource(&sample("chat-2")).unwrap();
            store.delete_resource(&ResourceId::new("chat-2")).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let all = store.list_resources().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id.as_str(), "chat-1");
        assert_eq!(all[0].member_ids.len(), 2);
    }

    #[test]
    fn test_corrupt_row_is_skipped_in_list() {
        let store = SqliteStore::in_memory().unwrap();
        store.put_resource(&sample("good")).unwrap();
        {
            let conn = store.conn().unwrap();
            conn.execute(
                "INSERT INTO resources (id, title, created_at, delete_at, creator_id) \
                 VALUES ('bad', 't', 'yesterday', 'tomorrow', '1')",
                [],
            )
            .unwrap();
        }

        let all = store.list_resources().unwrap();
        assert_eq!(all.len(), 1);
        assert!(matches!(
            store.get_resource(&ResourceId::new("bad")),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))
            .unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::ResourceDeleted {
                resource_id: ResourceId::new("chat-1"),
                reason: DeletionReason::Expired,
            }))
            .unwrap();

        let events = store.recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0].event,
            AuditEventType::ResourceDeleted { reason: DeletionReason::Expired, .. }
        ));
        assert!(matches!(events[1].event, AuditEventType::ServiceStarted));

        assert_eq!(store.recent_audits(1).unwrap().len(), 1);
    }
}
