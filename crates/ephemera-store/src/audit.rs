//! Audit event types

use chrono::{DateTime, Local};
use ephemera_api::DeletionReason;
use ephemera_util::ResourceId;
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    ResourceCreated {
        resource_id: ResourceId,
        title: String,
        delete_at: DateTime<Local>,
    },

    ResourceExtended {
        resource_id: ResourceId,
        extended_by_secs: u64,
        new_delete_at: DateTime<Local>,
    },

    WarningIssued {
        resource_id: ResourceId,
        seconds_before: u64,
    },

    ResourceDeleted {
        resource_id: ResourceId,
        reason: DeletionReason,
    },

    /// The destroy capability failed; the record is removed regardless
    DestroyFailed {
        resource_id: ResourceId,
        error: String,
    },

    Frozen {
        resource_id: ResourceId,
        until: DateTime<Local>,
    },

    Unfrozen { resource_id: ResourceId },

    /// Startup reconstruction of timers finished
    RecoveryCompleted { rearmed: usize, expired: usize },

    /// Reconciliation pass finished
    SweepCompleted {
        expired: usize,
        rearmed: usize,
        orphans: usize,
    },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(event, ephemera_util::now())
    }

    /// Event stamped with an explicit time (from an injected clock)
    pub fn at(event: AuditEventType, timestamp: DateTime<Local>) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
