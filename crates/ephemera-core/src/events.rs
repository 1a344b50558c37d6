//! Core events emitted by the engine

use chrono::{DateTime, Local};
use ephemera_api::DeletionReason;
use ephemera_util::ResourceId;
use std::time::Duration;

/// Events published to subscribers of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// Resource stored and scheduled
    ResourceCreated {
        id: ResourceId,
        title: String,
        delete_at: DateTime<Local>,
    },

    /// Warning threshold reached
    WarningIssued {
        id: ResourceId,
        seconds_before: u64,
        remaining: Duration,
    },

    /// Deadline moved forward
    ResourceExtended {
        id: ResourceId,
        delete_at: DateTime<Local>,
    },

    /// Resource is gone for good
    ResourceDeleted {
        id: ResourceId,
        reason: DeletionReason,
    },

    Frozen {
        id: ResourceId,
        until: DateTime<Local>,
    },

    Unfrozen {
        id: ResourceId,
    },
}

impl CoreEvent {
    pub fn resource_id(&self) -> &ResourceId {
        match self {
            CoreEvent::ResourceCreated { id, .. }
            | CoreEvent::WarningIssued { id, .. }
            | CoreEvent::ResourceExtended { id, .. }
            | CoreEvent::ResourceDeleted { id, .. }
            | CoreEvent::Frozen { id, .. }
            | CoreEvent::Unfrozen { id } => id,
        }
    }
}
