//! Shared types for the ephemera API

use chrono::{DateTime, Local};
use ephemera_util::{IdentityId, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Durable record of a managed ephemeral resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,

    /// Display label, fixed at creation
    pub title: String,

    pub created_at: DateTime<Local>,

    /// When the resource must be destroyed
    pub delete_at: DateTime<Local>,

    pub creator_id: IdentityId,

    /// Informational only; membership policy belongs to the collaborator
    #[serde(default)]
    pub member_ids: BTreeSet<IdentityId>,

    /// Present only while a freeze window is active
    #[serde(default)]
    pub frozen_until: Option<DateTime<Local>>,
}

impl Resource {
    pub fn new(
        id: ResourceId,
        title: impl Into<String>,
        created_at: DateTime<Local>,
        delete_at: DateTime<Local>,
        creator_id: IdentityId,
        member_ids: impl IntoIterator<Item = IdentityId>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            created_at,
            delete_at,
            creator_id,
            member_ids: member_ids.into_iter().collect(),
            frozen_until: None,
        }
    }

    /// Time left before deletion, zero once the deadline has passed
    pub fn remaining(&self, now: DateTime<Local>) -> Duration {
        ephemera_util::remaining_until(self.delete_at, now)
    }

    pub fn is_expired(&self, now: DateTime<Local>) -> bool {
        self.delete_at <= now
    }

    /// Whether the freeze window covers `now`
    pub fn is_frozen_at(&self, now: DateTime<Local>) -> bool {
        self.frozen_until.is_some_and(|until| now < until)
    }

    pub fn to_info(&self, now: DateTime<Local>) -> ResourceInfo {
        ResourceInfo {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            delete_at: self.delete_at,
            remaining: self.remaining(now),
            creator_id: self.creator_id.clone(),
            member_count: self.member_ids.len(),
            frozen_until: self.frozen_until.filter(|until| now < *until),
        }
    }
}

/// Snapshot of a resource for display by collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub title: String,
    pub created_at: DateTime<Local>,
    pub delete_at: DateTime<Local>,
    pub remaining: Duration,
    pub creator_id: IdentityId,
    pub member_count: usize,
    pub frozen_until: Option<DateTime<Local>>,
}

/// Kind of notice sent to the collaborator for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoticeKind {
    /// Resource has been created and scheduled
    Created,

    /// Deadline is `seconds_before` away
    Warning { seconds_before: u64 },

    /// Resource is being deleted
    Deleted,
}

impl NoticeKind {
    /// Stable short name, used for hook arguments and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::Created => "created",
            NoticeKind::Warning { .. } => "warning",
            NoticeKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoticeKind::Warning { seconds_before } => write!(f, "warning(T-{}s)", seconds_before),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Why a resource was deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionReason {
    /// Deletion timer fired
    Expired,

    /// Found past its deadline when the service started
    ExpiredAtStartup,

    /// Found past its deadline by the reconciliation sweep
    Swept,

    /// Explicit expire-now request
    Manual,
}
