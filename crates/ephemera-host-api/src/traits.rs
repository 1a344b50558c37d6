//! Collaborator capability traits

use async_trait::async_trait;
use ephemera_api::NoticeKind;
use ephemera_util::ResourceId;
use std::time::Duration;
use thiserror::Error;

/// Errors from collaborator operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Notify failed: {0}")]
    NotifyFailed(String),

    #[error("Destroy failed: {0}")]
    DestroyFailed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Side effects the lifecycle core needs from its surroundings.
///
/// Implemented by whatever owns the underlying entity (a chat transport,
/// a cloud API, a hook runner). Both calls must tolerate being invoked for
/// a resource that no longer exists.
#[async_trait]
pub trait ResourceHost: Send + Sync {
    /// Deliver a notice about a resource. Fire-and-forget from the core's
    /// point of view; failures are logged, never retried.
    async fn notify(&self, id: &ResourceId, kind: NoticeKind) -> HostResult<()>;

    /// Irrevocably destroy the underlying resource. Must be safe to call
    /// more than once.
    async fn destroy(&self, id: &ResourceId) -> HostResult<()>;

    /// Optional: check if the host is healthy
    fn is_healthy(&self) -> bool {
        true
    }
}
