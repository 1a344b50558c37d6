//! Core error types

use ephemera_host_api::HostError;
use ephemera_store::StoreError;
use ephemera_util::ResourceId;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Resource not found: {0}")]
    NotFound(ResourceId),

    #[error("Duration {requested:?} outside allowed range {min:?}..={max:?}")]
    InvalidDuration {
        requested: Duration,
        min: Duration,
        max: Duration,
    },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    /// The record was removed but the collaborator could not destroy the
    /// underlying resource.
    #[error("Destroy failed for {id}: {source}")]
    DestroyFailure {
        id: ResourceId,
        #[source]
        source: HostError,
    },

    #[error("Resource already exists: {0}")]
    AlreadyExists(ResourceId),
}

pub type CoreResult<T> = Result<T, CoreError>;
