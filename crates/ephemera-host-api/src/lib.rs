//! Collaborator capability interfaces for ephemera
//!
//! This crate defines the boundary between the lifecycle core and whatever
//! owns the underlying resources (a messaging transport, a hook runner).
//! It contains no transport code itself.

mod mock;
mod traits;

pub use mock::*;
pub use traits::*;
