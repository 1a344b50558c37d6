//! Lifecycle engine for ephemera
//!
//! This crate is the heart of ephemera, containing:
//! - Deletion and warning timers per resource, rebuilt from the store on startup
//! - Periodic reconciliation between the store and the armed timers
//! - Freeze windows that gate collaborator writes
//! - The `CoreEngine` facade used by the service and by collaborators

mod engine;
mod error;
mod events;
mod freeze;
mod locks;
mod plan;
mod scheduler;
mod sweeper;

#[cfg(test)]
mod testing;

pub use engine::*;
pub use error::*;
pub use events::*;
pub use freeze::*;
pub use locks::*;
pub use plan::*;
pub use scheduler::*;
pub use sweeper::*;
