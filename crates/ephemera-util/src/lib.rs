//! Shared utilities for ephemera
//!
//! This crate provides:
//! - ID types (ResourceId, IdentityId)
//! - Clocks (system wall clock, tokio-driven clock for tests) and duration helpers
//! - Default paths for config and data directories

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
