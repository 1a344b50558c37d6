//! Shared domain types for ephemera
//!
//! This crate defines the types exchanged between the lifecycle core,
//! the store, and collaborator adapters:
//! - The durable resource record
//! - Notice kinds sent to collaborators
//! - Deletion reasons and display snapshots

mod types;

pub use types::*;
