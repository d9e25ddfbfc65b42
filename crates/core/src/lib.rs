//! repofleet core - domain types, output parsers and ports
//!
//! This crate holds the repository fleet data model, the parsers for git's
//! machine-readable output, and the ports (traits) the application layer
//! implements. It never spawns processes or touches the filesystem - those
//! concerns live in the adapters of the `repofleet` crate.

pub mod domain;
pub mod ports;
pub mod app;
pub mod error;

// Re-exports for ergonomics
pub use domain::*;
pub use error::*;
