//! repofleet application library
//!
//! Adapters, services and the command-line front end, exposed for the binary
//! and for integration tests.

pub mod adapters;
pub mod cli;
pub mod services;
pub mod testing;
