//! Restore Agent Library
//!
//! Bootstrap-time restore hook that rebuilds a PostgreSQL data directory from
//! a barman-cloud object store backup.

pub mod api;
pub mod catalog;
pub mod cluster;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{RestoreError, Result};
