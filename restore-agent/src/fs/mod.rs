//! Filesystem operations on the restored data directory.

pub mod relocate;
pub mod tree;

pub use relocate::{relocate, WAL_DIRECTORY};
