//! Custom error types for the restore agent.

use crate::executor::exit_code::{ExitClass, ToolKind};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Encountered an error while checking the presence of first needed WAL {segment} in the archive: {cause}")]
    Continuity {
        segment: String,
        #[source]
        cause: Box<RestoreError>,
    },

    #[error("{tool} failed: {class}")]
    Mechanism { tool: ToolKind, class: ExitClass },

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsafe archive destination: {destination} already holds WAL archive content for server {server_name}")]
    UnsafeDestination {
        destination: String,
        server_name: String,
    },

    #[error("Control plane error: {0}")]
    ControlPlane(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Restore cancelled")]
    Cancelled,
}

impl RestoreError {
    /// Wrap an I/O error with the path it happened on
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RestoreError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Short machine-readable name of the error category
    pub fn kind(&self) -> &'static str {
        match self {
            RestoreError::Config(_) => "configuration",
            RestoreError::NotFound(_) => "not_found",
            RestoreError::Continuity { .. } => "continuity",
            RestoreError::Mechanism { .. } => "restore_mechanism",
            RestoreError::Filesystem { .. } => "filesystem",
            RestoreError::UnsafeDestination { .. } => "unsafe_destination",
            RestoreError::ControlPlane(_) | RestoreError::Http(_) => "control_plane",
            RestoreError::Serialization(_) => "serialization",
            RestoreError::Io(_) => "io",
            RestoreError::Cancelled => "cancelled",
        }
    }

    /// Whether a caller-level retry of the whole attempt could succeed
    /// without changing anything (connectivity failures only).
    pub fn is_transient(&self) -> bool {
        match self {
            RestoreError::Mechanism { class, .. } => class.is_transient(),
            RestoreError::Continuity { cause, .. } => cause.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RestoreError>;
