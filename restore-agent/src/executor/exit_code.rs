//! Exit-code contracts of the barman-cloud tools.
//!
//! Each tool documents its own meaning for exit codes 1-3. The mapping here is
//! total: every `(tool, code)` pair yields an [`ExitClass`], unknown codes fall
//! into [`ExitClass::Unknown`] carrying the raw value.

use serde::Serialize;
use std::fmt;

/// The external tools the agent drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ToolKind {
    /// Restores a base backup into a directory
    Restore,
    /// Fetches a single WAL segment
    WalRestore,
    /// Lists the backups of a server
    BackupList,
    /// Checks that a WAL archive destination is unused
    CheckWalArchive,
}

impl ToolKind {
    /// Executable name used when no override is configured
    pub fn default_program(&self) -> &'static str {
        match self {
            ToolKind::Restore => "barman-cloud-restore",
            ToolKind::WalRestore => "barman-cloud-wal-restore",
            ToolKind::BackupList => "barman-cloud-backup-list",
            ToolKind::CheckWalArchive => "barman-cloud-check-wal-archive",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_program())
    }
}

/// Classified failure of an external tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitClass {
    /// The requested backup or WAL segment does not exist
    NotFound,
    /// The connection to the cloud provider failed
    Connectivity,
    /// The tool rejected its command line
    InvalidInput,
    /// The operation ran and failed
    Failed,
    /// The destination already holds WAL archive content
    ArchiveInUse,
    /// The process was killed by a signal and has no exit code
    Terminated,
    /// Undocumented exit code
    Unknown(i32),
}

impl ExitClass {
    /// Classify a process exit. `None` means the process died from a signal.
    pub fn classify(tool: ToolKind, code: Option<i32>) -> ExitClass {
        let Some(code) = code else {
            return ExitClass::Terminated;
        };

        match (tool, code) {
            (ToolKind::Restore, 1) => ExitClass::Failed,
            (ToolKind::WalRestore, 1) => ExitClass::NotFound,
            (ToolKind::CheckWalArchive, 1) => ExitClass::ArchiveInUse,
            (ToolKind::BackupList, 1) => ExitClass::Failed,
            (_, 2) => ExitClass::Connectivity,
            (_, 3) => ExitClass::InvalidInput,
            (_, other) => ExitClass::Unknown(other),
        }
    }

    /// Connectivity problems are the only class worth retrying as-is
    pub fn is_transient(&self) -> bool {
        matches!(self, ExitClass::Connectivity)
    }
}

impl fmt::Display for ExitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitClass::NotFound => write!(f, "the requested object was not found (exit code 1)"),
            ExitClass::Connectivity => {
                write!(f, "the connection to the cloud provider failed (exit code 2)")
            }
            ExitClass::InvalidInput => write!(f, "invalid command input (exit code 3)"),
            ExitClass::Failed => write!(f, "the operation was not successful (exit code 1)"),
            ExitClass::ArchiveInUse => {
                write!(f, "the WAL archive destination is not empty (exit code 1)")
            }
            ExitClass::Terminated => write!(f, "terminated by a signal"),
            ExitClass::Unknown(code) => write!(f, "unexpected exit code {}", code),
        }
    }
}
