//! Archive continuity probe.
//!
//! Before anything is written to the data directory, the WAL segment the
//! chosen backup starts from is fetched into a scratch file. If the archive
//! cannot produce it, the restored instance could never reach consistency.

use super::command::{run_streaming, BarmanTools};
use super::exit_code::ToolKind;
use super::ResolvedBackup;
use crate::store::credentials::Environment;
use crate::{RestoreError, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Directory under the scratch area holding the probe file
pub const RECOVERY_SCRATCH_DIR: &str = "recovery";

/// Name of the probe file
pub const PROBE_FILE_NAME: &str = "test.wal";

/// Removes the probe file when dropped, whatever the outcome
struct ProbeFile {
    path: PathBuf,
}

impl Drop for ProbeFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(
                "Failed to remove temporary WAL file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Options for fetching `segment` into `destination`.
///
/// The recovery directive uses the same layout with `%f` and `%p` in place of
/// the segment and the destination.
pub fn wal_restore_options(resolved: &ResolvedBackup, segment: &str, destination: &str) -> Vec<String> {
    let mut options = resolved.store.endpoint_options();
    options.push(resolved.store.destination_path.clone());
    options.push(resolved.server_name.clone());
    options.push(segment.to_string());
    options.extend(resolved.store.provider_options());
    options.push(destination.to_string());
    options
}

/// Confirm the archive holds the first WAL segment the backup needs.
///
/// An empty archive and a missing segment are reported identically: both come
/// back from the tool as "not found".
pub async fn ensure_continuity(
    tools: &BarmanTools,
    resolved: &ResolvedBackup,
    env: &Environment,
    scratch_dir: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let segment = resolved.descriptor.begin_wal.clone();
    let wrap = |cause: RestoreError| match cause {
        RestoreError::Cancelled => RestoreError::Cancelled,
        cause => RestoreError::Continuity {
            segment: segment.clone(),
            cause: Box::new(cause),
        },
    };

    if segment.is_empty() {
        return Err(wrap(RestoreError::Config(format!(
            "backup {} does not record its first WAL segment",
            resolved.descriptor.id
        ))));
    }

    let probe_dir = scratch_dir.join(RECOVERY_SCRATCH_DIR);
    let probe = ProbeFile {
        path: probe_dir.join(PROBE_FILE_NAME),
    };

    tokio::fs::create_dir_all(&probe_dir)
        .await
        .map_err(|e| wrap(RestoreError::fs(&probe_dir, e)))?;

    let options = wal_restore_options(resolved, &segment, &probe.path.to_string_lossy());
    run_streaming(tools, ToolKind::WalRestore, &options, env, cancel)
        .await
        .and_then(|output| output.into_result())
        .map_err(wrap)?;

    info!("WAL segment {} is present in the archive", segment);
    drop(probe);
    Ok(())
}
