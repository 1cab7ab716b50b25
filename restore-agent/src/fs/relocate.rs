//! Moving `pg_wal` onto a dedicated volume.
//!
//! The steps are ordered so that a crash at any point leaves a state the next
//! run completes:
//! 1. every entry of `pg_wal` is moved into the volume (rename, or a copy into
//!    `.<name>.partial` followed by a rename when the volume is another
//!    filesystem);
//! 2. a link to the volume is created at `pg_wal.relocating`;
//! 3. the now empty `pg_wal` is removed and the staged link renamed over it.

use super::tree::{copy_tree, remove_any, same_tree};
use crate::{RestoreError, Result};
use nix::errno::Errno;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The data directory entry holding WAL segments
pub const WAL_DIRECTORY: &str = "pg_wal";

const STAGED_LINK_SUFFIX: &str = ".relocating";

/// Relocate `data_dir/name` into `volume` and replace it with a link.
///
/// Returns `false` when the link is already in place.
pub async fn relocate(
    data_dir: &Path,
    name: &str,
    volume: &Path,
    cancel: &CancellationToken,
) -> Result<bool> {
    let data_dir = data_dir.to_path_buf();
    let name = name.to_string();
    let volume = volume.to_path_buf();
    let cancel = cancel.clone();

    tokio::task::spawn_blocking(move || relocate_blocking(&data_dir, &name, &volume, &cancel))
        .await
        .map_err(|e| RestoreError::Io(io::Error::other(e)))?
}

fn relocate_blocking(
    data_dir: &Path,
    name: &str,
    volume: &Path,
    cancel: &CancellationToken,
) -> Result<bool> {
    let link = data_dir.join(name);
    let staged = data_dir.join(format!("{}{}", name, STAGED_LINK_SUFFIX));

    match link.symlink_metadata() {
        Ok(meta) if meta.file_type().is_symlink() => {
            let target = fs::read_link(&link).map_err(|e| RestoreError::fs(&link, e))?;
            if target == volume {
                info!("Symlink to the WAL volume already present, skipping relocation");
                remove_if_present(&staged)?;
                return Ok(false);
            }
            return Err(RestoreError::fs(
                &link,
                io::Error::other(format!(
                    "is a link to {} instead of {}",
                    target.display(),
                    volume.display()
                )),
            ));
        }
        Ok(meta) if !meta.is_dir() => {
            return Err(RestoreError::fs(&link, io::Error::other("is not a directory")));
        }
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(&link).map_err(|e| RestoreError::fs(&link, e))?;
        }
        Err(e) => return Err(RestoreError::fs(&link, e)),
    }

    info!(
        "Relocating {} to the WAL volume {}",
        link.display(),
        volume.display()
    );
    fs::create_dir_all(volume).map_err(|e| RestoreError::fs(volume, e))?;
    remove_if_present(&staged)?;

    let mut entries = fs::read_dir(&link)
        .and_then(|dir| dir.map(|e| e.map(|e| e.file_name())).collect::<io::Result<Vec<_>>>())
        .map_err(|e| RestoreError::fs(&link, e))?;
    entries.sort();

    for entry in &entries {
        if cancel.is_cancelled() {
            return Err(RestoreError::Cancelled);
        }
        move_entry(&link.join(entry), &volume.join(entry))?;
    }
    debug!("Moved {} entries into {}", entries.len(), volume.display());

    std::os::unix::fs::symlink(volume, &staged).map_err(|e| RestoreError::fs(&staged, e))?;
    fs::remove_dir(&link).map_err(|e| RestoreError::fs(&link, e))?;
    fs::rename(&staged, &link).map_err(|e| RestoreError::fs(&link, e))?;

    info!("{} now links to {}", link.display(), volume.display());
    Ok(true)
}

/// Move one entry, never overwriting anything at `dest`
fn move_entry(src: &Path, dest: &Path) -> Result<()> {
    let partial = partial_path(dest);
    remove_if_present(&partial)?;

    if dest.symlink_metadata().is_ok() {
        // A previous run may have copied the entry and stopped before
        // removing the source
        let identical = same_tree(src, dest).map_err(|e| RestoreError::fs(dest, e))?;
        if !identical {
            return Err(RestoreError::fs(
                dest,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("refusing to overwrite with {}", src.display()),
                ),
            ));
        }
        warn!("{} was already moved, removing the source", dest.display());
        return remove_any(src).map_err(|e| RestoreError::fs(src, e));
    }

    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(Errno::EXDEV as i32) => copy_across(src, dest),
        Err(e) => Err(RestoreError::fs(src, e)),
    }
}

/// Cross-filesystem move: copy into a staged sibling, publish it with a
/// rename, then remove the source
fn copy_across(src: &Path, dest: &Path) -> Result<()> {
    let partial = partial_path(dest);
    copy_tree(src, &partial).map_err(|e| RestoreError::fs(&partial, e))?;
    fs::rename(&partial, dest).map_err(|e| RestoreError::fs(dest, e))?;
    remove_any(src).map_err(|e| RestoreError::fs(src, e))
}

fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.partial", name))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match remove_any(path) {
        Ok(()) => {
            debug!("Removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RestoreError::fs(path, e)),
    }
}
