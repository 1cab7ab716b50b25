//! Directory tree helpers used when data has to cross filesystems.
//!
//! Symbolic links are never followed: they are recreated as links.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
}

/// One node of a tree, root included
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub path: PathBuf,
    /// Path relative to the root; empty for the root itself
    pub relative_path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
}

/// All nodes under `root`, parents before children, siblings sorted by name
pub fn walk_tree(root: &Path) -> io::Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        let metadata = entry.path().symlink_metadata()?;
        let kind = if metadata.file_type().is_symlink() {
            EntryKind::Symlink
        } else if metadata.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        let relative_path = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();

        entries.push(TreeEntry {
            path: entry.path().to_path_buf(),
            relative_path,
            kind,
            size: metadata.len(),
        });
    }

    Ok(entries)
}

/// Copy `src` (file, directory or link) to `dst`, which must not exist.
/// Permissions of regular files are preserved by `fs::copy`.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in walk_tree(src)? {
        let target = if entry.relative_path.as_os_str().is_empty() {
            dst.to_path_buf()
        } else {
            dst.join(&entry.relative_path)
        };

        match entry.kind {
            EntryKind::Dir => {
                fs::create_dir(&target)?;
                fs::set_permissions(&target, fs::metadata(&entry.path)?.permissions())?;
            }
            EntryKind::File => {
                fs::copy(&entry.path, &target)?;
            }
            EntryKind::Symlink => {
                std::os::unix::fs::symlink(fs::read_link(&entry.path)?, &target)?;
            }
        }
    }

    Ok(())
}

/// Remove a file, link or whole directory tree
pub fn remove_any(path: &Path) -> io::Result<()> {
    let metadata = path.symlink_metadata()?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Whether two trees have the same shape, link targets and file contents
pub fn same_tree(a: &Path, b: &Path) -> io::Result<bool> {
    let left = walk_tree(a)?;
    let right = walk_tree(b)?;

    if left.len() != right.len() {
        return Ok(false);
    }

    for (l, r) in left.iter().zip(right.iter()) {
        if l.relative_path != r.relative_path || l.kind != r.kind {
            return Ok(false);
        }
        let equal = match l.kind {
            EntryKind::Dir => true,
            EntryKind::Symlink => fs::read_link(&l.path)? == fs::read_link(&r.path)?,
            EntryKind::File => l.size == r.size && same_contents(&l.path, &r.path)?,
        };
        if !equal {
            return Ok(false);
        }
    }

    Ok(true)
}

fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    let mut left = fs::File::open(a)?;
    let mut right = fs::File::open(b)?;
    let mut left_buf = vec![0u8; 64 * 1024];
    let mut right_buf = vec![0u8; 64 * 1024];

    loop {
        let n = read_full(&mut left, &mut left_buf)?;
        let m = read_full(&mut right, &mut right_buf)?;
        if n != m || left_buf[..n] != right_buf[..m] {
            return Ok(false);
        }
        if n == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` as far as the reader allows
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("archive_status")).unwrap();
        fs::write(root.join("000000010000000000000002"), vec![7u8; 100_000]).unwrap();
        fs::write(root.join("archive_status/000000010000000000000002.done"), "").unwrap();
        std::os::unix::fs::symlink("000000010000000000000002", root.join("latest")).unwrap();
    }

    #[test]
    fn test_copy_tree_preserves_shape() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        sample_tree(&src);

        copy_tree(&src, &dst).unwrap();

        assert!(same_tree(&src, &dst).unwrap());
        assert!(dst.join("latest").symlink_metadata().unwrap().file_type().is_symlink());
        let relative: Vec<_> = walk_tree(&dst)
            .unwrap()
            .into_iter()
            .map(|e| e.relative_path)
            .collect();
        assert_eq!(relative[0], PathBuf::new());
        assert_eq!(relative.len(), 5);
    }

    #[test]
    fn test_same_tree_detects_differences() {
        let temp_dir = TempDir::new().unwrap();
        let a = temp_dir.path().join("a");
        let b = temp_dir.path().join("b");
        sample_tree(&a);
        sample_tree(&b);
        assert!(same_tree(&a, &b).unwrap());

        let mut content = vec![7u8; 100_000];
        content[99_999] = 8;
        fs::write(b.join("000000010000000000000002"), content).unwrap();
        assert!(!same_tree(&a, &b).unwrap());
    }

    #[test]
    fn test_copy_and_remove_single_file() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("segment");
        let dst = temp_dir.path().join("copy");
        fs::write(&src, "wal").unwrap();

        copy_tree(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "wal");

        remove_any(&src).unwrap();
        assert!(!src.exists());
    }
}
