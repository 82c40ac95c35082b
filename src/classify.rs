//! Path classification and directory listing.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CopyError;

/// Order in which directory entries are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrder {
    /// Whatever order the platform's directory read returns.
    Listing,
    /// Sorted by file name, stable across filesystems.
    #[default]
    ByName,
}

/// Returns whether `path` is a directory, following symlinks.
pub fn is_directory<P: AsRef<Path>>(path: P) -> Result<bool, CopyError> {
    let path = path.as_ref();
    let metadata = fs::metadata(path).map_err(|e| CopyError::from_io(path, e))?;
    Ok(metadata.is_dir())
}

/// What a directory entry is, as seen by a tree walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    /// A regular file, or a symlink to one.
    File,
    /// A symlink to a directory. Walks do not descend into these.
    DirectoryLink,
    /// Anything else: FIFOs, sockets, devices, dangling links.
    Special,
}

/// Classifies a tree entry without following a symlink into a directory.
pub fn entry_kind<P: AsRef<Path>>(path: P) -> Result<EntryKind, CopyError> {
    let path = path.as_ref();
    let metadata = fs::symlink_metadata(path).map_err(|e| CopyError::from_io(path, e))?;
    if metadata.is_dir() {
        return Ok(EntryKind::Directory);
    }
    if metadata.is_file() {
        return Ok(EntryKind::File);
    }
    if metadata.file_type().is_symlink() {
        return Ok(match fs::metadata(path) {
            Ok(target) if target.is_dir() => EntryKind::DirectoryLink,
            Ok(target) if target.is_file() => EntryKind::File,
            _ => EntryKind::Special,
        });
    }
    Ok(EntryKind::Special)
}

/// Reads the entries of `dir` afresh. Nothing is cached between calls.
pub fn list_entries(dir: &Path, order: EntryOrder) -> Result<Vec<PathBuf>, CopyError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| CopyError::from_io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CopyError::from_io(dir, e))?;

    if order == EntryOrder::ByName {
        entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    }
    Ok(entries)
}
