use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rayon::prelude::*;

/// File count and byte size of a tree, as measured before a copy starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeSize {
    pub files: u64,
    pub bytes: u64,
}

impl std::ops::Add for TreeSize {
    type Output = TreeSize;

    fn add(self, other: TreeSize) -> TreeSize {
        TreeSize {
            files: self.files + other.files,
            bytes: self.bytes + other.bytes,
        }
    }
}

/// Total size of every file under `path` (or of `path` itself if it is a file).
/// Symlinks to directories are not followed, matching the copy walk.
///
/// Independent of the copy walk: this is what a poller compares the
/// progress counter against. Subdirectories are measured in parallel.
pub fn scan_tree(path: &Path) -> io::Result<TreeSize> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_dir() {
        return Ok(TreeSize {
            files: 1,
            bytes: metadata.len(),
        });
    }

    let entries: Vec<_> = fs::read_dir(path)?.collect::<Result<Vec<_>, io::Error>>()?;
    entries
        .par_iter()
        .map(|entry| {
            let path = entry.path();
            if entry.file_type()?.is_symlink() && path.is_dir() {
                return Ok(TreeSize::default());
            }
            scan_tree(&path)
        })
        .try_reduce(TreeSize::default, |a, b| Ok(a + b))
}

pub fn format_time(time: SystemTime) -> String {
    let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::from_secs(0));
    let secs = duration.as_secs();

    let (hour, remainder) = (secs / 3600, secs % 3600);
    let (min, sec) = (remainder / 60, remainder % 60);

    format!("{:02}:{:02}:{:02}", hour % 24, min, sec)
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
