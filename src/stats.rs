use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct Statistics {
    pub dirs_created: AtomicUsize,
    pub files_verified: AtomicUsize,
    pub bytes_verified: AtomicU64,
    pub attempts_failed: AtomicUsize,
    pub hash_mismatches: AtomicUsize,
    pub files_failed: AtomicUsize,
    pub tree_passes: AtomicUsize,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dir_created(&self) {
        self.dirs_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_file_verified(&self, bytes: u64) {
        self.files_verified.fetch_add(1, Ordering::Relaxed);
        self.bytes_verified.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_attempt_failed(&self) {
        self.attempts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_hash_mismatch(&self) {
        self.hash_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_tree_pass(&self) {
        self.tree_passes.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter in place, so all holders of this `Arc` see the reset.
    pub fn reset(&self) {
        for counter in [
            &self.dirs_created,
            &self.files_verified,
            &self.attempts_failed,
            &self.hash_mismatches,
            &self.files_failed,
            &self.tree_passes,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.bytes_verified.store(0, Ordering::Relaxed);
    }

    pub fn files_verified(&self) -> usize {
        self.files_verified.load(Ordering::Relaxed)
    }

    pub fn files_failed(&self) -> usize {
        self.files_failed.load(Ordering::Relaxed)
    }

    pub fn attempts_failed(&self) -> usize {
        self.attempts_failed.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Statistics:")?;
        writeln!(
            f,
            "    Directories created: {}",
            self.dirs_created.load(Ordering::Relaxed)
        )?;
        writeln!(
            f,
            "    Files verified:      {}",
            self.files_verified.load(Ordering::Relaxed)
        )?;
        writeln!(
            f,
            "    Bytes verified:      {}",
            self.bytes_verified.load(Ordering::Relaxed)
        )?;
        writeln!(
            f,
            "    Failed attempts:     {}",
            self.attempts_failed.load(Ordering::Relaxed)
        )?;
        writeln!(
            f,
            "    Hash mismatches:     {}",
            self.hash_mismatches.load(Ordering::Relaxed)
        )?;
        writeln!(
            f,
            "    Files failed:        {}",
            self.files_failed.load(Ordering::Relaxed)
        )?;
        write!(
            f,
            "    Tree passes:         {}",
            self.tree_passes.load(Ordering::Relaxed)
        )
    }
}
