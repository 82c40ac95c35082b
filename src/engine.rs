use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::args::CopyOptions;
use crate::copy::copy_tree;
use crate::error::CopyError;
use crate::progress::{ProgressState, SharedProgress};
use crate::stats::Statistics;
use crate::utils::{format_bytes, format_time, scan_tree};

/// One top-level replication: a source tree to any number of destinations.
pub struct CopyEngine {
    options: CopyOptions,
    progress: SharedProgress,
}

impl CopyEngine {
    pub fn new(options: CopyOptions, progress: SharedProgress) -> Self {
        Self { options, progress }
    }

    pub fn progress(&self) -> &SharedProgress {
        &self.progress
    }

    /// Run on a background thread. Poll [`SharedProgress`] until its state is finished.
    pub fn spawn(
        self,
        source: PathBuf,
        destinations: Vec<PathBuf>,
    ) -> JoinHandle<Result<Arc<Statistics>, CopyError>> {
        thread::spawn(move || self.run(&source, &destinations))
    }

    pub fn run<D: AsRef<Path>>(
        &self,
        source: &Path,
        destinations: &[D],
    ) -> Result<Arc<Statistics>, CopyError> {
        let result = self.execute(source, destinations);
        let state = match &result {
            Ok(()) => ProgressState::Completed,
            Err(CopyError::Cancelled) => ProgressState::Cancelled,
            Err(_) => ProgressState::Failed,
        };
        if let Err(e) = &result {
            warn!(source = %source.display(), error = %e, "copy stopped");
        }
        self.progress.set_state(state);
        result.map(|()| Arc::clone(self.progress.stats()))
    }

    fn execute<D: AsRef<Path>>(&self, source: &Path, destinations: &[D]) -> Result<(), CopyError> {
        self.options.validate()?;
        if destinations.is_empty() {
            return Err(CopyError::InvalidOptions(
                "at least one destination is required".to_string(),
            ));
        }
        if !source.exists() {
            return Err(CopyError::NotFound {
                path: source.to_path_buf(),
            });
        }

        // Infinite recursion check
        let can_source = fs::canonicalize(source).map_err(|e| CopyError::from_io(source, e))?;
        for dest in destinations {
            let dest = dest.as_ref();
            if let Some(can_dest) = canonicalize_nearest(dest) {
                if can_dest.starts_with(&can_source) {
                    return Err(CopyError::Overlap {
                        source_dir: source.to_path_buf(),
                        destination: dest.to_path_buf(),
                    });
                }
            }
        }

        let start_time = SystemTime::now();
        info!(
            started = %format_time(start_time),
            source = %source.display(),
            destinations = %join_paths(destinations),
            options = %self.options.to_string_flags(),
            "starting verified copy"
        );

        self.progress.set_state(ProgressState::Scanning);
        match scan_tree(source) {
            Ok(size) => {
                self.progress.set_bytes_total(size.bytes);
                info!(files = size.files, bytes = %format_bytes(size.bytes), "scanned source");
            }
            Err(e) => warn!(error = %e, "could not scan source, progress total unknown"),
        }

        self.progress.set_state(ProgressState::Copying);
        copy_tree(source, destinations, &self.options, &self.progress)?;

        let elapsed = SystemTime::now()
            .duration_since(start_time)
            .unwrap_or(Duration::from_secs(0));
        let failures = self.progress.error_log().map_or(0, |log| log.len());
        info!(
            finished = %format_time(SystemTime::now()),
            elapsed_secs = elapsed.as_secs(),
            failures,
            "{}",
            self.progress.stats()
        );
        Ok(())
    }
}

/// Canonical form of `path`, or of its nearest existing ancestor joined with
/// the missing tail. Destinations usually do not exist yet.
fn canonicalize_nearest(path: &Path) -> Option<PathBuf> {
    let mut tail = Vec::new();
    let mut current = path;
    loop {
        if let Ok(canonical) = fs::canonicalize(current) {
            let joined = tail.iter().rev().fold(canonical, |acc: PathBuf, part| acc.join(part));
            return Some(joined);
        }
        tail.push(current.file_name()?);
        current = current.parent()?;
        if current.as_os_str().is_empty() {
            current = Path::new(".");
        }
    }
}

fn join_paths<D: AsRef<Path>>(paths: &[D]) -> String {
    paths
        .iter()
        .map(|p| p.as_ref().display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
