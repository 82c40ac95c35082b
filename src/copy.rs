use std::fs::{self, File, Metadata};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;

use filetime::FileTime;
use tracing::{debug, warn};

use crate::args::{CopyOptions, TreePolicy};
use crate::classify::{EntryKind, entry_kind, is_directory, list_entries};
use crate::error::CopyError;
use crate::fanout::fan_out_copy;
use crate::hash::{hash_file, hash_folder};
use crate::progress::SharedProgress;

/// Copy one file to every destination and verify each copy by digest.
///
/// The whole copy-and-verify cycle is retried, for all destinations at once,
/// until it succeeds or `options.max_attempts` cycles have run. Missing or
/// non-regular sources and destinations that cannot be created fail at once.
pub fn copy_file<S, D>(
    source: S,
    destinations: &[D],
    options: &CopyOptions,
    progress: &SharedProgress,
) -> Result<(), CopyError>
where
    S: AsRef<Path>,
    D: AsRef<Path>,
{
    options.validate()?;
    let source = source.as_ref();
    progress.set_current_file(source);
    CopyJob::new(source, destinations, options.max_attempts).run(options, progress, |path| {
        File::create(path)
    })
}

/// Copy a directory tree to every destination, verifying each file.
///
/// With [`TreePolicy::BestEffort`] an entry that fails is recorded in the
/// error log (or the tracing output when there is no log) and the walk goes
/// on; the call still succeeds. [`TreePolicy::Strict`] returns the first entry
/// error. A bad source root, unreadable source directory or uncreatable
/// destination root is returned under either policy, as is cancellation.
/// Symlinks to directories are skipped; FIFOs and other special entries fail
/// as [`CopyError::NotRegularFile`].
///
/// With `options.tree_check`, every pass is followed by a comparison of the
/// folder digests of source and destinations, and the whole tree is copied
/// again on mismatch, for at most `options.max_attempts` passes.
pub fn copy_tree<S, D>(
    source: S,
    destinations: &[D],
    options: &CopyOptions,
    progress: &SharedProgress,
) -> Result<(), CopyError>
where
    S: AsRef<Path>,
    D: AsRef<Path>,
{
    options.validate()?;
    let source = source.as_ref();
    let destinations: Vec<PathBuf> = destinations
        .iter()
        .map(|d| d.as_ref().to_path_buf())
        .collect();

    let mut create = |path: &Path| File::create(path);

    if !options.tree_check {
        return copy_dir(source, &destinations, options, progress, &mut create);
    }

    match copy_dir_checked(source, &destinations, options, progress, &mut create) {
        Err(err @ CopyError::RetriesExceeded { .. }) if options.policy == TreePolicy::BestEffort => {
            record_failure(progress, source, &err);
            Ok(())
        }
        result => result,
    }
}

/// One file, its destinations and its attempt budget.
struct CopyJob<'a> {
    source: &'a Path,
    destinations: Vec<&'a Path>,
    max_attempts: u32,
}

impl<'a> CopyJob<'a> {
    fn new<D: AsRef<Path>>(source: &'a Path, destinations: &'a [D], max_attempts: u32) -> Self {
        Self {
            source,
            destinations: destinations.iter().map(AsRef::as_ref).collect(),
            max_attempts,
        }
    }

    fn run<W, F>(
        &self,
        options: &CopyOptions,
        progress: &SharedProgress,
        mut create: F,
    ) -> Result<(), CopyError>
    where
        W: Write,
        F: FnMut(&Path) -> io::Result<W>,
    {
        let stats = progress.stats();
        let mut attempt = 0;

        while attempt < self.max_attempts {
            if progress.is_cancelled() {
                return Err(CopyError::Cancelled);
            }
            if attempt > 0 && !options.retry_wait.is_zero() {
                thread::sleep(options.retry_wait);
            }
            attempt += 1;

            match self.attempt(options, progress, &mut create) {
                Ok((bytes, metadata)) => {
                    stats.add_file_verified(bytes);
                    if options.preserve_mtime {
                        self.preserve_mtime(&metadata);
                    }
                    debug!(
                        source = %self.source.display(),
                        destinations = self.destinations.len(),
                        bytes,
                        attempt,
                        "verified copy"
                    );
                    return Ok(());
                }
                Err(err) if err.is_retryable() => {
                    stats.add_attempt_failed();
                    if matches!(err, CopyError::HashMismatch { .. }) {
                        stats.add_hash_mismatch();
                    }
                    warn!(
                        source = %self.source.display(),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "copy attempt failed"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Err(CopyError::RetriesExceeded {
            path: self.source.to_path_buf(),
            attempts: self.max_attempts,
        })
    }

    /// One full cycle: stat, open, transfer, verify.
    fn attempt<W, F>(
        &self,
        options: &CopyOptions,
        progress: &SharedProgress,
        create: &mut F,
    ) -> Result<(u64, Metadata), CopyError>
    where
        W: Write,
        F: FnMut(&Path) -> io::Result<W>,
    {
        let metadata =
            fs::metadata(self.source).map_err(|e| CopyError::from_io(self.source, e))?;
        if !metadata.is_file() {
            return Err(CopyError::NotRegularFile {
                path: self.source.to_path_buf(),
            });
        }

        let mut reader =
            File::open(self.source).map_err(|e| CopyError::from_io(self.source, e))?;
        let mut writers = self
            .destinations
            .iter()
            .map(|&dst| create(dst).map_err(|e| CopyError::from_io(dst, e)))
            .collect::<Result<Vec<_>, _>>()?;

        let bytes = fan_out_copy(
            &mut reader,
            &mut writers,
            Some(metadata.len()),
            progress.counter(),
            progress.cancel_token(),
        )
        .map_err(|e| e.into_copy_error(self.source, &self.destinations))?;
        drop(writers);

        let expected = hash_file(self.source, options.algorithm).map_err(attempt_failure)?;
        for dst in &self.destinations {
            let actual = hash_file(dst, options.algorithm).map_err(attempt_failure)?;
            if actual != expected {
                return Err(CopyError::HashMismatch {
                    path: dst.to_path_buf(),
                });
            }
        }
        Ok((bytes, metadata))
    }

    fn preserve_mtime(&self, metadata: &Metadata) {
        let mtime = FileTime::from_last_modification_time(metadata);
        for dst in &self.destinations {
            if let Err(e) = filetime::set_file_mtime(dst, mtime) {
                debug!(destination = %dst.display(), error = %e, "could not set mtime");
            }
        }
    }
}

/// A file that cannot be hashed during verification only fails the attempt.
fn attempt_failure(err: CopyError) -> CopyError {
    match err {
        CopyError::NotFound { path } => CopyError::Read {
            path,
            source: io::ErrorKind::NotFound.into(),
        },
        CopyError::Access { path, source } => CopyError::Read { path, source },
        other => other,
    }
}

/// Steps shared by every pass over a directory: check the source, list it and
/// create the destination directories. Returns the listing.
fn prepare_dir(
    source: &Path,
    destinations: &[PathBuf],
    options: &CopyOptions,
    progress: &SharedProgress,
) -> Result<Vec<PathBuf>, CopyError> {
    if !is_directory(source)? {
        return Err(CopyError::NotADirectory {
            path: source.to_path_buf(),
        });
    }
    let entries = list_entries(source, options.entry_order)?;

    for dst in destinations {
        let existed = dst.is_dir();
        fs::create_dir_all(dst).map_err(|e| CopyError::from_io(dst, e))?;
        if !existed {
            progress.stats().add_dir_created();
        }
    }
    Ok(entries)
}

fn copy_dir<W, F>(
    source: &Path,
    destinations: &[PathBuf],
    options: &CopyOptions,
    progress: &SharedProgress,
    create: &mut F,
) -> Result<(), CopyError>
where
    W: Write,
    F: FnMut(&Path) -> io::Result<W>,
{
    let entries = prepare_dir(source, destinations, options, progress)?;
    copy_entries(&entries, destinations, options, progress, create)
}

fn copy_entries<W, F>(
    entries: &[PathBuf],
    destinations: &[PathBuf],
    options: &CopyOptions,
    progress: &SharedProgress,
    create: &mut F,
) -> Result<(), CopyError>
where
    W: Write,
    F: FnMut(&Path) -> io::Result<W>,
{
    for entry in entries {
        if progress.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        let Some(name) = entry.file_name() else {
            continue;
        };
        let targets: Vec<PathBuf> = destinations.iter().map(|d| d.join(name)).collect();

        let result = match entry_kind(entry) {
            Ok(EntryKind::Directory) => copy_dir(entry, &targets, options, progress, create),
            Ok(EntryKind::File) => {
                progress.set_current_file(entry);
                CopyJob::new(entry, &targets, options.max_attempts).run(
                    options,
                    progress,
                    &mut *create,
                )
            }
            Ok(EntryKind::DirectoryLink) => {
                debug!(path = %entry.display(), "not following directory symlink");
                Ok(())
            }
            Ok(EntryKind::Special) => Err(CopyError::NotRegularFile {
                path: entry.to_path_buf(),
            }),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {}
            Err(CopyError::Cancelled) => return Err(CopyError::Cancelled),
            Err(err) => match options.policy {
                TreePolicy::Strict => return Err(err),
                TreePolicy::BestEffort => record_failure(progress, entry, &err),
            },
        }
    }
    Ok(())
}

/// Whole-tree passes, each accepted only when the folder digests agree.
///
/// A pass walks under `options.policy`. A strict walk that stops on an
/// exhausted file retry, or a failed transfer, starts another pass; any other
/// entry error is returned as is. A digest that cannot be computed for a
/// reason retrying will not fix ends the check the same way.
fn copy_dir_checked<W, F>(
    source: &Path,
    destinations: &[PathBuf],
    options: &CopyOptions,
    progress: &SharedProgress,
    create: &mut F,
) -> Result<(), CopyError>
where
    W: Write,
    F: FnMut(&Path) -> io::Result<W>,
{
    for pass in 1..=options.max_attempts {
        if progress.is_cancelled() {
            return Err(CopyError::Cancelled);
        }
        if pass > 1 && !options.retry_wait.is_zero() {
            thread::sleep(options.retry_wait);
        }
        progress.stats().add_tree_pass();

        let entries = prepare_dir(source, destinations, options, progress)?;
        if let Err(err) = copy_entries(&entries, destinations, options, progress, create) {
            if !worth_another_pass(&err) {
                return Err(err);
            }
            warn!(source = %source.display(), pass, error = %err, "tree pass failed");
            continue;
        }

        match trees_match(source, destinations, options) {
            Ok(true) => {
                debug!(source = %source.display(), pass, "tree digests match");
                return Ok(());
            }
            Ok(false) => {
                warn!(source = %source.display(), pass, "tree digest mismatch");
            }
            Err(err) if worth_another_pass(&err) => {
                warn!(source = %source.display(), pass, error = %err, "tree digest failed");
            }
            Err(err) => match options.policy {
                TreePolicy::Strict => return Err(err),
                TreePolicy::BestEffort => {
                    let path = err.path().unwrap_or(source).to_path_buf();
                    record_failure(progress, &path, &err);
                    return Ok(());
                }
            },
        }
    }

    Err(CopyError::RetriesExceeded {
        path: source.to_path_buf(),
        attempts: options.max_attempts,
    })
}

fn worth_another_pass(err: &CopyError) -> bool {
    err.is_retryable() || matches!(err, CopyError::RetriesExceeded { .. })
}

fn trees_match(
    source: &Path,
    destinations: &[PathBuf],
    options: &CopyOptions,
) -> Result<bool, CopyError> {
    let expected = hash_folder(source, options.algorithm, options.entry_order)?;
    for dst in destinations {
        if hash_folder(dst, options.algorithm, options.entry_order)? != expected {
            return Ok(false);
        }
    }
    Ok(true)
}

fn record_failure(progress: &SharedProgress, path: &Path, err: &CopyError) {
    progress.stats().add_file_failed();
    match progress.error_log() {
        Some(log) => {
            debug!(path = %path.display(), error = %err, "recorded copy failure");
            log.push(path, err.to_string());
        }
        None => warn!(path = %path.display(), error = %err, "could not copy"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    const SAMPLE: &[u8] = b"This is a sample text.\n";

    /// Wraps a real file and misbehaves on writes.
    struct Faulty {
        file: File,
        fault: Fault,
    }

    #[derive(Clone, Copy)]
    enum Fault {
        None,
        DropLastByte,
        FlipFirstByte,
    }

    impl Write for Faulty {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.fault {
                Fault::None => self.file.write(buf),
                Fault::DropLastByte => {
                    let n = buf.len().saturating_sub(1);
                    self.file.write_all(&buf[..n])?;
                    Ok(n)
                }
                Fault::FlipFirstByte => {
                    let mut corrupted = buf.to_vec();
                    if let Some(first) = corrupted.first_mut() {
                        *first ^= 0xFF;
                    }
                    self.file.write_all(&corrupted)?;
                    Ok(buf.len())
                }
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    fn setup() -> (tempfile::TempDir, PathBuf, Vec<PathBuf>) {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("text"), SAMPLE).unwrap();
        let dests = ["dst1", "dst2"]
            .iter()
            .map(|d| {
                fs::create_dir(tmp.path().join(d)).unwrap();
                tmp.path().join(d).join("text")
            })
            .collect();
        (tmp, src.join("text"), dests)
    }

    fn run_with_fault(
        source: &Path,
        dests: &[PathBuf],
        max_attempts: u32,
        fault_for_attempt: impl Fn(u32) -> Fault,
        progress: &SharedProgress,
    ) -> (Result<(), CopyError>, u32) {
        let options = CopyOptions {
            max_attempts,
            ..CopyOptions::default()
        };
        let creates = Cell::new(0u32);
        let per_attempt = dests.len() as u32;
        let result = CopyJob::new(source, dests, max_attempts).run(&options, progress, |path| {
            let attempt = creates.get() / per_attempt;
            creates.set(creates.get() + 1);
            Ok(Faulty {
                file: File::create(path)?,
                fault: fault_for_attempt(attempt),
            })
        });
        (result, creates.get() / per_attempt)
    }

    #[test]
    fn copies_sample_to_two_destinations() {
        let (_tmp, src, dests) = setup();
        let progress = SharedProgress::new();

        copy_file(&src, &dests, &CopyOptions::default(), &progress).unwrap();

        for dst in &dests {
            assert_eq!(fs::read(dst).unwrap(), SAMPLE);
        }
        assert_eq!(progress.counter().get(), SAMPLE.len() as u64);
        assert_eq!(progress.stats().files_verified(), 1);
    }

    #[test]
    fn truncating_destination_exhausts_exactly_max_attempts() {
        let (_tmp, src, dests) = setup();
        let progress = SharedProgress::new();

        let (result, cycles) = run_with_fault(&src, &dests, 3, |_| Fault::DropLastByte, &progress);

        match result {
            Err(CopyError::RetriesExceeded { path, attempts }) => {
                assert_eq!(path, src);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(cycles, 3);
        assert_eq!(progress.stats().attempts_failed(), 3);
        // every cycle re-reads the source
        assert_eq!(progress.counter().get(), 3 * SAMPLE.len() as u64);
    }

    #[test]
    fn corrupted_copies_are_hash_mismatches() {
        let (_tmp, src, dests) = setup();
        let progress = SharedProgress::new();

        let (result, cycles) = run_with_fault(&src, &dests, 2, |_| Fault::FlipFirstByte, &progress);

        assert!(matches!(result, Err(CopyError::RetriesExceeded { .. })));
        assert_eq!(cycles, 2);
        assert_eq!(
            progress
                .stats()
                .hash_mismatches
                .load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }

    #[test]
    fn transient_fault_is_retried_until_verified() {
        let (_tmp, src, dests) = setup();
        let progress = SharedProgress::new();

        let (result, cycles) = run_with_fault(
            &src,
            &dests,
            5,
            |attempt| if attempt == 0 { Fault::FlipFirstByte } else { Fault::None },
            &progress,
        );

        result.unwrap();
        assert_eq!(cycles, 2);
        assert_eq!(progress.stats().attempts_failed(), 1);
        for dst in &dests {
            assert_eq!(fs::read(dst).unwrap(), SAMPLE);
        }
    }

    #[test]
    fn missing_source_is_terminal() {
        let (tmp, _src, dests) = setup();
        let progress = SharedProgress::new();

        let err = copy_file(
            tmp.path().join("notexist"),
            &dests,
            &CopyOptions::default(),
            &progress,
        )
        .unwrap_err();

        assert!(matches!(err, CopyError::NotFound { .. }));
        assert_eq!(progress.counter().get(), 0);
        assert_eq!(progress.stats().attempts_failed(), 0);
    }

    #[test]
    fn directory_source_is_not_a_regular_file() {
        let (tmp, _src, dests) = setup();
        let err = copy_file(
            tmp.path().join("src"),
            &dests,
            &CopyOptions::default(),
            &SharedProgress::new(),
        )
        .unwrap_err();
        assert!(matches!(err, CopyError::NotRegularFile { .. }));
    }

    #[test]
    fn zero_attempts_are_rejected() {
        let (_tmp, src, dests) = setup();
        let options = CopyOptions {
            max_attempts: 0,
            ..CopyOptions::default()
        };
        assert!(matches!(
            copy_file(&src, &dests, &options, &SharedProgress::new()),
            Err(CopyError::InvalidOptions(_))
        ));
    }

    #[test]
    fn cancelled_copy_does_not_start() {
        let (_tmp, src, dests) = setup();
        let progress = SharedProgress::new();
        progress.cancel();
        assert!(matches!(
            copy_file(&src, &dests, &CopyOptions::default(), &progress),
            Err(CopyError::Cancelled)
        ));
        assert!(!dests[0].exists());
    }

    #[test]
    fn tree_check_recovers_on_a_later_pass() {
        for policy in [TreePolicy::Strict, TreePolicy::BestEffort] {
            let (tmp, file, _) = setup();
            let src = tmp.path().join("src");
            let dests = vec![tmp.path().join("dst1"), tmp.path().join("dst2")];
            let options = CopyOptions {
                max_attempts: 2,
                tree_check: true,
                policy,
                ..CopyOptions::default()
            };
            let progress = SharedProgress::new();

            // both file attempts of the first pass are corrupted
            let mut creates = 0;
            let mut create = |path: &Path| -> io::Result<Faulty> {
                let fault = if creates < 4 {
                    Fault::FlipFirstByte
                } else {
                    Fault::None
                };
                creates += 1;
                Ok(Faulty {
                    file: File::create(path)?,
                    fault,
                })
            };
            copy_dir_checked(&src, &dests, &options, &progress, &mut create).unwrap();

            assert_eq!(creates, 6);
            assert_eq!(
                progress
                    .stats()
                    .tree_passes
                    .load(std::sync::atomic::Ordering::Relaxed),
                2
            );
            for dst in &dests {
                assert_eq!(fs::read(dst.join("text")).unwrap(), SAMPLE);
            }
            let failures = progress.error_log().unwrap().snapshot();
            match policy {
                TreePolicy::Strict => assert!(failures.is_empty()),
                TreePolicy::BestEffort => {
                    assert_eq!(failures.len(), 1);
                    assert_eq!(failures[0].path, file);
                }
            }
        }
    }

    #[test]
    fn verification_hash_failure_is_retryable() {
        let err = attempt_failure(CopyError::NotFound {
            path: PathBuf::from("gone"),
        });
        assert!(err.is_retryable());
    }

    #[test]
    fn mtime_is_preserved() {
        let (_tmp, src, dests) = setup();
        let old = FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(&src, old).unwrap();

        copy_file(&src, &dests, &CopyOptions::default(), &SharedProgress::new()).unwrap();

        for dst in &dests {
            let meta = fs::metadata(dst).unwrap();
            assert_eq!(FileTime::from_last_modification_time(&meta), old);
        }
    }
}
