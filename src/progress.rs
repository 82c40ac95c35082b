//! Shared progress state between the copy task and whoever polls it.
//!
//! The copy runs on one background thread and is the only writer. A front
//! end (CLI loop, GUI frame, RPC handler) holds a clone of [`SharedProgress`]
//! and reads it at its own pace; nothing here blocks the writer for longer
//! than a short mutex section.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::stats::Statistics;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cumulative bytes read by the fan-out copier, counted once per chunk.
///
/// Retried attempts count again, so the value is an upper bound on
/// verified work rather than an exact completion count.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounter(Arc<AtomicU64>);

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// One entry that could not be copied and verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Append-only log of per-entry failures.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog(Arc<Mutex<Vec<CopyFailure>>>);

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: &Path, message: impl Into<String>) {
        lock(&self.0).push(CopyFailure {
            path: path.to_path_buf(),
            message: message.into(),
        });
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every entry recorded so far.
    pub fn snapshot(&self) -> Vec<CopyFailure> {
        lock(&self.0).clone()
    }

    /// Entries from index `from` onwards, for pollers that track what they already showed.
    pub fn since(&self, from: usize) -> Vec<CopyFailure> {
        lock(&self.0).iter().skip(from).cloned().collect()
    }

    fn clear(&self) {
        lock(&self.0).clear();
    }
}

/// Cooperative cancellation flag, checked between chunks and between entries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Current state of a copy operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    /// Initial state, not started
    Idle,
    /// Measuring the source tree
    Scanning,
    /// Copying and verifying
    Copying,
    /// Finished; failures, if any, are in the error log
    Completed,
    /// Stopped on a terminal error
    Failed,
    /// Stopped by the cancel token
    Cancelled,
}

impl ProgressState {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            ProgressState::Completed | ProgressState::Failed | ProgressState::Cancelled
        )
    }
}

/// Point-in-time view of a running copy, as seen by a poller.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressInfo {
    pub state: ProgressState,
    pub current_file: PathBuf,
    pub bytes_done: u64,
    /// Zero until the engine has scanned the source.
    pub bytes_total: u64,
    pub errors: usize,
}

impl ProgressInfo {
    /// Overall progress as a percentage (0-100). Retries can push bytes_done past the total.
    pub fn percentage(&self) -> f32 {
        if self.bytes_total == 0 {
            0.0
        } else {
            ((self.bytes_done as f32 / self.bytes_total as f32) * 100.0).min(100.0)
        }
    }
}

/// Everything the copy task shares with a poller.
#[derive(Debug, Clone)]
pub struct SharedProgress {
    bytes: ProgressCounter,
    bytes_total: Arc<AtomicU64>,
    errors: Option<ErrorLog>,
    cancel: CancelToken,
    stats: Arc<Statistics>,
    state: Arc<Mutex<ProgressState>>,
    current_file: Arc<Mutex<PathBuf>>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::with_error_log(Some(ErrorLog::new()))
    }

    /// Without an error log, best-effort failures only reach the tracing output.
    pub fn without_error_log() -> Self {
        Self::with_error_log(None)
    }

    fn with_error_log(errors: Option<ErrorLog>) -> Self {
        Self {
            bytes: ProgressCounter::new(),
            bytes_total: Arc::new(AtomicU64::new(0)),
            errors,
            cancel: CancelToken::new(),
            stats: Arc::new(Statistics::new()),
            state: Arc::new(Mutex::new(ProgressState::Idle)),
            current_file: Arc::new(Mutex::new(PathBuf::new())),
        }
    }

    pub fn counter(&self) -> &ProgressCounter {
        &self.bytes
    }

    pub fn error_log(&self) -> Option<&ErrorLog> {
        self.errors.as_ref()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    /// Request cancellation of the current operation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> ProgressState {
        *lock(&self.state)
    }

    pub(crate) fn set_state(&self, state: ProgressState) {
        *lock(&self.state) = state;
    }

    pub(crate) fn set_bytes_total(&self, total: u64) {
        self.bytes_total.store(total, Ordering::Relaxed);
    }

    pub(crate) fn set_current_file(&self, path: &Path) {
        let mut current = lock(&self.current_file);
        current.clear();
        current.push(path);
    }

    pub fn snapshot(&self) -> ProgressInfo {
        ProgressInfo {
            state: self.state(),
            current_file: lock(&self.current_file).clone(),
            bytes_done: self.bytes.get(),
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            errors: self.errors.as_ref().map_or(0, ErrorLog::len),
        }
    }

    /// Reset for a new operation. Every clone sees the reset.
    pub fn reset(&self) {
        self.cancel.reset();
        self.bytes.reset();
        self.bytes_total.store(0, Ordering::Relaxed);
        if let Some(errors) = &self.errors {
            errors.clear();
        }
        self.stats.reset();
        self.set_state(ProgressState::Idle);
        lock(&self.current_file).clear();
    }
}

impl Default for SharedProgress {
    fn default() -> Self {
        Self::new()
    }
}
