//! VRCP - Verified Replicating Copy Library
//!
//! Copies a directory tree to one or more destinations in a single read pass
//! per file, and accepts a copy only once every destination hashes equal to
//! its source. Front ends run [`CopyEngine`] on a background thread and poll
//! a [`SharedProgress`] handle.

pub mod args;
pub mod classify;
pub mod copy;
pub mod error;
pub mod fanout;
pub mod hash;
pub mod stats;
pub mod utils;

mod engine;
mod progress;

pub use args::{CopyOptions, TreePolicy};
pub use classify::{EntryKind, EntryOrder, entry_kind, is_directory, list_entries};
pub use copy::{copy_file, copy_tree};
pub use engine::CopyEngine;
pub use error::{CopyError, TransferError};
pub use fanout::fan_out_copy;
pub use hash::{ContentHasher, Digest, HashAlgorithm, hash_file, hash_folder};
pub use progress::{
    CancelToken, CopyFailure, ErrorLog, ProgressCounter, ProgressInfo, ProgressState,
    SharedProgress,
};
pub use stats::Statistics;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "VRCP";
