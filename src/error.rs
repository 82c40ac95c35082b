//! Error taxonomy for the verified copy engine.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("no such file or directory: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("cannot access {}: {source}", .path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a regular file", .path.display())]
    NotRegularFile { path: PathBuf },

    #[error("{} is not a directory", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("short write on {}: {written} of {expected} bytes", .path.display())]
    ShortWrite {
        path: PathBuf,
        written: usize,
        expected: usize,
    },

    #[error("write to {} failed: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read from {} failed: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("digest of {} does not match its source", .path.display())]
    HashMismatch { path: PathBuf },

    #[error("could not verify a copy of {} after {attempts} attempts", .path.display())]
    RetriesExceeded { path: PathBuf, attempts: u32 },

    #[error("copy cancelled")]
    Cancelled,

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error(
        "cannot copy {} into its own subdirectory {}",
        .source_dir.display(),
        .destination.display()
    )]
    Overlap {
        source_dir: PathBuf,
        destination: PathBuf,
    },
}

impl CopyError {
    /// Classify a failed stat/open on `path`.
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            CopyError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            CopyError::Access {
                path: path.to_path_buf(),
                source: err,
            }
        }
    }

    /// Whether a failed attempt with this error may be retried at the file level.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CopyError::ShortWrite { .. }
                | CopyError::Write { .. }
                | CopyError::Read { .. }
                | CopyError::HashMismatch { .. }
        )
    }

    /// The path this error is about, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            CopyError::NotFound { path }
            | CopyError::Access { path, .. }
            | CopyError::NotRegularFile { path }
            | CopyError::NotADirectory { path }
            | CopyError::ShortWrite { path, .. }
            | CopyError::Write { path, .. }
            | CopyError::Read { path, .. }
            | CopyError::HashMismatch { path }
            | CopyError::RetriesExceeded { path, .. } => Some(path),
            CopyError::Overlap { destination, .. } => Some(destination),
            CopyError::Cancelled | CopyError::InvalidOptions(_) => None,
        }
    }
}

/// Failure of a single fan-out pass. Destinations are identified by their
/// index in the slice handed to the copier.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("source read failed: {0}")]
    Read(#[source] io::Error),

    #[error("destination #{index} accepted {written} of {expected} bytes")]
    ShortWrite {
        index: usize,
        written: usize,
        expected: usize,
    },

    #[error("destination #{index} write failed: {source}")]
    Write {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Attach paths: `source` for read failures, `destinations[index]` for writes.
    pub fn into_copy_error<P: AsRef<Path>>(self, source: &Path, destinations: &[P]) -> CopyError {
        let dest_path = |index: usize| {
            destinations
                .get(index)
                .map(|p| p.as_ref().to_path_buf())
                .unwrap_or_default()
        };
        match self {
            TransferError::Read(err) => CopyError::Read {
                path: source.to_path_buf(),
                source: err,
            },
            TransferError::ShortWrite {
                index,
                written,
                expected,
            } => CopyError::ShortWrite {
                path: dest_path(index),
                written,
                expected,
            },
            TransferError::Write { index, source } => CopyError::Write {
                path: dest_path(index),
                source,
            },
            TransferError::Cancelled => CopyError::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = CopyError::from_io(
            Path::new("/nope"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, CopyError::NotFound { .. }));
        assert_eq!(err.path(), Some(Path::new("/nope")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn permission_denied_maps_to_access() {
        let err = CopyError::from_io(
            Path::new("/root/secret"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, CopyError::Access { .. }));
    }

    #[test]
    fn transfer_errors_name_the_failing_destination() {
        let dests = [PathBuf::from("a/out"), PathBuf::from("b/out")];
        let err = TransferError::ShortWrite {
            index: 1,
            written: 3,
            expected: 8,
        }
        .into_copy_error(Path::new("src/in"), &dests);
        match err {
            CopyError::ShortWrite {
                path,
                written,
                expected,
            } => {
                assert_eq!(path, PathBuf::from("b/out"));
                assert_eq!((written, expected), (3, 8));
            }
            other => panic!("unexpected {other:?}"),
        }

        let err = TransferError::Read(io::Error::other("eio"))
            .into_copy_error(Path::new("src/in"), &dests);
        assert_eq!(err.path(), Some(Path::new("src/in")));
        assert!(err.is_retryable());
    }

    #[test]
    fn retries_exceeded_message_names_path() {
        let err = CopyError::RetriesExceeded {
            path: PathBuf::from("src/text"),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "could not verify a copy of src/text after 3 attempts"
        );
    }
}
