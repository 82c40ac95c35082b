//! Streaming content digests for single files and whole directory trees.
//!
//! A folder digest is one hash state fed with the bytes of every file under
//! the folder, in entry order. Names and directory structure do not enter the
//! digest, only content and the order it is visited in.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::classify::{EntryKind, EntryOrder, entry_kind, is_directory, list_entries};
use crate::error::CopyError;

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
    /// XXH3, 64-bit output.
    Xxh3,
    Xxh64,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Xxh3 => "xxh3",
            HashAlgorithm::Xxh64 => "xxh64",
        }
    }

    /// A fresh incremental hasher for this algorithm.
    pub fn hasher(self) -> Box<dyn ContentHasher> {
        match self {
            HashAlgorithm::Sha256 => Box::new(Sha256Hasher(Sha256::new())),
            HashAlgorithm::Blake3 => Box::new(Blake3Hasher(blake3::Hasher::new())),
            HashAlgorithm::Xxh3 => Box::new(Xxh3Hasher(xxhash_rust::xxh3::Xxh3::new())),
            HashAlgorithm::Xxh64 => Box::new(Xxh64Hasher(xxhash_rust::xxh64::Xxh64::new(0))),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "blake3" => Ok(HashAlgorithm::Blake3),
            "xxh3" => Ok(HashAlgorithm::Xxh3),
            "xxh64" => Ok(HashAlgorithm::Xxh64),
            other => Err(CopyError::InvalidOptions(format!(
                "unknown hash algorithm: {other}"
            ))),
        }
    }
}

/// Incremental hash state behind a [`HashAlgorithm`].
pub trait ContentHasher: Send {
    fn algorithm(&self) -> HashAlgorithm;

    fn update(&mut self, data: &[u8]);

    /// Consume the state and produce the digest bytes.
    fn finish(self: Box<Self>) -> Digest;
}

struct Sha256Hasher(Sha256);

impl ContentHasher for Sha256Hasher {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha256
    }

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self: Box<Self>) -> Digest {
        Digest::new(HashAlgorithm::Sha256, self.0.finalize().to_vec())
    }
}

struct Blake3Hasher(blake3::Hasher);

impl ContentHasher for Blake3Hasher {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Blake3
    }

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self: Box<Self>) -> Digest {
        Digest::new(HashAlgorithm::Blake3, self.0.finalize().as_bytes().to_vec())
    }
}

struct Xxh3Hasher(xxhash_rust::xxh3::Xxh3);

impl ContentHasher for Xxh3Hasher {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Xxh3
    }

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self: Box<Self>) -> Digest {
        Digest::new(HashAlgorithm::Xxh3, self.0.digest().to_be_bytes().to_vec())
    }
}

struct Xxh64Hasher(xxhash_rust::xxh64::Xxh64);

impl ContentHasher for Xxh64Hasher {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Xxh64
    }

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finish(self: Box<Self>) -> Digest {
        Digest::new(HashAlgorithm::Xxh64, self.0.digest().to_be_bytes().to_vec())
    }
}

/// Output of a [`ContentHasher`]. Digests of different algorithms never compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: HashAlgorithm,
    bytes: Vec<u8>,
}

impl Digest {
    pub fn new(algorithm: HashAlgorithm, bytes: Vec<u8>) -> Self {
        Self { algorithm, bytes }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

/// Digest of a single file's contents.
pub fn hash_file<P: AsRef<Path>>(path: P, algorithm: HashAlgorithm) -> Result<Digest, CopyError> {
    let path = path.as_ref();
    let metadata = fs::metadata(path).map_err(|e| CopyError::from_io(path, e))?;
    if !metadata.is_file() {
        return Err(CopyError::NotRegularFile {
            path: path.to_path_buf(),
        });
    }
    let mut hasher = algorithm.hasher();
    feed_file(path, hasher.as_mut())?;
    Ok(hasher.finish())
}

/// Cumulative digest of every file under `path`, visited in `order`.
///
/// Symlinks to directories are not followed. Any other entry that is not a
/// regular file fails with [`CopyError::NotRegularFile`].
pub fn hash_folder<P: AsRef<Path>>(
    path: P,
    algorithm: HashAlgorithm,
    order: EntryOrder,
) -> Result<Digest, CopyError> {
    let path = path.as_ref();
    if !is_directory(path)? {
        return Err(CopyError::NotADirectory {
            path: path.to_path_buf(),
        });
    }
    let mut hasher = algorithm.hasher();
    feed_folder(path, hasher.as_mut(), order)?;
    Ok(hasher.finish())
}

fn feed_folder(dir: &Path, hasher: &mut dyn ContentHasher, order: EntryOrder) -> Result<(), CopyError> {
    for entry in list_entries(dir, order)? {
        match entry_kind(&entry)? {
            EntryKind::Directory => feed_folder(&entry, hasher, order)?,
            EntryKind::File => {
                feed_file(&entry, hasher)?;
            }
            EntryKind::DirectoryLink => {}
            EntryKind::Special => return Err(CopyError::NotRegularFile { path: entry }),
        }
    }
    Ok(())
}

/// Stream a file into `hasher`, returning the number of bytes consumed.
fn feed_file(path: &Path, hasher: &mut dyn ContentHasher) -> Result<u64, CopyError> {
    let mut file = File::open(path).map_err(|e| CopyError::from_io(path, e))?;
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(CopyError::Read {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        hasher.update(&buffer[..n]);
        total += n as u64;
    }
    Ok(total)
}
