use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::EntryOrder;
use crate::error::CopyError;
use crate::hash::HashAlgorithm;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// What a tree copy does when one entry cannot be copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreePolicy {
    /// Record the failure and carry on with the siblings.
    #[default]
    BestEffort,
    /// Stop at the first failure and return it.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOptions {
    /// Copy-and-verify cycles allowed per file (and per tree when `tree_check` is on).
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub retry_wait: Duration,
    pub policy: TreePolicy,
    pub algorithm: HashAlgorithm,
    pub entry_order: EntryOrder,
    /// Also compare whole-tree digests and re-run the tree on mismatch.
    pub tree_check: bool,
    pub preserve_mtime: bool,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_wait: Duration::ZERO,
            policy: TreePolicy::BestEffort,
            algorithm: HashAlgorithm::Sha256,
            entry_order: EntryOrder::ByName,
            tree_check: false,
            preserve_mtime: true,
        }
    }
}

impl CopyOptions {
    pub fn validate(&self) -> Result<(), CopyError> {
        if self.max_attempts == 0 {
            return Err(CopyError::InvalidOptions(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_string_flags(&self) -> String {
        let mut result = vec![format!("/R:{}", self.max_attempts)];

        if !self.retry_wait.is_zero() {
            result.push(format!("/W:{}", self.retry_wait.as_millis()));
        }

        if self.policy == TreePolicy::Strict {
            result.push("/STRICT".to_string());
        }

        if self.tree_check {
            result.push("/TREE".to_string());
        }

        result.push(format!("/H:{}", self.algorithm));

        if self.entry_order == EntryOrder::Listing {
            result.push("/LISTORDER".to_string());
        }

        if !self.preserve_mtime {
            result.push("/NOTIMES".to_string());
        }

        result.join(" ")
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// One run of the command-line front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub source: PathBuf,
    pub destinations: Vec<PathBuf>,
    pub options: CopyOptions,
    pub show_progress: bool,
    /// Print folder digests of the given paths instead of copying.
    pub hash_only: bool,
}

impl Invocation {
    /// Parse arguments, program name excluded.
    pub fn parse_from<I, S>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut options = CopyOptions::default();
        let mut show_progress = true;
        let mut hash_only = false;
        let mut positional_args = Vec::new();

        for arg in args {
            let arg = arg.into();
            if !arg.starts_with('/') || arg.len() < 2 || arg[1..].contains('/') {
                positional_args.push(PathBuf::from(arg));
                continue;
            }

            let upper_arg = arg.to_uppercase();
            match upper_arg.as_str() {
                "/STRICT" => options.policy = TreePolicy::Strict,
                "/TREE" => options.tree_check = true,
                "/LISTORDER" => options.entry_order = EntryOrder::Listing,
                "/NOTIMES" => options.preserve_mtime = false,
                "/NP" => show_progress = false,
                "/HASH" => hash_only = true,
                _ => {
                    if let Some(stripped) = upper_arg.strip_prefix("/R:") {
                        options.max_attempts = stripped
                            .parse::<u32>()
                            .map_err(|_| format!("Invalid attempt count: {stripped}"))?;
                    } else if let Some(stripped) = upper_arg.strip_prefix("/W:") {
                        let wait = stripped
                            .parse::<u64>()
                            .map_err(|_| format!("Invalid wait time: {stripped}"))?;
                        options.retry_wait = Duration::from_millis(wait);
                    } else if let Some(stripped) = upper_arg.strip_prefix("/H:") {
                        options.algorithm = stripped.parse().map_err(|e: CopyError| e.to_string())?;
                    } else {
                        return Err(format!("Unknown option: {arg}"));
                    }
                }
            }
        }

        let mut positional_args = positional_args.into_iter();
        let Some(source) = positional_args.next() else {
            return Err("Missing source".to_string());
        };
        let destinations: Vec<PathBuf> = positional_args.collect();
        if destinations.is_empty() && !hash_only {
            return Err("Missing destination".to_string());
        }
        options.validate().map_err(|e| e.to_string())?;

        Ok(Invocation {
            source,
            destinations,
            options,
            show_progress,
            hash_only,
        })
    }
}

pub fn print_usage(program_name: &str) {
    println!("Usage: {program_name} <source> <destination>... [options]");
    println!("       {program_name} /HASH <path>... [/H:alg] [/LISTORDER]");
    println!("Options:");
    println!("  /R:n       - Copy-and-verify attempts per file (default is {DEFAULT_MAX_ATTEMPTS})");
    println!("  /W:ms      - Wait time between attempts in milliseconds (default is 0)");
    println!("  /STRICT    - Abort on the first file that cannot be verified");
    println!("  /TREE      - Also verify whole-tree digests, re-copying the tree on mismatch");
    println!("  /H:alg     - Digest algorithm: sha256, blake3, xxh3, xxh64 (default is sha256)");
    println!("  /LISTORDER - Visit entries in directory listing order instead of by name");
    println!("  /NOTIMES   - Do not copy modification times");
    println!("  /NP        - No progress - don't display % copied");
    println!("  /HASH      - Print folder digests instead of copying");
}
