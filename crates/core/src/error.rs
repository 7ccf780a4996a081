//! Error types for blocksync-core
//!
//! Per-file failures (`Io`, `CorruptMetadata`, `Hash`) are reported by a single
//! `process` call and are expected to be logged and skipped by the caller.
//! Tree-level failures (`Walk`, `WatchSetup`) mean the tree cannot be serviced
//! and are fatal to the operation that hit them.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors raised by the fingerprint engine
#[derive(Error, Debug)]
pub enum Error {
    /// Open, read, write, seek or truncate failed on a source or record file
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A fingerprint record does not have the `8 + k * width` shape
    #[error("corrupt fingerprint record '{}': {reason}", path.display())]
    CorruptMetadata { path: PathBuf, reason: String },

    /// Reading the source stream failed while computing a block digest
    #[error("failed to hash block {block} of '{}': {source}", path.display())]
    Hash {
        path: PathBuf,
        block: u64,
        #[source]
        source: io::Error,
    },

    /// Directory traversal failed
    #[error("failed to walk '{}': {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: ignore::Error,
    },

    /// The initial recursive watch set could not be established
    #[error("failed to watch '{}': {source}", path.display())]
    WatchSetup {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configuration file exists but is not valid TOML for our schema
    #[error("failed to parse '{}': {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A scan worker or the watch dispatcher panicked
    #[error("worker thread '{0}' panicked")]
    WorkerPanicked(String),
}

impl Error {
    /// Returns a closure that wraps an `io::Error` with the path it happened on.
    ///
    /// Meant for `map_err(Error::io(&path))`.
    pub fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns true for errors that only affect a single file.
    #[must_use]
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::CorruptMetadata { .. } | Self::Hash { .. }
        )
    }
}

/// Result type alias for blocksync-core
pub type Result<T> = std::result::Result<T, Error>;
