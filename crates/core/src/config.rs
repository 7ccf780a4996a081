//! Monitored tree configuration (.blocksync.toml)

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::hash::DigestEncoding;

/// Config file name, looked up in the monitored root
pub const CONFIG_FILE: &str = ".blocksync.toml";

/// Default name of the reserved metadata directory
pub const DEFAULT_METADATA_DIR: &str = ".metadata";

/// Default block size in bytes
pub const DEFAULT_BLOCK_SIZE: usize = 8 * 1024;

/// Default number of scan workers
pub const DEFAULT_WORKERS: usize = 8;

/// Default capacity of the scan work queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// On-disk configuration. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Block size in bytes
    pub block_size: Option<usize>,
    /// Number of scan worker threads
    pub workers: Option<usize>,
    /// Bounded work queue capacity
    pub queue_capacity: Option<usize>,
    /// Metadata directory, relative to the root
    pub metadata_dir: Option<PathBuf>,
    /// Digest encoding of record entries
    pub encoding: Option<DigestEncoding>,
}

impl ConfigFile {
    /// Load `.blocksync.toml` from `root`.
    ///
    /// Returns the default (empty) config if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(Error::io(&path))?;
        toml::from_str(&content).map_err(|source| Error::ConfigParse { path, source })
    }
}

/// Everything the engine needs to know about one monitored tree.
///
/// Passed by `Arc` into each component; there is no global state.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    root: PathBuf,
    metadata_dir: PathBuf,
    block_size: usize,
    workers: usize,
    queue_capacity: usize,
    encoding: DigestEncoding,
}

impl TreeConfig {
    /// Create a config with defaults for the given absolute root.
    ///
    /// The root is used as given; call [`TreeConfig::load`] to canonicalize
    /// it and pick up `.blocksync.toml`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let metadata_dir = root.join(DEFAULT_METADATA_DIR);
        Self {
            root,
            metadata_dir,
            block_size: DEFAULT_BLOCK_SIZE,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            encoding: DigestEncoding::Raw,
        }
    }

    /// Canonicalize `root` and apply `.blocksync.toml` on top of the defaults.
    ///
    /// # Errors
    /// Returns an error if the root doesn't exist, the config file is
    /// malformed, or the resulting values fail [`TreeConfig::validate`].
    pub fn load(root: &Path) -> Result<Self> {
        let root = std::fs::canonicalize(root).map_err(Error::io(root))?;
        let file = ConfigFile::load(&root)?;
        let mut config = Self::new(root);

        if let Some(block_size) = file.block_size {
            config = config.with_block_size(block_size);
        }
        if let Some(workers) = file.workers {
            config = config.with_workers(workers);
        }
        if let Some(capacity) = file.queue_capacity {
            config = config.with_queue_capacity(capacity);
        }
        if let Some(dir) = file.metadata_dir {
            config = config.with_metadata_dir(dir);
        }
        if let Some(encoding) = file.encoding {
            config = config.with_encoding(encoding);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the block size
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the number of scan workers
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the bounded queue capacity
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the digest encoding
    #[must_use]
    pub fn with_encoding(mut self, encoding: DigestEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the metadata directory. Relative paths are joined onto the root.
    #[must_use]
    pub fn with_metadata_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.metadata_dir = self.root.join(dir);
        self
    }

    /// Check value ranges and that the metadata directory lives under the root.
    ///
    /// # Errors
    /// Returns `Error::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Config("block_size must be non-zero".into()));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be non-zero".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be non-zero".into()));
        }
        if self.metadata_dir == self.root || !self.metadata_dir.starts_with(&self.root) {
            return Err(Error::Config(format!(
                "metadata directory '{}' must be inside root '{}'",
                self.metadata_dir.display(),
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Monitored root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserved metadata directory holding fingerprint records
    #[must_use]
    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    /// Block size in bytes
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of scan workers
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Bounded queue capacity
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Digest encoding of record entries
    #[must_use]
    pub fn encoding(&self) -> DigestEncoding {
        self.encoding
    }

    /// True if `path` is the metadata directory or anything below it.
    #[must_use]
    pub fn is_metadata_path(&self, path: &Path) -> bool {
        path.starts_with(&self.metadata_dir)
    }
}
