//! Startup wiring: one processor shared by the scanner and the watcher

use std::path::Path;
use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::config::TreeConfig;
use crate::error::Result;
use crate::processor::{FileProcessor, PathProcessor, ProcessReport};
use crate::route::Router;
use crate::scan::{DirectoryScanner, ScanSummary};
use crate::watch::{WatchHandle, Watcher};

/// Fingerprint engine for one tree
#[derive(Debug, Clone)]
pub struct Engine {
    config: Arc<TreeConfig>,
    processor: Arc<FileProcessor>,
}

impl Engine {
    /// Validate `config` and build the shared processor
    ///
    /// # Errors
    /// Returns `Error::Config` if [`TreeConfig::validate`] rejects the config.
    pub fn new(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let processor = Arc::new(FileProcessor::new(&config));
        Ok(Self {
            config: Arc::new(config),
            processor,
        })
    }

    #[must_use]
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    #[must_use]
    pub fn processor(&self) -> &FileProcessor {
        &self.processor
    }

    /// Bring the record of a single file up to date
    ///
    /// # Errors
    /// See [`FileProcessor`]'s `process`.
    pub fn process(&self, path: &Path) -> Result<ProcessReport> {
        self.processor.process(path)
    }

    /// Run one full scan of the tree
    ///
    /// # Errors
    /// See [`DirectoryScanner::scan`].
    pub fn scan(&self) -> Result<ScanSummary> {
        DirectoryScanner::new(Arc::clone(&self.config), self.processor.clone()).scan()
    }

    /// Build the router for this tree
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new(Arc::clone(&self.config), self.processor.clone())
    }

    /// Start watching with the router as the only user handler
    ///
    /// # Errors
    /// See [`Watcher::start`].
    pub fn watch(&self, started: Sender<()>) -> Result<WatchHandle> {
        let mut watcher = Watcher::new(Arc::clone(&self.config));
        watcher.add_handler(self.router());
        watcher.start(started)
    }
}
