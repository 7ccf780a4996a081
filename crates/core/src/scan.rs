//! Full-tree scan with a bounded producer/worker pipeline
//!
//! The calling thread walks the tree and pushes every entry into a bounded
//! queue. A fixed pool of workers drains it, skipping the metadata directory
//! and non-regular entries and handing regular files to the processor. A full
//! queue blocks the walk, so memory stays bounded however large the tree is.

use std::fs::FileType;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, bounded};
use ignore::WalkBuilder;
use tracing::{debug, info, warn};

use crate::config::TreeConfig;
use crate::error::{Error, Result};
use crate::processor::PathProcessor;

/// One walked entry waiting for a worker
#[derive(Debug)]
struct WorkItem {
    path: PathBuf,
    file_type: Option<FileType>,
}

/// Counters shared by the workers
#[derive(Debug, Default)]
struct ScanStats {
    entries: AtomicU64,
    files_processed: AtomicU64,
    files_failed: AtomicU64,
    entries_skipped: AtomicU64,
    blocks_written: AtomicU64,
    bytes_hashed: AtomicU64,
}

/// Outcome of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Entries produced by the walk (directories included)
    pub entries: u64,
    /// Regular files successfully processed
    pub files_processed: u64,
    /// Regular files whose processing failed
    pub files_failed: u64,
    /// Directories, symlinks, special files and metadata entries
    pub entries_skipped: u64,
    /// Record entries rewritten across all files
    pub blocks_written: u64,
    /// Source bytes hashed across all files
    pub bytes_hashed: u64,
    /// Wall time of the scan
    pub elapsed: Duration,
}

impl ScanStats {
    fn summary(&self, elapsed: Duration) -> ScanSummary {
        ScanSummary {
            entries: self.entries.load(Ordering::Relaxed),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            entries_skipped: self.entries_skipped.load(Ordering::Relaxed),
            blocks_written: self.blocks_written.load(Ordering::Relaxed),
            bytes_hashed: self.bytes_hashed.load(Ordering::Relaxed),
            elapsed,
        }
    }
}

/// Walk builder shared by the scanner and the watcher: every entry is
/// visited (no ignore files, no hidden-file filtering) and symlinks are not
/// followed.
pub(crate) fn walk_builder(root: &Path) -> WalkBuilder {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .follow_links(false);
    builder
}

/// One-shot scanner that brings every record in the tree up to date
pub struct DirectoryScanner {
    config: Arc<TreeConfig>,
    processor: Arc<dyn PathProcessor>,
}

impl DirectoryScanner {
    /// Create a scanner for `config`'s tree
    #[must_use]
    pub fn new(config: Arc<TreeConfig>, processor: Arc<dyn PathProcessor>) -> Self {
        Self { config, processor }
    }

    /// Create the metadata directory if it doesn't exist
    ///
    /// # Errors
    /// Returns `Error::Io` if the directory can't be created.
    pub fn ensure_metadata_dir(&self) -> Result<()> {
        let dir = self.config.metadata_dir();
        std::fs::create_dir_all(dir).map_err(Error::io(dir))
    }

    /// Run the scan to completion.
    ///
    /// Per-file failures are logged and counted in the summary. Only a walk
    /// failure aborts the scan.
    ///
    /// # Errors
    /// - `Error::Io` if the metadata directory can't be created
    /// - `Error::Walk` if traversal fails
    /// - `Error::WorkerPanicked` if a worker thread panicked
    pub fn scan(&self) -> Result<ScanSummary> {
        self.ensure_metadata_dir()?;

        let start = Instant::now();
        let stats = Arc::new(ScanStats::default());
        let (tx, rx) = bounded::<WorkItem>(self.config.queue_capacity());

        let workers = (0..self.config.workers())
            .map(|id| self.spawn_worker(id, rx.clone(), Arc::clone(&stats)))
            .collect::<Result<Vec<_>>>()?;
        drop(rx);

        let mut walk_error = None;
        for result in walk_builder(self.config.root()).build() {
            match result {
                Ok(entry) => {
                    stats.entries.fetch_add(1, Ordering::Relaxed);
                    let item = WorkItem {
                        file_type: entry.file_type(),
                        path: entry.into_path(),
                    };
                    if tx.send(item).is_err() {
                        // Every worker is gone; joining below reports why.
                        break;
                    }
                }
                Err(source) => {
                    walk_error = Some(source);
                    break;
                }
            }
        }
        drop(tx);

        let mut panicked = None;
        for (name, handle) in workers {
            if handle.join().is_err() {
                panicked.get_or_insert(name);
            }
        }

        if let Some(source) = walk_error {
            return Err(Error::Walk {
                root: self.config.root().to_path_buf(),
                source,
            });
        }
        if let Some(name) = panicked {
            return Err(Error::WorkerPanicked(name));
        }

        let summary = stats.summary(start.elapsed());
        info!(
            root = %self.config.root().display(),
            files = summary.files_processed,
            failed = summary.files_failed,
            blocks_written = summary.blocks_written,
            elapsed_ms = summary.elapsed.as_millis(),
            "scan finished"
        );
        Ok(summary)
    }

    fn spawn_worker(
        &self,
        id: usize,
        rx: Receiver<WorkItem>,
        stats: Arc<ScanStats>,
    ) -> Result<(String, JoinHandle<()>)> {
        let name = format!("blocksync-scan-{id}");
        let config = Arc::clone(&self.config);
        let processor = Arc::clone(&self.processor);

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                for item in rx {
                    handle_item(&config, processor.as_ref(), &stats, item);
                }
            })
            .map_err(Error::io(self.config.root()))?;

        Ok((name, handle))
    }
}

fn handle_item(config: &TreeConfig, processor: &dyn PathProcessor, stats: &ScanStats, item: WorkItem) {
    let is_file = item.file_type.is_some_and(|t| t.is_file());
    if !is_file || config.is_metadata_path(&item.path) {
        stats.entries_skipped.fetch_add(1, Ordering::Relaxed);
        return;
    }

    match processor.process(&item.path) {
        Ok(report) => {
            stats.files_processed.fetch_add(1, Ordering::Relaxed);
            stats
                .blocks_written
                .fetch_add(report.blocks_written, Ordering::Relaxed);
            stats
                .bytes_hashed
                .fetch_add(report.bytes_hashed, Ordering::Relaxed);
        }
        Err(error) => {
            stats.files_failed.fetch_add(1, Ordering::Relaxed);
            warn!(path = %item.path.display(), %error, "could not process file");
        }
    }
    debug!(path = %item.path.display(), "scanned");
}
