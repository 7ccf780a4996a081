//! Reconcile a file's content against its fingerprint record
//!
//! The source is streamed one block at a time. Each block digest is compared
//! with the stored entry at the same index and only differing entries are
//! rewritten, so an unchanged file costs zero writes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::config::TreeConfig;
use crate::error::{Error, Result};
use crate::hash::{BlockHasher, read_full, record_name};
use crate::lock::RecordLocks;
use crate::record::{HEADER_LEN, RecordIo, entry_count, entry_offset, unix_now_secs};

/// Anything that can bring the fingerprint of one path up to date.
///
/// The scanner and the router depend on this rather than on
/// [`FileProcessor`] directly.
pub trait PathProcessor: Send + Sync {
    /// Reconcile the record for `path` with the file's current content.
    ///
    /// # Errors
    /// Returns a per-file error; callers log it and carry on.
    fn process(&self, path: &Path) -> Result<ProcessReport>;
}

/// What one reconcile pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Blocks in the file, i.e. entries in the record afterwards
    pub blocks: u64,
    /// Entries that were (re)written
    pub blocks_written: u64,
    /// Stale entries removed because the file shrank
    pub entries_dropped: u64,
    /// Source bytes hashed
    pub bytes_hashed: u64,
}

impl ProcessReport {
    /// True if the record's entries changed and its header was refreshed
    #[must_use]
    pub fn changed(&self) -> bool {
        self.blocks_written > 0 || self.entries_dropped > 0
    }
}

/// Paths used for error context during a reconcile
#[derive(Debug, Clone, Copy)]
pub struct ReconcileTarget<'a> {
    /// Source file being hashed
    pub source: &'a Path,
    /// Record being updated
    pub record: &'a Path,
}

/// Keeps fingerprint records in the metadata directory up to date
#[derive(Debug)]
pub struct FileProcessor {
    metadata_dir: PathBuf,
    hasher: BlockHasher,
    locks: RecordLocks,
}

impl FileProcessor {
    /// Create a processor for the given tree
    ///
    /// # Panics
    /// If the block size is zero; [`TreeConfig::validate`] rejects that.
    #[must_use]
    pub fn new(config: &TreeConfig) -> Self {
        Self {
            metadata_dir: config.metadata_dir().to_path_buf(),
            hasher: BlockHasher::new(config.block_size(), config.encoding()),
            locks: RecordLocks::new(),
        }
    }

    /// The hasher used for source blocks
    #[must_use]
    pub fn hasher(&self) -> &BlockHasher {
        &self.hasher
    }

    /// Where the record for `source` lives
    #[must_use]
    pub fn record_path(&self, source: &Path) -> PathBuf {
        self.metadata_dir.join(record_name(source))
    }

    /// Stream `source` through the hasher and bring `record` in line with it.
    ///
    /// `record` may be empty (a brand-new record). Otherwise its length must
    /// be `HEADER_LEN + k * width`.
    ///
    /// # Errors
    /// - `Error::CorruptMetadata` if the record has a partial entry
    /// - `Error::Hash` if reading `source` fails
    /// - `Error::Io` if any record operation fails
    pub fn reconcile<S, R>(
        &self,
        source: &mut S,
        record: &mut R,
        target: ReconcileTarget<'_>,
    ) -> Result<ProcessReport>
    where
        S: Read + ?Sized,
        R: RecordIo + ?Sized,
    {
        let width = self.hasher.encoding().width();
        let corrupt = |reason: String| Error::CorruptMetadata {
            path: target.record.to_path_buf(),
            reason,
        };

        let existing_len = record.len().map_err(Error::io(target.record))?;
        let existing = if existing_len == 0 {
            0
        } else {
            entry_count(existing_len, width).map_err(corrupt)?
        };

        record
            .seek(SeekFrom::Start(HEADER_LEN))
            .map_err(Error::io(target.record))?;

        let mut stored = vec![0u8; width];
        let mut report = ProcessReport::default();
        let mut index = 0u64;

        loop {
            let block = match self.hasher.hash_block(source) {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(source) => {
                    return Err(Error::Hash {
                        path: target.source.to_path_buf(),
                        block: index,
                        source,
                    });
                }
            };

            let read = read_full(record, &mut stored).map_err(Error::io(target.record))?;
            if read > 0 && read < width {
                return Err(corrupt(format!(
                    "entry {index} is truncated to {read} of {width} bytes"
                )));
            }

            if read != width || stored != block.digest {
                record
                    .seek(SeekFrom::Start(entry_offset(index, width)))
                    .map_err(Error::io(target.record))?;
                record
                    .write_all(&block.digest)
                    .map_err(Error::io(target.record))?;
                report.blocks_written += 1;
            }

            report.blocks += 1;
            report.bytes_hashed += block.len as u64;
            index += 1;

            if !block.has_more {
                break;
            }
        }

        report.entries_dropped = existing.saturating_sub(index);

        let expected_len = entry_offset(index, width);
        let current_len = record.len().map_err(Error::io(target.record))?;
        if current_len != expected_len {
            record
                .set_len(expected_len)
                .map_err(Error::io(target.record))?;
        }

        if report.changed() {
            record
                .seek(SeekFrom::Start(0))
                .map_err(Error::io(target.record))?;
            record
                .write_all(&unix_now_secs().to_le_bytes())
                .map_err(Error::io(target.record))?;
        }

        Ok(report)
    }
}

impl PathProcessor for FileProcessor {
    fn process(&self, path: &Path) -> Result<ProcessReport> {
        let path = std::path::absolute(path).map_err(Error::io(path))?;
        let name = record_name(&path);
        let record_path = self.metadata_dir.join(&name);

        let _guard = self.locks.lock(&name);

        let mut source = File::open(&path).map_err(Error::io(&path))?;
        let mut record = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&record_path)
            .map_err(Error::io(&record_path))?;

        let report = self.reconcile(
            &mut source,
            &mut record,
            ReconcileTarget {
                source: &path,
                record: &record_path,
            },
        )?;

        if report.changed() {
            debug!(
                path = %path.display(),
                blocks = report.blocks,
                written = report.blocks_written,
                dropped = report.entries_dropped,
                "fingerprint updated"
            );
        } else {
            trace!(path = %path.display(), blocks = report.blocks, "fingerprint unchanged");
        }

        Ok(report)
    }
}
