//! Fingerprint record layout
//!
//! ```text
//! offset 0..8    u64 LE, Unix seconds of the last recorded change
//! offset 8..     one entry per block, `width` bytes each, ascending block order
//! ```
//!
//! A record's length is always `HEADER_LEN + count * width`. Anything else is
//! treated as corruption.

use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::hash::{DigestEncoding, record_name};

/// Length of the timestamp header
pub const HEADER_LEN: u64 = 8;

/// Storage a fingerprint record can be reconciled against.
///
/// Implemented for `File`; tests use in-memory doubles to observe writes.
pub trait RecordIo: Read + Write + Seek {
    /// Current length in bytes
    ///
    /// # Errors
    /// Returns the underlying I/O error.
    fn len(&mut self) -> io::Result<u64>;

    /// Truncate or extend to exactly `len` bytes
    ///
    /// # Errors
    /// Returns the underlying I/O error.
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl RecordIo for File {
    fn len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }
}

/// Path of the record for `source` inside `metadata_dir`
#[must_use]
pub fn record_path(metadata_dir: &Path, source: &Path) -> PathBuf {
    metadata_dir.join(record_name(source))
}

/// Byte offset of entry `index`
#[must_use]
pub fn entry_offset(index: u64, width: usize) -> u64 {
    HEADER_LEN + index * width as u64
}

/// Check that `len` has the `HEADER_LEN + k * width` shape.
///
/// Returns the entry count on success, or a description of the problem.
pub(crate) fn entry_count(len: u64, width: usize) -> std::result::Result<u64, String> {
    if len < HEADER_LEN {
        return Err(format!("length {len} is shorter than the {HEADER_LEN}-byte header"));
    }
    let body = len - HEADER_LEN;
    let width = width as u64;
    if body % width != 0 {
        return Err(format!(
            "length {len} leaves a partial entry of {} bytes (entry width {width})",
            body % width
        ));
    }
    Ok(body / width)
}

/// Current time as Unix seconds
#[must_use]
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A decoded fingerprint record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintRecord {
    /// Unix seconds of the last recorded change (0 if never changed)
    pub updated_at: u64,
    /// Encoded block digests in block order
    pub entries: Vec<Vec<u8>>,
}

impl FingerprintRecord {
    /// Decode a record from its raw bytes.
    ///
    /// # Errors
    /// Returns the reason if the length isn't `HEADER_LEN + k * width`.
    pub fn parse(bytes: &[u8], width: usize) -> std::result::Result<Self, String> {
        entry_count(bytes.len() as u64, width)?;
        let (header, body) = bytes.split_at(8);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(header);

        Ok(Self {
            updated_at: u64::from_le_bytes(ts),
            entries: body.chunks_exact(width).map(<[u8]>::to_vec).collect(),
        })
    }

    /// Load the record kept for `source`.
    ///
    /// # Errors
    /// Returns `Error::Io` if the record can't be read and
    /// `Error::CorruptMetadata` if its length is malformed.
    pub fn load(metadata_dir: &Path, source: &Path, encoding: DigestEncoding) -> Result<Self> {
        let path = record_path(metadata_dir, source);
        let bytes = std::fs::read(&path).map_err(Error::io(&path))?;
        Self::parse(&bytes, encoding.width())
            .map_err(|reason| Error::CorruptMetadata { path, reason })
    }

    /// Number of block entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the record holds no entries (empty source file)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
