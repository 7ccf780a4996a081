//! Block hashing using SHA-256

use std::fmt;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Width of a raw SHA-256 digest
pub const DIGEST_LEN: usize = 32;

/// How block digests are written into fingerprint records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestEncoding {
    /// 32 raw digest bytes
    #[default]
    Raw,
    /// 64 lowercase hex characters
    Hex,
}

impl DigestEncoding {
    /// Width in bytes of one encoded digest
    #[must_use]
    pub fn width(self) -> usize {
        match self {
            Self::Raw => DIGEST_LEN,
            Self::Hex => DIGEST_LEN * 2,
        }
    }

    fn encode(self, digest: [u8; DIGEST_LEN]) -> Vec<u8> {
        match self {
            Self::Raw => digest.to_vec(),
            Self::Hex => hex::encode(digest).into_bytes(),
        }
    }
}

/// Record name for a source path: hex SHA-256 of its bytes.
///
/// The path should already be absolute; the same file reached through two
/// different spellings gets two records.
#[must_use]
pub fn record_name(path: &Path) -> String {
    hex::encode(Sha256::digest(path.as_os_str().as_encoded_bytes()))
}

/// One hashed block
#[derive(Clone, PartialEq, Eq)]
pub struct HashedBlock {
    /// Encoded digest, `DigestEncoding::width()` bytes long
    pub digest: Vec<u8>,
    /// Number of source bytes covered by this block
    pub len: usize,
    /// False when this read reached end of stream
    pub has_more: bool,
}

impl fmt::Debug for HashedBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.digest);
        f.debug_struct("HashedBlock")
            .field("digest", &hex.get(..16).unwrap_or(&hex))
            .field("len", &self.len)
            .field("has_more", &self.has_more)
            .finish()
    }
}

/// Computes one digest per fixed-size block of a stream
#[derive(Debug, Clone, Copy)]
pub struct BlockHasher {
    block_size: usize,
    encoding: DigestEncoding,
}

impl BlockHasher {
    /// Create a hasher. `block_size` must be non-zero.
    #[must_use]
    pub fn new(block_size: usize, encoding: DigestEncoding) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        Self {
            block_size,
            encoding,
        }
    }

    /// Block size in bytes
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Digest encoding
    #[must_use]
    pub fn encoding(&self) -> DigestEncoding {
        self.encoding
    }

    /// Hash the next block of `reader`.
    ///
    /// Returns `Ok(None)` once the stream is exhausted. Short reads are
    /// retried until the block is full so block boundaries never drift.
    ///
    /// # Errors
    /// Returns any read error other than `Interrupted`.
    pub fn hash_block<R: Read + ?Sized>(&self, reader: &mut R) -> io::Result<Option<HashedBlock>> {
        let mut buf = vec![0u8; self.block_size];
        let len = read_full(reader, &mut buf)?;
        if len == 0 {
            return Ok(None);
        }

        let digest: [u8; DIGEST_LEN] = Sha256::digest(&buf[..len]).into();
        Ok(Some(HashedBlock {
            digest: self.encoding.encode(digest),
            len,
            has_more: len == self.block_size,
        }))
    }

    /// Iterate over the block digests of `reader`
    pub fn blocks<R: Read>(&self, reader: R) -> Blocks<R> {
        Blocks {
            hasher: *self,
            reader,
            done: false,
        }
    }
}

/// Iterator returned by [`BlockHasher::blocks`]
#[derive(Debug)]
pub struct Blocks<R> {
    hasher: BlockHasher,
    reader: R,
    done: bool,
}

impl<R: Read> Iterator for Blocks<R> {
    type Item = io::Result<HashedBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.hasher.hash_block(&mut self.reader) {
            Ok(Some(block)) => {
                self.done = !block.has_more;
                Some(Ok(block))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that hands out at most `chunk` bytes per call
    struct Trickle<'a> {
        data: &'a [u8],
        chunk: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk on fire"))
        }
    }

    #[test]
    fn test_empty_stream_yields_sentinel() {
        let hasher = BlockHasher::new(8, DigestEncoding::Raw);
        let mut reader = Cursor::new(Vec::<u8>::new());
        assert!(hasher.hash_block(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_blocks_match_sha256_of_ranges() {
        let data: Vec<u8> = (0..20u8).collect();
        let hasher = BlockHasher::new(8, DigestEncoding::Raw);
        let blocks: Vec<_> = hasher
            .blocks(Cursor::new(&data))
            .collect::<io::Result<_>>()
            .unwrap();

        assert_eq!(blocks.len(), 3);
        for (i, block) in blocks.iter().enumerate() {
            let start = i * 8;
            let end = (start + 8).min(data.len());
            assert_eq!(block.digest, Sha256::digest(&data[start..end]).to_vec());
            assert_eq!(block.len, end - start);
        }
        assert!(blocks[0].has_more);
        assert!(!blocks[2].has_more);
    }

    #[test]
    fn test_exact_multiple_ends_with_sentinel() {
        let data = [7u8; 16];
        let hasher = BlockHasher::new(8, DigestEncoding::Raw);
        let mut reader = Cursor::new(&data[..]);

        let first = hasher.hash_block(&mut reader).unwrap().unwrap();
        let second = hasher.hash_block(&mut reader).unwrap().unwrap();
        assert!(first.has_more);
        assert!(second.has_more);
        assert!(hasher.hash_block(&mut reader).unwrap().is_none());
        assert_eq!(hasher.blocks(Cursor::new(&data[..])).count(), 2);
    }

    #[test]
    fn test_short_reads_do_not_shift_blocks() {
        let data: Vec<u8> = (0..=255u8).cycle().take(100).collect();
        let hasher = BlockHasher::new(32, DigestEncoding::Raw);

        let whole: Vec<_> = hasher
            .blocks(Cursor::new(&data))
            .map(|b| b.unwrap().digest)
            .collect();
        let trickled: Vec<_> = hasher
            .blocks(Trickle {
                data: &data,
                chunk: 3,
            })
            .map(|b| b.unwrap().digest)
            .collect();

        assert_eq!(whole, trickled);
        assert_eq!(whole.len(), 4);
    }

    #[test]
    fn test_hex_encoding() {
        let hasher = BlockHasher::new(1024, DigestEncoding::Hex);
        let block = hasher
            .hash_block(&mut Cursor::new(b"hello world"))
            .unwrap()
            .unwrap();

        assert_eq!(block.digest.len(), DigestEncoding::Hex.width());
        assert_eq!(
            block.digest,
            hex::encode(Sha256::digest(b"hello world")).into_bytes()
        );
    }

    #[test]
    fn test_read_error_surfaces() {
        let hasher = BlockHasher::new(8, DigestEncoding::Raw);
        assert!(hasher.hash_block(&mut Broken).is_err());
        let mut blocks = hasher.blocks(Broken);
        assert!(blocks.next().unwrap().is_err());
        assert!(blocks.next().is_none());
    }

    #[test]
    fn test_record_name_is_hex_sha256_of_path() {
        let name = record_name(Path::new("/srv/tree/a.txt"));
        assert_eq!(name.len(), 64);
        assert_eq!(name, hex::encode(Sha256::digest(b"/srv/tree/a.txt")));
        assert_ne!(name, record_name(Path::new("/srv/tree/b.txt")));
    }
}
