//! blocksync-core: block-level fingerprint engine
//!
//! Keeps a per-file record of fixed-size block digests under a reserved
//! metadata directory, via a full-tree scan and a live watcher.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod hash;
pub mod lock;
pub mod processor;
pub mod record;
pub mod route;
pub mod scan;
pub mod watch;

pub use config::TreeConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use event::{ChangeEvent, ChangeOp, EventHandler};
pub use hash::{BlockHasher, DigestEncoding, HashedBlock, record_name};
pub use processor::{FileProcessor, PathProcessor, ProcessReport};
pub use record::FingerprintRecord;
pub use route::Router;
pub use scan::{DirectoryScanner, ScanSummary};
pub use watch::{WatchHandle, Watcher};
