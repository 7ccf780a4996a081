//! Router: turns change events into fingerprint updates

use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::TreeConfig;
use crate::error::{Error, Result};
use crate::event::{ChangeEvent, ChangeOp, EventHandler};
use crate::processor::PathProcessor;

/// Forwards events on regular files to the processor.
///
/// Paths are checked with `symlink_metadata`, so symlinks are never followed:
/// a symlink to a regular file is ignored like any other non-regular entry.
pub struct Router {
    config: Arc<TreeConfig>,
    processor: Arc<dyn PathProcessor>,
}

impl Router {
    #[must_use]
    pub fn new(config: Arc<TreeConfig>, processor: Arc<dyn PathProcessor>) -> Self {
        Self { config, processor }
    }
}

impl EventHandler for Router {
    fn handle(&self, event: &ChangeEvent) -> Result<()> {
        if event.op == ChangeOp::Chmod || self.config.is_metadata_path(&event.path) {
            return Ok(());
        }

        debug!(path = %event.path.display(), op = ?event.op, "change event");

        // No special handling for removals: the stat fails and the
        // dispatcher logs it.
        let metadata = std::fs::symlink_metadata(&event.path).map_err(Error::io(&event.path))?;
        if !metadata.is_file() {
            trace!(path = %event.path.display(), "not a regular file, ignoring");
            return Ok(());
        }

        self.processor.process(&event.path).map(|_| ())
    }
}
