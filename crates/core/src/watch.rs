//! Live change watching
//!
//! Every directory in the tree gets its own non-recursive watch. Raw notify
//! events are split per path, queued, and dispatched on a single thread to
//! the registered handlers in order. The first handler is always the
//! built-in one that extends the watch set to newly created directories.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::TreeConfig;
use crate::error::{Error, Result};
use crate::event::{ChangeEvent, ChangeOp, EventHandler};
use crate::scan::walk_builder;

const DISPATCH_THREAD: &str = "blocksync-watch";

/// The notify watcher plus the directories it currently watches
struct WatchSet {
    watcher: Mutex<RecommendedWatcher>,
    dirs: Mutex<BTreeSet<PathBuf>>,
}

impl WatchSet {
    fn new(watcher: RecommendedWatcher) -> Self {
        Self {
            watcher: Mutex::new(watcher),
            dirs: Mutex::new(BTreeSet::new()),
        }
    }

    /// Watch `dir`. Re-adding is allowed; a directory deleted and recreated
    /// under the same path needs a fresh watch.
    fn add(&self, dir: &Path) -> Result<()> {
        self.watcher
            .lock()
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|source| Error::WatchSetup {
                path: dir.to_path_buf(),
                source,
            })?;
        self.dirs.lock().insert(dir.to_path_buf());
        Ok(())
    }

    /// Drop `dir` and every watched directory below it. Watches on moved
    /// subdirectories survive in the kernel under their old paths, so they
    /// are removed here and re-added under the new path by the replay.
    fn forget(&self, dir: &Path) {
        let gone: Vec<PathBuf> = {
            let mut dirs = self.dirs.lock();
            let gone: Vec<PathBuf> = dirs
                .iter()
                .filter(|watched| watched.starts_with(dir))
                .cloned()
                .collect();
            for path in &gone {
                dirs.remove(path);
            }
            gone
        };

        let mut watcher = self.watcher.lock();
        for path in gone {
            // Already gone for a removed directory; only notify's
            // bookkeeping is cleared then.
            let _ = watcher.unwatch(&path);
        }
    }

    fn dirs(&self) -> Vec<PathBuf> {
        self.dirs.lock().iter().cloned().collect()
    }
}

/// Built-in handler that keeps the watch set covering new directories.
///
/// A directory that is created or moved into place gets a watch. Entries
/// that appeared inside it before the watch was added would otherwise go
/// unseen, so its current children are replayed as `Create` events. A removed
/// or moved-away directory is dropped from the set with its subdirectories.
struct DirectoryWatch {
    config: Arc<TreeConfig>,
    watches: Arc<WatchSet>,
    replay: Sender<ChangeEvent>,
}

impl EventHandler for DirectoryWatch {
    fn handle(&self, event: &ChangeEvent) -> Result<()> {
        if self.config.is_metadata_path(&event.path) {
            return Ok(());
        }
        match event.op {
            ChangeOp::Create | ChangeOp::RenameTo => {}
            ChangeOp::Remove | ChangeOp::RenameFrom => {
                self.watches.forget(&event.path);
                return Ok(());
            }
            // Direction unknown: the path either still exists or it doesn't.
            ChangeOp::Rename => {
                if fs::symlink_metadata(&event.path).is_err() {
                    self.watches.forget(&event.path);
                    return Ok(());
                }
            }
            ChangeOp::Write | ChangeOp::Chmod => return Ok(()),
        }

        let metadata = fs::symlink_metadata(&event.path).map_err(Error::io(&event.path))?;
        if !metadata.is_dir() {
            return Ok(());
        }

        self.watches.add(&event.path)?;
        debug!(path = %event.path.display(), "watching new directory");

        let entries = fs::read_dir(&event.path).map_err(Error::io(&event.path))?;
        for entry in entries {
            let entry = entry.map_err(Error::io(&event.path))?;
            trace!(path = %entry.path().display(), "replaying create");
            // The dispatcher owns the receiver for as long as this handler lives.
            let _ = self
                .replay
                .send(ChangeEvent::new(entry.path(), ChangeOp::Create));
        }
        Ok(())
    }
}

/// Recursive watcher over one tree
pub struct Watcher {
    config: Arc<TreeConfig>,
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl Watcher {
    #[must_use]
    pub fn new(config: Arc<TreeConfig>) -> Self {
        Self {
            config,
            handlers: Vec::new(),
        }
    }

    /// Register a handler. Handlers run in registration order, after the
    /// built-in directory handler.
    pub fn add_handler(&mut self, handler: impl EventHandler + 'static) {
        self.handlers.push(Arc::new(handler));
    }

    /// Watch every directory in the tree except the metadata directory and
    /// start dispatching. `started` is signalled once the initial watch set
    /// is in place.
    ///
    /// # Errors
    /// - `Error::WatchSetup` if the watcher can't be created, the tree can't
    ///   be traversed or a directory can't be watched
    /// - `Error::Io` if the dispatch thread can't be spawned
    pub fn start(self, started: Sender<()>) -> Result<WatchHandle> {
        let root = self.config.root().to_path_buf();
        let (events_tx, events_rx) = unbounded::<ChangeEvent>();

        let notify_tx = events_tx.clone();
        let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    for change in ChangeEvent::from_notify(event) {
                        if notify_tx.send(change).is_err() {
                            return;
                        }
                    }
                }
                Err(error) => warn!(%error, "watch error"),
            }
        })
        .map_err(|source| Error::WatchSetup {
            path: root.clone(),
            source,
        })?;
        let watches = Arc::new(WatchSet::new(watcher));

        let metadata_dir = self.config.metadata_dir().to_path_buf();
        let walker = walk_builder(&root)
            .filter_entry(move |entry| !entry.path().starts_with(&metadata_dir))
            .build();
        for result in walker {
            let entry = result.map_err(|error| walk_setup_error(&root, error))?;
            if entry.file_type().is_some_and(|t| t.is_dir()) {
                watches.add(entry.path())?;
            }
        }

        let mut handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(DirectoryWatch {
            config: Arc::clone(&self.config),
            watches: Arc::clone(&watches),
            replay: events_tx,
        })];
        handlers.extend(self.handlers);

        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let thread = thread::Builder::new()
            .name(DISPATCH_THREAD.to_string())
            .spawn(move || dispatch_loop(&events_rx, &shutdown_rx, &handlers))
            .map_err(Error::io(&root))?;

        info!(
            root = %root.display(),
            directories = watches.dirs().len(),
            "watching"
        );
        let _ = started.send(());

        Ok(WatchHandle {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            watches,
        })
    }
}

/// A running watcher. Dropping it stops dispatch without waiting.
pub struct WatchHandle {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    watches: Arc<WatchSet>,
}

impl WatchHandle {
    /// Directories currently watched, sorted
    #[must_use]
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        self.watches.dirs()
    }

    /// Stop dispatching and wait for the in-flight event to finish.
    ///
    /// # Errors
    /// Returns `Error::WorkerPanicked` if a handler panicked on the dispatch thread.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.take();
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| Error::WorkerPanicked(DISPATCH_THREAD.to_string()))?;
        }
        debug!("watcher stopped");
        Ok(())
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown.take();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("directories", &self.watches.dirs().len())
            .finish_non_exhaustive()
    }
}

fn walk_setup_error(root: &Path, error: ignore::Error) -> Error {
    let message = error.to_string();
    let source = match error.into_io_error() {
        Some(io) => notify::Error::io(io),
        None => notify::Error::generic(&message),
    };
    Error::WatchSetup {
        path: root.to_path_buf(),
        source,
    }
}

fn dispatch_loop(
    events: &Receiver<ChangeEvent>,
    shutdown: &Receiver<()>,
    handlers: &[Arc<dyn EventHandler>],
) {
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => dispatch(handlers, &event),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
}

/// Run every handler on `event` in order. Failures are logged and do not
/// stop later handlers.
fn dispatch(handlers: &[Arc<dyn EventHandler>], event: &ChangeEvent) {
    for handler in handlers {
        if let Err(error) = handler.handle(event) {
            warn!(
                path = %event.path.display(),
                op = ?event.op,
                %error,
                "event handler failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn tree() -> (TempDir, Arc<TreeConfig>) {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(TreeConfig::new(fs::canonicalize(dir.path()).unwrap()));
        (dir, config)
    }

    /// Forward every event a handler sees to a channel
    fn forwarder() -> (impl EventHandler, Receiver<ChangeEvent>) {
        let (tx, rx) = unbounded();
        let handler = move |event: &ChangeEvent| -> Result<()> {
            let _ = tx.send(event.clone());
            Ok(())
        };
        (handler, rx)
    }

    fn wait_for(rx: &Receiver<ChangeEvent>, mut pred: impl FnMut(&ChangeEvent) -> bool) -> bool {
        let deadline = Instant::now() + TIMEOUT;
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(left) {
                Ok(event) if pred(&event) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        false
    }

    #[test]
    fn test_dispatch_runs_handlers_in_order_past_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let first = {
            let seen = Arc::clone(&seen);
            move |_: &ChangeEvent| -> Result<()> {
                seen.lock().push("first");
                Err(Error::Config("boom".into()))
            }
        };
        let second = {
            let seen = Arc::clone(&seen);
            move |_: &ChangeEvent| -> Result<()> {
                seen.lock().push("second");
                Ok(())
            }
        };
        let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(first), Arc::new(second)];

        dispatch(&handlers, &ChangeEvent::new("/t/a", ChangeOp::Write));
        dispatch(&handlers, &ChangeEvent::new("/t/b", ChangeOp::Write));

        assert_eq!(*seen.lock(), vec!["first", "second", "first", "second"]);
    }

    #[test]
    fn test_initial_watch_set_skips_metadata_dir() {
        let (_dir, config) = tree();
        let root = config.root();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::create_dir_all(root.join("c")).unwrap();
        fs::create_dir_all(config.metadata_dir().join("nested")).unwrap();

        let (started_tx, started_rx) = bounded(1);
        let handle = Watcher::new(Arc::clone(&config)).start(started_tx).unwrap();
        started_rx.try_recv().unwrap();

        let mut expected = vec![
            root.to_path_buf(),
            root.join("a"),
            root.join("a/b"),
            root.join("c"),
        ];
        expected.sort();
        assert_eq!(handle.watched_dirs(), expected);
        handle.stop().unwrap();
    }

    #[test]
    fn test_missing_root_fails_to_start() {
        let (dir, _) = tree();
        let config = Arc::new(TreeConfig::new(dir.path().join("missing")));
        let (started_tx, started_rx) = bounded(1);

        let err = Watcher::new(config).start(started_tx).unwrap_err();
        assert!(matches!(err, Error::WatchSetup { .. }), "{err:?}");
        assert!(started_rx.try_recv().is_err());
    }

    #[test]
    fn test_file_write_reaches_handler() {
        let (_dir, config) = tree();
        let (handler, rx) = forwarder();
        let mut watcher = Watcher::new(Arc::clone(&config));
        watcher.add_handler(handler);

        let (started_tx, started_rx) = bounded(1);
        let handle = watcher.start(started_tx).unwrap();
        started_rx.recv_timeout(TIMEOUT).unwrap();

        let path = config.root().join("a.txt");
        fs::write(&path, b"hello").unwrap();

        assert!(wait_for(&rx, |event| event.path == path));
        handle.stop().unwrap();
    }

    #[test]
    fn test_files_in_new_directory_are_seen() {
        let (_dir, config) = tree();
        let (handler, rx) = forwarder();
        let mut watcher = Watcher::new(Arc::clone(&config));
        watcher.add_handler(handler);

        let (started_tx, started_rx) = bounded(1);
        let handle = watcher.start(started_tx).unwrap();
        started_rx.recv_timeout(TIMEOUT).unwrap();

        let sub = config.root().join("new");
        fs::create_dir(&sub).unwrap();
        let path = sub.join("f.txt");
        fs::write(&path, b"inside").unwrap();

        assert!(wait_for(&rx, |event| event.path == path));
        assert!(handle.watched_dirs().contains(&sub));
        handle.stop().unwrap();
    }

    #[test]
    fn test_directory_moved_into_tree_is_watched() {
        let outer = TempDir::new().unwrap();
        let outer_path = fs::canonicalize(outer.path()).unwrap();
        let root = outer_path.join("tree");
        let outside = outer_path.join("outside");
        fs::create_dir(&root).unwrap();
        fs::create_dir_all(outside.join("inner")).unwrap();
        fs::write(outside.join("inner/existing.txt"), b"before").unwrap();

        let config = Arc::new(TreeConfig::new(&root));
        let (handler, rx) = forwarder();
        let mut watcher = Watcher::new(Arc::clone(&config));
        watcher.add_handler(handler);

        let (started_tx, started_rx) = bounded(1);
        let handle = watcher.start(started_tx).unwrap();
        started_rx.recv_timeout(TIMEOUT).unwrap();

        let moved = root.join("moved");
        fs::rename(&outside, &moved).unwrap();
        let existing = moved.join("inner/existing.txt");
        assert!(wait_for(&rx, |event| event.path == existing));

        let written = moved.join("inner/after.txt");
        fs::write(&written, b"after").unwrap();
        assert!(wait_for(&rx, |event| event.path == written));

        let dirs = handle.watched_dirs();
        assert!(dirs.contains(&moved));
        assert!(dirs.contains(&moved.join("inner")));
        handle.stop().unwrap();
    }

    #[test]
    fn test_directory_renamed_inside_tree_stays_watched() {
        let (_dir, config) = tree();
        let old = config.root().join("old");
        fs::create_dir_all(old.join("inner")).unwrap();

        let (handler, rx) = forwarder();
        let mut watcher = Watcher::new(Arc::clone(&config));
        watcher.add_handler(handler);

        let (started_tx, started_rx) = bounded(1);
        let handle = watcher.start(started_tx).unwrap();
        started_rx.recv_timeout(TIMEOUT).unwrap();

        let new = config.root().join("new");
        fs::rename(&old, &new).unwrap();
        assert!(wait_for(&rx, |event| event.path == new));

        let top = new.join("top.txt");
        fs::write(&top, b"top").unwrap();
        assert!(wait_for(&rx, |event| event.path == top));

        let nested = new.join("inner/nested.txt");
        fs::write(&nested, b"nested").unwrap();
        assert!(wait_for(&rx, |event| event.path == nested));

        let dirs = handle.watched_dirs();
        assert!(dirs.contains(&new));
        assert!(dirs.contains(&new.join("inner")));
        assert!(!dirs.iter().any(|dir| dir.starts_with(&old)));
        handle.stop().unwrap();
    }

    #[test]
    fn test_metadata_writes_are_not_watched() {
        let (_dir, config) = tree();
        fs::create_dir_all(config.metadata_dir()).unwrap();
        let (handler, rx) = forwarder();
        let mut watcher = Watcher::new(Arc::clone(&config));
        watcher.add_handler(handler);

        let (started_tx, started_rx) = bounded(1);
        let handle = watcher.start(started_tx).unwrap();
        started_rx.recv_timeout(TIMEOUT).unwrap();

        fs::write(config.metadata_dir().join("record"), [0u8; 8]).unwrap();
        let marker = config.root().join("marker.txt");
        fs::write(&marker, b"x").unwrap();

        // Events arrive in order, so everything before the marker is visible.
        let mut inside_metadata = false;
        assert!(wait_for(&rx, |event| {
            inside_metadata |= event.path.starts_with(config.metadata_dir())
                && event.path != config.metadata_dir();
            event.path == marker
        }));
        assert!(!inside_metadata);
        handle.stop().unwrap();
    }
}
