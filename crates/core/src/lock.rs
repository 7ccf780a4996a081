//! Per-record mutual exclusion
//!
//! Scan workers and the watch dispatcher may both call `process` on the same
//! path. Every call holds the lock for its record name until it returns.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

/// Prune dead entries once the map grows past this many names
const PRUNE_THRESHOLD: usize = 1024;

/// Locks keyed by record name
#[derive(Debug, Default)]
pub struct RecordLocks {
    locks: Mutex<HashMap<String, Weak<Mutex<()>>>>,
}

/// Held for the duration of one `process` call; unlocks on drop
#[must_use = "the record is unlocked as soon as the guard is dropped"]
pub struct RecordGuard {
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl std::fmt::Debug for RecordGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordGuard").finish_non_exhaustive()
    }
}

impl RecordLocks {
    /// Create an empty lock table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock for `name` is free, then take it.
    pub fn lock(&self, name: &str) -> RecordGuard {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, weak| weak.strong_count() > 0);
            }
            if let Some(existing) = locks.get(name).and_then(Weak::upgrade) {
                existing
            } else {
                let fresh = Arc::new(Mutex::new(()));
                locks.insert(name.to_string(), Arc::downgrade(&fresh));
                fresh
            }
        };

        // The table lock is released before waiting on the record lock.
        RecordGuard {
            _guard: lock.lock_arc(),
        }
    }

    /// Number of names currently tracked (live or not yet pruned)
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_name_is_exclusive() {
        let locks = Arc::new(RecordLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _guard = locks.lock("same");
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_micros(50));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_names_do_not_block() {
        let locks = RecordLocks::new();
        let _a = locks.lock("a");
        let _b = locks.lock("b");
        assert_eq!(locks.tracked(), 2);
    }

    #[test]
    fn test_released_lock_can_be_retaken() {
        let locks = RecordLocks::new();
        drop(locks.lock("a"));
        let _again = locks.lock("a");
    }

    #[test]
    fn test_dead_entries_are_pruned() {
        let locks = RecordLocks::new();
        for i in 0..PRUNE_THRESHOLD {
            drop(locks.lock(&format!("r{i}")));
        }
        assert_eq!(locks.tracked(), PRUNE_THRESHOLD);
        drop(locks.lock("one-more"));
        assert_eq!(locks.tracked(), 1);
    }
}
