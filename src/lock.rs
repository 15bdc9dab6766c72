//! In-process per-note locking.
//!
//! Serializes read-modify-write of a single note between threads of this
//! process. Other processes editing the same file are not coordinated with:
//! the last writer wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Registry of one mutex per note path. An entry lives only while some
/// thread holds or waits on it.
#[derive(Debug, Default)]
pub struct NoteLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl NoteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `path`.
    pub fn with_lock<T>(&self, path: &Path, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(path);
        let result = {
            let _guard = acquire(&lock);
            f()
        };
        drop(lock);
        self.release(path);
        result
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.registry()
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the entry for `path` once the registry holds the only reference.
    /// Clones are only handed out under the registry lock, so a count of one
    /// here means no other thread holds or waits on it.
    fn release(&self, path: &Path) {
        let mut map = self.registry();
        if map.get(path).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(path);
        }
    }

    /// Number of paths currently held or waited on.
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Acquire a note mutex. A panic in a previous holder does not leave the note
/// in a half-written state (writes are atomic renames), so poisoning is ignored.
fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}
