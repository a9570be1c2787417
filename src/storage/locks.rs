//! Per-Database Lock Registry
//!
//! One mutex per `(server, database)` pair guards every read/modify/write of
//! that database's files. Entries are created lazily on first use and never
//! removed, so the registry grows with the number of distinct pairs seen.
//!
//! The lock is in-process only. Two OS processes sharing a storage root are
//! not serialized against each other.

use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type LockKey = (String, u32);

/// Registry of database locks.
///
/// Backends that should serialize against each other must share one
/// registry (wrap it in an `Arc`); a fresh registry gives an isolated
/// locking domain, which is what tests usually want.
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for a pair, creating it on first request.
    ///
    /// Concurrent first requests for the same pair observe the same mutex.
    pub fn lock_for(&self, server: &str, db: u32) -> Arc<Mutex<()>> {
        self.locks
            .entry((server.to_string(), db))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Runs `f` while holding the lock of `(server, db)`.
    pub fn with_lock<T>(&self, server: &str, db: u32, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(server, db);
        let _guard = acquire(&lock);
        f()
    }

    /// Number of distinct pairs that have been locked so far.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Locks a registry mutex. The guarded data is `()`, so a panic in another
/// holder leaves nothing inconsistent and poisoning is ignored.
pub(crate) fn acquire(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
