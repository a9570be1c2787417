//! Background Expiry Sweeper
//!
//! Per-key stores evict an expired file lazily, the next time something
//! reads it. A key that expires and is never read again would sit on disk
//! forever, so the sweeping backend also runs "active expiry": a dedicated
//! thread that periodically walks every server and database directory under
//! the root and removes `.mjson` files whose header timestamp has passed.
//!
//! ## Design
//!
//! ```text
//!   ExpirySweeper::start
//!          │
//!          ▼
//!   ┌──────────────────────────────┐   stop() / drop
//!   │ loop:                        │◄──────────────── shutdown channel
//!   │   sweep_expired()            │
//!   │   log stats                  │
//!   │   wait(interval) or shutdown │
//!   └──────────────────────────────┘
//! ```
//!
//! The sweep reads only the header line of each file and holds the
//! `(server, db)` lock for one file at a time, so foreground calls wait at
//! most one file's worth of work. Errors on single files are counted and
//! skipped.

use crate::error::{StorageError, StorageResult};
use crate::storage::backend::{BackendKind, KeyStore, Keys};
use crate::storage::layout::PathLayout;
use crate::storage::locks::LockRegistry;
use crate::storage::per_key::{FileKeyStore, MarkedJsonFormat};
use crate::storage::value::{ExpireAt, Value};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// `.mjson` store swept by the background thread.
pub type SweepStore = FileKeyStore<MarkedJsonFormat>;

/// Outcome of one pass over the storage root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Key files examined.
    pub scanned: usize,
    /// Key files removed because their expiry had passed.
    pub expired: usize,
    /// Key files that could not be read, parsed or removed.
    pub errors: usize,
}

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Pause between the end of one sweep and the start of the next.
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// Dropping the handle stops the thread and waits for it to exit.
#[derive(Debug)]
pub struct ExpirySweeper {
    store: SweepStore,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Starts sweeping `store` on a background thread.
    pub fn start(store: SweepStore, config: ExpiryConfig) -> StorageResult<Self> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let worker = store.clone();

        let handle = thread::Builder::new()
            .name("flashkv-sweeper".into())
            .spawn(move || sweeper_loop(worker, config, shutdown_rx))
            .map_err(|e| StorageError::io(store.layout().root(), e))?;

        info!(root = %store.layout().root().display(), "Background expiry sweeper started");

        Ok(Self {
            store,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Runs one sweep on the calling thread.
    pub fn sweep_once(&self) -> StorageResult<SweepStats> {
        self.store.sweep_expired()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Signals the thread to exit and joins it. Idempotent.
    ///
    /// A sweep already in progress finishes first.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if handle.join().is_err() {
            warn!("Expiry sweeper thread panicked");
        }
        info!("Background expiry sweeper stopped");
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sweeps once on start, so files left expired by an earlier process go
/// right away, then once per interval until shutdown.
fn sweeper_loop(store: SweepStore, config: ExpiryConfig, shutdown_rx: mpsc::Receiver<()>) {
    loop {
        match store.sweep_expired() {
            Ok(stats) => {
                trace!(
                    scanned = stats.scanned,
                    expired = stats.expired,
                    errors = stats.errors,
                    "Sweep finished"
                );
                if stats.expired > 0 {
                    debug!(expired = stats.expired, "Expired key files cleaned up");
                }
            }
            Err(e) => warn!(error = %e, "Sweep failed to walk storage root"),
        }

        match shutdown_rx.recv_timeout(config.interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                debug!("Expiry sweeper received shutdown signal");
                return;
            }
        }
    }
}

/// Per-key backend with `.mjson` files and a background sweeper.
///
/// The sweeper lives as long as the backend, or until
/// [`stop_sweeper`](Self::stop_sweeper) is called.
#[derive(Debug)]
pub struct SweepingBackend {
    store: SweepStore,
    sweeper: Mutex<Option<ExpirySweeper>>,
}

impl SweepingBackend {
    /// Opens a backend under `root` and starts its sweeper.
    pub fn new(root: impl Into<PathBuf>, config: ExpiryConfig) -> StorageResult<Self> {
        Self::with_locks(PathLayout::new(root), Arc::new(LockRegistry::new()), config)
    }

    pub fn with_locks(
        layout: PathLayout,
        locks: Arc<LockRegistry>,
        config: ExpiryConfig,
    ) -> StorageResult<Self> {
        let store = SweepStore::with_locks(layout, locks);
        let sweeper = ExpirySweeper::start(store.clone(), config)?;
        Ok(Self {
            store,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    pub fn store(&self) -> &SweepStore {
        &self.store
    }

    /// Runs one sweep on the calling thread, independent of the background one.
    pub fn sweep_once(&self) -> StorageResult<SweepStats> {
        self.store.sweep_expired()
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .map(|guard| guard.as_ref().is_some_and(ExpirySweeper::is_running))
            .unwrap_or(false)
    }

    /// Stops the background sweeper. Reads still evict lazily afterwards.
    pub fn stop_sweeper(&self) {
        let sweeper = match self.sweeper.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        // Joined outside the mutex
        drop(sweeper);
    }
}

impl KeyStore for SweepingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::PerKeySweep
    }

    fn save_key(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
        value: &Value,
        expire_at: Option<ExpireAt>,
    ) -> StorageResult<()> {
        self.store.save_key(server, db, key, value, expire_at)
    }

    fn load_entry(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
    ) -> StorageResult<Option<(Value, Option<ExpireAt>)>> {
        self.store.load_entry(server, db, key)
    }

    fn set_expiry(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
        expire_at: Option<ExpireAt>,
    ) -> StorageResult<Option<Option<ExpireAt>>> {
        self.store.set_expiry(server, db, key, expire_at)
    }

    fn del_key(&self, server: &str, db: u32, key: &[u8]) -> StorageResult<bool> {
        self.store.del_key(server, db, key)
    }

    fn ttl(&self, server: &str, db: u32, key: &[u8]) -> StorageResult<i64> {
        self.store.ttl(server, db, key)
    }

    fn keys<'a>(&'a self, server: &'a str, db: u32) -> StorageResult<Keys<'a>> {
        self.store.keys(server, db)
    }

    fn scan_keys<'a>(&'a self, server: &'a str, db: u32, pattern: &str) -> StorageResult<Keys<'a>> {
        self.store.scan_keys(server, db, pattern)
    }

    fn flush_db(&self, server: &str, db: u32) -> StorageResult<()> {
        self.store.flush_db(server, db)
    }

    fn flush_all(&self) -> StorageResult<()> {
        self.store.flush_all()
    }
}
