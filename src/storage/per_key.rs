//! Per-Key File Stores
//!
//! Each key lives in its own file below the database directory:
//!
//! ```text
//! {root}/{server}/db{N}/{encoded key}.{ext}
//! ```
//!
//! The store logic (locking, lazy expiry, enumeration, flushing) is shared;
//! only the file body differs, and that is captured by [`KeyFileFormat`]:
//!
//! | Format              | Ext     | Body                                              |
//! |---------------------|---------|---------------------------------------------------|
//! | [`JsonItemFormat`]  | `json`  | `{"__type":"item","value":<node>,"expireat":<f>}` |
//! | [`MarkedJsonFormat`]| `mjson` | `inf` or `<f>` on line 1, then `<node>`           |
//!
//! The `.mjson` header can be read without decoding the value, which is what
//! makes the background sweep cheap.
//!
//! ## Locking
//!
//! Every file access holds the `(server, db)` lock for exactly one read or
//! one write. Enumeration takes the lock once per candidate file, never
//! across files.

use crate::error::{StorageError, StorageResult};
use crate::storage::backend::{BackendKind, KeyStore, Keys};
use crate::storage::codec::{decode_key, decode_value, encode_value, from_tagged, to_tagged, TaggedValue};
use crate::storage::expiry::SweepStats;
use crate::storage::layout::{
    db_dir_name, read_dir_if_exists, remove_if_exists, write_atomic, PathLayout,
};
use crate::storage::locks::{acquire, LockRegistry};
use crate::storage::pattern::GlobPattern;
use crate::storage::value::{is_expired, ttl_seconds, ExpireAt, Value};
use bytes::Bytes;
use std::fmt;
use std::fs;
use std::io::{self, ErrorKind};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Header line of an `.mjson` file without expiry.
const NO_EXPIRY: &str = "inf";

/// Encoding of one key file.
pub trait KeyFileFormat: Send + Sync + 'static {
    /// File extension, without the dot.
    const EXTENSION: &'static str;

    /// Which backend kind a store of this format reports.
    const KIND: BackendKind;

    fn encode(value: &Value, expire_at: Option<ExpireAt>) -> StorageResult<Vec<u8>>;

    fn decode(raw: &[u8]) -> StorageResult<(Value, Option<ExpireAt>)>;

    /// Reads only the expiry. Formats that cannot do better decode everything.
    fn read_expiry(raw: &[u8]) -> StorageResult<Option<ExpireAt>> {
        Self::decode(raw).map(|(_, expire_at)| expire_at)
    }
}

/// `.json` files holding one `item` node.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonItemFormat;

impl KeyFileFormat for JsonItemFormat {
    const EXTENSION: &'static str = "json";
    const KIND: BackendKind = BackendKind::PerKey;

    fn encode(value: &Value, expire_at: Option<ExpireAt>) -> StorageResult<Vec<u8>> {
        let node = TaggedValue::Item {
            value: Box::new(to_tagged(value)),
            expireat: expire_at,
        };
        Ok(serde_json::to_vec(&node)?)
    }

    fn decode(raw: &[u8]) -> StorageResult<(Value, Option<ExpireAt>)> {
        match serde_json::from_slice::<TaggedValue>(raw)? {
            TaggedValue::Item { value, expireat } => Ok((from_tagged(*value)?, expireat)),
            _ => Err(StorageError::corrupt("key file is not an item node")),
        }
    }
}

/// `.mjson` files: expiry header line, then the bare value node.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkedJsonFormat;

impl MarkedJsonFormat {
    fn split(raw: &[u8]) -> StorageResult<(&[u8], &[u8])> {
        let newline = raw
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| StorageError::corrupt("missing expiry header line"))?;
        Ok((&raw[..newline], &raw[newline + 1..]))
    }

    fn parse_header(header: &[u8]) -> StorageResult<Option<ExpireAt>> {
        let text = std::str::from_utf8(header)
            .map_err(|_| StorageError::corrupt("expiry header is not text"))?
            .trim();
        if text == NO_EXPIRY {
            return Ok(None);
        }
        match text.parse::<f64>() {
            Ok(at) if at.is_finite() => Ok(Some(at)),
            _ => Err(StorageError::corrupt(format!("bad expiry header {text:?}"))),
        }
    }
}

impl KeyFileFormat for MarkedJsonFormat {
    const EXTENSION: &'static str = "mjson";
    const KIND: BackendKind = BackendKind::PerKeySweep;

    fn encode(value: &Value, expire_at: Option<ExpireAt>) -> StorageResult<Vec<u8>> {
        let mut out = match expire_at {
            Some(at) => at.to_string().into_bytes(),
            None => NO_EXPIRY.as_bytes().to_vec(),
        };
        out.push(b'\n');
        out.extend(encode_value(value)?);
        Ok(out)
    }

    fn decode(raw: &[u8]) -> StorageResult<(Value, Option<ExpireAt>)> {
        let (header, body) = Self::split(raw)?;
        let expire_at = Self::parse_header(header)?;
        Ok((decode_value(body)?, expire_at))
    }

    fn read_expiry(raw: &[u8]) -> StorageResult<Option<ExpireAt>> {
        let (header, _) = Self::split(raw)?;
        Self::parse_header(header)
    }
}

/// A directory-per-database, file-per-key store.
pub struct FileKeyStore<F> {
    layout: PathLayout,
    locks: Arc<LockRegistry>,
    _format: PhantomData<fn() -> F>,
}

/// `.json` per-key backend.
pub type PerKeyBackend = FileKeyStore<JsonItemFormat>;

impl<F: KeyFileFormat> FileKeyStore<F> {
    /// Creates a store under `root` with its own lock registry.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_locks(PathLayout::new(root), Arc::new(LockRegistry::new()))
    }

    /// Creates a store that serializes against every other user of `locks`.
    pub fn with_locks(layout: PathLayout, locks: Arc<LockRegistry>) -> Self {
        Self {
            layout,
            locks,
            _format: PhantomData,
        }
    }

    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }

    pub fn locks(&self) -> &Arc<LockRegistry> {
        &self.locks
    }

    /// Path of a key's file. Creates the database directory.
    pub fn key_path(&self, server: &str, db: u32, key: &[u8]) -> StorageResult<PathBuf> {
        self.layout.key_path(server, db, key, F::EXTENSION)
    }

    /// Removes every expired key file under the root.
    ///
    /// Best effort: a file that cannot be read or removed is counted in
    /// [`SweepStats::errors`] and the walk continues. Only a failure to list
    /// the root itself is returned as an error.
    pub fn sweep_expired(&self) -> StorageResult<SweepStats> {
        let mut stats = SweepStats::default();

        for location in self.layout.db_dirs()? {
            let entries = match read_dir_if_exists(&location.path) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(dir = %location.path.display(), error = %e, "Skipping unreadable db dir");
                    stats.errors += 1;
                    continue;
                }
            };

            for entry in entries {
                let Some(path) = entry.ok().map(|e| e.path()).filter(|p| has_extension::<F>(p))
                else {
                    continue;
                };
                stats.scanned += 1;

                let lock = self.locks.lock_for(&location.server, location.db);
                let _guard = acquire(&lock);
                match sweep_file::<F>(&path) {
                    Ok(true) => stats.expired += 1,
                    Ok(false) => {}
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "Sweep skipped file");
                        stats.errors += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Loads one file. Caller holds the database lock.
    fn load_locked(&self, path: &Path) -> StorageResult<Option<(Value, Option<ExpireAt>)>> {
        let Some(raw) = read_file(path)? else {
            return Ok(None);
        };

        let (value, expire_at) = match F::decode(&raw) {
            Ok(entry) => entry,
            Err(e) if e.is_recoverable() => {
                debug!(path = %path.display(), error = %e, "Treating corrupt key file as absent");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if is_expired(expire_at) {
            remove_if_exists(path)?;
            debug!(path = %path.display(), "Removed expired key file");
            return Ok(None);
        }

        Ok(Some((value, expire_at)))
    }

    /// Turns a directory entry into a live key, or `None` if it is not one.
    fn live_key(&self, server: &str, db: u32, entry: io::Result<fs::DirEntry>) -> Option<Bytes> {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!(error = %e, "Failed to read directory entry");
                return None;
            }
        };
        if !has_extension::<F>(&path) {
            return None;
        }

        let stem = path.file_stem()?.to_str()?;
        let key = match decode_key(stem) {
            Ok(key) => key,
            Err(e) => {
                debug!(error = %e, "Skipping file with undecodable name");
                return None;
            }
        };

        let lock = self.locks.lock_for(server, db);
        let _guard = acquire(&lock);
        match self.load_locked(&path) {
            Ok(Some(_)) => Some(key),
            Ok(None) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to validate key file");
                None
            }
        }
    }

    /// Removes this format's files from one database directory, one lock
    /// hold per file.
    fn flush_dir(&self, server: &str, db: u32, dir: &Path) -> StorageResult<usize> {
        let mut removed = 0;
        for entry in read_dir_if_exists(dir)? {
            let path = entry.map_err(|e| StorageError::io(dir, e))?.path();
            if !has_extension::<F>(&path) {
                continue;
            }
            let lock = self.locks.lock_for(server, db);
            let _guard = acquire(&lock);
            if remove_if_exists(&path)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl<F: KeyFileFormat> KeyStore for FileKeyStore<F> {
    fn kind(&self) -> BackendKind {
        F::KIND
    }

    fn save_key(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
        value: &Value,
        expire_at: Option<ExpireAt>,
    ) -> StorageResult<()> {
        let path = self.key_path(server, db, key)?;
        let data = F::encode(value, expire_at)?;
        self.locks.with_lock(server, db, || write_atomic(&path, &data))
    }

    fn load_entry(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
    ) -> StorageResult<Option<(Value, Option<ExpireAt>)>> {
        let path = self.key_path(server, db, key)?;
        self.locks.with_lock(server, db, || self.load_locked(&path))
    }

    fn set_expiry(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
        expire_at: Option<ExpireAt>,
    ) -> StorageResult<Option<Option<ExpireAt>>> {
        let path = self.key_path(server, db, key)?;
        self.locks.with_lock(server, db, || {
            let Some((value, previous)) = self.load_locked(&path)? else {
                return Ok(None);
            };
            if is_expired(expire_at) {
                remove_if_exists(&path)?;
            } else if previous != expire_at {
                write_atomic(&path, &F::encode(&value, expire_at)?)?;
            }
            Ok(Some(previous))
        })
    }

    fn del_key(&self, server: &str, db: u32, key: &[u8]) -> StorageResult<bool> {
        let path = self.key_path(server, db, key)?;
        self.locks.with_lock(server, db, || remove_if_exists(&path))
    }

    fn ttl(&self, server: &str, db: u32, key: &[u8]) -> StorageResult<i64> {
        let path = self.key_path(server, db, key)?;
        self.locks.with_lock(server, db, || {
            Ok(match self.load_locked(&path)? {
                Some((_, expire_at)) => ttl_seconds(expire_at),
                None => -2,
            })
        })
    }

    fn keys<'a>(&'a self, server: &'a str, db: u32) -> StorageResult<Keys<'a>> {
        let dir = self.layout.db_dir(server, db)?;
        let entries = read_dir_if_exists(&dir)?;
        Ok(Box::new(
            entries
                .into_iter()
                .filter_map(move |entry| self.live_key(server, db, entry)),
        ))
    }

    fn scan_keys<'a>(&'a self, server: &'a str, db: u32, pattern: &str) -> StorageResult<Keys<'a>> {
        let pattern = GlobPattern::new(pattern);
        Ok(Box::new(
            self.keys(server, db)?
                .filter(move |key| pattern.matches_key(key)),
        ))
    }

    fn flush_db(&self, server: &str, db: u32) -> StorageResult<()> {
        let dir = self.layout.server_dir(server)?.join(db_dir_name(db));
        let removed = self.flush_dir(server, db, &dir)?;
        debug!(server, db, removed, "Flushed database");
        Ok(())
    }

    fn flush_all(&self) -> StorageResult<()> {
        let mut removed = 0;
        for location in self.layout.db_dirs()? {
            removed += self.flush_dir(&location.server, location.db, &location.path)?;
        }
        debug!(removed, "Flushed all databases");
        Ok(())
    }
}

impl<F> Clone for FileKeyStore<F> {
    fn clone(&self) -> Self {
        Self {
            layout: self.layout.clone(),
            locks: Arc::clone(&self.locks),
            _format: PhantomData,
        }
    }
}

impl<F: KeyFileFormat> fmt::Debug for FileKeyStore<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileKeyStore")
            .field("root", &self.layout.root())
            .field("extension", &F::EXTENSION)
            .finish()
    }
}

fn has_extension<F: KeyFileFormat>(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(F::EXTENSION)
}

fn read_file(path: &Path) -> StorageResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

/// Removes `path` if its expiry has passed. Caller holds the database lock.
fn sweep_file<F: KeyFileFormat>(path: &Path) -> StorageResult<bool> {
    let Some(raw) = read_file(path)? else {
        return Ok(false);
    };
    if is_expired(F::read_expiry(&raw)?) {
        return remove_if_exists(path);
    }
    Ok(false)
}
