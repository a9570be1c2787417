//! Whole-File Backend
//!
//! One JSON object per database holds the entire keyspace:
//!
//! ```text
//! {root}/{server}/db{N}.json
//!
//! {
//!   "Y291bnRlcg==": {"__type":"item","value":{"__type":"bytes","data":"MQ=="},"expireat":null},
//!   ...
//! }
//! ```
//!
//! Map keys are encoded with the key codec rather than written as the raw
//! key text. JSON object keys must be valid strings, and a textual layout
//! would lose keys that are not UTF-8. The cost is that the file is not
//! readable by tools expecting plain-text keys, and a file with plain-text
//! keys only loads the entries whose names happen to decode as base64.
//!
//! [`load`](WholeFileBackend::load) and [`save`](WholeFileBackend::save) move
//! the whole mapping. The [`KeyStore`] operations are built on top as
//! read-modify-write cycles under a single hold of the database lock, so
//! every call rewrites the file. Fine for small test keyspaces; the per-key
//! backends scale better.
//!
//! Only one process should write a given storage root with this backend.
//! Two processes rewriting the same file can lose each other's updates.

use crate::error::{StorageError, StorageResult};
use crate::storage::backend::{BackendKind, KeyStore, Keys};
use crate::storage::codec::{decode_key, encode_key, from_tagged, to_tagged, TaggedValue};
use crate::storage::layout::{
    parse_db_dir_name, read_dir_if_exists, write_atomic, PathLayout,
};
use crate::storage::locks::LockRegistry;
use crate::storage::pattern::GlobPattern;
use crate::storage::value::{is_expired, ttl_seconds, ExpireAt, Value};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// The full contents of one database.
pub type Keyspace = HashMap<Bytes, Value>;

const EMPTY_OBJECT: &[u8] = b"{}";

/// Stores each database as a single `db{N}.json` file.
#[derive(Debug, Clone)]
pub struct WholeFileBackend {
    layout: PathLayout,
    locks: Arc<LockRegistry>,
}

impl WholeFileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_locks(PathLayout::new(root), Arc::new(LockRegistry::new()))
    }

    pub fn with_locks(layout: PathLayout, locks: Arc<LockRegistry>) -> Self {
        Self { layout, locks }
    }

    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }

    /// Reads a whole database.
    ///
    /// A missing file is created holding an empty object. A file that is not
    /// valid JSON reads as an empty database, and entries that do not decode
    /// are dropped. Expired items are returned as stored; callers decide.
    pub fn load(&self, server: &str, db: u32) -> StorageResult<Keyspace> {
        let path = self.layout.db_file(server, db)?;
        self.locks.with_lock(server, db, || load_file(&path))
    }

    /// Replaces a whole database with `keyspace`.
    pub fn save(&self, server: &str, db: u32, keyspace: &Keyspace) -> StorageResult<()> {
        let path = self.layout.db_file(server, db)?;
        self.locks.with_lock(server, db, || save_file(&path, keyspace))
    }

    /// One locked read-modify-write cycle.
    ///
    /// Expired items are purged first. The file is rewritten when the purge
    /// removed something or `f` reports a change.
    fn update<T>(
        &self,
        server: &str,
        db: u32,
        f: impl FnOnce(&mut Keyspace) -> (T, bool),
    ) -> StorageResult<T> {
        let path = self.layout.db_file(server, db)?;
        self.locks.with_lock(server, db, || {
            let mut keyspace = load_file(&path)?;
            let purged = purge_expired(&mut keyspace);
            if purged > 0 {
                debug!(server, db, purged, "Purged expired keys");
            }

            let (out, changed) = f(&mut keyspace);
            if purged > 0 || changed {
                save_file(&path, &keyspace)?;
            }
            Ok(out)
        })
    }

    /// `(server, db, path)` of every `db{N}.json` under the root.
    fn db_files(&self) -> StorageResult<Vec<(String, u32, PathBuf)>> {
        let mut out = Vec::new();
        for (server, dir) in self.layout.server_dirs()? {
            for entry in read_dir_if_exists(&dir)? {
                let path = entry.map_err(|e| StorageError::io(&dir, e))?.path();
                if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let db = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(parse_db_dir_name);
                if let Some(db) = db {
                    out.push((server.clone(), db, path));
                }
            }
        }
        Ok(out)
    }
}

impl KeyStore for WholeFileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::WholeFile
    }

    fn save_key(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
        value: &Value,
        expire_at: Option<ExpireAt>,
    ) -> StorageResult<()> {
        let item = Value::item(value.clone(), expire_at);
        self.update(server, db, |keyspace| {
            keyspace.insert(Bytes::copy_from_slice(key), item);
            ((), true)
        })
    }

    fn load_entry(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
    ) -> StorageResult<Option<(Value, Option<ExpireAt>)>> {
        self.update(server, db, |keyspace| {
            let entry = keyspace.get(key).map(|value| {
                let (value, expire_at) = split_item(value);
                (value.clone(), expire_at)
            });
            (entry, false)
        })
    }

    fn set_expiry(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
        expire_at: Option<ExpireAt>,
    ) -> StorageResult<Option<Option<ExpireAt>>> {
        self.update(server, db, |keyspace| {
            let Some(stored) = keyspace.get_mut(key) else {
                return (None, false);
            };
            let (value, previous) = split_item(stored);
            if is_expired(expire_at) {
                keyspace.remove(key);
                return (Some(previous), true);
            }
            let changed = previous != expire_at;
            if changed {
                *stored = Value::item(value.clone(), expire_at);
            }
            (Some(previous), changed)
        })
    }

    fn del_key(&self, server: &str, db: u32, key: &[u8]) -> StorageResult<bool> {
        self.update(server, db, |keyspace| {
            let existed = keyspace.remove(key).is_some();
            (existed, existed)
        })
    }

    fn ttl(&self, server: &str, db: u32, key: &[u8]) -> StorageResult<i64> {
        self.update(server, db, |keyspace| {
            let ttl = match keyspace.get(key) {
                Some(value) => ttl_seconds(split_item(value).1),
                None => -2,
            };
            (ttl, false)
        })
    }

    fn keys<'a>(&'a self, server: &'a str, db: u32) -> StorageResult<Keys<'a>> {
        let keys: Vec<Bytes> = self.update(server, db, |keyspace| {
            (keyspace.keys().cloned().collect(), false)
        })?;
        Ok(Box::new(keys.into_iter()))
    }

    fn scan_keys<'a>(&'a self, server: &'a str, db: u32, pattern: &str) -> StorageResult<Keys<'a>> {
        let pattern = GlobPattern::new(pattern);
        Ok(Box::new(
            self.keys(server, db)?
                .filter(move |key| pattern.matches_key(key)),
        ))
    }

    fn flush_db(&self, server: &str, db: u32) -> StorageResult<()> {
        let path = self.layout.db_file(server, db)?;
        self.locks
            .with_lock(server, db, || write_atomic(&path, EMPTY_OBJECT))?;
        debug!(server, db, "Flushed database");
        Ok(())
    }

    fn flush_all(&self) -> StorageResult<()> {
        let files = self.db_files()?;
        for (server, db, path) in &files {
            self.locks
                .with_lock(server, *db, || write_atomic(path, EMPTY_OBJECT))?;
        }
        debug!(databases = files.len(), "Flushed all databases");
        Ok(())
    }
}

/// Separates a stored entry into its payload and expiry.
///
/// Entries written by `save_key` are items; entries written through
/// [`WholeFileBackend::save`] may be bare values, which never expire.
fn split_item(value: &Value) -> (&Value, Option<ExpireAt>) {
    match value {
        Value::Item(item) => (&item.value, item.expire_at),
        other => (other, None),
    }
}

fn purge_expired(keyspace: &mut Keyspace) -> usize {
    let before = keyspace.len();
    keyspace.retain(|_, value| !is_expired(split_item(value).1));
    before - keyspace.len()
}

fn load_file(path: &Path) -> StorageResult<Keyspace> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            write_atomic(path, EMPTY_OBJECT)?;
            debug!(path = %path.display(), "Created empty database file");
            return Ok(Keyspace::new());
        }
        Err(e) => return Err(StorageError::io(path, e)),
    };

    let entries: BTreeMap<String, serde_json::Value> = match serde_json::from_slice(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Treating corrupt database file as empty");
            return Ok(Keyspace::new());
        }
    };

    let mut keyspace = Keyspace::with_capacity(entries.len());
    for (name, node) in entries {
        match decode_entry(&name, node) {
            Ok((key, value)) => {
                keyspace.insert(key, value);
            }
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping undecodable entry"),
        }
    }
    Ok(keyspace)
}

fn decode_entry(name: &str, node: serde_json::Value) -> StorageResult<(Bytes, Value)> {
    let key = decode_key(name)?;
    let tagged: TaggedValue = serde_json::from_value(node)?;
    Ok((key, from_tagged(tagged)?))
}

fn save_file(path: &Path, keyspace: &Keyspace) -> StorageResult<()> {
    let entries: BTreeMap<String, TaggedValue> = keyspace
        .iter()
        .map(|(key, value)| (encode_key(key), to_tagged(value)))
        .collect();
    let data = serde_json::to_vec(&entries)?;
    write_atomic(path, &data)
}
