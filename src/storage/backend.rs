//! The interface every persistence strategy implements.

use crate::error::StorageResult;
use crate::storage::value::{ExpireAt, Value};
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// Lazily evaluated key enumeration. Recomputed on every call, never cached.
pub type Keys<'a> = Box<dyn Iterator<Item = Bytes> + 'a>;

/// Which on-disk layout a backend uses.
///
/// The three layouts are independent: pointing one kind at data written by
/// another does not migrate or read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// `{server}/db{N}.json`, the whole keyspace in one JSON object.
    WholeFile,
    /// `{server}/db{N}/{key}.json`, one `item` node per key.
    PerKey,
    /// `{server}/db{N}/{key}.mjson`, expiry on the first line, swept in the background.
    PerKeySweep,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::WholeFile => "file",
            BackendKind::PerKey => "key",
            BackendKind::PerKeySweep => "sweep",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "whole-file" | "json" => Ok(BackendKind::WholeFile),
            "key" | "per-key" | "json2" => Ok(BackendKind::PerKey),
            "sweep" | "per-key-sweep" | "json3" => Ok(BackendKind::PerKeySweep),
            other => Err(format!(
                "unknown backend '{other}', expected one of: file, key, sweep"
            )),
        }
    }
}

/// Per-key persistence operations, addressed by `(server, db, key)`.
///
/// Every call takes the `(server, db)` lock from the backend's
/// [`LockRegistry`](crate::storage::LockRegistry) for the duration of one
/// file read or write.
///
/// Error policy: undecodable data reads as absent; I/O failures other than
/// "file not found" are returned.
pub trait KeyStore: Send + Sync + fmt::Debug {
    /// Which layout this backend writes.
    fn kind(&self) -> BackendKind;

    /// Persists `value` under `key`, replacing any previous value.
    fn save_key(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
        value: &Value,
        expire_at: Option<ExpireAt>,
    ) -> StorageResult<()>;

    /// Loads a live value with its expiry. Expired entries are deleted and
    /// reported as absent.
    fn load_entry(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
    ) -> StorageResult<Option<(Value, Option<ExpireAt>)>>;

    /// Loads a live value.
    fn load_key(&self, server: &str, db: u32, key: &[u8]) -> StorageResult<Option<Value>> {
        Ok(self.load_entry(server, db, key)?.map(|(value, _)| value))
    }

    /// Replaces the expiry of a live key, keeping its value, in one locked
    /// read-modify-write. Returns the previous expiry, or `None` when the key
    /// is absent (nothing is written then). An expiry in the past removes
    /// the key.
    fn set_expiry(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
        expire_at: Option<ExpireAt>,
    ) -> StorageResult<Option<Option<ExpireAt>>>;

    /// Removes a key. Returns whether it existed.
    fn del_key(&self, server: &str, db: u32, key: &[u8]) -> StorageResult<bool>;

    /// `-2` when absent or expired, `-1` without expiry, otherwise whole seconds left.
    fn ttl(&self, server: &str, db: u32, key: &[u8]) -> StorageResult<i64>;

    /// Every live key of a database, in no particular order.
    fn keys<'a>(&'a self, server: &'a str, db: u32) -> StorageResult<Keys<'a>>;

    /// Live keys whose lossy text form matches a shell-glob pattern.
    fn scan_keys<'a>(&'a self, server: &'a str, db: u32, pattern: &str) -> StorageResult<Keys<'a>>;

    /// Deletes every key of one database.
    fn flush_db(&self, server: &str, db: u32) -> StorageResult<()>;

    /// Deletes every key of every database of every server under the root.
    fn flush_all(&self) -> StorageResult<()>;
}
