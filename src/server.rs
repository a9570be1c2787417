//! Database and Server Glue
//!
//! The surface a command dispatcher talks to:
//!
//! ```text
//! ServerRegistry ──get_or_create(id)──► Server ──db(n)──► Database
//!        │                                 │                 │
//!        └──────────── Arc<dyn KeyStore> ──┴─────────────────┘
//! ```
//!
//! A [`Database`] is a cheap handle (identity, number, shared backend); all
//! state lives on disk. The registry is an ordinary value, so tests build
//! isolated ones instead of sharing process-wide state.

use crate::error::StorageResult;
use crate::storage::layout::is_valid_server_id;
use crate::storage::value::{now_secs, ExpireAt, Value};
use crate::storage::{KeyStore, Keys};
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

static GENERATED_IDS: AtomicU64 = AtomicU64::new(0);

/// Name of one logical server; the top-level directory of its data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `{host}:{port}:v{version}`, the identity a client connection derives.
    pub fn from_address(host: &str, port: u16, version: u32) -> Self {
        Self(format!("{host}:{port}:v{version}"))
    }

    /// A process-unique identity. Data saved under it cannot be found by a
    /// later process.
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = GENERATED_IDS.fetch_add(1, Ordering::Relaxed);
        Self(format!("{:x}-{:x}-{seq}", std::process::id(), nanos))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(id: &str) -> bool {
        is_valid_server_id(id)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One numbered keyspace of a server.
#[derive(Debug, Clone)]
pub struct Database {
    server: ServerId,
    index: u32,
    store: Arc<dyn KeyStore>,
}

impl Database {
    pub fn new(server: ServerId, index: u32, store: Arc<dyn KeyStore>) -> Self {
        Self {
            server,
            index,
            store,
        }
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Value>> {
        self.store.load_key(self.server.as_str(), self.index, key)
    }

    /// The live value and its expiry.
    pub fn get_entry(&self, key: &[u8]) -> StorageResult<Option<(Value, Option<ExpireAt>)>> {
        self.store.load_entry(self.server.as_str(), self.index, key)
    }

    /// Stores a value without expiry, replacing any previous one.
    pub fn set(&self, key: &[u8], value: impl Into<Value>) -> StorageResult<()> {
        self.set_at(key, &value.into(), None)
    }

    pub fn set_with_ttl(
        &self,
        key: &[u8],
        value: impl Into<Value>,
        ttl: Duration,
    ) -> StorageResult<()> {
        self.set_at(key, &value.into(), Some(now_secs() + ttl.as_secs_f64()))
    }

    /// Stores a value with an absolute expiry.
    pub fn set_at(
        &self,
        key: &[u8],
        value: &Value,
        expire_at: Option<ExpireAt>,
    ) -> StorageResult<()> {
        self.store
            .save_key(self.server.as_str(), self.index, key, value, expire_at)
    }

    pub fn delete(&self, key: &[u8]) -> StorageResult<bool> {
        self.store.del_key(self.server.as_str(), self.index, key)
    }

    pub fn exists(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get_entry(key)?.is_some())
    }

    /// `-2` missing, `-1` no expiry, otherwise whole seconds left.
    pub fn ttl(&self, key: &[u8]) -> StorageResult<i64> {
        self.store.ttl(self.server.as_str(), self.index, key)
    }

    /// Sets an absolute expiry on an existing key. Returns `false` if the key
    /// is absent. A timestamp in the past makes the key disappear.
    pub fn expire_at(&self, key: &[u8], at: ExpireAt) -> StorageResult<bool> {
        Ok(self.set_expiry(key, Some(at))?.is_some())
    }

    pub fn expire(&self, key: &[u8], ttl: Duration) -> StorageResult<bool> {
        self.expire_at(key, now_secs() + ttl.as_secs_f64())
    }

    /// Removes the expiry of a key. Returns `true` only if there was one.
    pub fn persist(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(matches!(self.set_expiry(key, None)?, Some(Some(_))))
    }

    /// All live keys, in no particular order.
    pub fn keys(&self) -> StorageResult<Keys<'_>> {
        self.store.keys(self.server.as_str(), self.index)
    }

    /// Live keys matching a glob pattern.
    pub fn scan(&self, pattern: &str) -> StorageResult<Keys<'_>> {
        self.store
            .scan_keys(self.server.as_str(), self.index, pattern)
    }

    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.keys()?.count())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.keys()?.next().is_none())
    }

    /// Removes every key of this database only.
    pub fn flush(&self) -> StorageResult<()> {
        self.store.flush_db(self.server.as_str(), self.index)
    }

    fn set_expiry(
        &self,
        key: &[u8],
        expire_at: Option<ExpireAt>,
    ) -> StorageResult<Option<Option<ExpireAt>>> {
        self.store
            .set_expiry(self.server.as_str(), self.index, key, expire_at)
    }
}

/// A logical server: an identity plus the backend its databases use.
#[derive(Debug)]
pub struct Server {
    id: ServerId,
    store: Arc<dyn KeyStore>,
}

impl Server {
    pub fn new(id: ServerId, store: Arc<dyn KeyStore>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> &ServerId {
        &self.id
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    /// Handle to database `index`. Its directory appears on first write.
    pub fn db(&self, index: u32) -> Database {
        Database::new(self.id.clone(), index, Arc::clone(&self.store))
    }

    /// Clears every database of every server under the storage root, not
    /// just this one, matching `FLUSHALL` on a shared directory.
    pub fn flush_all(&self) -> StorageResult<()> {
        self.store.flush_all()
    }
}

/// Identity → server map with create-once semantics.
///
/// Entries live as long as the registry. Connections that name the same
/// identity share one [`Server`].
#[derive(Debug)]
pub struct ServerRegistry {
    store: Arc<dyn KeyStore>,
    servers: DashMap<ServerId, Arc<Server>>,
}

impl ServerRegistry {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            servers: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    /// Returns the server for `id`, creating it on first request.
    pub fn get_or_create(&self, id: &ServerId) -> Arc<Server> {
        self.servers
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Server::new(id.clone(), Arc::clone(&self.store))))
            .value()
            .clone()
    }

    pub fn get(&self, id: &ServerId) -> Option<Arc<Server>> {
        self.servers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
