//! # FlashKV Persist - JSON Persistence for a Multi-Database Keyspace
//!
//! Durable storage for a Redis-like keyspace: every server identity owns
//! numbered databases, every database maps binary keys to typed values with
//! optional expiry, and everything is written to disk as tagged JSON so
//! several processes pointed at the same directory see each other's data.
//!
//! ## Features
//!
//! - **Three Backends**: whole-file, per-key, and per-key with background sweep
//! - **Binary Safe**: keys and scalars round-trip exactly, UTF-8 or not
//! - **Typed Values**: scalars, lists, hashes, sets and sorted sets
//! - **Expiry**: lazy eviction on read plus optional active sweeping
//! - **Glob Scans**: `KEYS`-style pattern matching over live keys
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           FlashKV Persist                               │
//! │                                                                         │
//! │  ┌────────────────┐   ┌────────────┐   ┌────────────┐                   │
//! │  │ ServerRegistry │──>│   Server   │──>│  Database  │  (dispatcher API) │
//! │  └────────────────┘   └────────────┘   └─────┬──────┘                   │
//! │                                              │                          │
//! │                                              ▼                          │
//! │  ┌──────────────────────────────────────────────────────────────────┐   │
//! │  │                     Arc<dyn KeyStore>                            │   │
//! │  │  WholeFileBackend  │  PerKeyBackend  │  SweepingBackend          │   │
//! │  └──────────────────────────────────────────────────────────────────┘   │
//! │        │                       │                     ▲                  │
//! │        ▼                       ▼                     │                  │
//! │  ┌───────────┐  ┌────────────┐  ┌──────────────┐  ┌──┴──────────────┐   │
//! │  │ codec     │  │ PathLayout │  │ LockRegistry │  │ ExpirySweeper   │   │
//! │  │ (serde)   │  │ (fs paths) │  │ (srv, db)    │  │ (thread)        │   │
//! │  └───────────┘  └────────────┘  └──────────────┘  └─────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```
//! use flashkv_persist::{Server, ServerId, StorageConfig};
//! use flashkv_persist::storage::{BackendKind, Value};
//! use std::time::Duration;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = StorageConfig {
//!     root: dir.path().to_path_buf(),
//!     backend: BackendKind::PerKey,
//!     ..Default::default()
//! };
//!
//! let server = Server::new(ServerId::new("example"), config.open().unwrap());
//! let db = server.db(0);
//!
//! db.set(b"counter", Value::bytes("1")).unwrap();
//! db.set_with_ttl(b"session", Value::bytes("token"), Duration::from_secs(60)).unwrap();
//!
//! assert_eq!(db.get(b"counter").unwrap(), Some(Value::bytes("1")));
//! assert_eq!(db.ttl(b"counter").unwrap(), -1);
//! assert_eq!(db.scan("sess*").unwrap().count(), 1);
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: codecs, path layout, locks and the three backends
//! - [`server`]: database/server handles and the server registry
//! - [`config`]: storage root, backend choice and environment loading
//! - [`error`]: the storage error taxonomy
//!
//! ## Design Highlights
//!
//! ### Corruption Is Data Loss, Not a Crash
//!
//! A key file that cannot be decoded reads as a missing key, and a whole
//! database file that is not JSON reads as an empty database. I/O failures
//! such as permission errors or a full disk always propagate.
//!
//! ### One Lock per Database
//!
//! Every file access holds the `(server, database)` mutex for one read or
//! one write. The lock is in-process only; separate processes sharing a
//! directory rely on writes landing via rename.

pub mod config;
pub mod error;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{ConfigError, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use server::{Database, Server, ServerId, ServerRegistry};
pub use storage::{BackendKind, KeyStore, Value};

/// Version of FlashKV Persist
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
