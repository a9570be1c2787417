//! Storage Module
//!
//! Durable JSON persistence for a multi-database keyspace. Three
//! interchangeable backends share the same leaves:
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────── Arc<dyn KeyStore> ────────────────┐
//!              │                                                   │
//!   ┌──────────┴────────┐  ┌──────────────────┐  ┌─────────────────┴───┐
//!   │ WholeFileBackend  │  │  PerKeyBackend   │  │  SweepingBackend    │
//!   │ db{N}.json        │  │  db{N}/{k}.json  │  │  db{N}/{k}.mjson    │
//!   └─────────┬─────────┘  └────────┬─────────┘  │  + ExpirySweeper    │
//!             │                     │            └──────────┬──────────┘
//!             └──────────┬──────────┴───────────────────────┘
//!                        ▼
//!   ┌───────────┐ ┌──────────────┐ ┌──────────────┐ ┌─────────────┐
//!   │ codec     │ │ PathLayout   │ │ LockRegistry │ │ GlobPattern │
//!   │ key/value │ │ root/srv/dbN │ │ (srv, db)    │ │ scan filter │
//!   └───────────┘ └──────────────┘ └──────────────┘ └─────────────┘
//! ```
//!
//! ## Features
//!
//! - **Binary-safe keys**: URL-safe base64 file names, exact round trip
//! - **Tagged values**: every JSON node carries `__type`, decoded by variant
//! - **Lazy expiry**: reads delete expired entries before reporting absence
//! - **Active expiry**: the sweeping backend evicts files nobody reads
//! - **Corruption as data loss**: undecodable files read as missing keys
//!
//! ## Example
//!
//! ```
//! use flashkv_persist::storage::{KeyStore, PerKeyBackend, Value};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = PerKeyBackend::new(dir.path());
//!
//! store.save_key("srv", 0, b"counter", &Value::bytes("1"), None).unwrap();
//! assert_eq!(
//!     store.load_key("srv", 0, b"counter").unwrap(),
//!     Some(Value::bytes("1"))
//! );
//! assert_eq!(store.ttl("srv", 0, b"counter").unwrap(), -1);
//! ```

pub mod backend;
pub mod codec;
pub mod expiry;
pub mod layout;
pub mod locks;
pub mod pattern;
pub mod per_key;
pub mod value;
pub mod whole_file;

// Re-export commonly used types
pub use backend::{BackendKind, KeyStore, Keys};
pub use codec::{decode_key, decode_value, encode_key, encode_value, TaggedValue};
pub use expiry::{ExpiryConfig, ExpirySweeper, SweepStats, SweepStore, SweepingBackend};
pub use layout::PathLayout;
pub use locks::LockRegistry;
pub use pattern::GlobPattern;
pub use per_key::{FileKeyStore, JsonItemFormat, KeyFileFormat, MarkedJsonFormat, PerKeyBackend};
pub use value::{now_secs, ExpireAt, Item, MemberSet, SortedSet, Value};
pub use whole_file::{Keyspace, WholeFileBackend};
