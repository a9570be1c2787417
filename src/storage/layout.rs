//! On-Disk Path Layout
//!
//! Every backend derives its paths from the same root:
//!
//! ```text
//! {root}/
//! └── {server}/
//!     ├── db0.json              whole-file backend
//!     ├── db1/                  per-key backends
//!     │   ├── Y291bnRlcg==.json     per-key
//!     │   └── Zm9v.mjson            per-key with sweep
//!     └── ...
//! ```
//!
//! Directories are created on demand with `create_dir_all`, which tolerates
//! concurrent creators. Nothing here takes locks; callers hold the
//! [`LockRegistry`](crate::storage::LockRegistry) entry for the database.

use crate::error::{StorageError, StorageResult};
use crate::storage::codec::encode_key;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Suffix of in-flight writes. Never matches a data file extension.
pub const TEMP_SUFFIX: &str = "tmp";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Longest encoded key name accepted, leaving room for the extension
/// under the common 255-byte file name limit. Temp files use their own
/// short names, so this bound covers every file a write creates.
pub const MAX_KEY_NAME_LEN: usize = 240;

/// A database directory found while walking the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbLocation {
    pub server: String,
    pub db: u32,
    pub path: PathBuf,
}

/// Maps (server, database, key) to paths below a storage root.
#[derive(Debug, Clone)]
pub struct PathLayout {
    root: PathBuf,
}

impl PathLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of one server identity. Not created.
    pub fn server_dir(&self, server: &str) -> StorageResult<PathBuf> {
        validate_server_id(server)?;
        Ok(self.root.join(server))
    }

    /// Whole-file path `{server}/db{N}.json`, creating the server directory.
    pub fn db_file(&self, server: &str, db: u32) -> StorageResult<PathBuf> {
        let dir = self.server_dir(server)?;
        create_dir(&dir)?;
        Ok(dir.join(format!("{}.json", db_dir_name(db))))
    }

    /// Per-key directory `{server}/db{N}`, creating it if needed.
    pub fn db_dir(&self, server: &str, db: u32) -> StorageResult<PathBuf> {
        let dir = self.server_dir(server)?.join(db_dir_name(db));
        create_dir(&dir)?;
        Ok(dir)
    }

    /// File path of one key: `{server}/db{N}/{encoded key}.{extension}`.
    pub fn key_path(
        &self,
        server: &str,
        db: u32,
        key: &[u8],
        extension: &str,
    ) -> StorageResult<PathBuf> {
        let name = encode_key(key);
        if name.len() > MAX_KEY_NAME_LEN {
            return Err(StorageError::InvalidKeyName(format!(
                "encoded key is {} bytes, limit is {}",
                name.len(),
                MAX_KEY_NAME_LEN
            )));
        }
        Ok(self.db_dir(server, db)?.join(format!("{name}.{extension}")))
    }

    /// Server identity directories directly below the root.
    pub fn server_dirs(&self) -> StorageResult<Vec<(String, PathBuf)>> {
        let mut out = Vec::new();
        for entry in read_dir_if_exists(&self.root)? {
            let entry = entry.map_err(|e| StorageError::io(&self.root, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                out.push((name.to_string(), path));
            }
        }
        Ok(out)
    }

    /// Every `db{N}` directory of every server below the root.
    pub fn db_dirs(&self) -> StorageResult<Vec<DbLocation>> {
        let mut out = Vec::new();
        for (server, server_path) in self.server_dirs()? {
            for entry in read_dir_if_exists(&server_path)? {
                let entry = entry.map_err(|e| StorageError::io(&server_path, e))?;
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let db = entry.file_name().to_str().and_then(parse_db_dir_name);
                if let Some(db) = db {
                    out.push(DbLocation {
                        server: server.clone(),
                        db,
                        path,
                    });
                }
            }
        }
        Ok(out)
    }
}

/// `db{N}`.
pub fn db_dir_name(db: u32) -> String {
    format!("db{db}")
}

/// Inverse of [`db_dir_name`]; also accepts a trailing `.json`.
pub fn parse_db_dir_name(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("db")?;
    let digits = digits.strip_suffix(".json").unwrap_or(digits);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Lists a directory, treating a missing directory as empty.
pub(crate) fn read_dir_if_exists(dir: &Path) -> StorageResult<Vec<std::io::Result<fs::DirEntry>>> {
    match fs::read_dir(dir) {
        Ok(iter) => Ok(iter.collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(StorageError::io(dir, e)),
    }
}

/// Writes `data` to a sibling temp file and renames it over `path`, so
/// readers (in this or another process) see either the old or the new
/// content, never a torn write.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let tmp = temp_path(path);

    let result = fs::File::create(&tmp)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_data()
        })
        .and_then(|()| fs::rename(&tmp, path));

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

/// Sibling temp file for `path`. The name does not embed the target name,
/// so its length stays fixed however long the key name is.
fn temp_path(path: &Path) -> PathBuf {
    path.with_file_name(format!(
        ".{:x}-{:x}.{TEMP_SUFFIX}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

/// Removes a file. Returns `false` if it did not exist.
pub(crate) fn remove_if_exists(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

fn create_dir(dir: &Path) -> StorageResult<()> {
    fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))
}

/// Whether `server` can be used as a single directory name below the root.
pub fn is_valid_server_id(server: &str) -> bool {
    !(server.is_empty()
        || server == "."
        || server == ".."
        || server.contains(['/', '\\', '\0']))
}

fn validate_server_id(server: &str) -> StorageResult<()> {
    if !is_valid_server_id(server) {
        return Err(StorageError::InvalidServerId(server.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_db_file_path() {
        let tmp = TempDir::new().unwrap();
        let layout = PathLayout::new(tmp.path());

        let path = layout.db_file("srv", 3).unwrap();
        assert_eq!(path, tmp.path().join("srv").join("db3.json"));
        assert!(tmp.path().join("srv").is_dir());
        assert!(!path.exists());
    }

    #[test]
    fn test_key_path_creates_db_dir() {
        let tmp = TempDir::new().unwrap();
        let layout = PathLayout::new(tmp.path());

        let path = layout.key_path("srv", 0, b"foo", "mjson").unwrap();
        assert_eq!(path, tmp.path().join("srv").join("db0").join("Zm9v.mjson"));
        assert!(tmp.path().join("srv").join("db0").is_dir());

        // Idempotent
        layout.db_dir("srv", 0).unwrap();
    }

    #[test]
    fn test_key_path_rejects_oversized_keys() {
        let tmp = TempDir::new().unwrap();
        let layout = PathLayout::new(tmp.path());

        let key = vec![b'k'; 200];
        assert!(matches!(
            layout.key_path("srv", 0, &key, "json"),
            Err(StorageError::InvalidKeyName(_))
        ));
    }

    #[test]
    fn test_invalid_server_ids() {
        let layout = PathLayout::new("/tmp/unused");
        for bad in ["", ".", "..", "a/b", "a\\b"] {
            assert!(matches!(
                layout.server_dir(bad),
                Err(StorageError::InvalidServerId(_))
            ));
        }
        assert!(layout.server_dir("127.0.0.1:6379:v7").is_ok());
    }

    #[test]
    fn test_parse_db_dir_name() {
        assert_eq!(parse_db_dir_name("db0"), Some(0));
        assert_eq!(parse_db_dir_name("db15"), Some(15));
        assert_eq!(parse_db_dir_name("db2.json"), Some(2));
        assert_eq!(parse_db_dir_name("db"), None);
        assert_eq!(parse_db_dir_name("db-1"), None);
        assert_eq!(parse_db_dir_name("dbx"), None);
        assert_eq!(parse_db_dir_name("other"), None);
    }

    #[test]
    fn test_db_dirs_walk() {
        let tmp = TempDir::new().unwrap();
        let layout = PathLayout::new(tmp.path());

        layout.db_dir("a", 0).unwrap();
        layout.db_dir("a", 2).unwrap();
        layout.db_dir("b", 1).unwrap();
        layout.db_file("c", 0).unwrap();
        fs::write(tmp.path().join("stray.txt"), b"x").unwrap();
        fs::create_dir_all(tmp.path().join("a").join("notes")).unwrap();

        let mut found: Vec<(String, u32)> = layout
            .db_dirs()
            .unwrap()
            .into_iter()
            .map(|loc| (loc.server, loc.db))
            .collect();
        found.sort();
        assert_eq!(
            found,
            vec![("a".to_string(), 0), ("a".to_string(), 2), ("b".to_string(), 1)]
        );
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("db0.json");

        write_atomic(&path, b"{}").unwrap();
        write_atomic(&path, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{\"a\":1}");

        // No temp files left behind
        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_temp_name_is_short_and_never_a_data_file() {
        let tmp = TempDir::new().unwrap();
        let layout = PathLayout::new(tmp.path());
        let key = vec![b'k'; 180];

        let target = layout.key_path("srv", 0, &key, "mjson").unwrap();
        let temp = temp_path(&target);
        assert_eq!(temp.parent(), target.parent());
        assert!(temp.file_name().unwrap().len() < 64);
        assert_eq!(temp.extension().unwrap(), TEMP_SUFFIX);

        write_atomic(&target, b"inf\n{}").unwrap();
        assert!(target.is_file());
    }

    #[test]
    fn test_write_atomic_missing_dir_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("missing").join("x.json");
        assert!(matches!(
            write_atomic(&path, b"{}"),
            Err(StorageError::Io { .. })
        ));
    }

    #[test]
    fn test_remove_if_exists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("k.json");
        fs::write(&path, b"x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
    }

    #[test]
    fn test_missing_root_walks_empty() {
        let layout = PathLayout::new("/nonexistent/flashkv-root");
        assert!(layout.db_dirs().unwrap().is_empty());
    }
}
