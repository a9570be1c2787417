//! Storage configuration.
//!
//! | Variable                      | Meaning                              | Default            |
//! |-------------------------------|--------------------------------------|--------------------|
//! | `FLASHKV_STORAGE_DIR`         | storage root                         | `$TMPDIR/flashkv`  |
//! | `FLASHKV_BACKEND`             | `file`, `key` or `sweep`             | `key`              |
//! | `FLASHKV_SERVER_ID`           | server identity directory            | generated          |
//! | `FLASHKV_SWEEP_INTERVAL_SECS` | pause between background sweeps      | `10`               |

use crate::error::StorageResult;
use crate::server::ServerId;
use crate::storage::{
    BackendKind, ExpiryConfig, KeyStore, LockRegistry, PathLayout, PerKeyBackend,
    SweepingBackend, WholeFileBackend,
};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const ENV_STORAGE_DIR: &str = "FLASHKV_STORAGE_DIR";
pub const ENV_BACKEND: &str = "FLASHKV_BACKEND";
pub const ENV_SERVER_ID: &str = "FLASHKV_SERVER_ID";
pub const ENV_SWEEP_INTERVAL: &str = "FLASHKV_SWEEP_INTERVAL_SECS";

/// Errors from reading configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0}")]
    InvalidBackend(String),

    #[error("invalid sweep interval {0:?}: expected a positive number of seconds")]
    InvalidSweepInterval(String),

    #[error("invalid server identity {0:?}")]
    InvalidServerId(String),
}

/// Where and how keyspaces are persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub backend: BackendKind,
    /// Fixed identity. `None` generates a fresh one per process, which makes
    /// data from earlier runs unreachable.
    pub server_id: Option<String>,
    pub sweep_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: env::temp_dir().join("flashkv"),
            backend: BackendKind::PerKey,
            server_id: None,
            sweep_interval: ExpiryConfig::default().interval,
        }
    }
}

impl StorageConfig {
    /// Reads the `FLASHKV_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(dir) = lookup(ENV_STORAGE_DIR).filter(|v| !v.trim().is_empty()) {
            config.root = PathBuf::from(dir);
        }
        if let Some(backend) = lookup(ENV_BACKEND) {
            config.backend = parse_backend(&backend)?;
        }
        if let Some(id) = lookup(ENV_SERVER_ID) {
            config.server_id = Some(parse_server_id(&id)?);
        }
        if let Some(secs) = lookup(ENV_SWEEP_INTERVAL) {
            config.sweep_interval = parse_sweep_interval(&secs)?;
        }

        Ok(config)
    }

    /// The configured identity, or a freshly generated one.
    pub fn server_id(&self) -> ServerId {
        match &self.server_id {
            Some(id) => ServerId::new(id.clone()),
            None => ServerId::generate(),
        }
    }

    /// Opens the configured backend with its own lock registry.
    pub fn open(&self) -> StorageResult<Arc<dyn KeyStore>> {
        self.open_with_locks(Arc::new(LockRegistry::new()))
    }

    /// Opens the configured backend sharing `locks` with other backends.
    pub fn open_with_locks(&self, locks: Arc<LockRegistry>) -> StorageResult<Arc<dyn KeyStore>> {
        let layout = PathLayout::new(&self.root);
        let store: Arc<dyn KeyStore> = match self.backend {
            BackendKind::WholeFile => Arc::new(WholeFileBackend::with_locks(layout, locks)),
            BackendKind::PerKey => Arc::new(PerKeyBackend::with_locks(layout, locks)),
            BackendKind::PerKeySweep => Arc::new(SweepingBackend::with_locks(
                layout,
                locks,
                ExpiryConfig {
                    interval: self.sweep_interval,
                },
            )?),
        };

        info!(
            root = %self.root.display(),
            backend = %self.backend,
            "Storage backend opened"
        );
        Ok(store)
    }
}

pub fn parse_backend(value: &str) -> Result<BackendKind, ConfigError> {
    value.parse().map_err(ConfigError::InvalidBackend)
}

pub fn parse_sweep_interval(value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Ok(Duration::from_secs_f64(secs)),
        _ => Err(ConfigError::InvalidSweepInterval(value.to_string())),
    }
}

pub fn parse_server_id(value: &str) -> Result<String, ConfigError> {
    let id = value.trim();
    if ServerId::is_valid(id) {
        Ok(id.to_string())
    } else {
        Err(ConfigError::InvalidServerId(value.to_string()))
    }
}
