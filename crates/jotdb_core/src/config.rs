//! Database configuration.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for opening a database.
///
/// Unknown keys in a configuration file fail startup; omitted keys take
/// their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Directory holding collection files, lock sidecars, and persisted
    /// secondary indexes.
    pub data_dir: PathBuf,

    /// Directory holding the write-ahead log.
    pub wal_dir: PathBuf,

    /// Whether to fsync at commit boundaries (safer but slower).
    pub sync_writes: bool,

    /// Checkpoint after this many committed operations.
    pub checkpoint_ops: u64,

    /// Checkpoint after this many seconds have elapsed.
    pub checkpoint_interval_s: u64,

    /// Maximum number of concurrently active transactions.
    pub max_concurrent_transactions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            wal_dir: PathBuf::from("./wal"),
            sync_writes: true,
            checkpoint_ops: 1000,
            checkpoint_interval_s: 300,
            max_concurrent_transactions: 100,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data directory.
    #[must_use]
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the WAL directory.
    #[must_use]
    pub fn wal_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.wal_dir = path.into();
        self
    }

    /// Sets whether to fsync at commit boundaries.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the operation-count checkpoint threshold.
    #[must_use]
    pub const fn checkpoint_ops(mut self, ops: u64) -> Self {
        self.checkpoint_ops = ops;
        self
    }

    /// Sets the elapsed-time checkpoint threshold in seconds.
    #[must_use]
    pub const fn checkpoint_interval_s(mut self, seconds: u64) -> Self {
        self.checkpoint_interval_s = seconds;
        self
    }

    /// Sets the maximum number of concurrent transactions.
    #[must_use]
    pub const fn max_concurrent_transactions(mut self, max: usize) -> Self {
        self.max_concurrent_transactions = max;
        self
    }

    /// Parses a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` for unknown keys, malformed JSON, or
    /// invalid values.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` if the file cannot be read or parsed.
    pub fn from_json_file(path: &Path) -> CoreResult<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            CoreError::config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_json_str(&data)
    }

    /// Validates configuration values.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` if any value is out of range.
    pub fn validate(&self) -> CoreResult<()> {
        if self.checkpoint_ops == 0 {
            return Err(CoreError::config("checkpoint_ops must be greater than 0"));
        }
        if self.max_concurrent_transactions == 0 {
            return Err(CoreError::config(
                "max_concurrent_transactions must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Returns the elapsed-time checkpoint threshold as a `Duration`.
    #[must_use]
    pub const fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_s)
    }
}
