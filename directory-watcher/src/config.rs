//! Configuration types for directory watching.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatcherError};

/// Byte budget of the raw record buffer. Remote shares cannot deliver more
/// than 64 KiB of notifications per request.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// How long to wait for the missing half of a rename.
pub const DEFAULT_RENAME_SETTLE_MS: u64 = 50;

/// Configuration for a [`DirectoryWatcher`](crate::DirectoryWatcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Byte budget for records buffered between two requests. Exceeding it
    /// discards the buffer and forces a full rescan.
    pub buffer_size: usize,

    /// Milliseconds to wait for the other half of a rename before treating a
    /// lone half as a remove or add. Zero disables the wait.
    pub rename_settle_ms: u64,

    /// What to do when a change references a path missing from the mirror.
    pub desync_policy: DesyncPolicy,

    /// How rename halves are paired.
    pub rename_pairing: RenamePairing,
}

impl WatcherConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            rename_settle_ms: DEFAULT_RENAME_SETTLE_MS,
            desync_policy: DesyncPolicy::default(),
            rename_pairing: RenamePairing::default(),
        }
    }

    /// Set the raw buffer size in bytes.
    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Set the rename settle window.
    pub fn with_rename_settle(mut self, settle: Duration) -> Self {
        self.rename_settle_ms = u64::try_from(settle.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the desync policy.
    pub fn with_desync_policy(mut self, policy: DesyncPolicy) -> Self {
        self.desync_policy = policy;
        self
    }

    /// Set the rename pairing mode.
    pub fn with_rename_pairing(mut self, pairing: RenamePairing) -> Self {
        self.rename_pairing = pairing;
        self
    }

    /// The rename settle window as a [`Duration`].
    pub fn rename_settle(&self) -> Duration {
        Duration::from_millis(self.rename_settle_ms)
    }

    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| WatcherError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(WatcherError::Config(
                "buffer_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Reaction to a remove or modify of a path the mirror does not hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesyncPolicy {
    /// Keep the part of the batch applied so far, then append a full resync
    /// so the consumer converges on the directory contents.
    #[default]
    Rescan,

    /// Stop the watch with [`WatcherError::Desync`].
    Fail,
}

/// Pairing of "renamed from" and "renamed to" records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenamePairing {
    /// Two LIFO stacks; a half pairs with the most recent pending opposite
    /// half. Several renames interleaved out of alternation may mismatch.
    #[default]
    Stacked,

    /// A pending half must be followed directly by its counterpart,
    /// otherwise the watch fails with [`WatcherError::RenameOrder`].
    Strict,
}
