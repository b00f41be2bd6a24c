//! Error types for the directory watcher.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::event::ChangeKind;
use crate::path::PathKey;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur in the directory watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Directory not found.
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// Path exists but is not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// OS-level failure while touching the file system.
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// The watcher already ran to completion and cannot be started again.
    #[error("operation invalid after the watch terminated")]
    Terminated,

    /// The change source dropped a pending request without completing it.
    #[error("change source disconnected")]
    SourceDisconnected,

    /// A remove or modify referenced a path the mirror does not hold.
    #[error("mirror desync: {kind} of untracked path '{path}'")]
    Desync { kind: ChangeKind, path: PathKey },

    /// A rename half arrived out of strict alternation.
    #[error("rename record out of order: '{path}'")]
    RenameOrder { path: PathKey },

    /// A batch could not be applied to a consumer-side replica.
    #[error("replica mismatch at index {index} (len {len}): {detail}")]
    ReplicaMismatch {
        index: usize,
        len: usize,
        detail: String,
    },

    /// A hook panicked while the worker was running a watch.
    #[error("watch callback panicked: {0}")]
    CallbackPanicked(String),

    /// The worker thread could not be spawned.
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl WatcherError {
    /// Creates an IO error with the path for context.
    ///
    /// `NotFound` is reported as [`WatcherError::DirectoryNotFound`] so that
    /// callers can tell a missing directory from a real OS failure.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::DirectoryNotFound(path);
        }
        Self::Io { path, source }
    }

    /// The raw OS error code behind this error, when there is one.
    pub fn os_error_code(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } => source.raw_os_error(),
            Self::Notify(err) => match &err.kind {
                notify::ErrorKind::Io(source) => source.raw_os_error(),
                _ => None,
            },
            _ => None,
        }
    }
}
