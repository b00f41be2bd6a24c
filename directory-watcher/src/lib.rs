//! # Directory Watcher
//!
//! This crate watches the direct entries of a single directory and turns the
//! platform's change notifications into an ordered stream of positional
//! changes. A consumer that applies every batch in order keeps a list that
//! matches the watcher's in-memory mirror of the directory.
//!
//! ## Features
//!
//! - **Initial Listing**: The first batch reports every entry as an add
//! - **Positional Changes**: Each change carries the entry's index in the mirror
//! - **Rename Pairing**: "Renamed from" and "renamed to" halves become one rename
//! - **Overflow Recovery**: Lost notifications trigger a full rescan
//! - **Background Worker**: One watch at a time on a dedicated thread
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ChangeSource ──► decode ──► Mirror ──► callback / WatchHooks   │
//! │       │             │          │                                │
//! │       ▼             ▼          ▼                                │
//! │   RawRecord    ChangeEntry  OrderedSet ──► Replica (consumer)   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use dirmirror_directory_watcher::DirectoryWatcher;
//!
//! # fn main() -> dirmirror_directory_watcher::Result<()> {
//! let mut watcher = DirectoryWatcher::new("/tmp/inbox")?;
//! let handle = watcher.handle();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(10));
//!     handle.stop();
//! });
//! watcher.start_watch(|changes| {
//!     for change in changes {
//!         println!("{change}");
//!     }
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod event;
pub mod mirror;
pub mod notify_source;
pub mod path;
pub mod replica;
pub mod source;
pub mod watcher;
pub mod worker;

pub use config::{DesyncPolicy, RenamePairing, WatcherConfig};
pub use error::{Result, WatcherError};
pub use event::{ChangeEntry, ChangeKind};
pub use mirror::Mirror;
pub use notify_source::NotifySource;
pub use path::PathKey;
pub use replica::Replica;
pub use source::{
    ChangeSource, ChannelFeed, ChannelSource, PendingRead, RawAction, RawRecord, ReadOutcome,
};
pub use watcher::{DirectoryWatcher, WatchHandle, WatchState};
pub use worker::{ChannelHooks, WatchHooks, WatcherWorker, WorkerEvent};
