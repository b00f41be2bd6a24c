//! Change source backed by the `notify` crate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Sender;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, WatcherError};
use crate::path::PathKey;
use crate::source::{ChangeSource, PendingRead, RawAction, RawRecord, ReadOutcome, RecordBuffer};

/// Watches the direct entries of one directory through the platform's
/// recommended `notify` backend.
///
/// Events arriving between two requests are collected into a byte-budgeted
/// buffer. When the budget is exceeded, or the backend reports that events
/// were dropped, the next request completes with [`ReadOutcome::Overflow`].
pub struct NotifySource {
    /// Canonical directory being watched.
    root: PathBuf,

    /// Underlying notify watcher.
    watcher: RecommendedWatcher,

    /// State shared with the notify callback.
    shared: Arc<Mutex<Shared>>,

    /// Whether `watch` has been called on the root.
    armed: bool,
}

struct Shared {
    buffer: RecordBuffer,
    failure: Option<notify::Error>,
    waiter: Option<Sender<ReadOutcome>>,
}

impl Shared {
    fn take_ready(&mut self) -> Option<ReadOutcome> {
        if let Some(err) = self.failure.take() {
            return Some(ReadOutcome::Failed(WatcherError::Notify(err)));
        }
        self.buffer.take()
    }

    fn complete_waiter(&mut self) {
        if self.waiter.is_none() {
            return;
        }
        let Some(outcome) = self.take_ready() else {
            return;
        };
        if let Some(waiter) = self.waiter.take() {
            if waiter.send(outcome).is_err() {
                debug!("Pending read abandoned before completion");
            }
        }
    }
}

impl NotifySource {
    /// Create a source for `root` with a `buffer_size` byte budget.
    ///
    /// The directory is not watched until [`ChangeSource::start`].
    pub fn open(root: &Path, buffer_size: usize) -> Result<Self> {
        let root = std::fs::canonicalize(root).map_err(|err| WatcherError::io(root, err))?;
        let shared = Arc::new(Mutex::new(Shared {
            buffer: RecordBuffer::new(buffer_size),
            failure: None,
            waiter: None,
        }));

        let handler_root = root.clone();
        let handler_shared = Arc::clone(&shared);
        let watcher = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| {
                handle_event(&mut handler_shared.lock(), &handler_root, res);
            },
        )?;

        Ok(Self {
            root,
            watcher,
            shared,
            armed: false,
        })
    }

    /// The canonical directory this source watches.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ChangeSource for NotifySource {
    fn start(&mut self) -> Result<()> {
        if self.armed {
            return Ok(());
        }
        self.watcher.watch(&self.root, RecursiveMode::NonRecursive)?;
        self.armed = true;
        info!("Started watching: {}", self.root.display());
        Ok(())
    }

    fn request_next(&mut self) -> Result<PendingRead> {
        let mut shared = self.shared.lock();
        if let Some(outcome) = shared.take_ready() {
            return Ok(PendingRead::ready(outcome));
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        shared.waiter = Some(tx);
        Ok(PendingRead::new(rx))
    }

    fn cancel(&mut self) -> Result<()> {
        self.shared.lock().waiter = None;
        Ok(())
    }
}

impl Drop for NotifySource {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.watcher.unwatch(&self.root) {
            debug!("Failed to unwatch {}: {e}", self.root.display());
        }
    }
}

/// Fold one callback result into `shared` and complete a waiting request.
fn handle_event(shared: &mut Shared, root: &Path, res: notify::Result<notify::Event>) {
    match res {
        Ok(event) if event.need_rescan() => {
            warn!("Backend dropped events for {}", root.display());
            shared.buffer.mark_overflow();
        }
        Ok(event) => {
            for record in translate(root, &event) {
                if !shared.buffer.push(record) {
                    break;
                }
            }
        }
        Err(e) => {
            error!("Watch error on {}: {e}", root.display());
            shared.failure = Some(e);
        }
    }
    shared.complete_waiter();
}

/// Map one notify event onto raw records for the direct entries of `root`.
fn translate(root: &Path, event: &notify::Event) -> Vec<RawRecord> {
    let action = match event.kind {
        EventKind::Create(_) => Some(RawAction::Added),
        EventKind::Remove(_) => Some(RawAction::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(RawAction::RenamedOld),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(RawAction::RenamedNew),
        // Repeats a From/To pair that was already reported.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => return Vec::new(),
        // Direction unknown, decided per path below.
        EventKind::Modify(ModifyKind::Name(_)) => None,
        EventKind::Modify(_) => Some(RawAction::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter_map(|path| {
            let action = action.unwrap_or_else(|| {
                if path.symlink_metadata().is_ok() {
                    RawAction::RenamedNew
                } else {
                    RawAction::RenamedOld
                }
            });
            relative_record(root, path, action)
        })
        .collect()
}

fn relative_record(root: &Path, path: &Path, action: RawAction) -> Option<RawRecord> {
    if path == root {
        return Some(RawRecord::root(action));
    }

    let Ok(relative) = path.strip_prefix(root) else {
        trace!("Ignoring event outside {}: {}", root.display(), path.display());
        return None;
    };
    if relative.components().count() != 1 {
        trace!("Ignoring nested event: {}", path.display());
        return None;
    }
    Some(RawRecord::new(action, PathKey::from_path(relative)))
}
