//! In-memory mirror of a directory listing.
//!
//! The mirror is the ordered list of entry names the watcher believes the
//! directory holds. Every change it emits carries the position of the entry
//! in the mirror at the moment the change is applied, so a consumer that
//! applies each batch in order ends up with the same list.

use std::io;
use std::path::Path;

use dirmirror_utils_ordered_set::OrderedSet;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::error::{Result, WatcherError};
use crate::event::{ChangeEntry, ChangeKind};
use crate::path::PathKey;

/// Ordered, case-insensitive listing of a directory's direct entries.
#[derive(Debug, Default)]
pub struct Mirror {
    files: OrderedSet<PathKey>,

    /// Names on disk hidden behind a tracked entry that differs only in case.
    shadowed: Vec<PathKey>,
}

impl Mirror {
    /// Create an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no entries are tracked.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Tracked entries in mirror order.
    pub fn files(&self) -> &OrderedSet<PathKey> {
        &self.files
    }

    /// Position of `path`, if tracked.
    pub fn position(&self, path: &PathKey) -> Option<usize> {
        self.files.find(path)
    }

    /// List the direct entries of `root`, sorted by name.
    ///
    /// Entries that vanish while the listing is taken are skipped.
    pub fn enumerate(root: &Path) -> Result<Vec<PathKey>> {
        let mut names = Vec::new();

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            match entry {
                Ok(entry) => names.push(PathKey::from(entry.file_name())),
                Err(e) => {
                    let vanished = e.depth() > 0
                        && e.io_error()
                            .is_some_and(|err| err.kind() == io::ErrorKind::NotFound);
                    if vanished {
                        debug!("Entry vanished during scan: {e}");
                        continue;
                    }
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.to_path_buf());
                    return Err(WatcherError::io(path, io::Error::from(e)));
                }
            }
        }

        debug!("Enumerated {} entries in {}", names.len(), root.display());
        Ok(names)
    }

    /// Replace the mirror with `fresh`, appending the changes that take a
    /// consumer from the old listing to the new one.
    ///
    /// Every tracked entry is removed from the back, then every fresh entry is
    /// added in order.
    pub fn resync(&mut self, fresh: Vec<PathKey>, batch: &mut Vec<ChangeEntry>) {
        let removed = self.files.len();
        self.shadowed.clear();
        while let Some(path) = self.files.pop_back() {
            batch.push(ChangeEntry::removed(self.files.len(), path));
        }

        for path in fresh {
            match self.files.push_back(path.clone()) {
                Some(index) => batch.push(ChangeEntry::added(index, path)),
                None => {
                    warn!("Skipping '{path}', its name collides with a tracked entry");
                    self.shadowed.push(path);
                }
            }
        }

        debug!("Resynced mirror: {removed} removed, {} added", self.files.len());
    }

    /// Apply decoded entries in order, appending them to `batch` with their
    /// final indices.
    ///
    /// `root` is the watched directory. It is consulted when a change names a
    /// spelling other than the tracked one, so that a name differing only in
    /// case does not take the tracked entry with it.
    ///
    /// Stops at the first remove or modify of an untracked path and returns
    /// [`WatcherError::Desync`]; the entries before it stay applied.
    pub fn apply(
        &mut self,
        root: &Path,
        entries: Vec<ChangeEntry>,
        batch: &mut Vec<ChangeEntry>,
    ) -> Result<()> {
        for entry in entries {
            if entry.is_root() {
                batch.push(entry.with_index(0));
                continue;
            }

            match entry.kind() {
                ChangeKind::Add => self.apply_add(entry, batch),
                ChangeKind::Remove => {
                    let Some(index) = self.files.find(entry.old_path()) else {
                        return Err(desync(&entry));
                    };
                    if self.twin_survives(root, index, entry.old_path()) {
                        continue;
                    }
                    self.files.remove_at(index);
                    let removed = entry.old_path().clone();
                    batch.push(entry.with_index(index));
                    self.restore_shadowed(root, &removed, batch);
                }
                ChangeKind::Modify => {
                    let Some(index) = self.files.find(entry.current_path()) else {
                        return Err(desync(&entry));
                    };
                    batch.push(entry.with_index(index));
                }
                ChangeKind::Rename => self.apply_rename(root, entry, batch),
            }
        }
        Ok(())
    }

    fn apply_add(&mut self, entry: ChangeEntry, batch: &mut Vec<ChangeEntry>) {
        let path = entry.current_path().clone();
        if let Some(index) = self.files.find(&path) {
            trace!("Add of tracked '{path}' reported as modify");
            if self.files[index].as_str() != path.as_str() && !self.is_shadowed(&path) {
                self.shadowed.push(path.clone());
            }
            batch.push(ChangeEntry::modified(index, path));
            return;
        }

        let index = self.files.len();
        self.files.push_back(path);
        batch.push(entry.with_index(index));
    }

    fn apply_rename(&mut self, root: &Path, entry: ChangeEntry, batch: &mut Vec<ChangeEntry>) {
        let Some(source) = self.files.find(entry.old_path()) else {
            debug!(
                "Dropping rename of untracked '{}' to '{}'",
                entry.old_path(),
                entry.current_path()
            );
            return;
        };

        // A shadowed name moved away; only its new name matters.
        if self.twin_survives(root, source, entry.old_path()) {
            self.apply_add(ChangeEntry::added(0, entry.current_path().clone()), batch);
            return;
        }

        // The target name replaced an entry that is still tracked.
        if let Some(target) = self.files.find(entry.current_path()) {
            if target != source {
                if let Some(replaced) = self.files.remove_at(target) {
                    batch.push(ChangeEntry::removed(target, replaced));
                }
            }
        }

        let Some(index) = self.files.find(entry.old_path()) else {
            return;
        };
        if !self.files.assign(index, entry.current_path().clone()) {
            warn!(
                "Could not rename '{}' to '{}' at {index}",
                entry.old_path(),
                entry.current_path()
            );
            return;
        }
        let renamed = entry.old_path().clone();
        batch.push(entry.with_index(index));
        self.restore_shadowed(root, &renamed, batch);
    }

    /// Whether the change to `named` hit a shadowed spelling while the
    /// tracked entry at `index` is still on disk. Forgets `named` if so.
    fn twin_survives(&mut self, root: &Path, index: usize, named: &PathKey) -> bool {
        let tracked = &self.files[index];
        if tracked.as_str() == named.as_str() || !exists(root, tracked) {
            return false;
        }

        warn!("'{named}' changed but '{tracked}' is still present, keeping it");
        self.shadowed.retain(|name| name.as_str() != named.as_str());
        true
    }

    /// Track a shadowed twin of `gone` again if it is still on disk.
    fn restore_shadowed(&mut self, root: &Path, gone: &PathKey, batch: &mut Vec<ChangeEntry>) {
        self.shadowed.retain(|name| name.as_str() != gone.as_str());
        let Some(pos) = self
            .shadowed
            .iter()
            .position(|name| name == gone && exists(root, name))
        else {
            return;
        };

        let name = self.shadowed.swap_remove(pos);
        if let Some(index) = self.files.push_back(name.clone()) {
            debug!("Tracking '{name}' again after '{gone}' went away");
            batch.push(ChangeEntry::added(index, name));
        }
    }

    fn is_shadowed(&self, path: &PathKey) -> bool {
        self.shadowed.iter().any(|name| name.as_str() == path.as_str())
    }
}

fn exists(root: &Path, name: &PathKey) -> bool {
    root.join(name.as_path()).symlink_metadata().is_ok()
}

fn desync(entry: &ChangeEntry) -> WatcherError {
    WatcherError::Desync {
        kind: entry.kind(),
        path: entry.path().clone(),
    }
}
