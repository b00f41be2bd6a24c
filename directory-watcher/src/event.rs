//! Change entries produced by the watcher.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::PathKey;

/// Kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// An entry appeared in the directory.
    Add,

    /// An entry disappeared from the directory.
    Remove,

    /// An entry was renamed in place.
    Rename,

    /// An entry's contents or size changed.
    Modify,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Rename => "rename",
            Self::Modify => "modify",
        })
    }
}

/// One detected change.
///
/// `file_index` is the position of the entry in the watcher's mirror at the
/// moment this change is applied, counting changes of the same batch that
/// come before it. It is not a durable identifier: apply entries in order and
/// never reuse an index across batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    kind: ChangeKind,
    file_index: usize,
    old_path: PathKey,
    current_path: PathKey,
    is_root: bool,
}

impl ChangeEntry {
    /// An entry was added at `file_index`.
    pub fn added(file_index: usize, path: impl Into<PathKey>) -> Self {
        Self::new(ChangeKind::Add, file_index, PathKey::default(), path.into())
    }

    /// The entry at `file_index` was removed.
    pub fn removed(file_index: usize, path: impl Into<PathKey>) -> Self {
        Self::new(ChangeKind::Remove, file_index, path.into(), PathKey::default())
    }

    /// The entry at `file_index` was renamed from `old_path` to `new_path`.
    pub fn renamed(
        file_index: usize,
        old_path: impl Into<PathKey>,
        new_path: impl Into<PathKey>,
    ) -> Self {
        Self::new(ChangeKind::Rename, file_index, old_path.into(), new_path.into())
    }

    /// The entry at `file_index` was modified.
    pub fn modified(file_index: usize, path: impl Into<PathKey>) -> Self {
        Self::new(ChangeKind::Modify, file_index, PathKey::default(), path.into())
    }

    fn new(kind: ChangeKind, file_index: usize, old_path: PathKey, current_path: PathKey) -> Self {
        Self {
            kind,
            file_index,
            old_path,
            current_path,
            is_root: false,
        }
    }

    /// Mark this change as concerning the tracked directory itself.
    pub fn with_root(mut self) -> Self {
        self.is_root = true;
        self
    }

    pub(crate) fn with_index(mut self, file_index: usize) -> Self {
        self.file_index = file_index;
        self
    }

    /// Kind of this change.
    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    /// Position of the changed entry, see the type-level docs.
    pub fn file_index(&self) -> usize {
        self.file_index
    }

    /// Path before the change. Empty for add and modify.
    pub fn old_path(&self) -> &PathKey {
        &self.old_path
    }

    /// Path after the change. Empty for remove.
    pub fn current_path(&self) -> &PathKey {
        &self.current_path
    }

    /// The path this change is about: the old path for removes, the current
    /// path otherwise.
    pub fn path(&self) -> &PathKey {
        match self.kind {
            ChangeKind::Remove => &self.old_path,
            _ => &self.current_path,
        }
    }

    /// Whether this change concerns the tracked directory itself.
    pub fn is_root(&self) -> bool {
        self.is_root
    }
}

impl fmt::Display for ChangeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ChangeKind::Rename => write!(
                f,
                "rename #{} {} -> {}",
                self.file_index, self.old_path, self.current_path
            ),
            kind => write!(f, "{kind} #{} {}", self.file_index, self.path()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_paths_follow_kind() {
        let add = ChangeEntry::added(3, "a.txt");
        assert!(add.old_path().is_empty());
        assert_eq!(add.current_path().as_str(), "a.txt");

        let remove = ChangeEntry::removed(1, "b.txt");
        assert!(remove.current_path().is_empty());
        assert_eq!(remove.path().as_str(), "b.txt");

        let rename = ChangeEntry::renamed(0, "b.txt", "c.txt");
        assert_eq!(rename.old_path().as_str(), "b.txt");
        assert_eq!(rename.path().as_str(), "c.txt");
        assert!(!rename.is_root());
    }

    #[test]
    fn test_display() {
        assert_eq!(ChangeEntry::modified(2, "x").to_string(), "modify #2 x");
        assert_eq!(ChangeEntry::renamed(0, "a", "b").to_string(), "rename #0 a -> b");
    }

    #[test]
    fn test_serializes_kind_as_snake_case() {
        let json = serde_json::to_value(ChangeEntry::removed(4, "gone.log").with_root()).unwrap();
        assert_eq!(json["kind"], "remove");
        assert_eq!(json["file_index"], 4);
        assert_eq!(json["old_path"], "gone.log");
        assert_eq!(json["is_root"], true);
    }
}
