//! Consumer-side replica of the watcher's mirror.
//!
//! A [`Replica`] is what a consumer builds by applying every batch in order.
//! Each change is checked against the rows it expects to find, so a wrong
//! index surfaces as [`WatcherError::ReplicaMismatch`] instead of silently
//! corrupting the list.

use crate::error::{Result, WatcherError};
use crate::event::{ChangeEntry, ChangeKind};
use crate::path::PathKey;

/// Ordered rows kept in step with a watcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replica {
    rows: Vec<PathKey>,
}

impl Replica {
    /// Create an empty replica.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a batch in order. Stops at the first change that does not fit;
    /// the changes before it stay applied.
    pub fn apply(&mut self, changes: &[ChangeEntry]) -> Result<()> {
        changes.iter().try_for_each(|change| self.apply_one(change))
    }

    fn apply_one(&mut self, change: &ChangeEntry) -> Result<()> {
        if change.is_root() {
            return Ok(());
        }

        let index = change.file_index();
        match change.kind() {
            ChangeKind::Add => {
                if index > self.rows.len() {
                    return Err(self.mismatch(index, format!("cannot add '{}'", change.path())));
                }
                self.rows.insert(index, change.current_path().clone());
            }
            ChangeKind::Remove => {
                self.expect_row(index, change.old_path())?;
                self.rows.remove(index);
            }
            ChangeKind::Rename => {
                self.expect_row(index, change.old_path())?;
                self.rows[index] = change.current_path().clone();
            }
            ChangeKind::Modify => self.expect_row(index, change.current_path())?,
        }
        Ok(())
    }

    fn expect_row(&self, index: usize, expected: &PathKey) -> Result<()> {
        match self.rows.get(index) {
            Some(row) if row == expected => Ok(()),
            Some(row) => Err(self.mismatch(index, format!("expected '{expected}', found '{row}'"))),
            None => Err(self.mismatch(index, format!("no row for '{expected}'"))),
        }
    }

    fn mismatch(&self, index: usize, detail: String) -> WatcherError {
        WatcherError::ReplicaMismatch {
            index,
            len: self.rows.len(),
            detail,
        }
    }

    /// Rows in index order.
    pub fn rows(&self) -> &[PathKey] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop every row.
    pub fn reset(&mut self) {
        self.rows.clear();
    }
}
