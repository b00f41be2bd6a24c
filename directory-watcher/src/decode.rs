//! Decoding raw records into change entries.
//!
//! Rename halves are paired with two LIFO stacks, one for "renamed from"
//! names and one for "renamed to" names. A half that finds the opposite stack
//! non-empty pairs with its top and emits a single rename at its own position
//! in the record stream. A half that never finds a partner within the batch
//! degrades to a remove (old name) or an add (new name) at the position it
//! arrived in.
//!
//! Indices are left at zero; the mirror assigns them when the entries are
//! applied.

use tracing::{debug, trace};

use crate::config::RenamePairing;
use crate::error::{Result, WatcherError};
use crate::event::ChangeEntry;
use crate::path::PathKey;
use crate::source::{RawAction, RawRecord};

/// Decode records in arrival order.
pub fn decode(
    records: impl IntoIterator<Item = RawRecord>,
    pairing: RenamePairing,
) -> Result<Vec<ChangeEntry>> {
    let mut slots: Vec<Option<ChangeEntry>> = Vec::new();
    let mut old_names: Vec<(usize, PathKey)> = Vec::new();
    let mut new_names: Vec<(usize, PathKey)> = Vec::new();

    for record in records {
        if pairing == RenamePairing::Strict {
            let completes = match record.action {
                RawAction::RenamedNew => !old_names.is_empty(),
                RawAction::RenamedOld => !new_names.is_empty(),
                _ => false,
            };
            let pending = old_names.last().or(new_names.last());
            if let (Some((_, path)), false) = (pending, completes) {
                return Err(WatcherError::RenameOrder { path: path.clone() });
            }
        }

        if record.is_root {
            slots.push(Some(root_entry(record.action)));
            continue;
        }

        trace!("Decoding {:?} {}", record.action, record.name);
        let name = record.name;
        let entry = match record.action {
            RawAction::Added => Some(ChangeEntry::added(0, name)),
            RawAction::Removed => Some(ChangeEntry::removed(0, name)),
            RawAction::Modified => Some(ChangeEntry::modified(0, name)),
            RawAction::RenamedOld => match new_names.pop() {
                Some((_, new_name)) => Some(ChangeEntry::renamed(0, name, new_name)),
                None => {
                    old_names.push((slots.len(), name));
                    None
                }
            },
            RawAction::RenamedNew => match old_names.pop() {
                Some((_, old_name)) => Some(ChangeEntry::renamed(0, old_name, name)),
                None => {
                    new_names.push((slots.len(), name));
                    None
                }
            },
        };
        slots.push(entry);
    }

    for (slot, name) in old_names {
        debug!("Unpaired rename source '{name}', treating as remove");
        slots[slot] = Some(ChangeEntry::removed(0, name));
    }
    for (slot, name) in new_names {
        debug!("Unpaired rename target '{name}', treating as add");
        slots[slot] = Some(ChangeEntry::added(0, name));
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Whether decoding `records` would leave a rename half without a partner.
pub(crate) fn has_unpaired_rename(records: &[RawRecord]) -> bool {
    let mut balance = 0isize;
    for record in records.iter().filter(|r| !r.is_root) {
        match record.action {
            RawAction::RenamedOld => balance += 1,
            RawAction::RenamedNew => balance -= 1,
            _ => {}
        }
    }
    balance != 0
}

fn root_entry(action: RawAction) -> ChangeEntry {
    let entry = match action {
        RawAction::Added | RawAction::RenamedNew => ChangeEntry::added(0, PathKey::default()),
        RawAction::Removed | RawAction::RenamedOld => ChangeEntry::removed(0, PathKey::default()),
        RawAction::Modified => ChangeEntry::modified(0, PathKey::default()),
    };
    entry.with_root()
}
