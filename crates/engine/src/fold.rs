//! Change folding
//!
//! At commit, the raw per-transaction change stream collapses into one
//! canonical record per path. The rules resolve add/delete/modify sequences
//! to their net effect and reject orderings no well-formed client produces.
//! After folding, entries below a deleted path are dropped: the deletion of
//! an ancestor subsumes them.

use revfs_core::{Error, Result};
use revfs_storage::{ChangeKind, ChangeRecord};
use std::collections::BTreeMap;

/// Fold a raw change stream into the canonical per-path map.
pub fn fold_changes(records: Vec<ChangeRecord>) -> Result<BTreeMap<String, ChangeRecord>> {
    let mut folded: BTreeMap<String, ChangeRecord> = BTreeMap::new();
    for record in records {
        if record.kind != ChangeKind::Reset && record.node_rev_id.is_none() {
            return Err(Error::MissingNodeRevId(record.path));
        }
        match folded.remove(&record.path) {
            None => {
                if record.kind != ChangeKind::Reset {
                    folded.insert(record.path.clone(), record);
                }
            }
            Some(existing) => {
                if let Some(merged) = fold_pair(existing, record)? {
                    folded.insert(merged.path.clone(), merged);
                }
            }
        }
    }
    drop_deleted_descendants(&mut folded);
    Ok(folded)
}

/// Apply one new record on top of the existing folded record for its path.
/// `None` means the path's net effect vanished.
fn fold_pair(existing: ChangeRecord, new: ChangeRecord) -> Result<Option<ChangeRecord>> {
    match new.kind {
        ChangeKind::Reset => Ok(None),

        ChangeKind::Delete => match existing.kind {
            // deleting something this transaction added is a net no-op
            ChangeKind::Add | ChangeKind::Move => Ok(None),
            ChangeKind::Delete => Err(Error::InvalidChangeOrderingNonAddOnDelete(new.path)),
            _ => Ok(Some(ChangeRecord {
                kind: ChangeKind::Delete,
                copyfrom: None,
                ..new
            })),
        },

        ChangeKind::Add | ChangeKind::Replace => match existing.kind {
            ChangeKind::Delete => Ok(Some(ChangeRecord {
                kind: ChangeKind::Replace,
                ..new
            })),
            _ => Err(Error::InvalidChangeOrderingAddOnExisting(new.path)),
        },

        ChangeKind::Move | ChangeKind::MoveReplace => match existing.kind {
            ChangeKind::Delete => Ok(Some(ChangeRecord {
                kind: ChangeKind::MoveReplace,
                ..new
            })),
            _ => Err(Error::InvalidChangeOrderingAddOnExisting(new.path)),
        },

        ChangeKind::Modify => {
            if existing.kind == ChangeKind::Delete {
                return Err(Error::InvalidChangeOrderingNonAddOnDelete(new.path));
            }
            if let (Some(old_id), Some(new_id)) = (&existing.node_rev_id, &new.node_rev_id) {
                if old_id != new_id {
                    return Err(Error::NewIdWithoutDelete(new.path));
                }
            }
            Ok(Some(ChangeRecord {
                text_mod: existing.text_mod || new.text_mod,
                prop_mod: existing.prop_mod || new.prop_mod,
                ..existing
            }))
        }
    }
}

/// Drop every folded entry that is a strict descendant of a deleted path.
///
/// Quadratic in the worst case; the child-length bound skips the string
/// comparison for any entry too short to be a descendant.
fn drop_deleted_descendants(folded: &mut BTreeMap<String, ChangeRecord>) {
    let deleted: Vec<String> = folded
        .iter()
        .filter(|(_, record)| record.kind.is_deletion())
        .map(|(path, _)| path.clone())
        .collect();
    for parent in deleted {
        let min_child_len = parent.len() + 2;
        let prefix = format!("{parent}/");
        let doomed: Vec<String> = folded
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| path.len() >= min_child_len)
            .map(|(path, _)| path.clone())
            .collect();
        for path in doomed {
            folded.remove(&path);
        }
    }
}
