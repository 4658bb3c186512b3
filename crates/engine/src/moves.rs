//! Move verification
//!
//! A move is only well-formed when its source subtree is deleted in the same
//! revision and no other move (in this transaction or committed since the
//! transaction's base) claims the same source. Deletions below a move
//! destination are first rewritten to the corresponding source path, so the
//! ancestor check sees the tree the move actually vacated.

use crate::fs::Filesystem;
use crate::reader;
use revfs_core::{Error, Result, Revnum};
use revfs_storage::ChangeRecord;
use std::collections::{BTreeMap, HashSet};

/// Verify every move of the folded change set against `(base_rev, old_rev]`.
pub fn verify_moves(
    fs: &Filesystem,
    base_rev: Revnum,
    old_rev: Revnum,
    folded: &BTreeMap<String, ChangeRecord>,
) -> Result<()> {
    // (destination path, source path), ordered by destination
    let mut moves: Vec<(String, String)> = folded
        .values()
        .filter(|record| record.kind.is_move())
        .filter_map(|record| {
            record
                .copyfrom
                .as_ref()
                .map(|(_, source)| (record.path.clone(), source.clone()))
        })
        .collect();
    if moves.is_empty() {
        return Ok(());
    }
    moves.sort();

    let mut deletions: Vec<String> = folded
        .values()
        .filter(|record| record.kind.is_deletion())
        .map(|record| record.path.clone())
        .collect();
    deletions.sort();

    // a deletion below a move destination vacated the corresponding source
    let mut rewritten = false;
    for deletion in &mut deletions {
        let at = moves.partition_point(|(dest, _)| dest.as_str() <= deletion.as_str());
        if at == 0 {
            continue;
        }
        let (dest, source) = &moves[at - 1];
        let rest = deletion
            .strip_prefix(&format!("{dest}/"))
            .map(str::to_string);
        if let Some(rest) = rest {
            *deletion = format!("{source}/{rest}");
            rewritten = true;
        }
    }
    if rewritten {
        deletions.sort();
    }

    // each source may be claimed once within this transaction
    let mut sources = HashSet::new();
    for (_, source) in &moves {
        if !sources.insert(source.as_str()) {
            return Err(Error::AmbiguousMove(source.clone()));
        }
    }

    // and once against everything committed since the transaction's base
    for rev in (base_rev + 1)..=old_rev {
        for record in reader::paths_changed(fs, rev)?.values() {
            if !record.kind.is_move() {
                continue;
            }
            if let Some((_, source)) = &record.copyfrom {
                if sources.contains(source.as_str()) {
                    return Err(Error::AmbiguousMove(source.clone()));
                }
            }
        }
    }

    // every move must have vacated its source
    for (dest, source) in &moves {
        let covered = deletions.iter().any(|deletion| {
            deletion == source || source.starts_with(&format!("{deletion}/"))
        });
        if !covered {
            return Err(Error::IncompleteMove {
                path: dest.clone(),
                src_path: source.clone(),
            });
        }
    }
    Ok(())
}
