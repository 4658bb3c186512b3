//! Directory entries
//!
//! At rest, a directory's content representation is a hash-style dump keyed
//! by entry name with `<kind> <node-rev-id>` values. While a directory is
//! mutable inside a transaction, its authoritative state is an append-only
//! delta log: a base snapshot (a complete dump) followed by incremental
//! `set` / `delete` operations, replayed in order.

use crate::hashfile::{self, HashOp};
use revfs_core::{Error, NodeKind, NodeRevId, Result};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::str::FromStr;

/// One directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// Kind of the child node.
    pub kind: NodeKind,
    /// Identity of the child node-revision.
    pub id: NodeRevId,
}

impl DirEntry {
    fn to_value(self) -> Vec<u8> {
        format!("{} {}", self.kind, self.id).into_bytes()
    }

    fn from_value(value: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(value)
            .map_err(|_| Error::Corrupt("non-UTF-8 directory entry".into()))?;
        let (kind, id) = text
            .split_once(' ')
            .ok_or_else(|| Error::Corrupt(format!("malformed directory entry '{text}'")))?;
        Ok(DirEntry {
            kind: kind.parse()?,
            id: NodeRevId::from_str(id)?,
        })
    }
}

/// Serialize a complete entry map in canonical (lexicographic) order.
pub fn serialize<W: Write>(w: &mut W, entries: &BTreeMap<String, DirEntry>) -> Result<()> {
    let map: BTreeMap<String, Vec<u8>> = entries
        .iter()
        .map(|(name, entry)| (name.clone(), entry.to_value()))
        .collect();
    hashfile::write_hash(w, &map)
}

/// Parse a complete entry map.
pub fn parse<R: BufRead>(r: &mut R) -> Result<BTreeMap<String, DirEntry>> {
    hashfile::read_hash(r)?
        .into_iter()
        .map(|(name, value)| Ok((name, DirEntry::from_value(&value)?)))
        .collect()
}

/// Append a `set(name, entry)` operation to a directory delta log.
pub fn log_set<W: Write>(w: &mut W, name: &str, entry: DirEntry) -> Result<()> {
    hashfile::write_op(w, &HashOp::Set(name.to_string(), entry.to_value()))
}

/// Append a `delete(name)` operation to a directory delta log.
pub fn log_delete<W: Write>(w: &mut W, name: &str) -> Result<()> {
    hashfile::write_op(w, &HashOp::Delete(name.to_string()))
}

/// Replay a delta log (base snapshot plus incremental operations) into the
/// resulting entry map.
pub fn replay<R: BufRead>(r: &mut R) -> Result<BTreeMap<String, DirEntry>> {
    hashfile::replay_ops(r)?
        .into_iter()
        .map(|(name, value)| Ok((name, DirEntry::from_value(&value)?)))
        .collect()
}
