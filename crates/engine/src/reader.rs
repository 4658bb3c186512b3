//! Committed-data readers
//!
//! Everything the engine reads back out of revision files goes through this
//! module: node-revisions located through the indexes, representation
//! contents reconstructed across delta chains, directory listings and the
//! changed-paths block. Staged (transaction-tagged) representations are
//! located through the proto-index streams instead of the final indexes.

use crate::fs::Filesystem;
use crate::props::PropList;
use crate::walk::path_components;
use revfs_core::{ChangeSet, Error, Md5Digest, NodeKind, NodeRevId, Result, Revnum};
use revfs_storage::dirents::{self, DirEntry};
use revfs_storage::{delta, index, ChangeRecord, NodeRevision, Representation};
use std::collections::BTreeMap;
use std::io::Cursor;

/// Trailer closing every representation in a revision file.
pub(crate) const ENDREP: &[u8] = b"ENDREP\n";

/// Representation header: self-delta or delta against a committed base.
pub(crate) fn format_rep_header(base: Option<&Representation>) -> String {
    match base {
        None => "DELTA\n".to_string(),
        Some(rep) => {
            let rev = rep
                .change_set
                .revision()
                .expect("delta bases are committed representations");
            format!("DELTA {rev} {} {}\n", rep.item_index, rep.expanded_size)
        }
    }
}

fn parse_rep_header(line: &str) -> Result<Option<(Revnum, u64, u64)>> {
    if line == "DELTA" {
        return Ok(None);
    }
    let rest = line
        .strip_prefix("DELTA ")
        .ok_or_else(|| Error::Corrupt(format!("malformed representation header '{line}'")))?;
    let mut fields = rest.split(' ');
    let mut take = || {
        fields
            .next()
            .ok_or_else(|| Error::Corrupt(format!("truncated representation header '{line}'")))
    };
    let rev = take()?
        .parse::<Revnum>()
        .map_err(|_| Error::Corrupt(format!("malformed base revision in '{line}'")))?;
    let item = take()?
        .parse::<u64>()
        .map_err(|_| Error::Corrupt(format!("malformed base item in '{line}'")))?;
    let len = take()?
        .parse::<u64>()
        .map_err(|_| Error::Corrupt(format!("malformed base length in '{line}'")))?;
    Ok(Some((rev, item, len)))
}

/// Locate an item: `(offset, size)` within its revision or proto-rev file,
/// plus the path of that file.
fn locate_item(fs: &Filesystem, cs: ChangeSet, item: u64) -> Result<(std::path::PathBuf, u64, u64)> {
    match cs {
        ChangeSet::Revision(rev) => {
            let entry = index::lookup_item(&fs.layout().l2p_path(rev), &fs.layout().p2l_path(rev), item)?
                .ok_or_else(|| {
                    Error::Corrupt(format!("item {item} not present in revision {rev}"))
                })?;
            Ok((fs.layout().rev_path(rev), entry.offset, entry.size))
        }
        ChangeSet::Txn(txn_id) => {
            let offset = index::read_proto_l2p_file(&fs.layout().txn_proto_l2p_path(txn_id))?
                .into_iter()
                .find(|(i, _)| *i == item)
                .map(|(_, offset)| offset)
                .ok_or_else(|| {
                    Error::Corrupt(format!("item {item} not present in transaction {txn_id}"))
                })?;
            let size = index::read_proto_p2l_file(&fs.layout().txn_proto_p2l_path(txn_id))?
                .into_iter()
                .find(|e| e.offset == offset)
                .map(|e| e.size)
                .ok_or_else(|| {
                    Error::Corrupt(format!("offset {offset} unindexed in transaction {txn_id}"))
                })?;
            Ok((fs.layout().proto_rev_path(txn_id), offset, size))
        }
    }
}

fn read_item_region(fs: &Filesystem, cs: ChangeSet, item: u64) -> Result<Vec<u8>> {
    let (path, offset, size) = locate_item(fs, cs, item)?;
    index::read_item(
        &path,
        &index::P2lEntry {
            offset,
            size,
            kind: index::ItemKind::NodeRev,
            item_index: item,
        },
    )
}

/// The node-revision stored at `(rev, item)`.
pub fn noderev_at(fs: &Filesystem, rev: Revnum, item: u64) -> Result<NodeRevision> {
    let region = read_item_region(fs, ChangeSet::Revision(rev), item)?;
    let text = std::str::from_utf8(&region)
        .map_err(|_| Error::Corrupt(format!("non-UTF-8 node-rev at r{rev} item {item}")))?;
    NodeRevision::parse(text)
}

/// The root node-revision of `rev`.
pub fn root_noderev(fs: &Filesystem, rev: Revnum) -> Result<NodeRevision> {
    noderev_at(fs, rev, revfs_core::ITEM_INDEX_ROOT_NODE)
}

/// Load a committed node-revision by id.
pub fn read_noderev(fs: &Filesystem, id: &NodeRevId) -> Result<NodeRevision> {
    match id.noderev_id.change_set {
        ChangeSet::Revision(rev) => noderev_at(fs, rev, id.noderev_id.number),
        ChangeSet::Txn(txn_id) => Err(Error::Malfunction(format!(
            "attempt to read transaction-tagged id {id} of txn {txn_id} as committed"
        ))),
    }
}

/// The canonical changed-paths set of a committed revision.
pub fn paths_changed(fs: &Filesystem, rev: Revnum) -> Result<BTreeMap<String, ChangeRecord>> {
    let region = read_item_region(fs, ChangeSet::Revision(rev), revfs_core::ITEM_INDEX_CHANGES)?;
    ChangeRecord::read_block(&mut Cursor::new(region))
}

/// One parsed representation segment of a revision file.
struct RepSegment {
    base: Option<(Revnum, u64, u64)>,
    delta: Vec<u8>,
}

fn read_rep_segment(fs: &Filesystem, cs: ChangeSet, item: u64) -> Result<RepSegment> {
    let region = read_item_region(fs, cs, item)?;
    let header_end = region
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| Error::Corrupt("representation missing header line".into()))?
        + 1;
    let header = std::str::from_utf8(&region[..header_end - 1])
        .map_err(|_| Error::Corrupt("non-UTF-8 representation header".into()))?;
    let base = parse_rep_header(header)?;
    if region.len() < header_end + ENDREP.len() || !region.ends_with(ENDREP) {
        return Err(Error::Corrupt("representation not ENDREP-terminated".into()));
    }
    Ok(RepSegment {
        base,
        delta: region[header_end..region.len() - ENDREP.len()].to_vec(),
    })
}

fn expand_rep_at(fs: &Filesystem, cs: ChangeSet, item: u64) -> Result<Vec<u8>> {
    let segment = read_rep_segment(fs, cs, item)?;
    let base_content = match segment.base {
        None => Vec::new(),
        Some((rev, base_item, _len)) => expand_rep_at(fs, ChangeSet::Revision(rev), base_item)?,
    };
    delta::apply(&base_content, &segment.delta)
}

/// Expand a representation to its full content, verifying the MD5.
pub fn rep_content(fs: &Filesystem, rep: &Representation) -> Result<Vec<u8>> {
    let content = expand_rep_at(fs, rep.change_set, rep.item_index)?;
    let actual = Md5Digest::of(&content);
    if actual != rep.md5 {
        return Err(Error::ChecksumMismatch {
            expected: rep.md5.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(content)
}

/// The delta base recorded in a representation's header, if any.
pub fn rep_delta_base(fs: &Filesystem, rep: &Representation) -> Result<Option<(Revnum, u64)>> {
    let segment = read_rep_segment(fs, rep.change_set, rep.item_index)?;
    Ok(segment.base.map(|(rev, item, _)| (rev, item)))
}

/// Number of representations on the reconstruction chain, this one included.
pub fn rep_chain_length(fs: &Filesystem, rep: &Representation) -> Result<u64> {
    let mut length = 1;
    let mut cursor = (rep.change_set, rep.item_index);
    loop {
        let segment = read_rep_segment(fs, cursor.0, cursor.1)?;
        match segment.base {
            Some((rev, item, _)) => {
                length += 1;
                cursor = (ChangeSet::Revision(rev), item);
            }
            None => return Ok(length),
        }
    }
}

/// Entries of a committed directory node-revision.
pub fn dir_entries_of(fs: &Filesystem, noderev: &NodeRevision) -> Result<BTreeMap<String, DirEntry>> {
    if noderev.kind != NodeKind::Dir {
        return Err(Error::NotDir(noderev.created_path.clone()));
    }
    match &noderev.data_rep {
        Some(rep) => {
            let content = rep_content(fs, rep)?;
            dirents::parse(&mut Cursor::new(content))
        }
        None => Ok(BTreeMap::new()),
    }
}

/// Walk `path` down from the root of committed revision `rev`.
pub fn node_at_path(fs: &Filesystem, rev: Revnum, path: &str) -> Result<NodeRevision> {
    let mut node = root_noderev(fs, rev)?;
    for comp in path_components(path)? {
        let entries = dir_entries_of(fs, &node)?;
        let entry = entries
            .get(comp)
            .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
        node = read_noderev(fs, &entry.id)?;
    }
    Ok(node)
}

impl Filesystem {
    /// Full content of the file at `path` in committed revision `rev`.
    pub fn read_file(&self, rev: Revnum, path: &str) -> Result<Vec<u8>> {
        let node = node_at_path(self, rev, path)?;
        if node.kind != NodeKind::File {
            return Err(Error::NotFile(path.to_string()));
        }
        match &node.data_rep {
            Some(rep) => rep_content(self, rep),
            None => Ok(Vec::new()),
        }
    }

    /// Directory listing at `path` in committed revision `rev`.
    pub fn dir_entries(&self, rev: Revnum, path: &str) -> Result<BTreeMap<String, DirEntry>> {
        let node = node_at_path(self, rev, path)?;
        dir_entries_of(self, &node)
    }

    /// Node properties at `path` in committed revision `rev`.
    pub fn node_proplist(&self, rev: Revnum, path: &str) -> Result<PropList> {
        let node = node_at_path(self, rev, path)?;
        match &node.prop_rep {
            Some(rep) => {
                let content = rep_content(self, rep)?;
                let raw = revfs_storage::hashfile::read_hash(&mut Cursor::new(content))?;
                raw.into_iter()
                    .map(|(k, v)| {
                        let v = String::from_utf8(v).map_err(|_| {
                            Error::Corrupt(format!("non-UTF-8 property value for '{k}'"))
                        })?;
                        Ok((k, v))
                    })
                    .collect()
            }
            None => Ok(PropList::new()),
        }
    }

    /// The canonical changed-paths set of committed revision `rev`.
    pub fn paths_changed(&self, rev: Revnum) -> Result<BTreeMap<String, ChangeRecord>> {
        paths_changed(self, rev)
    }
}
