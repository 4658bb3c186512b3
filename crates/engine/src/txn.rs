//! Transaction handle and mutation buffer
//!
//! All staged state lives in the transaction's scratch directory:
//! one file per staged node-revision, an append-only delta log per mutable
//! directory, the changes log, staged property lists and the per-transaction
//! SHA-1 sidecars. The in-memory side is a directory-entry cache and the
//! intra-transaction SHA-1 map used for rep deduplication.
//!
//! A transaction has a single owner; concurrent mutators are rejected at the
//! proto-rev lock (`RepBeingWritten`).

use crate::commit;
use crate::fs::Filesystem;
use crate::props::{self, PropList};
use crate::reader;
use parking_lot::Mutex;
use revfs_core::{
    ChangeSet, Error, IdPart, Md5Digest, NodeKind, NodeRevId, Result, Revnum, Sha1Digest, TxnId,
    ITEM_INDEX_FIRST_USER, ITEM_INDEX_UNUSED,
};
use revfs_storage::dirents::{self, DirEntry};
use revfs_storage::format::{read_next_ids, write_file_atomic, write_next_ids};
use revfs_storage::{ChangeRecord, NodeRevision, Representation};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fs;
use std::io::BufReader;
use std::path::PathBuf;

/// An open transaction against a base revision.
pub struct Transaction<'a> {
    fs: &'a Filesystem,
    txn_id: TxnId,
    base_rev: Revnum,
    root_id: NodeRevId,
    dir_cache: Mutex<FxHashMap<NodeRevId, BTreeMap<String, DirEntry>>>,
    sha1_map: Mutex<FxHashMap<Sha1Digest, Representation>>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        fs: &'a Filesystem,
        txn_id: TxnId,
        base_rev: Revnum,
        root_id: NodeRevId,
    ) -> Self {
        Transaction {
            fs,
            txn_id,
            base_rev,
            root_id,
            dir_cache: Mutex::new(FxHashMap::default()),
            sha1_map: Mutex::new(FxHashMap::default()),
        }
    }

    /// The owning filesystem session.
    pub fn fs(&self) -> &'a Filesystem {
        self.fs
    }

    /// This transaction's id.
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// The revision this transaction was begun against.
    pub fn base_rev(&self) -> Revnum {
        self.base_rev
    }

    /// The staged root node-revision id.
    pub fn root_id(&self) -> NodeRevId {
        self.root_id
    }

    /// Atomically promote this transaction into the next revision.
    pub fn commit(&self) -> Result<Revnum> {
        commit::commit_txn(self)
    }

    fn node_path(&self, id: &NodeRevId) -> PathBuf {
        self.fs
            .layout()
            .txn_node_path(self.txn_id, &id.node_id, &id.copy_id)
    }

    fn children_path(&self, id: &NodeRevId) -> PathBuf {
        self.fs
            .layout()
            .txn_children_path(self.txn_id, &id.node_id, &id.copy_id)
    }

    fn node_props_path(&self, id: &NodeRevId) -> PathBuf {
        self.fs
            .layout()
            .txn_node_props_path(self.txn_id, &id.node_id, &id.copy_id)
    }

    /// Load a node-revision, staged or committed.
    pub fn get_node(&self, id: &NodeRevId) -> Result<NodeRevision> {
        if !id.is_txn() {
            return reader::read_noderev(self.fs, id);
        }
        let text = fs::read_to_string(self.node_path(id))?;
        NodeRevision::parse(&text)
    }

    /// Write a staged node-revision back to its file.
    pub fn put_node(&self, noderev: &NodeRevision) -> Result<()> {
        if !noderev.id.is_txn() {
            return Err(Error::Malfunction(format!(
                "attempt to stage committed node-revision {}",
                noderev.id
            )));
        }
        write_file_atomic(&self.node_path(&noderev.id), noderev.serialize().as_bytes())
    }

    /// The current entry set of a directory, staged edits applied.
    pub fn dir_entries(&self, id: &NodeRevId) -> Result<BTreeMap<String, DirEntry>> {
        if let Some(entries) = self.dir_cache.lock().get(id) {
            return Ok(entries.clone());
        }
        let noderev = self.get_node(id)?;
        if noderev.kind != NodeKind::Dir {
            return Err(Error::NotDir(noderev.created_path));
        }
        let entries = match &noderev.data_rep {
            Some(rep) if rep.is_mutable() => {
                let file = fs::File::open(self.children_path(id))?;
                dirents::replay(&mut BufReader::new(file))?
            }
            _ => reader::dir_entries_of(self.fs, &noderev)?,
        };
        self.dir_cache.lock().insert(*id, entries.clone());
        Ok(entries)
    }

    /// Stage one directory entry change on a mutable parent.
    ///
    /// `child` of `None` deletes the entry. On the first edit of a directory
    /// whose content representation is still immutable (or absent), the
    /// current entries are materialized as the delta log's base snapshot and
    /// the representation is marked mutable.
    pub fn set_entry(
        &self,
        parent_id: &NodeRevId,
        name: &str,
        child: Option<(NodeRevId, NodeKind)>,
    ) -> Result<()> {
        if !parent_id.is_txn() {
            return Err(Error::Malfunction(format!(
                "set_entry on committed directory {parent_id}"
            )));
        }
        let mut parent = self.get_node(parent_id)?;
        if parent.kind != NodeKind::Dir {
            return Err(Error::NotDir(parent.created_path));
        }

        let needs_materialize = match &parent.data_rep {
            Some(rep) => !rep.is_mutable(),
            None => true,
        };
        if needs_materialize {
            let current = match &parent.data_rep {
                Some(_) => reader::dir_entries_of(self.fs, &parent)?,
                None => BTreeMap::new(),
            };
            let mut log = fs::File::create(self.children_path(parent_id))?;
            dirents::serialize(&mut log, &current)?;
            log.sync_all()?;
            parent.data_rep = Some(Representation {
                change_set: ChangeSet::Txn(self.txn_id),
                item_index: ITEM_INDEX_UNUSED,
                size: 0,
                expanded_size: 0,
                md5: Md5Digest::of(b""),
                sha1: None,
            });
            self.put_node(&parent)?;
        }

        let mut log = fs::OpenOptions::new()
            .append(true)
            .open(self.children_path(parent_id))?;
        match &child {
            Some((child_id, kind)) => dirents::log_set(
                &mut log,
                name,
                DirEntry {
                    kind: *kind,
                    id: *child_id,
                },
            )?,
            None => dirents::log_delete(&mut log, name)?,
        }

        // partial replacement of the cached view, keyed by the parent id
        if let Some(entries) = self.dir_cache.lock().get_mut(parent_id) {
            match child {
                Some((child_id, kind)) => {
                    entries.insert(name.to_string(), DirEntry { kind, id: child_id });
                }
                None => {
                    entries.remove(name);
                }
            }
        }
        Ok(())
    }

    /// Append one record to the changes log.
    pub fn add_change(&self, record: &ChangeRecord) -> Result<()> {
        let mut log = fs::OpenOptions::new()
            .append(true)
            .open(self.fs.layout().txn_changes_path(self.txn_id))?;
        record.write_log(&mut log)
    }

    /// Read back the raw changes log.
    pub fn read_changes(&self) -> Result<Vec<ChangeRecord>> {
        let file = fs::File::open(self.fs.layout().txn_changes_path(self.txn_id))?;
        ChangeRecord::read_log(&mut BufReader::new(file))
    }

    /// Stage the full property list of a node-revision.
    ///
    /// Marks the property representation mutable, allocating an item index
    /// the first time.
    pub fn set_proplist(&self, id: &NodeRevId, proplist: &PropList) -> Result<()> {
        let mut noderev = self.get_node(id)?;
        if !id.is_txn() {
            return Err(Error::Malfunction(format!(
                "set_proplist on committed node-revision {id}"
            )));
        }
        write_file_atomic(
            &self.node_props_path(id),
            &props::serialize_props(proplist),
        )?;
        let needs_mutable = match &noderev.prop_rep {
            Some(rep) => !rep.is_mutable(),
            None => true,
        };
        if needs_mutable {
            noderev.prop_rep = Some(Representation {
                change_set: ChangeSet::Txn(self.txn_id),
                item_index: self.allocate_item_index()?,
                size: 0,
                expanded_size: 0,
                md5: Md5Digest::of(b""),
                sha1: None,
            });
            self.put_node(&noderev)?;
        }
        Ok(())
    }

    /// The staged property bytes of a node-revision, dump-serialized.
    pub(crate) fn staged_prop_bytes(&self, id: &NodeRevId) -> Result<Vec<u8>> {
        match fs::read(self.node_props_path(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(props::serialize_props(&PropList::new()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reserve a fresh node id in this transaction's namespace.
    pub fn reserve_node_id(&self) -> Result<IdPart> {
        let path = self.fs.layout().txn_next_ids_path(self.txn_id);
        let (node, copy) = read_next_ids(&path)?;
        write_next_ids(&path, node + 1, copy)?;
        Ok(IdPart::new(ChangeSet::Txn(self.txn_id), node))
    }

    /// Reserve a fresh copy id in this transaction's namespace.
    pub fn reserve_copy_id(&self) -> Result<IdPart> {
        let path = self.fs.layout().txn_next_ids_path(self.txn_id);
        let (node, copy) = read_next_ids(&path)?;
        write_next_ids(&path, node, copy + 1)?;
        Ok(IdPart::new(ChangeSet::Txn(self.txn_id), copy))
    }

    /// Allocate the next item index of this change-set.
    pub fn allocate_item_index(&self) -> Result<u64> {
        let path = self.fs.layout().txn_item_index_path(self.txn_id);
        let next = match fs::read_to_string(&path) {
            Ok(text) => text
                .trim_end()
                .parse::<u64>()
                .map_err(|_| Error::Corrupt("malformed item-index file".into()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ITEM_INDEX_FIRST_USER,
            Err(e) => return Err(e.into()),
        };
        write_file_atomic(&path, format!("{}\n", next + 1).as_bytes())?;
        Ok(next)
    }

    /// Record a representation written in this transaction under its SHA-1,
    /// in memory and as an on-disk sidecar.
    pub(crate) fn note_rep(&self, sha1: Sha1Digest, rep: &Representation) -> Result<()> {
        self.sha1_map.lock().insert(sha1, rep.clone());
        write_file_atomic(
            &self.fs.layout().txn_sha1_path(self.txn_id, &sha1),
            format!("{}\n", rep.to_field()).as_bytes(),
        )
    }

    /// Intra-transaction rep lookup against the in-memory map.
    pub(crate) fn lookup_txn_rep(&self, sha1: &Sha1Digest) -> Option<Representation> {
        self.sha1_map.lock().get(sha1).cloned()
    }

    /// Intra-transaction rep lookup against the on-disk sidecar, which
    /// survives reopening the transaction.
    pub(crate) fn lookup_txn_rep_sidecar(&self, sha1: &Sha1Digest) -> Result<Option<Representation>> {
        match fs::read_to_string(self.fs.layout().txn_sha1_path(self.txn_id, sha1)) {
            Ok(text) => Ok(Some(Representation::parse_field(text.trim_end())?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The staged transaction properties.
    pub fn txn_proplist(&self) -> Result<PropList> {
        props::read_props(&self.fs.layout().txn_props_path(self.txn_id))
    }

    /// Set or delete one transaction property.
    pub fn change_txn_prop(&self, name: &str, value: Option<&str>) -> Result<()> {
        let mut proplist = self.txn_proplist()?;
        match value {
            Some(value) => {
                proplist.insert(name.to_string(), value.to_string());
            }
            None => {
                proplist.remove(name);
            }
        }
        props::write_props(&self.fs.layout().txn_props_path(self.txn_id), &proplist)
    }
}

/// Convenience constructor for change records staged by path operations.
pub(crate) fn change_record(
    path: &str,
    kind: revfs_storage::ChangeKind,
    node_rev_id: Option<NodeRevId>,
    text_mod: bool,
    prop_mod: bool,
    node_kind: NodeKind,
    copyfrom: Option<(Revnum, String)>,
) -> ChangeRecord {
    ChangeRecord {
        path: path.to_string(),
        kind,
        node_rev_id,
        text_mod,
        prop_mod,
        node_kind,
        copyfrom,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Filesystem;
    use revfs_storage::ChangeKind;
    use tempfile::tempdir;

    fn fresh_fs(dir: &std::path::Path) -> Filesystem {
        Filesystem::create(dir.join("repo")).unwrap()
    }

    #[test]
    fn test_next_ids_allocation_is_monotonic() {
        let dir = tempdir().unwrap();
        let fs = fresh_fs(dir.path());
        let txn = fs.begin_txn(0).unwrap();

        let a = txn.reserve_node_id().unwrap();
        let b = txn.reserve_node_id().unwrap();
        let c = txn.reserve_copy_id().unwrap();
        assert_eq!(a.number, 0);
        assert_eq!(b.number, 1);
        assert_eq!(c.number, 0);
        assert!(a.change_set.is_txn());
    }

    #[test]
    fn test_item_index_starts_at_first_user() {
        let dir = tempdir().unwrap();
        let fs = fresh_fs(dir.path());
        let txn = fs.begin_txn(0).unwrap();

        assert_eq!(txn.allocate_item_index().unwrap(), ITEM_INDEX_FIRST_USER);
        assert_eq!(
            txn.allocate_item_index().unwrap(),
            ITEM_INDEX_FIRST_USER + 1
        );
    }

    #[test]
    fn test_set_entry_materializes_once() {
        let dir = tempdir().unwrap();
        let fs = fresh_fs(dir.path());
        let txn = fs.begin_txn(0).unwrap();
        let root = txn.root_id();

        let child = NodeRevId::new(
            txn.reserve_node_id().unwrap(),
            IdPart::new(ChangeSet::Revision(0), 0),
            IdPart::new(ChangeSet::Txn(txn.txn_id()), 99),
        );
        txn.set_entry(&root, "iota", Some((child, NodeKind::File)))
            .unwrap();

        let noderev = txn.get_node(&root).unwrap();
        let rep = noderev.data_rep.expect("materialized");
        assert!(rep.is_mutable());
        assert_eq!(rep.item_index, ITEM_INDEX_UNUSED);

        let entries = txn.dir_entries(&root).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["iota"].id, child);

        txn.set_entry(&root, "iota", None).unwrap();
        assert!(txn.dir_entries(&root).unwrap().is_empty());
    }

    #[test]
    fn test_changes_log_round_trip() {
        let dir = tempdir().unwrap();
        let fs = fresh_fs(dir.path());
        let txn = fs.begin_txn(0).unwrap();

        let record = change_record(
            "/iota",
            ChangeKind::Add,
            Some(txn.root_id()),
            false,
            false,
            NodeKind::File,
            None,
        );
        txn.add_change(&record).unwrap();
        assert_eq!(txn.read_changes().unwrap(), vec![record]);
    }

    #[test]
    fn test_txn_props() {
        let dir = tempdir().unwrap();
        let fs = fresh_fs(dir.path());
        let txn = fs.begin_txn(0).unwrap();

        txn.change_txn_prop("svn:log", Some("message")).unwrap();
        txn.change_txn_prop("scratch", Some("x")).unwrap();
        txn.change_txn_prop("scratch", None).unwrap();

        let proplist = txn.txn_proplist().unwrap();
        assert_eq!(proplist.get("svn:log").map(String::as_str), Some("message"));
        assert!(!proplist.contains_key("scratch"));
    }

    #[test]
    fn test_note_rep_sidecar_round_trip() {
        let dir = tempdir().unwrap();
        let fs = fresh_fs(dir.path());
        let txn = fs.begin_txn(0).unwrap();

        let sha1 = Sha1Digest::of(b"content");
        let rep = Representation {
            change_set: ChangeSet::Txn(txn.txn_id()),
            item_index: 5,
            size: 12,
            expanded_size: 7,
            md5: Md5Digest::of(b"content"),
            sha1: Some(sha1),
        };
        txn.note_rep(sha1, &rep).unwrap();
        assert_eq!(txn.lookup_txn_rep(&sha1), Some(rep.clone()));

        // the sidecar alone is enough
        txn.sha1_map.lock().clear();
        assert_eq!(txn.lookup_txn_rep(&sha1), None);
        assert_eq!(txn.lookup_txn_rep_sidecar(&sha1).unwrap(), Some(rep));
    }
}
