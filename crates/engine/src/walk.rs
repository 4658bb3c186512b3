//! Path resolution and path-level transaction operations
//!
//! Transactions are driven by absolute paths. Walking a path descends from
//! the staged root through directory entries; the first mutation of a path
//! clones the spine of committed node-revisions into the transaction
//! (`make_path_mutable`), after which edits hit staged state only.

use crate::props::PropList;
use crate::reader;
use crate::rep_writer::RepWriter;
use crate::txn::{change_record, Transaction};
use revfs_core::{ChangeSet, Error, IdPart, NodeKind, NodeRevId, Result};
use revfs_storage::{ChangeKind, ItemKind, NodeRevision};
use std::io::Write;

/// Split an absolute path into its components.
pub(crate) fn path_components(path: &str) -> Result<Vec<&str>> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| Error::Corrupt(format!("path '{path}' is not absolute")))?;
    Ok(rest.split('/').filter(|c| !c.is_empty()).collect())
}

/// Split a path into its parent directory and final component.
fn parent_and_name(path: &str) -> Result<(String, String)> {
    let mut components = path_components(path)?;
    let name = components
        .pop()
        .ok_or_else(|| Error::Corrupt(format!("'{path}' has no final component")))?
        .to_string();
    let parent = if components.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", components.join("/"))
    };
    Ok((parent, name))
}

impl<'a> Transaction<'a> {
    /// Resolve `path` in the transaction's tree.
    pub fn open_path(&self, path: &str) -> Result<(NodeRevId, NodeRevision)> {
        let mut id = self.root_id();
        let mut node = self.get_node(&id)?;
        for comp in path_components(path)? {
            let entries = self.dir_entries(&id)?;
            let entry = entries
                .get(comp)
                .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
            id = entry.id;
            node = self.get_node(&id)?;
        }
        Ok((id, node))
    }

    /// Clone the spine of `path` into the transaction and return the staged
    /// id of its final node.
    pub fn make_path_mutable(&self, path: &str) -> Result<NodeRevId> {
        let mut parent_id = self.root_id();
        let mut walked = String::new();
        for comp in path_components(path)? {
            walked.push('/');
            walked.push_str(comp);
            let entries = self.dir_entries(&parent_id)?;
            let entry = *entries
                .get(comp)
                .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
            parent_id = if entry.id.is_txn() {
                entry.id
            } else {
                self.clone_node(&parent_id, comp, &entry.id, entry.kind, &walked)?
            };
        }
        Ok(parent_id)
    }

    /// Clone one committed node-revision into the transaction, relinking the
    /// (already mutable) parent.
    fn clone_node(
        &self,
        parent_id: &NodeRevId,
        name: &str,
        child_id: &NodeRevId,
        kind: NodeKind,
        path: &str,
    ) -> Result<NodeRevId> {
        let committed = self.get_node(child_id)?;
        let staged_id = NodeRevId::new(
            committed.id.node_id,
            committed.id.copy_id,
            IdPart::new(ChangeSet::Txn(self.txn_id()), self.allocate_item_index()?),
        );
        let staged = NodeRevision {
            id: staged_id,
            kind: committed.kind,
            predecessor: Some(committed.id),
            predecessor_count: committed.predecessor_count + 1,
            data_rep: committed.data_rep.clone(),
            prop_rep: committed.prop_rep.clone(),
            copyfrom: None,
            copyroot: committed.copyroot.clone(),
            created_path: path.to_string(),
            is_fresh_txn_root: false,
            mergeinfo_here: committed.mergeinfo_here,
            mergeinfo_count: committed.mergeinfo_count,
        };
        self.put_node(&staged)?;
        self.set_entry(parent_id, name, Some((staged_id, kind)))?;
        Ok(staged_id)
    }

    fn new_node(&self, path: &str, kind: NodeKind) -> Result<()> {
        let (parent_path, name) = parent_and_name(path)?;
        let parent_id = self.make_path_mutable(&parent_path)?;
        if self.dir_entries(&parent_id)?.contains_key(&name) {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        let id = NodeRevId::new(
            self.reserve_node_id()?,
            IdPart::new(ChangeSet::Revision(0), 0),
            IdPart::new(ChangeSet::Txn(self.txn_id()), self.allocate_item_index()?),
        );
        let noderev = NodeRevision {
            id,
            kind,
            predecessor: None,
            predecessor_count: 0,
            data_rep: None,
            prop_rep: None,
            copyfrom: None,
            copyroot: (self.base_rev(), "/".to_string()),
            created_path: path.to_string(),
            is_fresh_txn_root: false,
            mergeinfo_here: false,
            mergeinfo_count: 0,
        };
        self.put_node(&noderev)?;
        self.set_entry(&parent_id, &name, Some((id, kind)))?;
        self.add_change(&change_record(
            path,
            ChangeKind::Add,
            Some(id),
            false,
            false,
            kind,
            None,
        ))
    }

    /// Create an empty file at `path`.
    pub fn make_file(&self, path: &str) -> Result<()> {
        self.new_node(path, NodeKind::File)
    }

    /// Create an empty directory at `path`.
    pub fn make_dir(&self, path: &str) -> Result<()> {
        self.new_node(path, NodeKind::Dir)
    }

    /// Delete the node at `path`.
    pub fn delete(&self, path: &str) -> Result<()> {
        let (parent_path, name) = parent_and_name(path)?;
        let parent_id = self.make_path_mutable(&parent_path)?;
        let entry = *self
            .dir_entries(&parent_id)?
            .get(&name)
            .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
        self.set_entry(&parent_id, &name, None)?;
        self.add_change(&change_record(
            path,
            ChangeKind::Delete,
            Some(entry.id),
            false,
            false,
            entry.kind,
            None,
        ))
    }

    /// Replace the content of the file at `path`.
    pub fn apply_text(&self, path: &str, data: &[u8]) -> Result<()> {
        let id = self.make_path_mutable(path)?;
        let mut noderev = self.get_node(&id)?;
        if noderev.kind != NodeKind::File {
            return Err(Error::NotFile(path.to_string()));
        }
        let mut writer = RepWriter::open(self, &noderev, false, ItemKind::FileRep)?;
        writer.write_all(data)?;
        noderev.data_rep = Some(writer.close()?);
        self.put_node(&noderev)?;
        self.add_change(&change_record(
            path,
            ChangeKind::Modify,
            Some(id),
            true,
            false,
            NodeKind::File,
            None,
        ))
    }

    /// Replace the properties of the node at `path`.
    pub fn set_node_props(&self, path: &str, proplist: &PropList) -> Result<()> {
        let id = self.make_path_mutable(path)?;
        let noderev = self.get_node(&id)?;
        self.set_proplist(&id, proplist)?;
        self.add_change(&change_record(
            path,
            ChangeKind::Modify,
            Some(id),
            false,
            true,
            noderev.kind,
            None,
        ))
    }

    fn stage_copy(
        &self,
        from_path: &str,
        to_path: &str,
        change_kind: ChangeKind,
    ) -> Result<()> {
        let source = reader::node_at_path(self.fs(), self.base_rev(), from_path)?;
        let (parent_path, name) = parent_and_name(to_path)?;
        let parent_id = self.make_path_mutable(&parent_path)?;
        if self.dir_entries(&parent_id)?.contains_key(&name) {
            return Err(Error::AlreadyExists(to_path.to_string()));
        }
        let id = NodeRevId::new(
            source.id.node_id,
            self.reserve_copy_id()?,
            IdPart::new(ChangeSet::Txn(self.txn_id()), self.allocate_item_index()?),
        );
        let staged = NodeRevision {
            id,
            kind: source.kind,
            predecessor: Some(source.id),
            predecessor_count: source.predecessor_count + 1,
            data_rep: source.data_rep.clone(),
            prop_rep: source.prop_rep.clone(),
            copyfrom: Some((self.base_rev(), from_path.to_string())),
            copyroot: (self.base_rev(), to_path.to_string()),
            created_path: to_path.to_string(),
            is_fresh_txn_root: false,
            mergeinfo_here: source.mergeinfo_here,
            mergeinfo_count: source.mergeinfo_count,
        };
        self.put_node(&staged)?;
        self.set_entry(&parent_id, &name, Some((id, source.kind)))?;
        self.add_change(&change_record(
            to_path,
            change_kind,
            Some(id),
            false,
            false,
            source.kind,
            Some((self.base_rev(), from_path.to_string())),
        ))
    }

    /// Copy the base-revision node at `from_path` to `to_path`.
    pub fn copy(&self, from_path: &str, to_path: &str) -> Result<()> {
        self.stage_copy(from_path, to_path, ChangeKind::Add)
    }

    /// Move the base-revision node at `from_path` to `to_path`: a copy
    /// recorded as a move, plus the deletion of the source.
    pub fn move_path(&self, from_path: &str, to_path: &str) -> Result<()> {
        self.stage_copy(from_path, to_path, ChangeKind::Move)?;
        self.delete(from_path)
    }
}
