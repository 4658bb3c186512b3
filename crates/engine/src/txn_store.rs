//! Transaction store
//!
//! Creates and destroys the on-disk transaction directories, mints
//! transaction ids from the shared `txn-current` counter, and enumerates
//! active transactions. Stale directories left behind by crashed processes
//! are swept by name convention.

use crate::fs::{revision_zero_root_id, Filesystem};
use crate::reader;
use crate::txn::Transaction;
use revfs_core::{ChangeSet, Error, IdPart, NodeRevId, Result, Revnum, TxnId, ITEM_INDEX_ROOT_NODE};
use revfs_storage::format::{self, write_next_ids};
use revfs_storage::layout::TXN_SUFFIX;
use revfs_storage::NodeRevision;
use std::fs;
use tracing::debug;

impl Filesystem {
    /// Begin a transaction against `base_rev`.
    ///
    /// Mints a fresh id under the transaction-counter lock, creates the
    /// scratch directory with its bookkeeping files, and stages a clone of
    /// the base revision's root as the initial transaction root.
    pub fn begin_txn(&self, base_rev: Revnum) -> Result<Transaction<'_>> {
        if base_rev > self.youngest()? {
            return Err(Error::Corrupt(format!(
                "transaction base r{base_rev} is younger than the repository"
            )));
        }

        let txn_id = self.locks().with_txn_current_lock(self.layout(), || {
            let path = self.layout().txn_current_path();
            let id = format::read_txn_current(&path)?;
            format::write_txn_current(&path, TxnId::new(id.value() + 1))?;
            Ok(id)
        })?;

        let dir = self.layout().txn_dir(txn_id);
        fs::create_dir(&dir)?;
        fs::File::create(self.layout().proto_rev_path(txn_id))?;
        fs::File::create(self.layout().proto_rev_lock_path(txn_id))?;
        fs::File::create(self.layout().txn_changes_path(txn_id))?;
        fs::File::create(self.layout().txn_proto_l2p_path(txn_id))?;
        fs::File::create(self.layout().txn_proto_p2l_path(txn_id))?;
        write_next_ids(&self.layout().txn_next_ids_path(txn_id), 0, 0)?;

        let base_root = reader::root_noderev(self, base_rev)?;
        let root_id = NodeRevId::new(
            base_root.id.node_id,
            base_root.id.copy_id,
            IdPart::new(ChangeSet::Txn(txn_id), ITEM_INDEX_ROOT_NODE),
        );
        let root = NodeRevision {
            id: root_id,
            kind: base_root.kind,
            predecessor: Some(base_root.id),
            predecessor_count: base_root.predecessor_count + 1,
            data_rep: base_root.data_rep.clone(),
            prop_rep: base_root.prop_rep.clone(),
            copyfrom: None,
            copyroot: (base_rev, "/".to_string()),
            created_path: "/".to_string(),
            is_fresh_txn_root: true,
            mergeinfo_here: base_root.mergeinfo_here,
            mergeinfo_count: base_root.mergeinfo_count,
        };

        self.registry().get_or_create(txn_id);
        let txn = Transaction::new(self, txn_id, base_rev, root_id);
        txn.put_node(&root)?;
        debug!(txn = %txn_id, base = base_rev, "transaction begun");
        Ok(txn)
    }

    /// Open an existing transaction by its base-36 name.
    pub fn open_txn(&self, name: &str) -> Result<Transaction<'_>> {
        let txn_id =
            TxnId::from_base36(name).map_err(|_| Error::NoSuchTransaction(name.to_string()))?;
        let dir = self.layout().txn_dir(txn_id);
        if !dir.is_dir() {
            return Err(Error::NoSuchTransaction(name.to_string()));
        }

        let zero = revision_zero_root_id();
        let root_path = self
            .layout()
            .txn_node_path(txn_id, &zero.node_id, &zero.copy_id);
        let root = NodeRevision::parse(&fs::read_to_string(root_path)?)?;
        let base_rev = root
            .predecessor
            .and_then(|pred| pred.noderev_id.change_set.revision())
            .ok_or_else(|| {
                Error::Corrupt(format!("transaction {txn_id} root has no committed base"))
            })?;

        self.registry().get_or_create(txn_id);
        Ok(Transaction::new(self, txn_id, base_rev, root.id))
    }

    /// Abort a transaction: its scratch directory and registry entry go away.
    pub fn abort_txn(&self, txn_id: TxnId) -> Result<()> {
        self.purge_txn(txn_id)
    }

    /// Remove a transaction's directory and registry entry.
    pub(crate) fn purge_txn(&self, txn_id: TxnId) -> Result<()> {
        match fs::remove_dir_all(self.layout().txn_dir(txn_id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.registry().remove(txn_id);
        debug!(txn = %txn_id, "transaction purged");
        Ok(())
    }

    /// Enumerate the transactions present on disk.
    pub fn list_txns(&self) -> Result<Vec<TxnId>> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(self.layout().txns_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(TXN_SUFFIX) {
                if let Ok(id) = TxnId::from_base36(stem) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Sweep transaction directories no live handle refers to.
    ///
    /// After a crash, scratch directories survive without registry entries;
    /// they are safe to delete because an unfinished commit never advanced
    /// the youngest pointer.
    pub fn purge_stale_txns(&self) -> Result<Vec<TxnId>> {
        let mut purged = Vec::new();
        for txn_id in self.list_txns()? {
            if self.registry().lookup(txn_id).is_none() {
                self.purge_txn(txn_id)?;
                purged.push(txn_id);
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_begin_creates_scratch_directory() {
        let dir = tempdir().unwrap();
        let fs = Filesystem::create(dir.path().join("repo")).unwrap();
        let txn = fs.begin_txn(0).unwrap();

        let layout = fs.layout();
        assert!(layout.txn_dir(txn.txn_id()).is_dir());
        assert!(layout.proto_rev_path(txn.txn_id()).exists());
        assert!(layout.proto_rev_lock_path(txn.txn_id()).exists());
        assert!(layout.txn_changes_path(txn.txn_id()).exists());
        assert_eq!(
            fs::read_to_string(layout.txn_next_ids_path(txn.txn_id())).unwrap(),
            "0 0\n"
        );
    }

    #[test]
    fn test_txn_ids_are_monotonic() {
        let dir = tempdir().unwrap();
        let fs = Filesystem::create(dir.path().join("repo")).unwrap();
        let a = fs.begin_txn(0).unwrap();
        let b = fs.begin_txn(0).unwrap();
        assert!(b.txn_id() > a.txn_id());
    }

    #[test]
    fn test_begin_clones_base_root() {
        let dir = tempdir().unwrap();
        let fs = Filesystem::create(dir.path().join("repo")).unwrap();
        let txn = fs.begin_txn(0).unwrap();

        let root = txn.get_node(&txn.root_id()).unwrap();
        assert!(root.id.is_txn());
        assert!(root.is_fresh_txn_root);
        assert_eq!(root.predecessor_count, 1);
        assert_eq!(
            root.predecessor.unwrap().noderev_id.change_set,
            ChangeSet::Revision(0)
        );
    }

    #[test]
    fn test_open_txn_recovers_base_rev() {
        let dir = tempdir().unwrap();
        let fs = Filesystem::create(dir.path().join("repo")).unwrap();
        let txn = fs.begin_txn(0).unwrap();
        let name = txn.txn_id().to_string();

        let reopened = fs.open_txn(&name).unwrap();
        assert_eq!(reopened.txn_id(), txn.txn_id());
        assert_eq!(reopened.base_rev(), 0);
        assert_eq!(reopened.root_id(), txn.root_id());
    }

    #[test]
    fn test_open_missing_txn() {
        let dir = tempdir().unwrap();
        let fs = Filesystem::create(dir.path().join("repo")).unwrap();
        assert!(matches!(
            fs.open_txn("zz"),
            Err(Error::NoSuchTransaction(_))
        ));
    }

    #[test]
    fn test_abort_removes_directory_and_listing() {
        let dir = tempdir().unwrap();
        let fs = Filesystem::create(dir.path().join("repo")).unwrap();
        let txn = fs.begin_txn(0).unwrap();
        let txn_id = txn.txn_id();
        assert_eq!(fs.list_txns().unwrap(), vec![txn_id]);

        fs.abort_txn(txn_id).unwrap();
        assert!(fs.list_txns().unwrap().is_empty());
        assert!(!fs.layout().txn_dir(txn_id).exists());
        assert!(fs.registry().lookup(txn_id).is_none());
    }

    #[test]
    fn test_stale_sweep_spares_registered_txns() {
        let dir = tempdir().unwrap();
        let fs = Filesystem::create(dir.path().join("repo")).unwrap();
        let live = fs.begin_txn(0).unwrap();

        // simulate a crashed process's leftovers
        let stale_dir = fs.layout().txns_dir().join(format!("zz{TXN_SUFFIX}"));
        fs::create_dir(&stale_dir).unwrap();

        let purged = fs.purge_stale_txns().unwrap();
        assert_eq!(purged, vec![TxnId::from_base36("zz").unwrap()]);
        assert!(!stale_dir.exists());
        assert!(fs.layout().txn_dir(live.txn_id()).is_dir());
    }
}
