//! Repository directory structure
//!
//! A repository is a directory containing all state:
//!
//! ```text
//! repo/
//! ├── format               # format number, layout hint, addressing hint
//! ├── uuid                 # instance id
//! ├── config               # optional TOML tunables
//! ├── current              # youngest revision number
//! ├── txn-current          # next transaction id, base-36
//! ├── txn-current-lock     # sentinel for the txn-counter advisory lock
//! ├── write-lock           # sentinel for the global write lock
//! ├── min-unpacked-rev     # first revision not yet packed
//! ├── rep-cache            # persistent rep-sharing index
//! ├── revs/<shard>/<rev>           # revision files (+ .l2p / .p2l)
//! ├── revprops/<shard>/<rev>       # revision property files
//! └── transactions/<id>.txn/       # per-transaction scratch space
//! ```
//!
//! Everything here is a pure function from ids to paths.

use revfs_core::{IdPart, Revnum, Sha1Digest, TxnId};
use std::path::{Path, PathBuf};

/// Suffix of per-transaction directories under `transactions/`.
pub const TXN_SUFFIX: &str = ".txn";

/// Repository paths, parameterized by the shard size from the format file.
#[derive(Debug, Clone)]
pub struct RepoLayout {
    root: PathBuf,
    shard_size: u64,
}

impl RepoLayout {
    /// Create a layout rooted at `root` with `shard_size` revisions per shard.
    pub fn new(root: impl AsRef<Path>, shard_size: u64) -> Self {
        debug_assert!(shard_size > 0);
        RepoLayout {
            root: root.as_ref().to_path_buf(),
            shard_size,
        }
    }

    /// The repository root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Revisions per shard directory.
    pub fn shard_size(&self) -> u64 {
        self.shard_size
    }

    /// The `format` file.
    pub fn format_path(&self) -> PathBuf {
        self.root.join("format")
    }

    /// The instance id file.
    pub fn uuid_path(&self) -> PathBuf {
        self.root.join("uuid")
    }

    /// The optional TOML config file.
    pub fn config_path(&self) -> PathBuf {
        self.root.join("config")
    }

    /// The youngest-revision marker.
    pub fn current_path(&self) -> PathBuf {
        self.root.join("current")
    }

    /// The transaction id counter file.
    pub fn txn_current_path(&self) -> PathBuf {
        self.root.join("txn-current")
    }

    /// Sentinel for the txn-counter advisory lock.
    pub fn txn_current_lock_path(&self) -> PathBuf {
        self.root.join("txn-current-lock")
    }

    /// Sentinel for the global write lock.
    pub fn write_lock_path(&self) -> PathBuf {
        self.root.join("write-lock")
    }

    /// First revision not yet packed.
    pub fn min_unpacked_rev_path(&self) -> PathBuf {
        self.root.join("min-unpacked-rev")
    }

    /// The persistent rep-sharing index.
    pub fn rep_cache_path(&self) -> PathBuf {
        self.root.join("rep-cache")
    }

    /// Shard directory holding revision `rev`.
    pub fn rev_shard_dir(&self, rev: Revnum) -> PathBuf {
        self.root
            .join("revs")
            .join((rev as u64 / self.shard_size).to_string())
    }

    /// The revision file for `rev`.
    pub fn rev_path(&self, rev: Revnum) -> PathBuf {
        self.rev_shard_dir(rev).join(rev.to_string())
    }

    /// The logical-to-physical index for `rev`.
    pub fn l2p_path(&self, rev: Revnum) -> PathBuf {
        self.rev_shard_dir(rev).join(format!("{rev}.l2p"))
    }

    /// The physical-to-logical index for `rev`.
    pub fn p2l_path(&self, rev: Revnum) -> PathBuf {
        self.rev_shard_dir(rev).join(format!("{rev}.p2l"))
    }

    /// Shard directory holding the revprops of `rev`.
    pub fn revprops_shard_dir(&self, rev: Revnum) -> PathBuf {
        self.root
            .join("revprops")
            .join((rev as u64 / self.shard_size).to_string())
    }

    /// The revision properties file for `rev`.
    pub fn revprops_path(&self, rev: Revnum) -> PathBuf {
        self.revprops_shard_dir(rev).join(rev.to_string())
    }

    /// Whether `rev` is the first revision of a new shard.
    pub fn starts_new_shard(&self, rev: Revnum) -> bool {
        rev as u64 % self.shard_size == 0
    }

    /// The `transactions/` directory.
    pub fn txns_dir(&self) -> PathBuf {
        self.root.join("transactions")
    }

    /// The scratch directory of one transaction.
    pub fn txn_dir(&self, txn_id: TxnId) -> PathBuf {
        self.txns_dir().join(format!("{txn_id}{TXN_SUFFIX}"))
    }

    /// The proto-rev file a transaction accumulates into.
    pub fn proto_rev_path(&self, txn_id: TxnId) -> PathBuf {
        self.txn_dir(txn_id).join("rev")
    }

    /// Sentinel for the per-transaction proto-rev advisory lock.
    pub fn proto_rev_lock_path(&self, txn_id: TxnId) -> PathBuf {
        self.txn_dir(txn_id).join("rev-lock")
    }

    /// The append-only change-record log.
    pub fn txn_changes_path(&self, txn_id: TxnId) -> PathBuf {
        self.txn_dir(txn_id).join("changes")
    }

    /// The node-id / copy-id counter file.
    pub fn txn_next_ids_path(&self, txn_id: TxnId) -> PathBuf {
        self.txn_dir(txn_id).join("next-ids")
    }

    /// The item-index counter file.
    pub fn txn_item_index_path(&self, txn_id: TxnId) -> PathBuf {
        self.txn_dir(txn_id).join("item-index")
    }

    /// Staged transaction properties.
    pub fn txn_props_path(&self, txn_id: TxnId) -> PathBuf {
        self.txn_dir(txn_id).join("props")
    }

    /// Final transaction properties, written during commit.
    pub fn txn_props_final_path(&self, txn_id: TxnId) -> PathBuf {
        self.txn_dir(txn_id).join("props-final")
    }

    /// Proto logical-to-physical index stream.
    pub fn txn_proto_l2p_path(&self, txn_id: TxnId) -> PathBuf {
        self.txn_dir(txn_id).join("index.l2p")
    }

    /// Proto physical-to-logical index stream.
    pub fn txn_proto_p2l_path(&self, txn_id: TxnId) -> PathBuf {
        self.txn_dir(txn_id).join("index.p2l")
    }

    /// Staged node-revision file, keyed by node id and copy id.
    pub fn txn_node_path(&self, txn_id: TxnId, node_id: &IdPart, copy_id: &IdPart) -> PathBuf {
        self.txn_dir(txn_id).join(format!("node.{node_id}.{copy_id}"))
    }

    /// Append-only directory mutation log for one staged directory.
    pub fn txn_children_path(
        &self,
        txn_id: TxnId,
        node_id: &IdPart,
        copy_id: &IdPart,
    ) -> PathBuf {
        self.txn_dir(txn_id)
            .join(format!("node.{node_id}.{copy_id}.children"))
    }

    /// Staged property list for one node-revision.
    pub fn txn_node_props_path(
        &self,
        txn_id: TxnId,
        node_id: &IdPart,
        copy_id: &IdPart,
    ) -> PathBuf {
        self.txn_dir(txn_id)
            .join(format!("node.{node_id}.{copy_id}.props"))
    }

    /// Intra-transaction rep-sharing sidecar, keyed by content SHA-1.
    pub fn txn_sha1_path(&self, txn_id: TxnId, sha1: &Sha1Digest) -> PathBuf {
        self.txn_dir(txn_id).join(sha1.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revfs_core::ChangeSet;

    fn layout() -> RepoLayout {
        RepoLayout::new("/repo", 1000)
    }

    #[test]
    fn test_shard_math() {
        let l = layout();
        assert_eq!(l.rev_path(0), PathBuf::from("/repo/revs/0/0"));
        assert_eq!(l.rev_path(999), PathBuf::from("/repo/revs/0/999"));
        assert_eq!(l.rev_path(1000), PathBuf::from("/repo/revs/1/1000"));
        assert!(l.starts_new_shard(0));
        assert!(l.starts_new_shard(1000));
        assert!(!l.starts_new_shard(1001));
    }

    #[test]
    fn test_index_paths_sit_next_to_rev() {
        let l = layout();
        assert_eq!(l.l2p_path(5), PathBuf::from("/repo/revs/0/5.l2p"));
        assert_eq!(l.p2l_path(5), PathBuf::from("/repo/revs/0/5.p2l"));
    }

    #[test]
    fn test_txn_dir_uses_base36_and_suffix() {
        let l = layout();
        let txn = TxnId::new(36);
        assert_eq!(
            l.txn_dir(txn),
            PathBuf::from("/repo/transactions/10.txn")
        );
        assert_eq!(
            l.proto_rev_path(txn),
            PathBuf::from("/repo/transactions/10.txn/rev")
        );
    }

    #[test]
    fn test_node_file_names_embed_both_ids() {
        let l = layout();
        let txn = TxnId::new(1);
        let node = IdPart::new(ChangeSet::Txn(txn), 0);
        let copy = IdPart::new(ChangeSet::Revision(0), 0);
        assert_eq!(
            l.txn_node_path(txn, &node, &copy),
            PathBuf::from("/repo/transactions/1.txn/node.0-t1.0-r0")
        );
        assert_eq!(
            l.txn_children_path(txn, &node, &copy),
            PathBuf::from("/repo/transactions/1.txn/node.0-t1.0-r0.children")
        );
    }
}
