//! Filesystem session
//!
//! [`Filesystem`] owns everything process-wide: the path layout, the parsed
//! config, the lock manager, the shared-transaction registry, the rep-sharing
//! index and the cached youngest revision. All global mutable state lives
//! here and is passed by reference; there are no ambient globals.

use crate::config::FsConfig;
use crate::props::{self, PropList, PROP_REVISION_DATE};
use crate::rep_cache::{FileRepCache, RepSharing};
use parking_lot::Mutex;
use revfs_concurrency::{LockManager, TxnRegistry};
use revfs_core::{
    ChangeSet, Error, IdPart, NodeKind, NodeRevId, Result, Revnum, ITEM_INDEX_CHANGES,
    ITEM_INDEX_ROOT_NODE,
};
use revfs_storage::format::{self, FormatInfo};
use revfs_storage::{index, ChangeRecord, ItemKind, NodeRevision, RepoLayout};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Hook verifying that the committer may touch a path.
///
/// The commit pipeline calls this for every changed path before anything
/// becomes visible; lock storage itself is an external collaborator.
pub trait PathLockVerifier: Send + Sync {
    /// Fail if the path (recursively, for adds and deletions) is locked
    /// against this committer.
    fn verify(&self, path: &str, recursive: bool) -> Result<()>;
}

/// Callback receiving downgraded rep-sharing lookup failures.
pub type WarningSink = Box<dyn Fn(&Error) + Send + Sync>;

/// An opened repository.
pub struct Filesystem {
    layout: RepoLayout,
    config: FsConfig,
    uuid: String,
    locks: LockManager,
    registry: TxnRegistry,
    rep_cache: Box<dyn RepSharing>,
    lock_verifier: Option<Box<dyn PathLockVerifier>>,
    warning_sink: Option<WarningSink>,
    youngest: Mutex<Option<Revnum>>,
}

impl Filesystem {
    /// Create a repository at `path` with default tunables.
    pub fn create(path: impl AsRef<Path>) -> Result<Filesystem> {
        Self::create_with_config(path, FsConfig::default())
    }

    /// Create a repository at `path`.
    ///
    /// Lays out the directory tree, writes every bookkeeping file and
    /// synthesizes revision 0 (the empty tree), then opens the result.
    pub fn create_with_config(path: impl AsRef<Path>, config: FsConfig) -> Result<Filesystem> {
        let root = path.as_ref();
        let layout = RepoLayout::new(root, config.layout.shard_size);

        fs::create_dir_all(layout.root())?;
        fs::create_dir_all(layout.txns_dir())?;

        let info = FormatInfo::current(config.layout.shard_size);
        format::write_file_atomic(&layout.format_path(), info.serialize().as_bytes())?;
        format::write_file_atomic(
            &layout.uuid_path(),
            format!("{}\n", uuid::Uuid::new_v4()).as_bytes(),
        )?;
        format::write_file_atomic(
            &layout.config_path(),
            config.to_file_contents().as_bytes(),
        )?;
        format::write_txn_current(&layout.txn_current_path(), revfs_core::TxnId::new(0))?;
        format::write_revnum_file(&layout.min_unpacked_rev_path(), 0)?;
        fs::File::create(layout.write_lock_path())?;
        fs::File::create(layout.txn_current_lock_path())?;

        write_revision_zero(&layout)?;
        format::write_revnum_file(&layout.current_path(), 0)?;

        debug!(root = %root.display(), "repository created");
        Self::open(root)
    }

    /// Open the repository at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Filesystem> {
        let root = path.as_ref();
        let probe = RepoLayout::new(root, 1);
        let info = FormatInfo::read(&probe.format_path())?;
        let layout = RepoLayout::new(root, info.shard_size());
        let config = FsConfig::load(&layout.config_path())?;
        let uuid = fs::read_to_string(layout.uuid_path())?
            .trim_end()
            .to_string();
        let rep_cache = Box::new(FileRepCache::new(layout.rep_cache_path()));
        Ok(Filesystem {
            layout,
            config,
            uuid,
            locks: LockManager::new(),
            registry: TxnRegistry::new(),
            rep_cache,
            lock_verifier: None,
            warning_sink: None,
            youngest: Mutex::new(None),
        })
    }

    /// The repository path layout.
    pub fn layout(&self) -> &RepoLayout {
        &self.layout
    }

    /// The parsed tunables.
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// The repository instance id.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The in-process lock manager.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// The shared-transaction registry.
    pub fn registry(&self) -> &TxnRegistry {
        &self.registry
    }

    /// The persistent rep-sharing index.
    pub fn rep_cache(&self) -> &dyn RepSharing {
        self.rep_cache.as_ref()
    }

    /// Install a path-lock verifier consulted during commit.
    pub fn set_lock_verifier(&mut self, verifier: Box<dyn PathLockVerifier>) {
        self.lock_verifier = Some(verifier);
    }

    /// The installed path-lock verifier, if any.
    pub fn lock_verifier(&self) -> Option<&dyn PathLockVerifier> {
        self.lock_verifier.as_deref()
    }

    /// Install a sink for downgraded rep-sharing failures.
    pub fn set_warning_sink(&mut self, sink: WarningSink) {
        self.warning_sink = Some(sink);
    }

    /// Report a downgraded failure to the sink, or log it.
    pub(crate) fn warn(&self, err: &Error) {
        match &self.warning_sink {
            Some(sink) => sink(err),
            None => tracing::warn!(error = %err, "rep-sharing lookup failed; treated as miss"),
        }
    }

    /// The youngest committed revision, cached after the first read.
    pub fn youngest(&self) -> Result<Revnum> {
        let mut cached = self.youngest.lock();
        match *cached {
            Some(rev) => Ok(rev),
            None => {
                let rev = format::read_revnum_file(&self.layout.current_path())?;
                *cached = Some(rev);
                Ok(rev)
            }
        }
    }

    /// Re-read the youngest pointer from disk, refreshing the cache.
    /// Called on every write-lock acquisition.
    pub(crate) fn refresh_youngest(&self) -> Result<Revnum> {
        let rev = format::read_revnum_file(&self.layout.current_path())?;
        *self.youngest.lock() = Some(rev);
        Ok(rev)
    }

    /// Update the cached youngest after a successful commit.
    pub(crate) fn set_youngest_cache(&self, rev: Revnum) {
        *self.youngest.lock() = Some(rev);
    }

    /// The properties of a committed revision.
    pub fn revision_proplist(&self, rev: Revnum) -> Result<PropList> {
        if rev > self.youngest()? {
            return Err(Error::Corrupt(format!("no revision {rev}")));
        }
        props::read_props(&self.layout.revprops_path(rev))
    }
}

/// The node-revision id every repository's revision-0 root carries.
pub(crate) fn revision_zero_root_id() -> NodeRevId {
    let part = |n| IdPart::new(ChangeSet::Revision(0), n);
    NodeRevId::new(part(0), part(0), part(ITEM_INDEX_ROOT_NODE))
}

fn write_revision_zero(layout: &RepoLayout) -> Result<()> {
    fs::create_dir_all(layout.rev_shard_dir(0))?;
    fs::create_dir_all(layout.revprops_shard_dir(0))?;

    let mut rev = Vec::new();
    let mut proto_l2p = Vec::new();
    let mut proto_p2l = Vec::new();

    // empty changed-paths block
    let changes_offset = rev.len() as u64;
    ChangeRecord::write_block(&mut rev, &BTreeMap::new())?;
    index::append_proto_l2p(&mut proto_l2p, ITEM_INDEX_CHANGES, changes_offset)?;
    index::append_proto_p2l(
        &mut proto_p2l,
        &index::P2lEntry {
            offset: changes_offset,
            size: rev.len() as u64 - changes_offset,
            kind: ItemKind::Changes,
            item_index: ITEM_INDEX_CHANGES,
        },
    )?;

    // empty root directory
    let root = NodeRevision {
        id: revision_zero_root_id(),
        kind: NodeKind::Dir,
        predecessor: None,
        predecessor_count: 0,
        data_rep: None,
        prop_rep: None,
        copyfrom: None,
        copyroot: (0, "/".to_string()),
        created_path: "/".to_string(),
        is_fresh_txn_root: false,
        mergeinfo_here: false,
        mergeinfo_count: 0,
    };
    let node_offset = rev.len() as u64;
    rev.extend_from_slice(root.serialize().as_bytes());
    index::append_proto_l2p(&mut proto_l2p, ITEM_INDEX_ROOT_NODE, node_offset)?;
    index::append_proto_p2l(
        &mut proto_p2l,
        &index::P2lEntry {
            offset: node_offset,
            size: rev.len() as u64 - node_offset,
            kind: ItemKind::NodeRev,
            item_index: ITEM_INDEX_ROOT_NODE,
        },
    )?;

    format::write_file_atomic(&layout.rev_path(0), &rev)?;

    let shard = layout.rev_shard_dir(0);
    let tmp_l2p = shard.join("0.l2p.proto");
    let tmp_p2l = shard.join("0.p2l.proto");
    fs::write(&tmp_l2p, &proto_l2p)?;
    fs::write(&tmp_p2l, &proto_p2l)?;
    index::build_final_indexes(&tmp_l2p, &tmp_p2l, &layout.l2p_path(0), &layout.p2l_path(0))?;
    fs::remove_file(tmp_l2p)?;
    fs::remove_file(tmp_p2l)?;

    let mut revprops = PropList::new();
    revprops.insert(PROP_REVISION_DATE.to_string(), props::now_timestamp());
    props::write_props(&layout.revprops_path(0), &revprops)?;
    Ok(())
}
