//! The commit pipeline
//!
//! Promotes a transaction into the next revision under the global write
//! lock:
//!
//! 1. Out-of-date check against the youngest revision
//! 2. Path-lock verification over the folded changed paths
//! 3. Move verification
//! 4. Depth-first rewrite of the staged tree into the proto-rev file,
//!    retagging every transaction-tagged id to the new revision
//! 5. The changed-paths block
//! 6. Index finalization and the atomic rename publishing the revision
//! 7. Revprop finalization
//! 8. The youngest marker, bumped as the last observable mutation
//!
//! Collected representations enter the rep-sharing index after the write
//! lock is released. A failure anywhere leaves the youngest pointer (and
//! thus every reader) untouched; the transaction survives for retry unless
//! the commit published.

use crate::fold::fold_changes;
use crate::fs::Filesystem;
use crate::moves::verify_moves;
use crate::props::{self, PROP_REVISION_DATE, PROP_TXN_CLIENT_DATE, TXN_MARKER_PROPS};
use crate::reader;
use crate::rep_writer::RawRepWriter;
use crate::txn::Transaction;
use revfs_concurrency::ProtoRevGuard;
use revfs_core::{
    ChangeSet, Error, IdPart, NodeKind, NodeRevId, Result, Revnum, Sha1Digest,
    ITEM_INDEX_CHANGES, ITEM_INDEX_ROOT_NODE,
};
use revfs_storage::format::write_revnum_file;
use revfs_storage::{index, ChangeRecord, ItemKind, NodeRevision, Representation};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fs;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use tracing::debug;

/// Commit `txn`, returning the new revision number.
pub fn commit_txn(txn: &Transaction<'_>) -> Result<Revnum> {
    let fs = txn.fs();
    let (new_rev, reps_to_cache) = fs
        .locks()
        .with_write_lock(fs.layout(), || commit_body(txn))?;

    // rep-sharing registration happens outside the write lock; one atomic
    // batch per commit
    if fs.config().rep_sharing.enable {
        if let Err(e) = fs.rep_cache().insert_batch(&reps_to_cache) {
            fs.warn(&e);
        }
    }
    Ok(new_rev)
}

struct CommitContext<'t, 'f> {
    txn: &'t Transaction<'f>,
    new_rev: Revnum,
    youngest: Revnum,
    file: Option<File>,
    id_map: FxHashMap<NodeRevId, NodeRevId>,
    reps_to_cache: Vec<(Sha1Digest, Representation)>,
}

fn commit_body(txn: &Transaction<'_>) -> Result<(Revnum, Vec<(Sha1Digest, Representation)>)> {
    let fs = txn.fs();
    let layout = fs.layout();

    let youngest = fs.refresh_youngest()?;
    if txn.base_rev() != youngest {
        return Err(Error::TxnOutOfDate {
            base: txn.base_rev(),
            youngest,
        });
    }

    let folded = fold_changes(txn.read_changes()?)?;
    verify_path_locks(fs, &folded)?;
    verify_moves(fs, txn.base_rev(), youngest, &folded)?;

    let new_rev = youngest + 1;
    debug!(txn = %txn.txn_id(), new_rev, "commit started");

    let guard = ProtoRevGuard::acquire(layout, fs.registry(), txn.txn_id())?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(layout.proto_rev_path(txn.txn_id()))?;

    let mut ctx = CommitContext {
        txn,
        new_rev,
        youngest,
        file: Some(file),
        id_map: FxHashMap::default(),
        reps_to_cache: Vec::new(),
    };

    write_final_node(&mut ctx, &txn.root_id())?;
    write_final_changed_path_info(&mut ctx, folded)?;

    let file = ctx.file.take().expect("commit context holds the file");
    file.sync_all()?;
    drop(file);

    if layout.starts_new_shard(new_rev) {
        create_shard_dirs(fs, new_rev)?;
    }

    index::build_final_indexes(
        &layout.txn_proto_l2p_path(txn.txn_id()),
        &layout.txn_proto_p2l_path(txn.txn_id()),
        &layout.l2p_path(new_rev),
        &layout.p2l_path(new_rev),
    )?;

    // the atomic publish: after this rename the revision is readable
    fs::rename(
        layout.proto_rev_path(txn.txn_id()),
        layout.rev_path(new_rev),
    )?;
    propagate_permissions(fs, new_rev);
    drop(guard);

    finalize_revprops(txn, new_rev)?;

    // readable-as-new postcondition, debug builds only
    #[cfg(debug_assertions)]
    {
        reader::root_noderev(fs, new_rev)?;
        reader::paths_changed(fs, new_rev)?;
    }

    write_revnum_file(&layout.current_path(), new_rev)?;
    fs.set_youngest_cache(new_rev);
    fs.purge_txn(txn.txn_id())?;

    debug!(new_rev, "commit published");
    Ok((new_rev, ctx.reps_to_cache))
}

/// Run the installed path-lock verifier over the folded changed paths,
/// depth-first ordered. Adds and deletions check recursively; pure
/// modifications do not.
fn verify_path_locks(fs: &Filesystem, folded: &BTreeMap<String, ChangeRecord>) -> Result<()> {
    let verifier = match fs.lock_verifier() {
        Some(verifier) => verifier,
        None => return Ok(()),
    };
    for (path, record) in folded {
        let recursive = record.kind != revfs_storage::ChangeKind::Modify;
        verifier.verify(path, recursive)?;
    }
    Ok(())
}

/// Depth-first rewrite of one staged node into the proto-rev file.
///
/// Children are finalized first so the parent's directory content can embed
/// their new ids. Returns the node's revision-tagged id; committed nodes
/// pass through unchanged.
fn write_final_node(ctx: &mut CommitContext<'_, '_>, id: &NodeRevId) -> Result<NodeRevId> {
    if !id.is_txn() {
        return Ok(*id);
    }
    let txn = ctx.txn;
    let fs = txn.fs();
    let mut noderev = txn.get_node(id)?;

    match noderev.kind {
        NodeKind::Dir => {
            let mut entries = txn.dir_entries(id)?;
            for entry in entries.values_mut() {
                if entry.id.is_txn() {
                    entry.id = write_final_node(ctx, &entry.id)?;
                }
            }
            if matches!(&noderev.data_rep, Some(rep) if rep.is_mutable()) {
                let mut content = Vec::new();
                revfs_storage::dirents::serialize(&mut content, &entries)?;
                let rep = write_commit_rep(ctx, &noderev, false, ItemKind::DirRep, &content)?;
                // sha1 not worth storing for directory contents
                noderev.data_rep = Some(Representation { sha1: None, ..rep });
            }
        }
        NodeKind::File => {
            if matches!(&noderev.data_rep, Some(rep) if rep.is_mutable()) {
                let rep = retag_rep(noderev.data_rep.take().expect("matched above"), ctx.new_rev);
                if let Some(sha1) = rep.sha1 {
                    ctx.reps_to_cache.push((sha1, rep.clone()));
                }
                noderev.data_rep = Some(rep);
            }
        }
    }

    if matches!(&noderev.prop_rep, Some(rep) if rep.is_mutable()) {
        let content = txn.staged_prop_bytes(id)?;
        let kind = match noderev.kind {
            NodeKind::File => ItemKind::FileProps,
            NodeKind::Dir => ItemKind::DirProps,
        };
        let rep = write_commit_rep(ctx, &noderev, true, kind, &content)?;
        if let Some(sha1) = rep.sha1 {
            ctx.reps_to_cache.push((sha1, rep.clone()));
        }
        noderev.prop_rep = Some(Representation { sha1: None, ..rep });
    }

    let is_root = *id == txn.root_id();
    if is_root {
        let head_root = reader::root_noderev(fs, ctx.youngest)?;
        let expected = (ctx.new_rev - ctx.youngest) as u64;
        if noderev.predecessor_count - head_root.predecessor_count != expected {
            return Err(Error::Corrupt(format!(
                "root predecessor count {} diverges from head count {}",
                noderev.predecessor_count, head_root.predecessor_count
            )));
        }
    }

    let item_index = if is_root {
        ITEM_INDEX_ROOT_NODE
    } else {
        txn.allocate_item_index()?
    };
    let new_id = NodeRevId::new(
        retag_id_part(noderev.id.node_id, ctx.new_rev),
        retag_id_part(noderev.id.copy_id, ctx.new_rev),
        IdPart::new(ChangeSet::Revision(ctx.new_rev), item_index),
    );
    noderev.id = new_id;
    noderev.is_fresh_txn_root = false;

    let mut file = ctx.file.take().expect("commit context holds the file");
    let offset = file.seek(SeekFrom::End(0))?;
    let bytes = noderev.serialize();
    file.write_all(bytes.as_bytes())?;
    ctx.file = Some(file);
    append_proto_indexes(
        txn,
        offset,
        bytes.len() as u64,
        ItemKind::NodeRev,
        item_index,
    )?;

    ctx.id_map.insert(*id, new_id);
    Ok(new_id)
}

/// Write one directory or property representation during the final rewrite.
/// The proto-rev lock is already held by the pipeline.
fn write_commit_rep(
    ctx: &mut CommitContext<'_, '_>,
    noderev: &NodeRevision,
    props: bool,
    kind: ItemKind,
    content: &[u8],
) -> Result<Representation> {
    let file = ctx.file.take().expect("commit context holds the file");
    let mut raw = RawRepWriter::start(ctx.txn.fs(), file, noderev, props, kind)?;
    raw.write(content)?;
    let (file, rep) = raw.finish(ctx.txn)?;
    ctx.file = Some(file);
    Ok(retag_rep(rep, ctx.new_rev))
}

/// Retag a staged representation into the new revision's namespace.
fn retag_rep(rep: Representation, new_rev: Revnum) -> Representation {
    match rep.change_set {
        ChangeSet::Txn(_) => Representation {
            change_set: ChangeSet::Revision(new_rev),
            ..rep
        },
        // an adopted shared rep already lives in an older revision
        ChangeSet::Revision(_) => rep,
    }
}

fn retag_id_part(part: IdPart, new_rev: Revnum) -> IdPart {
    match part.change_set {
        ChangeSet::Txn(_) => IdPart::new(ChangeSet::Revision(new_rev), part.number),
        ChangeSet::Revision(_) => part,
    }
}

/// Emit the folded change records as the revision's changed-paths block.
fn write_final_changed_path_info(
    ctx: &mut CommitContext<'_, '_>,
    folded: BTreeMap<String, ChangeRecord>,
) -> Result<()> {
    let mut finalized = BTreeMap::new();
    for (path, mut record) in folded {
        if let Some(id) = &record.node_rev_id {
            if id.is_txn() {
                record.node_rev_id = match ctx.id_map.get(id) {
                    Some(new_id) => Some(*new_id),
                    // the staged node did not survive into the new revision
                    // (a deleted clone); refer to its committed ancestor
                    None => ctx.txn.get_node(id)?.predecessor,
                };
            }
        }
        if record.kind.is_move() {
            if let Some((_, source)) = record.copyfrom.take() {
                record.copyfrom = Some((ctx.new_rev - 1, source));
            }
        }
        finalized.insert(path, record);
    }

    let mut block = Vec::new();
    ChangeRecord::write_block(&mut block, &finalized)?;

    let mut file = ctx.file.take().expect("commit context holds the file");
    let offset = file.seek(SeekFrom::End(0))?;
    file.write_all(&block)?;
    ctx.file = Some(file);
    append_proto_indexes(
        ctx.txn,
        offset,
        block.len() as u64,
        ItemKind::Changes,
        ITEM_INDEX_CHANGES,
    )
}

fn append_proto_indexes(
    txn: &Transaction<'_>,
    offset: u64,
    size: u64,
    kind: ItemKind,
    item_index: u64,
) -> Result<()> {
    let layout = txn.fs().layout();
    let mut l2p = OpenOptions::new()
        .append(true)
        .open(layout.txn_proto_l2p_path(txn.txn_id()))?;
    index::append_proto_l2p(&mut l2p, item_index, offset)?;
    let mut p2l = OpenOptions::new()
        .append(true)
        .open(layout.txn_proto_p2l_path(txn.txn_id()))?;
    index::append_proto_p2l(
        &mut p2l,
        &index::P2lEntry {
            offset,
            size,
            kind,
            item_index,
        },
    )
}

/// Create the revision and revprop shard directories for a shard-opening
/// revision, tolerating a concurrent creator.
fn create_shard_dirs(fs: &Filesystem, new_rev: Revnum) -> Result<()> {
    for dir in [
        fs.layout().rev_shard_dir(new_rev),
        fs.layout().revprops_shard_dir(new_rev),
    ] {
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Best-effort permission propagation from the previous revision file.
fn propagate_permissions(fs: &Filesystem, new_rev: Revnum) {
    if new_rev == 0 {
        return;
    }
    let layout = fs.layout();
    if let Ok(meta) = std::fs::metadata(layout.rev_path(new_rev - 1)) {
        let _ = std::fs::set_permissions(layout.rev_path(new_rev), meta.permissions());
    }
}

/// Write the final revprop file: strip the internal markers, stamp
/// `svn:date` unless the client supplied one, and rename into place.
fn finalize_revprops(txn: &Transaction<'_>, new_rev: Revnum) -> Result<()> {
    let layout = txn.fs().layout();
    let mut proplist = txn.txn_proplist()?;
    let keep_client_date = proplist.contains_key(PROP_TXN_CLIENT_DATE);
    for marker in TXN_MARKER_PROPS {
        proplist.remove(marker);
    }
    if !keep_client_date {
        proplist.insert(PROP_REVISION_DATE.to_string(), props::now_timestamp());
    }
    let staged = layout.txn_props_final_path(txn.txn_id());
    props::write_props(&staged, &proplist)?;
    fs::rename(staged, layout.revprops_path(new_rev))?;
    Ok(())
}
