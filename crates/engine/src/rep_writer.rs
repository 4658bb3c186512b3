//! Streaming representation writer
//!
//! Appends one delta-encoded representation to a transaction's proto-rev
//! file. Incoming bytes feed the MD5 and SHA-1 contexts and the windowed
//! delta encoder; on close, the rep-sharing index is consulted and a hit
//! truncates the file back to where the representation started, adopting the
//! existing representation instead.
//!
//! Cleanup is unconditional: dropping an unfinished writer truncates the
//! partial representation and releases the proto-rev lock.

use crate::delta_base::choose_delta_base;
use crate::fs::Filesystem;
use crate::reader::{self, ENDREP};
use crate::txn::Transaction;
use md5::{Digest as _, Md5};
use revfs_concurrency::ProtoRevGuard;
use revfs_core::{ChangeSet, Error, Md5Digest, Result, Sha1Digest};
use revfs_storage::delta::DeltaEncoder;
use revfs_storage::{index, ItemKind, NodeRevision, Representation};
use sha1::Sha1;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use tracing::debug;

/// Representation writer usable with or without an already-held proto-rev
/// lock. The commit pipeline writes directory and property reps through this
/// while it owns the lock for the whole rewrite; client streaming goes
/// through [`RepWriter`], which takes the lock itself.
pub(crate) struct RawRepWriter {
    encoder: Option<DeltaEncoder<File>>,
    rep_offset: u64,
    delta_start: u64,
    md5: Md5,
    sha1: Sha1,
    expanded_size: u64,
    kind: ItemKind,
}

impl RawRepWriter {
    /// Position at end of `file`, choose a delta base for `noderev` and
    /// write the representation header.
    pub(crate) fn start(
        fs: &Filesystem,
        mut file: File,
        noderev: &NodeRevision,
        props: bool,
        kind: ItemKind,
    ) -> Result<Self> {
        let base = choose_delta_base(fs, noderev, props)?;
        let base_content = match &base {
            Some(rep) => reader::rep_content(fs, rep)?,
            None => Vec::new(),
        };

        let rep_offset = file.seek(SeekFrom::End(0))?;
        let header = reader::format_rep_header(base.as_ref());
        file.write_all(header.as_bytes())?;
        let delta_start = rep_offset + header.len() as u64;

        Ok(RawRepWriter {
            encoder: Some(DeltaEncoder::new(base_content, file)?),
            rep_offset,
            delta_start,
            md5: Md5::new(),
            sha1: Sha1::new(),
            expanded_size: 0,
            kind,
        })
    }

    /// Feed content bytes: checksums first, then the delta encoder.
    pub(crate) fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.md5.update(data);
        self.sha1.update(data);
        self.expanded_size += data.len() as u64;
        self.encoder
            .as_mut()
            .expect("write after finish")
            .write_all(data)
    }

    /// Finalize: flush the encoder, settle rep sharing, and either truncate
    /// (sharing hit) or terminate with `ENDREP` and index the new item.
    pub(crate) fn finish(mut self, txn: &Transaction<'_>) -> Result<(File, Representation)> {
        let encoder = self.encoder.take().expect("finish called twice");
        let mut file = encoder.finish()?;
        let end_offset = file.seek(SeekFrom::End(0))?;

        let md5 = Md5Digest(self.md5.clone().finalize().into());
        let sha1 = Sha1Digest(self.sha1.clone().finalize().into());

        if let Some(shared) = lookup_shared_rep(txn, &sha1)? {
            file.set_len(self.rep_offset)?;
            debug!(sha1 = %sha1, "representation shared; proto-rev truncated");
            let adopted = Representation {
                md5,
                sha1: Some(sha1),
                ..shared
            };
            return Ok((file, adopted));
        }

        file.write_all(ENDREP)?;
        let item_index = txn.allocate_item_index()?;
        let rep = Representation {
            change_set: ChangeSet::Txn(txn.txn_id()),
            item_index,
            size: end_offset - self.delta_start,
            expanded_size: self.expanded_size,
            md5,
            sha1: Some(sha1),
        };

        let layout = txn.fs().layout();
        let mut l2p = OpenOptions::new()
            .append(true)
            .open(layout.txn_proto_l2p_path(txn.txn_id()))?;
        index::append_proto_l2p(&mut l2p, item_index, self.rep_offset)?;
        let mut p2l = OpenOptions::new()
            .append(true)
            .open(layout.txn_proto_p2l_path(txn.txn_id()))?;
        index::append_proto_p2l(
            &mut p2l,
            &index::P2lEntry {
                offset: self.rep_offset,
                size: end_offset + ENDREP.len() as u64 - self.rep_offset,
                kind: self.kind,
                item_index,
            },
        )?;

        txn.note_rep(sha1, &rep)?;
        Ok((file, rep))
    }
}

impl Drop for RawRepWriter {
    fn drop(&mut self) {
        // abnormal exit: truncate the partial representation
        if let Some(encoder) = self.encoder.take() {
            let file = encoder.abandon();
            let _ = file.set_len(self.rep_offset);
        }
    }
}

/// Rep-sharing lookup for a representation about to be closed.
///
/// Order: the in-memory per-transaction map, then the persistent index,
/// then the on-disk per-transaction sidecar. Persistent-lookup failures are
/// downgraded to a warning and a miss unless they are corruption or
/// malfunction, which indicate the index refers to revisions that do not
/// exist and must abort the commit.
fn lookup_shared_rep(txn: &Transaction<'_>, sha1: &Sha1Digest) -> Result<Option<Representation>> {
    let fs = txn.fs();
    if !fs.config().rep_sharing.enable {
        return Ok(None);
    }
    if let Some(rep) = txn.lookup_txn_rep(sha1) {
        return Ok(Some(rep));
    }
    match fs.rep_cache().get(sha1) {
        Ok(Some(rep)) => {
            check_rep(fs, &rep)?;
            return Ok(Some(rep));
        }
        Ok(None) => {}
        Err(e) if e.is_cache_fatal() => return Err(e),
        Err(e) => fs.warn(&e),
    }
    txn.lookup_txn_rep_sidecar(sha1)
}

/// Validate that a cached representation still refers to a committed,
/// on-disk revision. A forward-dated or dangling row is a malfunction.
fn check_rep(fs: &Filesystem, rep: &Representation) -> Result<()> {
    match rep.change_set {
        ChangeSet::Revision(rev) => {
            if rev > fs.youngest()? || !fs.layout().rev_path(rev).exists() {
                return Err(Error::Malfunction(format!(
                    "rep-cache row refers to missing revision r{rev}"
                )));
            }
            Ok(())
        }
        ChangeSet::Txn(txn_id) => Err(Error::Malfunction(format!(
            "rep-cache row refers to uncommitted transaction {txn_id}"
        ))),
    }
}

/// Client-facing streaming writer: acquires the proto-rev lock on open and
/// holds it until close (or drop).
pub struct RepWriter<'t, 'f> {
    txn: &'t Transaction<'f>,
    raw: Option<RawRepWriter>,
    _guard: ProtoRevGuard,
}

impl<'t, 'f> RepWriter<'t, 'f> {
    /// Open a representation stream for `noderev`'s content or properties.
    pub(crate) fn open(
        txn: &'t Transaction<'f>,
        noderev: &NodeRevision,
        props: bool,
        kind: ItemKind,
    ) -> Result<Self> {
        let fs = txn.fs();
        let guard = ProtoRevGuard::acquire(fs.layout(), fs.registry(), txn.txn_id())?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(fs.layout().proto_rev_path(txn.txn_id()))?;
        let raw = RawRepWriter::start(fs, file, noderev, props, kind)?;
        Ok(RepWriter {
            txn,
            raw: Some(raw),
            _guard: guard,
        })
    }

    /// Finalize the representation and release the proto-rev lock.
    pub fn close(mut self) -> Result<Representation> {
        let raw = self.raw.take().expect("close called twice");
        let (file, rep) = raw.finish(self.txn)?;
        file.sync_all()?;
        Ok(rep)
    }
}

impl Write for RepWriter<'_, '_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.raw.as_mut().expect("write after close").write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
