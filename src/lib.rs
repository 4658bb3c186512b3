//! revfs — a transactional, versioned, append-only filesystem
//!
//! A repository stores a linear history of tree revisions. Clients open a
//! transaction against a base revision, stage mutations, and atomically
//! promote the transaction into the next revision:
//!
//! ```no_run
//! use revfs::Filesystem;
//!
//! let fs = Filesystem::create("/tmp/repo")?;
//! let txn = fs.begin_txn(0)?;
//! txn.make_file("/iota")?;
//! txn.apply_text("/iota", b"hello\n")?;
//! let rev = txn.commit()?;
//! assert_eq!(fs.read_file(rev, "/iota")?, b"hello\n");
//! # Ok::<(), revfs::Error>(())
//! ```
//!
//! The facade re-exports the public API of the member crates.

pub use revfs_core::{
    ChangeSet, ChecksumKind, Error, IdPart, Md5Digest, NodeKind, NodeRevId, Result, Revnum,
    Sha1Digest, TxnId,
};
pub use revfs_engine::{
    FileRepCache, Filesystem, FsConfig, PathLockVerifier, PropList, RepSharing, RepWriter,
    Transaction, WarningSink,
};
pub use revfs_storage::{ChangeKind, ChangeRecord, NodeRevision, RepoLayout, Representation};
