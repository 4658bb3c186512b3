//! Error types for the revfs engine
//!
//! A single error enum covers the whole workspace. Variants are domain tags:
//! callers match on the variant, not on message text. `thiserror` provides
//! the `Display` and `Error` implementations.

use crate::types::{Revnum, TxnId};
use std::io;
use thiserror::Error;

/// Result type alias for revfs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the revfs engine
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from a filesystem primitive
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// On-disk structure violates an invariant
    #[error("corrupt filesystem data: {0}")]
    Corrupt(String),

    /// Transaction base revision is no longer the youngest
    #[error("transaction out of date: based on r{base} but youngest is r{youngest}")]
    TxnOutOfDate {
        /// Revision the transaction was begun against
        base: Revnum,
        /// Youngest revision at commit time
        youngest: Revnum,
    },

    /// Another writer holds the proto-rev lock for this transaction
    #[error("representation of transaction {0} is already being written")]
    RepBeingWritten(TxnId),

    /// Two moves in one commit claim the same source path
    #[error("ambiguous move: two moves share the source '{0}'")]
    AmbiguousMove(String),

    /// A move whose source subtree was never deleted
    #[error("incomplete move to '{path}': source '{src_path}' was not deleted")]
    IncompleteMove {
        /// Destination path of the move
        path: String,
        /// Source path that should have been deleted
        src_path: String,
    },

    /// `open` called on a missing transaction directory
    #[error("no such transaction '{0}'")]
    NoSuchTransaction(String),

    /// Path does not exist in the referenced tree
    #[error("path '{0}' not found")]
    PathNotFound(String),

    /// Path already exists where a new node was to be created
    #[error("path '{0}' already exists")]
    AlreadyExists(String),

    /// File operation applied to a non-file node
    #[error("'{0}' is not a file")]
    NotFile(String),

    /// Directory operation applied to a non-directory node
    #[error("'{0}' is not a directory")]
    NotDir(String),

    /// Unrecognized checksum kind label
    #[error("unknown checksum kind '{0}'")]
    BadChecksumKind(String),

    /// Malformed checksum representation
    #[error("invalid checksum text '{0}'")]
    BadChecksumParse(String),

    /// Stored and computed digests disagree
    #[error("checksum mismatch: expected {expected}, actual {actual}")]
    ChecksumMismatch {
        /// Digest recorded on disk
        expected: String,
        /// Digest computed from the data
        actual: String,
    },

    /// A non-reset change record carries no node-revision id
    #[error("missing node revision id in change on '{0}'")]
    MissingNodeRevId(String),

    /// A non-add change follows a delete of the same path
    #[error("invalid change ordering: non-add change on deleted path '{0}'")]
    InvalidChangeOrderingNonAddOnDelete(String),

    /// An add targets a path that already carries a change
    #[error("invalid change ordering: add change on preexisting path '{0}'")]
    InvalidChangeOrderingAddOnExisting(String),

    /// A new node-revision id appears for a path that was never deleted
    #[error("invalid change ordering: new node revision id without delete on '{0}'")]
    NewIdWithoutDelete(String),

    /// Internal invariant broken; never downgraded
    #[error("malfunction: {0}")]
    Malfunction(String),
}

impl Error {
    /// Whether the failed operation may be retried against a fresh base.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TxnOutOfDate { .. } | Error::RepBeingWritten(_)
        )
    }

    /// Whether a rep-sharing lookup failure must abort the commit.
    ///
    /// Corruption and malfunctions indicate the sharing index refers to
    /// revisions that do not exist; every other lookup failure is downgraded
    /// to a warning and treated as a cache miss.
    pub fn is_cache_fatal(&self) -> bool {
        matches!(self, Error::Corrupt(_) | Error::Malfunction(_))
    }
}
