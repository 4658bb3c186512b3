//! Core types for the revfs engine
//!
//! This crate defines the identifier and checksum vocabulary shared by every
//! layer of the filesystem:
//! - Revision numbers and base-36 transaction ids
//! - Tagged change-sets (revision vs. in-progress transaction)
//! - Node-revision id triples
//! - MD5 / SHA-1 digest values
//! - The unified error enum

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod base36;
pub mod checksum;
pub mod error;
pub mod types;

pub use checksum::{ChecksumKind, Md5Digest, Sha1Digest};
pub use error::{Error, Result};
pub use types::{
    ChangeSet, IdPart, NodeKind, NodeRevId, Revnum, TxnId, ITEM_INDEX_CHANGES,
    ITEM_INDEX_FIRST_USER, ITEM_INDEX_ROOT_NODE, ITEM_INDEX_UNUSED,
};
