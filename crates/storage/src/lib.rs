//! On-disk layout and file formats for revfs
//!
//! This crate knows where everything lives and how every byte is arranged:
//! - [`layout`] — pure path mapping for repositories and transactions
//! - [`format`] — the repository `format` file and small counter files
//! - [`hashfile`] — the length-prefixed key/value dump format
//! - [`noderev`] — node-revisions and representation descriptors
//! - [`changes`] — change records, the changes log and the changed-paths block
//! - [`dirents`] — directory entries at rest and the per-directory delta log
//! - [`delta`] — the windowed binary delta codec
//! - [`index`] — proto-index streams and the final `.l2p` / `.p2l` files
//!
//! No locking happens here; callers serialize access.

#![warn(clippy::all)]

pub mod changes;
pub mod delta;
pub mod dirents;
pub mod format;
pub mod hashfile;
pub mod index;
pub mod layout;
pub mod noderev;

pub use changes::{ChangeKind, ChangeRecord};
pub use format::FormatInfo;
pub use index::{ItemKind, P2lEntry};
pub use layout::RepoLayout;
pub use noderev::{NodeRevision, Representation};
