//! Identifier types
//!
//! The engine names everything with small integer identifiers:
//!
//! - [`Revnum`] — committed revision number, monotonically increasing.
//! - [`TxnId`] — in-progress transaction id, minted from a persistent
//!   counter and serialized as base-36 text.
//! - [`ChangeSet`] — a tagged integer carrying either of the above. The
//!   packed form uses one discriminator bit at the high end, so both cases
//!   share a single `u64` on disk.
//! - [`NodeRevId`] — the `(node_id, copy_id, noderev_id)` triple identifying
//!   one node-revision, each component a `(change_set, number)` pair.

use crate::base36;
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Committed revision number. Revision 0 is the empty tree.
pub type Revnum = u32;

/// Item index reserved for "not assigned yet" on mutable representations.
pub const ITEM_INDEX_UNUSED: u64 = 0;
/// Item index of the changed-paths block within every revision.
pub const ITEM_INDEX_CHANGES: u64 = 1;
/// Item index of the root node-revision within every revision.
pub const ITEM_INDEX_ROOT_NODE: u64 = 2;
/// First item index handed out to ordinary items.
pub const ITEM_INDEX_FIRST_USER: u64 = 3;

/// In-progress transaction id.
///
/// Allocated from the shared `txn-current` counter; the textual form is
/// lowercase base-36.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(u64);

impl TxnId {
    /// Wrap a raw counter value.
    pub fn new(value: u64) -> Self {
        TxnId(value)
    }

    /// The raw counter value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Parse the base-36 textual form.
    pub fn from_base36(text: &str) -> Result<Self> {
        Ok(TxnId(base36::parse(text)?))
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", base36::encode(self.0))
    }
}

/// Discriminator bit for the packed [`ChangeSet`] form: set means "txn".
const CHANGE_SET_TXN_BIT: u64 = 1 << 63;

/// A tagged integer identifying either a committed revision or an
/// in-progress transaction.
///
/// Item indexes are namespaced by change-set: a representation whose
/// change-set is a transaction is mutable, one whose change-set is a
/// revision is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeSet {
    /// Content committed in a revision.
    Revision(Revnum),
    /// Content staged in a transaction.
    Txn(TxnId),
}

impl ChangeSet {
    /// Pack into the on-disk `u64` form (one-bit discriminator at the top).
    pub fn pack(&self) -> u64 {
        match self {
            ChangeSet::Revision(rev) => *rev as u64,
            ChangeSet::Txn(txn) => CHANGE_SET_TXN_BIT | txn.value(),
        }
    }

    /// Unpack the on-disk `u64` form.
    pub fn unpack(raw: u64) -> Result<Self> {
        if raw & CHANGE_SET_TXN_BIT != 0 {
            Ok(ChangeSet::Txn(TxnId::new(raw & !CHANGE_SET_TXN_BIT)))
        } else if raw <= Revnum::MAX as u64 {
            Ok(ChangeSet::Revision(raw as Revnum))
        } else {
            Err(Error::Corrupt(format!("change-set value {raw} out of range")))
        }
    }

    /// Whether this change-set names an in-progress transaction.
    pub fn is_txn(&self) -> bool {
        matches!(self, ChangeSet::Txn(_))
    }

    /// The revision, if committed.
    pub fn revision(&self) -> Option<Revnum> {
        match self {
            ChangeSet::Revision(rev) => Some(*rev),
            ChangeSet::Txn(_) => None,
        }
    }

    /// The transaction id, if in progress.
    pub fn txn(&self) -> Option<TxnId> {
        match self {
            ChangeSet::Txn(txn) => Some(*txn),
            ChangeSet::Revision(_) => None,
        }
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeSet::Revision(rev) => write!(f, "r{rev}"),
            ChangeSet::Txn(txn) => write!(f, "t{txn}"),
        }
    }
}

impl FromStr for ChangeSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.as_bytes().first() {
            Some(b'r') => {
                let rev = s[1..]
                    .parse::<Revnum>()
                    .map_err(|_| Error::Corrupt(format!("invalid revision in '{s}'")))?;
                Ok(ChangeSet::Revision(rev))
            }
            Some(b't') => Ok(ChangeSet::Txn(TxnId::from_base36(&s[1..])?)),
            _ => Err(Error::Corrupt(format!("invalid change-set token '{s}'"))),
        }
    }
}

/// One component of a node-revision id: a number scoped to a change-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdPart {
    /// Namespace in which `number` was allocated.
    pub change_set: ChangeSet,
    /// The allocated number.
    pub number: u64,
}

impl IdPart {
    /// Build an id part.
    pub fn new(change_set: ChangeSet, number: u64) -> Self {
        IdPart { change_set, number }
    }
}

impl fmt::Display for IdPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", base36::encode(self.number), self.change_set)
    }
}

impl FromStr for IdPart {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (num, cs) = s
            .split_once('-')
            .ok_or_else(|| Error::Corrupt(format!("invalid id part '{s}'")))?;
        Ok(IdPart {
            number: base36::parse(num)?,
            change_set: cs.parse()?,
        })
    }
}

/// Identity of one node-revision.
///
/// `node_id` names the logical node across revisions, `copy_id` tracks
/// branch lineage, `noderev_id` is the per-revision handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRevId {
    /// Logical node identity, stable across revisions.
    pub node_id: IdPart,
    /// Copy (branch lineage) identity.
    pub copy_id: IdPart,
    /// Per-revision handle; its number is the item index of the node-rev.
    pub noderev_id: IdPart,
}

impl NodeRevId {
    /// Build an id from its three parts.
    pub fn new(node_id: IdPart, copy_id: IdPart, noderev_id: IdPart) -> Self {
        NodeRevId {
            node_id,
            copy_id,
            noderev_id,
        }
    }

    /// Whether this id lives inside an uncommitted transaction.
    pub fn is_txn(&self) -> bool {
        self.noderev_id.change_set.is_txn()
    }
}

impl fmt::Display for NodeRevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.node_id, self.copy_id, self.noderev_id)
    }
}

impl FromStr for NodeRevId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('.');
        let id = NodeRevId {
            node_id: next_part(&mut parts, s)?,
            copy_id: next_part(&mut parts, s)?,
            noderev_id: next_part(&mut parts, s)?,
        };
        if parts.next().is_some() {
            return Err(Error::Corrupt(format!("trailing id parts in '{s}'")));
        }
        Ok(id)
    }
}

fn next_part<'a>(parts: &mut impl Iterator<Item = &'a str>, whole: &str) -> Result<IdPart> {
    parts
        .next()
        .ok_or_else(|| Error::Corrupt(format!("truncated node-rev id '{whole}'")))?
        .parse()
}

/// Node kinds stored in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::File => write!(f, "file"),
            NodeKind::Dir => write!(f, "dir"),
        }
    }
}

impl FromStr for NodeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(NodeKind::File),
            "dir" => Ok(NodeKind::Dir),
            other => Err(Error::Corrupt(format!("unknown node kind '{other}'"))),
        }
    }
}
