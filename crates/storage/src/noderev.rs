//! Node-revisions and representation descriptors
//!
//! A node-revision is stored as a keyed text record terminated by a blank
//! line:
//!
//! ```text
//! id: 0-r1.0-r0.2-r1
//! type: dir
//! pred: 0-r0.0-r0.2-r0
//! count: 1
//! text: r1 3 45 12 5f3e... 9a1b...
//! cpath: /
//! copyroot: 0 /
//!
//! ```
//!
//! The `text` / `props` values are representation descriptors:
//! `<change-set> <item> <size> <expanded> <md5>[ <sha1>]`. A descriptor whose
//! change-set is a transaction is mutable; one whose change-set is a revision
//! is immutable.

use revfs_core::{
    ChangeSet, Error, Md5Digest, NodeKind, NodeRevId, Result, Revnum, Sha1Digest,
};
use std::fmt::Write as _;
use std::str::FromStr;

/// A stored byte sequence (possibly delta-encoded) referenced by a
/// node-revision for its content or properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representation {
    /// Namespace the representation was written in.
    pub change_set: ChangeSet,
    /// Item index within the change-set.
    pub item_index: u64,
    /// On-disk (delta) size in bytes.
    pub size: u64,
    /// Fully expanded size in bytes.
    pub expanded_size: u64,
    /// MD5 of the expanded content.
    pub md5: Md5Digest,
    /// SHA-1 of the expanded content; dropped for directory and property
    /// representations, kept for file contents (rep sharing key).
    pub sha1: Option<Sha1Digest>,
}

impl Representation {
    /// Whether this representation may still be appended to.
    pub fn is_mutable(&self) -> bool {
        self.change_set.is_txn()
    }

    /// Serialize to the single-line field value form.
    pub fn to_field(&self) -> String {
        let mut out = format!(
            "{} {} {} {} {}",
            self.change_set, self.item_index, self.size, self.expanded_size, self.md5
        );
        if let Some(sha1) = &self.sha1 {
            let _ = write!(out, " {sha1}");
        }
        out
    }

    /// Parse the single-line field value form.
    pub fn parse_field(text: &str) -> Result<Self> {
        let mut fields = text.split(' ');
        let change_set: ChangeSet = take(&mut fields, text)?.parse()?;
        let item_index = parse_u64(take(&mut fields, text)?, text)?;
        let size = parse_u64(take(&mut fields, text)?, text)?;
        let expanded_size = parse_u64(take(&mut fields, text)?, text)?;
        let md5 = Md5Digest::parse_hex(take(&mut fields, text)?)?;
        let sha1 = match fields.next() {
            Some(hex) => Some(Sha1Digest::parse_hex(hex)?),
            None => None,
        };
        if fields.next().is_some() {
            return Err(Error::Corrupt(format!(
                "trailing fields in representation '{text}'"
            )));
        }
        Ok(Representation {
            change_set,
            item_index,
            size,
            expanded_size,
            md5,
            sha1,
        })
    }
}

fn take<'a>(fields: &mut impl Iterator<Item = &'a str>, whole: &str) -> Result<&'a str> {
    fields
        .next()
        .ok_or_else(|| Error::Corrupt(format!("truncated representation '{whole}'")))
}

fn parse_u64(field: &str, whole: &str) -> Result<u64> {
    field
        .parse::<u64>()
        .map_err(|_| Error::Corrupt(format!("malformed number in representation '{whole}'")))
}

/// One version of one node in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRevision {
    /// Identity triple.
    pub id: NodeRevId,
    /// File or directory.
    pub kind: NodeKind,
    /// The node-revision this one was derived from.
    pub predecessor: Option<NodeRevId>,
    /// Number of predecessors along the `predecessor` chain.
    pub predecessor_count: u64,
    /// Content representation; `None` means empty (fresh file / empty dir).
    pub data_rep: Option<Representation>,
    /// Property representation.
    pub prop_rep: Option<Representation>,
    /// Copy source, set on copy/move destinations.
    pub copyfrom: Option<(Revnum, String)>,
    /// Root of the copy this node belongs to.
    pub copyroot: (Revnum, String),
    /// Path at which this node-revision was created.
    pub created_path: String,
    /// Whether this is the unmodified root of a fresh transaction.
    pub is_fresh_txn_root: bool,
    /// Whether mergeinfo is recorded on this node itself.
    pub mergeinfo_here: bool,
    /// Number of nodes with mergeinfo in this subtree.
    pub mergeinfo_count: u64,
}

impl NodeRevision {
    /// Serialize to the keyed text record, including the terminating blank
    /// line.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "id: {}", self.id);
        let _ = writeln!(out, "type: {}", self.kind);
        if let Some(pred) = &self.predecessor {
            let _ = writeln!(out, "pred: {pred}");
        }
        let _ = writeln!(out, "count: {}", self.predecessor_count);
        if let Some(rep) = &self.data_rep {
            let _ = writeln!(out, "text: {}", rep.to_field());
        }
        if let Some(rep) = &self.prop_rep {
            let _ = writeln!(out, "props: {}", rep.to_field());
        }
        let _ = writeln!(out, "cpath: {}", self.created_path);
        let _ = writeln!(out, "copyroot: {} {}", self.copyroot.0, self.copyroot.1);
        if let Some((rev, path)) = &self.copyfrom {
            let _ = writeln!(out, "copyfrom: {rev} {path}");
        }
        if self.is_fresh_txn_root {
            let _ = writeln!(out, "is-fresh-txn-root: y");
        }
        if self.mergeinfo_here {
            let _ = writeln!(out, "minfo-here: y");
        }
        if self.mergeinfo_count > 0 {
            let _ = writeln!(out, "minfo-cnt: {}", self.mergeinfo_count);
        }
        out.push('\n');
        out
    }

    /// Parse the keyed text record. Stops at the first blank line or EOF.
    pub fn parse(text: &str) -> Result<Self> {
        let mut id = None;
        let mut kind = None;
        let mut predecessor = None;
        let mut predecessor_count = 0;
        let mut data_rep = None;
        let mut prop_rep = None;
        let mut copyfrom = None;
        let mut copyroot = None;
        let mut created_path = None;
        let mut is_fresh_txn_root = false;
        let mut mergeinfo_here = false;
        let mut mergeinfo_count = 0;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }
            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| Error::Corrupt(format!("malformed node-rev line '{line}'")))?;
            match key {
                "id" => id = Some(NodeRevId::from_str(value)?),
                "type" => kind = Some(value.parse::<NodeKind>()?),
                "pred" => predecessor = Some(NodeRevId::from_str(value)?),
                "count" => {
                    predecessor_count = value.parse::<u64>().map_err(|_| {
                        Error::Corrupt(format!("malformed predecessor count '{value}'"))
                    })?
                }
                "text" => data_rep = Some(Representation::parse_field(value)?),
                "props" => prop_rep = Some(Representation::parse_field(value)?),
                "cpath" => created_path = Some(value.to_string()),
                "copyroot" => copyroot = Some(parse_rev_path(value)?),
                "copyfrom" => copyfrom = Some(parse_rev_path(value)?),
                "is-fresh-txn-root" => is_fresh_txn_root = value == "y",
                "minfo-here" => mergeinfo_here = value == "y",
                "minfo-cnt" => {
                    mergeinfo_count = value.parse::<u64>().map_err(|_| {
                        Error::Corrupt(format!("malformed mergeinfo count '{value}'"))
                    })?
                }
                other => {
                    return Err(Error::Corrupt(format!("unknown node-rev key '{other}'")))
                }
            }
        }

        Ok(NodeRevision {
            id: id.ok_or_else(|| missing("id"))?,
            kind: kind.ok_or_else(|| missing("type"))?,
            predecessor,
            predecessor_count,
            data_rep,
            prop_rep,
            copyfrom,
            copyroot: copyroot.ok_or_else(|| missing("copyroot"))?,
            created_path: created_path.ok_or_else(|| missing("cpath"))?,
            is_fresh_txn_root,
            mergeinfo_here,
            mergeinfo_count,
        })
    }
}

fn missing(key: &str) -> Error {
    Error::Corrupt(format!("node-rev missing required key '{key}'"))
}

fn parse_rev_path(value: &str) -> Result<(Revnum, String)> {
    let (rev, path) = value
        .split_once(' ')
        .ok_or_else(|| Error::Corrupt(format!("malformed rev/path pair '{value}'")))?;
    let rev = rev
        .parse::<Revnum>()
        .map_err(|_| Error::Corrupt(format!("malformed revision in '{value}'")))?;
    Ok((rev, path.to_string()))
}
