//! Change records
//!
//! Every mutation a transaction makes is logged as a change record. The
//! transaction's `changes` file is an append-only stream of two-line
//! records:
//!
//! ```text
//! 2-t3.0-r0.5-t3 add true false file /iota
//! <copyfrom-rev> <copyfrom-path> | empty line
//! ```
//!
//! `-` stands in for the absent node-rev id of a `reset`. At commit the
//! folded records are written as a single hash-style block keyed by path;
//! the value is the same record without the path.

use crate::hashfile;
use revfs_core::{Error, NodeKind, NodeRevId, Result, Revnum};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufRead, Write};
use std::str::FromStr;

/// What happened to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Path added.
    Add,
    /// Path deleted.
    Delete,
    /// Path deleted and re-added in one revision.
    Replace,
    /// Content or properties modified.
    Modify,
    /// Earlier records for this path are void.
    Reset,
    /// Path added by moving another path here.
    Move,
    /// Path replaced by moving another path here.
    MoveReplace,
}

impl ChangeKind {
    /// Whether this change removes the previous node at the path.
    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            ChangeKind::Delete | ChangeKind::Replace | ChangeKind::MoveReplace
        )
    }

    /// Whether this change brings a moved subtree to the path.
    pub fn is_move(&self) -> bool {
        matches!(self, ChangeKind::Move | ChangeKind::MoveReplace)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            ChangeKind::Add => "add",
            ChangeKind::Delete => "delete",
            ChangeKind::Replace => "replace",
            ChangeKind::Modify => "modify",
            ChangeKind::Reset => "reset",
            ChangeKind::Move => "move",
            ChangeKind::MoveReplace => "movereplace",
        };
        write!(f, "{token}")
    }
}

impl FromStr for ChangeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(ChangeKind::Add),
            "delete" => Ok(ChangeKind::Delete),
            "replace" => Ok(ChangeKind::Replace),
            "modify" => Ok(ChangeKind::Modify),
            "reset" => Ok(ChangeKind::Reset),
            "move" => Ok(ChangeKind::Move),
            "movereplace" => Ok(ChangeKind::MoveReplace),
            other => Err(Error::Corrupt(format!("unknown change kind '{other}'"))),
        }
    }
}

/// One logged mutation of one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Affected path, always absolute.
    pub path: String,
    /// What happened.
    pub kind: ChangeKind,
    /// Resulting node-revision; absent for `reset` and plain deletes.
    pub node_rev_id: Option<NodeRevId>,
    /// Whether content changed.
    pub text_mod: bool,
    /// Whether properties changed.
    pub prop_mod: bool,
    /// Kind of the affected node.
    pub node_kind: NodeKind,
    /// Copy source for copies and moves.
    pub copyfrom: Option<(Revnum, String)>,
}

impl ChangeRecord {
    fn head_line(&self) -> String {
        let id = match &self.node_rev_id {
            Some(id) => id.to_string(),
            None => "-".to_string(),
        };
        format!(
            "{id} {} {} {} {} {}",
            self.kind, self.text_mod, self.prop_mod, self.node_kind, self.path
        )
    }

    fn copyfrom_line(&self) -> String {
        match &self.copyfrom {
            Some((rev, path)) => format!("{rev} {path}"),
            None => String::new(),
        }
    }

    fn parse_head(line: &str) -> Result<(Option<NodeRevId>, ChangeKind, bool, bool, NodeKind, String)> {
        let mut fields = line.splitn(6, ' ');
        let mut take = || {
            fields
                .next()
                .ok_or_else(|| Error::Corrupt(format!("truncated change record '{line}'")))
        };
        let id = match take()? {
            "-" => None,
            text => Some(NodeRevId::from_str(text)?),
        };
        let kind: ChangeKind = take()?.parse()?;
        let text_mod = parse_bool(take()?)?;
        let prop_mod = parse_bool(take()?)?;
        let node_kind: NodeKind = take()?.parse()?;
        let path = take()?.to_string();
        Ok((id, kind, text_mod, prop_mod, node_kind, path))
    }

    /// Append this record to a changes log.
    pub fn write_log<W: Write>(&self, w: &mut W) -> Result<()> {
        writeln!(w, "{}", self.head_line())?;
        writeln!(w, "{}", self.copyfrom_line())?;
        Ok(())
    }

    /// Read every record of a changes log.
    pub fn read_log<R: BufRead>(r: &mut R) -> Result<Vec<ChangeRecord>> {
        let mut records = Vec::new();
        loop {
            let mut head = String::new();
            if r.read_line(&mut head)? == 0 {
                return Ok(records);
            }
            let mut copyfrom = String::new();
            if r.read_line(&mut copyfrom)? == 0 {
                return Err(Error::Corrupt("changes log truncated mid-record".into()));
            }
            let (node_rev_id, kind, text_mod, prop_mod, node_kind, path) =
                Self::parse_head(head.trim_end_matches('\n'))?;
            records.push(ChangeRecord {
                path,
                kind,
                node_rev_id,
                text_mod,
                prop_mod,
                node_kind,
                copyfrom: parse_copyfrom(copyfrom.trim_end_matches('\n'))?,
            });
        }
    }

    /// Serialize folded records as the committed changed-paths block.
    pub fn write_block<W: Write>(w: &mut W, records: &BTreeMap<String, ChangeRecord>) -> Result<()> {
        let mut map = BTreeMap::new();
        for (path, record) in records {
            let mut value = record.head_line();
            // strip the trailing " <path>" suffix; the hash key carries it
            value.truncate(value.len() - path.len() - 1);
            if record.copyfrom.is_some() {
                value.push('\n');
                value.push_str(&record.copyfrom_line());
            }
            map.insert(path.clone(), value.into_bytes());
        }
        hashfile::write_hash(w, &map)
    }

    /// Parse the committed changed-paths block.
    pub fn read_block<R: BufRead>(r: &mut R) -> Result<BTreeMap<String, ChangeRecord>> {
        let mut records = BTreeMap::new();
        for (path, value) in hashfile::read_hash(r)? {
            let value = String::from_utf8(value)
                .map_err(|_| Error::Corrupt("non-UTF-8 changed-paths value".into()))?;
            let (head, copyfrom) = match value.split_once('\n') {
                Some((head, copyfrom)) => (head.to_string(), parse_copyfrom(copyfrom)?),
                None => (value, None),
            };
            let (node_rev_id, kind, text_mod, prop_mod, node_kind, _) =
                Self::parse_head(&format!("{head} {path}"))?;
            records.insert(
                path.clone(),
                ChangeRecord {
                    path,
                    kind,
                    node_rev_id,
                    text_mod,
                    prop_mod,
                    node_kind,
                    copyfrom,
                },
            );
        }
        Ok(records)
    }
}

fn parse_bool(token: &str) -> Result<bool> {
    match token {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::Corrupt(format!("malformed boolean '{other}'"))),
    }
}

fn parse_copyfrom(line: &str) -> Result<Option<(Revnum, String)>> {
    if line.is_empty() {
        return Ok(None);
    }
    let (rev, path) = line
        .split_once(' ')
        .ok_or_else(|| Error::Corrupt(format!("malformed copyfrom '{line}'")))?;
    let rev = rev
        .parse::<Revnum>()
        .map_err(|_| Error::Corrupt(format!("malformed copyfrom revision '{line}'")))?;
    Ok(Some((rev, path.to_string())))
}
