//! Length-prefixed key/value dump format
//!
//! Revision properties, transaction properties, directory entries at rest,
//! the changed-paths block and the rep-cache file all share one dump format:
//!
//! ```text
//! K 4
//! name
//! V 11
//! hello world
//! END
//! ```
//!
//! Keys are UTF-8, values are raw bytes. The incremental variant adds `D`
//! records for deletions; a directory delta log is a concatenation of
//! incremental dumps whose `END` markers act as separators.

use revfs_core::{Error, Result};
use std::collections::BTreeMap;
use std::io::{BufRead, Write};

/// One operation of an incremental dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashOp {
    /// Set `key` to `value`.
    Set(String, Vec<u8>),
    /// Remove `key`.
    Delete(String),
}

/// Write a complete dump: all pairs in key order, then `END`.
pub fn write_hash<W: Write>(w: &mut W, map: &BTreeMap<String, Vec<u8>>) -> Result<()> {
    for (key, value) in map {
        write_pair(w, key, value)?;
    }
    w.write_all(b"END\n")?;
    Ok(())
}

/// Append one incremental operation. No terminator is written; callers add
/// `END` when they finish a batch.
pub fn write_op<W: Write>(w: &mut W, op: &HashOp) -> Result<()> {
    match op {
        HashOp::Set(key, value) => write_pair(w, key, value),
        HashOp::Delete(key) => {
            writeln!(w, "D {}", key.len())?;
            w.write_all(key.as_bytes())?;
            w.write_all(b"\n")?;
            Ok(())
        }
    }
}

fn write_pair<W: Write>(w: &mut W, key: &str, value: &[u8]) -> Result<()> {
    writeln!(w, "K {}", key.len())?;
    w.write_all(key.as_bytes())?;
    writeln!(w, "\nV {}", value.len())?;
    w.write_all(value)?;
    w.write_all(b"\n")?;
    Ok(())
}

/// Read one complete dump, consuming up to and including its `END` line.
///
/// An immediate EOF yields an empty map; a truncated record is corruption.
pub fn read_hash<R: BufRead>(r: &mut R) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut map = BTreeMap::new();
    loop {
        match read_record(r)? {
            None => return Ok(map),
            Some(HashOp::Set(k, v)) => {
                map.insert(k, v);
            }
            Some(HashOp::Delete(k)) => {
                return Err(Error::Corrupt(format!(
                    "unexpected deletion of '{k}' in non-incremental dump"
                )))
            }
        }
    }
}

/// Read a concatenation of incremental dumps until EOF, replaying every
/// operation in order. `END` lines are treated as batch separators.
pub fn replay_ops<R: BufRead>(r: &mut R) -> Result<BTreeMap<String, Vec<u8>>> {
    let mut map = BTreeMap::new();
    loop {
        let mut line = String::new();
        if r.read_line(&mut line)? == 0 {
            return Ok(map);
        }
        match parse_header(line.trim_end_matches('\n'))? {
            Header::End => continue,
            Header::Key(len) => {
                let key = read_exact_text(r, len)?;
                let value = read_value(r)?;
                map.insert(key, value);
            }
            Header::Delete(len) => {
                let key = read_exact_text(r, len)?;
                map.remove(&key);
            }
        }
    }
}

enum Header {
    Key(usize),
    Delete(usize),
    End,
}

/// Read one record: `Some(op)` or `None` at `END` / EOF.
fn read_record<R: BufRead>(r: &mut R) -> Result<Option<HashOp>> {
    let mut line = String::new();
    if r.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    match parse_header(line.trim_end_matches('\n'))? {
        Header::End => Ok(None),
        Header::Key(len) => {
            let key = read_exact_text(r, len)?;
            let value = read_value(r)?;
            Ok(Some(HashOp::Set(key, value)))
        }
        Header::Delete(len) => Ok(Some(HashOp::Delete(read_exact_text(r, len)?))),
    }
}

fn parse_header(line: &str) -> Result<Header> {
    if line == "END" {
        return Ok(Header::End);
    }
    let (tag, len) = line
        .split_once(' ')
        .ok_or_else(|| Error::Corrupt(format!("malformed dump header '{line}'")))?;
    let len = len
        .parse::<usize>()
        .map_err(|_| Error::Corrupt(format!("malformed dump length '{line}'")))?;
    match tag {
        "K" => Ok(Header::Key(len)),
        "D" => Ok(Header::Delete(len)),
        other => Err(Error::Corrupt(format!("unknown dump tag '{other}'"))),
    }
}

fn read_value<R: BufRead>(r: &mut R) -> Result<Vec<u8>> {
    let mut line = String::new();
    if r.read_line(&mut line)? == 0 {
        return Err(Error::Corrupt("dump truncated before value header".into()));
    }
    let stripped = line.trim_end_matches('\n');
    let len = stripped
        .strip_prefix("V ")
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| Error::Corrupt(format!("expected value header, found '{stripped}'")))?;
    read_exact_bytes(r, len)
}

fn read_exact_text<R: BufRead>(r: &mut R, len: usize) -> Result<String> {
    let bytes = read_exact_bytes(r, len)?;
    String::from_utf8(bytes).map_err(|_| Error::Corrupt("non-UTF-8 dump key".into()))
}

fn read_exact_bytes<R: BufRead>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    std::io::Read::read_exact(r, &mut buf)?;
    // consume the newline that terminates the datum
    let mut nl = [0u8; 1];
    std::io::Read::read_exact(r, &mut nl)?;
    if nl[0] != b'\n' {
        return Err(Error::Corrupt("dump datum not newline-terminated".into()));
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn map(pairs: &[(&str, &[u8])]) -> BTreeMap<String, Vec<u8>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    #[test]
    fn test_dump_layout_is_exact() {
        let mut out = Vec::new();
        write_hash(&mut out, &map(&[("name", b"hello world")])).unwrap();
        assert_eq!(out, b"K 4\nname\nV 11\nhello world\nEND\n");
    }

    #[test]
    fn test_round_trip_empty_and_binary_values() {
        let original = map(&[("a", b""), ("b", &[0u8, 1, 2, b'\n', 255])]);
        let mut out = Vec::new();
        write_hash(&mut out, &original).unwrap();
        let parsed = read_hash(&mut Cursor::new(&out)).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_empty_input_is_empty_map() {
        assert!(read_hash(&mut Cursor::new(b"")).unwrap().is_empty());
        assert!(read_hash(&mut Cursor::new(b"END\n")).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_dump_is_corrupt() {
        let truncated = b"K 4\nname\nV 11\nhello";
        assert!(read_hash(&mut Cursor::new(&truncated[..])).is_err());
    }

    #[test]
    fn test_replay_applies_sets_and_deletes_in_order() {
        let mut out = Vec::new();
        write_hash(&mut out, &map(&[("iota", b"x"), ("nu", b"y")])).unwrap();
        write_op(&mut out, &HashOp::Delete("iota".into())).unwrap();
        write_op(&mut out, &HashOp::Set("mu".into(), b"z".to_vec())).unwrap();
        out.extend_from_slice(b"END\n");

        let replayed = replay_ops(&mut Cursor::new(&out)).unwrap();
        assert_eq!(replayed, map(&[("nu", b"y"), ("mu", b"z")]));
    }

    #[test]
    fn test_delete_of_absent_key_is_noop() {
        let mut out = Vec::new();
        write_op(&mut out, &HashOp::Delete("ghost".into())).unwrap();
        let replayed = replay_ops(&mut Cursor::new(&out)).unwrap();
        assert!(replayed.is_empty());
    }
}
