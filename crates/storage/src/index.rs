//! Revision item indexes
//!
//! While a transaction accumulates its proto-rev file it also appends to two
//! flat proto-index streams. At commit these are folded into the final
//! per-revision index files:
//!
//! - `.l2p` (logical to physical): item index → byte offset
//! - `.p2l` (physical to logical): byte offset → (size, kind, item index)
//!
//! # File Layout
//!
//! ```text
//! proto l2p record:  item (8) | offset (8)
//! proto p2l record:  offset (8) | size (8) | kind (1) | item (8)
//!
//! final .l2p:  "L2P1" | count (8) | count * (item (8) | offset (8)) | crc32 (4)
//! final .p2l:  "P2L1" | count (8) | count * proto-p2l record | crc32 (4)
//! ```
//!
//! Final entries are sorted (by item and by offset respectively); both files
//! end with a CRC-32 of every preceding byte. All integers are big-endian.

use crate::format::write_file_atomic;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use revfs_core::{Error, Result};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

/// Magic opening a final logical-to-physical index.
pub const L2P_MAGIC: [u8; 4] = *b"L2P1";
/// Magic opening a final physical-to-logical index.
pub const P2L_MAGIC: [u8; 4] = *b"P2L1";

/// What an on-disk item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// File content representation.
    FileRep,
    /// Directory content representation.
    DirRep,
    /// File property representation.
    FileProps,
    /// Directory property representation.
    DirProps,
    /// Serialized node-revision.
    NodeRev,
    /// The changed-paths block.
    Changes,
}

impl ItemKind {
    fn to_u8(self) -> u8 {
        match self {
            ItemKind::FileRep => 1,
            ItemKind::DirRep => 2,
            ItemKind::FileProps => 3,
            ItemKind::DirProps => 4,
            ItemKind::NodeRev => 5,
            ItemKind::Changes => 6,
        }
    }

    fn from_u8(code: u8) -> Result<Self> {
        match code {
            1 => Ok(ItemKind::FileRep),
            2 => Ok(ItemKind::DirRep),
            3 => Ok(ItemKind::FileProps),
            4 => Ok(ItemKind::DirProps),
            5 => Ok(ItemKind::NodeRev),
            6 => Ok(ItemKind::Changes),
            other => Err(Error::Corrupt(format!("unknown item kind {other}"))),
        }
    }
}

/// One physical-to-logical entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct P2lEntry {
    /// Byte offset within the revision file.
    pub offset: u64,
    /// Item size in bytes.
    pub size: u64,
    /// What the item is.
    pub kind: ItemKind,
    /// Item index within the revision.
    pub item_index: u64,
}

/// Append one record to a proto logical-to-physical stream.
pub fn append_proto_l2p<W: Write>(w: &mut W, item_index: u64, offset: u64) -> Result<()> {
    w.write_u64::<BigEndian>(item_index)?;
    w.write_u64::<BigEndian>(offset)?;
    Ok(())
}

/// Append one record to a proto physical-to-logical stream.
pub fn append_proto_p2l<W: Write>(w: &mut W, entry: &P2lEntry) -> Result<()> {
    w.write_u64::<BigEndian>(entry.offset)?;
    w.write_u64::<BigEndian>(entry.size)?;
    w.write_u8(entry.kind.to_u8())?;
    w.write_u64::<BigEndian>(entry.item_index)?;
    Ok(())
}

/// Read every `(item, offset)` record of a proto l2p stream file.
pub fn read_proto_l2p_file(path: &Path) -> Result<Vec<(u64, u64)>> {
    read_proto_l2p(&fs::read(path)?)
}

/// Read every record of a proto p2l stream file.
pub fn read_proto_p2l_file(path: &Path) -> Result<Vec<P2lEntry>> {
    read_proto_p2l(&fs::read(path)?)
}

fn read_proto_l2p(data: &[u8]) -> Result<Vec<(u64, u64)>> {
    if data.len() % 16 != 0 {
        return Err(Error::Corrupt("truncated proto l2p stream".into()));
    }
    let mut r = Cursor::new(data);
    let mut out = Vec::with_capacity(data.len() / 16);
    while (r.position() as usize) < data.len() {
        let item = r.read_u64::<BigEndian>()?;
        let offset = r.read_u64::<BigEndian>()?;
        out.push((item, offset));
    }
    Ok(out)
}

fn read_proto_p2l(data: &[u8]) -> Result<Vec<P2lEntry>> {
    if data.len() % 25 != 0 {
        return Err(Error::Corrupt("truncated proto p2l stream".into()));
    }
    let mut r = Cursor::new(data);
    let mut out = Vec::with_capacity(data.len() / 25);
    while (r.position() as usize) < data.len() {
        out.push(P2lEntry {
            offset: r.read_u64::<BigEndian>()?,
            size: r.read_u64::<BigEndian>()?,
            kind: ItemKind::from_u8(r.read_u8()?)?,
            item_index: r.read_u64::<BigEndian>()?,
        });
    }
    Ok(out)
}

/// Fold the proto-index streams of a transaction into the final index files
/// for its new revision.
pub fn build_final_indexes(
    proto_l2p: &Path,
    proto_p2l: &Path,
    l2p_out: &Path,
    p2l_out: &Path,
) -> Result<()> {
    let mut l2p = read_proto_l2p(&fs::read(proto_l2p)?)?;
    l2p.sort_by_key(|(item, _)| *item);
    let mut buf = Vec::with_capacity(16 + l2p.len() * 16);
    buf.extend_from_slice(&L2P_MAGIC);
    buf.write_u64::<BigEndian>(l2p.len() as u64)?;
    for (item, offset) in &l2p {
        buf.write_u64::<BigEndian>(*item)?;
        buf.write_u64::<BigEndian>(*offset)?;
    }
    append_crc(&mut buf);
    write_file_atomic(l2p_out, &buf)?;

    let mut p2l = read_proto_p2l(&fs::read(proto_p2l)?)?;
    p2l.sort_by_key(|e| e.offset);
    let mut buf = Vec::with_capacity(16 + p2l.len() * 25);
    buf.extend_from_slice(&P2L_MAGIC);
    buf.write_u64::<BigEndian>(p2l.len() as u64)?;
    for entry in &p2l {
        append_proto_p2l(&mut buf, entry)?;
    }
    append_crc(&mut buf);
    write_file_atomic(p2l_out, &buf)?;
    Ok(())
}

fn append_crc(buf: &mut Vec<u8>) {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(buf);
    let crc = hasher.finalize();
    buf.write_u32::<BigEndian>(crc).expect("vec sink");
}

fn checked_body<'a>(data: &'a [u8], magic: &[u8; 4], path: &Path) -> Result<&'a [u8]> {
    if data.len() < 16 || &data[0..4] != magic {
        return Err(Error::Corrupt(format!(
            "bad index file header in {}",
            path.display()
        )));
    }
    let body = &data[..data.len() - 4];
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    let actual = hasher.finalize();
    let stored = Cursor::new(&data[data.len() - 4..]).read_u32::<BigEndian>()?;
    if actual != stored {
        return Err(Error::ChecksumMismatch {
            expected: format!("{stored:08x}"),
            actual: format!("{actual:08x}"),
        });
    }
    Ok(&body[4..])
}

/// Look up the physical offset of `item_index` in a final `.l2p` file.
pub fn lookup_offset(l2p_path: &Path, item_index: u64) -> Result<Option<u64>> {
    let data = fs::read(l2p_path)?;
    let body = checked_body(&data, &L2P_MAGIC, l2p_path)?;
    let mut r = Cursor::new(body);
    let count = r.read_u64::<BigEndian>()?;
    // entries are sorted; a linear scan is fine at commit-path sizes
    for _ in 0..count {
        let item = r.read_u64::<BigEndian>()?;
        let offset = r.read_u64::<BigEndian>()?;
        if item == item_index {
            return Ok(Some(offset));
        }
    }
    Ok(None)
}

/// Load every entry of a final `.p2l` file, sorted by offset.
pub fn load_p2l(p2l_path: &Path) -> Result<Vec<P2lEntry>> {
    let data = fs::read(p2l_path)?;
    let body = checked_body(&data, &P2L_MAGIC, p2l_path)?;
    let mut r = Cursor::new(body);
    let count = r.read_u64::<BigEndian>()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(P2lEntry {
            offset: r.read_u64::<BigEndian>()?,
            size: r.read_u64::<BigEndian>()?,
            kind: ItemKind::from_u8(r.read_u8()?)?,
            item_index: r.read_u64::<BigEndian>()?,
        });
    }
    Ok(out)
}

/// Find the item at `item_index`: offset, size and kind.
pub fn lookup_item(l2p_path: &Path, p2l_path: &Path, item_index: u64) -> Result<Option<P2lEntry>> {
    let offset = match lookup_offset(l2p_path, item_index)? {
        Some(offset) => offset,
        None => return Ok(None),
    };
    let entries = load_p2l(p2l_path)?;
    Ok(entries.into_iter().find(|e| e.offset == offset))
}

/// Read a file region described by a [`P2lEntry`].
pub fn read_item(rev_file: &Path, entry: &P2lEntry) -> Result<Vec<u8>> {
    use std::io::Seek;
    let mut f = fs::File::open(rev_file)?;
    f.seek(std::io::SeekFrom::Start(entry.offset))?;
    let mut buf = vec![0u8; entry.size as usize];
    f.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(offset: u64, size: u64, kind: ItemKind, item: u64) -> P2lEntry {
        P2lEntry {
            offset,
            size,
            kind,
            item_index: item,
        }
    }

    #[test]
    fn test_build_and_lookup() {
        let dir = tempdir().unwrap();
        let proto_l2p = dir.path().join("index.l2p");
        let proto_p2l = dir.path().join("index.p2l");
        let l2p = dir.path().join("5.l2p");
        let p2l = dir.path().join("5.p2l");

        let mut l2p_buf = Vec::new();
        let mut p2l_buf = Vec::new();
        // appended out of item order, as a real commit does
        append_proto_l2p(&mut l2p_buf, 3, 0).unwrap();
        append_proto_l2p(&mut l2p_buf, 2, 120).unwrap();
        append_proto_l2p(&mut l2p_buf, 1, 90).unwrap();
        append_proto_p2l(&mut p2l_buf, &entry(0, 90, ItemKind::FileRep, 3)).unwrap();
        append_proto_p2l(&mut p2l_buf, &entry(120, 40, ItemKind::NodeRev, 2)).unwrap();
        append_proto_p2l(&mut p2l_buf, &entry(90, 30, ItemKind::Changes, 1)).unwrap();
        fs::write(&proto_l2p, &l2p_buf).unwrap();
        fs::write(&proto_p2l, &p2l_buf).unwrap();

        build_final_indexes(&proto_l2p, &proto_p2l, &l2p, &p2l).unwrap();

        assert_eq!(lookup_offset(&l2p, 3).unwrap(), Some(0));
        assert_eq!(lookup_offset(&l2p, 2).unwrap(), Some(120));
        assert_eq!(lookup_offset(&l2p, 99).unwrap(), None);

        let entries = load_p2l(&p2l).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.windows(2).all(|w| w[0].offset < w[1].offset));

        let found = lookup_item(&l2p, &p2l, 2).unwrap().unwrap();
        assert_eq!(found, entry(120, 40, ItemKind::NodeRev, 2));
    }

    #[test]
    fn test_empty_streams_build_empty_indexes() {
        let dir = tempdir().unwrap();
        let proto_l2p = dir.path().join("index.l2p");
        let proto_p2l = dir.path().join("index.p2l");
        fs::write(&proto_l2p, b"").unwrap();
        fs::write(&proto_p2l, b"").unwrap();
        let l2p = dir.path().join("0.l2p");
        let p2l = dir.path().join("0.p2l");

        build_final_indexes(&proto_l2p, &proto_p2l, &l2p, &p2l).unwrap();
        assert_eq!(lookup_offset(&l2p, 1).unwrap(), None);
        assert!(load_p2l(&p2l).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_footer_detected() {
        let dir = tempdir().unwrap();
        let proto_l2p = dir.path().join("index.l2p");
        let proto_p2l = dir.path().join("index.p2l");
        fs::write(&proto_l2p, b"").unwrap();
        fs::write(&proto_p2l, b"").unwrap();
        let l2p = dir.path().join("0.l2p");
        let p2l = dir.path().join("0.p2l");
        build_final_indexes(&proto_l2p, &proto_p2l, &l2p, &p2l).unwrap();

        let mut data = fs::read(&l2p).unwrap();
        let len = data.len();
        data[len - 10] ^= 0x01;
        fs::write(&l2p, &data).unwrap();
        assert!(matches!(
            lookup_offset(&l2p, 1),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_proto_stream_is_corrupt() {
        let dir = tempdir().unwrap();
        let proto_l2p = dir.path().join("index.l2p");
        let proto_p2l = dir.path().join("index.p2l");
        fs::write(&proto_l2p, [0u8; 15]).unwrap();
        fs::write(&proto_p2l, b"").unwrap();
        let result = build_final_indexes(
            &proto_l2p,
            &proto_p2l,
            &dir.path().join("0.l2p"),
            &dir.path().join("0.p2l"),
        );
        assert!(matches!(result, Err(Error::Corrupt(_))));
    }
}
