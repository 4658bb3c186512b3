//! Windowed binary delta codec
//!
//! Representations are stored as a delta against a base representation (or
//! against the empty stream, the "self-delta" case). The encoding is a
//! sequence of windows over the target; window `i` may only copy from the
//! same-aligned window of the base, which keeps reconstruction memory
//! bounded.
//!
//! # Stream Layout
//!
//! ```text
//! ┌──────────────┬──────────┬──────────┬─────┐
//! │ Magic "DLT1" │ Window 0 │ Window 1 │ ... │
//! └──────────────┴──────────┴──────────┴─────┘
//!
//! Window:
//! ┌──────────────┬──────────────┬──────────────┬──────────────┬──────────┐
//! │ src_off (8)  │ src_len (4)  │ tgt_len (4)  │ ops_len (4)  │ ops      │
//! └──────────────┴──────────────┴──────────────┴──────────────┴──────────┘
//!
//! Ops (concatenated until ops_len is consumed):
//!   0x00  copy:   src_rel_off (4), len (4)
//!   0x01  insert: len (4), raw bytes
//! ```
//!
//! All integers are big-endian.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use revfs_core::{Error, Result};
use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

/// Magic bytes opening every delta stream.
pub const DELTA_MAGIC: [u8; 4] = *b"DLT1";

/// Bytes of target (and base) covered per window.
pub const WINDOW_SIZE: usize = 100 * 1024;

/// Minimum match length worth a copy op.
const MIN_MATCH: usize = 16;

const OP_COPY: u8 = 0x00;
const OP_INSERT: u8 = 0x01;

/// Streaming delta encoder.
///
/// Incoming bytes are buffered into windows; each full window is matched
/// against the same-aligned window of the base and flushed to the sink.
/// `finish` flushes the trailing partial window.
pub struct DeltaEncoder<W: Write> {
    base: Vec<u8>,
    sink: W,
    buf: Vec<u8>,
    window_index: u64,
}

impl<W: Write> DeltaEncoder<W> {
    /// Start a stream against `base`; an empty base yields a self-delta.
    /// Writes the stream magic immediately.
    pub fn new(base: Vec<u8>, mut sink: W) -> std::io::Result<Self> {
        sink.write_all(&DELTA_MAGIC)?;
        Ok(DeltaEncoder {
            base,
            sink,
            buf: Vec::with_capacity(WINDOW_SIZE),
            window_index: 0,
        })
    }

    /// Feed target bytes, flushing every completed window.
    pub fn write_all(&mut self, mut data: &[u8]) -> std::io::Result<()> {
        while !data.is_empty() {
            let room = WINDOW_SIZE - self.buf.len();
            let take = room.min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buf.len() == WINDOW_SIZE {
                self.flush_window()?;
            }
        }
        Ok(())
    }

    /// Give up without flushing; returns the sink so the caller can undo
    /// whatever was already written.
    pub fn abandon(self) -> W {
        self.sink
    }

    /// Flush the trailing window and return the sink.
    pub fn finish(mut self) -> std::io::Result<W> {
        if !self.buf.is_empty() || self.window_index == 0 {
            // an empty rep still gets one empty window so the stream is
            // self-describing
            self.flush_window()?;
        }
        Ok(self.sink)
    }

    fn flush_window(&mut self) -> std::io::Result<()> {
        let src_off = (self.window_index as usize).saturating_mul(WINDOW_SIZE);
        let src_start = src_off.min(self.base.len());
        let src_end = (src_off + WINDOW_SIZE).min(self.base.len());
        let src = &self.base[src_start..src_end];

        let ops = encode_window(src, &self.buf);

        self.sink.write_u64::<BigEndian>(src_start as u64)?;
        self.sink.write_u32::<BigEndian>(src.len() as u32)?;
        self.sink.write_u32::<BigEndian>(self.buf.len() as u32)?;
        self.sink.write_u32::<BigEndian>(ops.len() as u32)?;
        self.sink.write_all(&ops)?;

        self.buf.clear();
        self.window_index += 1;
        Ok(())
    }
}

/// Match one target window against its source window.
fn encode_window(src: &[u8], tgt: &[u8]) -> Vec<u8> {
    let mut ops = Vec::new();
    let mut index: HashMap<u64, usize> = HashMap::new();
    if src.len() >= MIN_MATCH {
        let mut off = 0;
        while off + MIN_MATCH <= src.len() {
            index.entry(BigEndian::read_u64(&src[off..off + 8])).or_insert(off);
            off += MIN_MATCH;
        }
    }

    let mut pos = 0;
    let mut lit_start = 0;
    while pos + MIN_MATCH <= tgt.len() {
        let key = BigEndian::read_u64(&tgt[pos..pos + 8]);
        let matched = index.get(&key).copied().and_then(|soff| {
            if src[soff..soff + MIN_MATCH] == tgt[pos..pos + MIN_MATCH] {
                let mut len = MIN_MATCH;
                while soff + len < src.len()
                    && pos + len < tgt.len()
                    && src[soff + len] == tgt[pos + len]
                {
                    len += 1;
                }
                Some((soff, len))
            } else {
                None
            }
        });
        match matched {
            Some((soff, len)) => {
                push_insert(&mut ops, &tgt[lit_start..pos]);
                ops.push(OP_COPY);
                ops.write_u32::<BigEndian>(soff as u32).unwrap();
                ops.write_u32::<BigEndian>(len as u32).unwrap();
                pos += len;
                lit_start = pos;
            }
            None => pos += 1,
        }
    }
    push_insert(&mut ops, &tgt[lit_start..]);
    ops
}

fn push_insert(ops: &mut Vec<u8>, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    ops.push(OP_INSERT);
    ops.write_u32::<BigEndian>(data.len() as u32).unwrap();
    ops.extend_from_slice(data);
}

/// Expand a complete delta stream against `base`.
pub fn apply(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut r = Cursor::new(delta);
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)
        .map_err(|_| corrupt("delta stream shorter than its magic"))?;
    if magic != DELTA_MAGIC {
        return Err(corrupt("bad delta stream magic"));
    }

    let mut out = Vec::new();
    while (r.position() as usize) < delta.len() {
        let src_off = read_u64(&mut r)? as usize;
        let src_len = read_u32(&mut r)? as usize;
        let tgt_len = read_u32(&mut r)? as usize;
        let ops_len = read_u32(&mut r)? as usize;

        if src_off + src_len > base.len() {
            return Err(corrupt("delta window source exceeds base"));
        }
        let src = &base[src_off..src_off + src_len];

        let ops_start = r.position() as usize;
        let ops_end = ops_start + ops_len;
        if ops_end > delta.len() {
            return Err(corrupt("delta window ops exceed stream"));
        }
        apply_window(src, &delta[ops_start..ops_end], tgt_len, &mut out)?;
        r.set_position(ops_end as u64);
    }
    Ok(out)
}

fn apply_window(src: &[u8], mut ops: &[u8], tgt_len: usize, out: &mut Vec<u8>) -> Result<()> {
    let produced_before = out.len();
    while !ops.is_empty() {
        let tag = ops[0];
        ops = &ops[1..];
        match tag {
            OP_COPY => {
                if ops.len() < 8 {
                    return Err(corrupt("truncated copy op"));
                }
                let off = BigEndian::read_u32(&ops[0..4]) as usize;
                let len = BigEndian::read_u32(&ops[4..8]) as usize;
                ops = &ops[8..];
                if off + len > src.len() {
                    return Err(corrupt("copy op exceeds source window"));
                }
                out.extend_from_slice(&src[off..off + len]);
            }
            OP_INSERT => {
                if ops.len() < 4 {
                    return Err(corrupt("truncated insert op"));
                }
                let len = BigEndian::read_u32(&ops[0..4]) as usize;
                ops = &ops[4..];
                if ops.len() < len {
                    return Err(corrupt("insert op exceeds ops region"));
                }
                out.extend_from_slice(&ops[..len]);
                ops = &ops[len..];
            }
            other => return Err(corrupt(&format!("unknown delta op tag {other:#x}"))),
        }
    }
    if out.len() - produced_before != tgt_len {
        return Err(corrupt("delta window produced wrong target length"));
    }
    Ok(())
}

fn read_u64(r: &mut Cursor<&[u8]>) -> Result<u64> {
    r.read_u64::<BigEndian>()
        .map_err(|_| corrupt("truncated delta window header"))
}

fn read_u32(r: &mut Cursor<&[u8]>) -> Result<u32> {
    r.read_u32::<BigEndian>()
        .map_err(|_| corrupt("truncated delta window header"))
}

fn corrupt(msg: &str) -> Error {
    Error::Corrupt(msg.to_string())
}

/// Encode `target` against `base` in one call.
pub fn encode(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut enc = DeltaEncoder::new(base.to_vec(), Vec::new()).expect("vec sink");
    enc.write_all(target).expect("vec sink");
    enc.finish().expect("vec sink")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_self_delta_round_trip() {
        let target = b"hello\n".repeat(10);
        let delta = encode(b"", &target);
        assert_eq!(apply(b"", &delta).unwrap(), target);
    }

    #[test]
    fn test_empty_target_has_one_empty_window() {
        let delta = encode(b"", b"");
        assert_eq!(apply(b"", &delta).unwrap(), b"");
        assert!(delta.len() > DELTA_MAGIC.len());
    }

    #[test]
    fn test_identical_content_compresses_to_copies() {
        let base: Vec<u8> = (0..40_000u32).flat_map(|i| i.to_be_bytes()).collect();
        let delta = encode(&base, &base);
        assert_eq!(apply(&base, &delta).unwrap(), base);
        // one copy op per window beats storing the content again
        assert!(delta.len() < base.len() / 100);
    }

    #[test]
    fn test_small_edit_in_large_base() {
        let base = b"abcdefgh".repeat(8_192);
        let mut target = base.clone();
        target[30_000] ^= 0xff;
        let delta = encode(&base, &target);
        assert_eq!(apply(&base, &delta).unwrap(), target);
        assert!(delta.len() < base.len() / 10);
    }

    #[test]
    fn test_multi_window_target() {
        let target: Vec<u8> = (0..(WINDOW_SIZE * 2 + 37))
            .map(|i| (i % 251) as u8)
            .collect();
        let base: Vec<u8> = target.iter().map(|b| b.wrapping_add(1)).collect();
        let delta = encode(&base, &target);
        assert_eq!(apply(&base, &delta).unwrap(), target);
    }

    #[test]
    fn test_apply_rejects_bad_magic() {
        assert!(apply(b"", b"XXXX").is_err());
        assert!(apply(b"", b"DL").is_err());
    }

    #[test]
    fn test_apply_rejects_out_of_range_copy() {
        let mut delta = Vec::new();
        delta.extend_from_slice(&DELTA_MAGIC);
        delta.extend_from_slice(&0u64.to_be_bytes()); // src_off
        delta.extend_from_slice(&4u32.to_be_bytes()); // src_len
        delta.extend_from_slice(&8u32.to_be_bytes()); // tgt_len
        delta.extend_from_slice(&9u32.to_be_bytes()); // ops_len
        delta.push(OP_COPY);
        delta.extend_from_slice(&0u32.to_be_bytes());
        delta.extend_from_slice(&8u32.to_be_bytes()); // copies past src_len
        assert!(apply(b"abcd", &delta).is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip(base in proptest::collection::vec(any::<u8>(), 0..4096),
                           target in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let delta = encode(&base, &target);
            prop_assert_eq!(apply(&base, &delta).unwrap(), target);
        }
    }
}
