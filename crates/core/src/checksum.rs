//! Digest values
//!
//! Representations carry an MD5 digest and, for file contents, a SHA-1
//! digest used for content-addressed deduplication. Both are stored as
//! lowercase hex.

use crate::error::{Error, Result};
use md5::{Digest as _, Md5};
use sha1::Sha1;
use std::fmt;

/// Checksum kinds understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    /// 128-bit MD5.
    Md5,
    /// 160-bit SHA-1.
    Sha1,
}

impl ChecksumKind {
    /// Parse a kind label as found in the rep-cache file.
    pub fn parse(label: &str) -> Result<Self> {
        match label {
            "md5" => Ok(ChecksumKind::Md5),
            "sha1" => Ok(ChecksumKind::Sha1),
            other => Err(Error::BadChecksumKind(other.to_string())),
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumKind::Md5 => write!(f, "md5"),
            ChecksumKind::Sha1 => write!(f, "sha1"),
        }
    }
}

/// MD5 digest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Md5Digest(pub [u8; 16]);

/// SHA-1 digest value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha1Digest(pub [u8; 20]);

impl Md5Digest {
    /// Digest a complete byte slice.
    pub fn of(data: &[u8]) -> Self {
        let mut ctx = Md5::new();
        ctx.update(data);
        Md5Digest(ctx.finalize().into())
    }

    /// Parse lowercase hex.
    pub fn parse_hex(text: &str) -> Result<Self> {
        Ok(Md5Digest(parse_hex_bytes(text)?))
    }
}

impl Sha1Digest {
    /// Digest a complete byte slice.
    pub fn of(data: &[u8]) -> Self {
        let mut ctx = Sha1::new();
        ctx.update(data);
        Sha1Digest(ctx.finalize().into())
    }

    /// Parse lowercase hex.
    pub fn parse_hex(text: &str) -> Result<Self> {
        Ok(Sha1Digest(parse_hex_bytes(text)?))
    }
}

impl fmt::Display for Md5Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

impl fmt::Display for Sha1Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

fn parse_hex_bytes<const N: usize>(text: &str) -> Result<[u8; N]> {
    let bytes = text.as_bytes();
    if bytes.len() != N * 2 {
        return Err(Error::BadChecksumParse(text.to_string()));
    }
    let mut out = [0u8; N];
    for (i, chunk) in bytes.chunks_exact(2).enumerate() {
        let hi = hex_val(chunk[0]).ok_or_else(|| Error::BadChecksumParse(text.to_string()))?;
        let lo = hex_val(chunk[1]).ok_or_else(|| Error::BadChecksumParse(text.to_string()))?;
        out[i] = (hi << 4) | lo;
    }
    Ok(out)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}
