//! The repository `format` file and the small counter files
//!
//! `format` is three text lines:
//!
//! ```text
//! 1
//! layout sharded 1000
//! addressing logical 1000
//! ```
//!
//! `current`, `min-unpacked-rev` and `txn-current` are single numbers with a
//! trailing newline; a missing newline is a corruption signal. All writers go
//! through write-temp-then-rename so readers never observe a torn file.

use revfs_core::{base36, Error, Result, Revnum, TxnId};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Current repository format number.
pub const FORMAT_NUMBER: u32 = 1;

/// Physical placement of revision files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `revs/<shard>/<rev>` with a fixed number of revisions per shard.
    Sharded(u64),
    /// All revisions in one flat directory.
    Linear,
}

/// How items inside a revision file are addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Items are found through the logical-to-physical index.
    Logical(u64),
    /// Items are found by raw byte offset.
    Physical,
}

/// Parsed contents of the `format` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    /// Format number; only [`FORMAT_NUMBER`] is understood.
    pub number: u32,
    /// Revision file placement.
    pub layout: Layout,
    /// Item addressing scheme.
    pub addressing: Addressing,
}

impl FormatInfo {
    /// The format written by `Filesystem::create`.
    pub fn current(shard_size: u64) -> Self {
        FormatInfo {
            number: FORMAT_NUMBER,
            layout: Layout::Sharded(shard_size),
            addressing: Addressing::Logical(shard_size),
        }
    }

    /// Serialize to the three-line text form.
    pub fn serialize(&self) -> String {
        let mut out = format!("{}\n", self.number);
        match self.layout {
            Layout::Sharded(n) => out.push_str(&format!("layout sharded {n}\n")),
            Layout::Linear => out.push_str("layout linear\n"),
        }
        match self.addressing {
            Addressing::Logical(n) => out.push_str(&format!("addressing logical {n}\n")),
            Addressing::Physical => out.push_str("addressing physical\n"),
        }
        out
    }

    /// Parse the three-line text form.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let number = lines
            .next()
            .ok_or_else(|| corrupt("format file is empty"))?
            .trim()
            .parse::<u32>()
            .map_err(|_| corrupt("malformed format number"))?;
        let layout = match lines.next() {
            Some("layout linear") => Layout::Linear,
            Some(line) => match line.strip_prefix("layout sharded ") {
                Some(n) => Layout::Sharded(
                    n.parse().map_err(|_| corrupt("malformed shard size"))?,
                ),
                None => return Err(corrupt("malformed layout line")),
            },
            None => return Err(corrupt("missing layout line")),
        };
        let addressing = match lines.next() {
            Some("addressing physical") => Addressing::Physical,
            Some(line) => match line.strip_prefix("addressing logical ") {
                Some(n) => Addressing::Logical(
                    n.parse().map_err(|_| corrupt("malformed addressing size"))?,
                ),
                None => return Err(corrupt("malformed addressing line")),
            },
            None => return Err(corrupt("missing addressing line")),
        };
        Ok(FormatInfo {
            number,
            layout,
            addressing,
        })
    }

    /// Read and validate the `format` file at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let info = Self::parse(&fs::read_to_string(path)?)?;
        if info.number != FORMAT_NUMBER {
            return Err(corrupt(&format!(
                "unsupported format number {}",
                info.number
            )));
        }
        Ok(info)
    }

    /// Shard size for path layout purposes; linear layouts use one big shard.
    pub fn shard_size(&self) -> u64 {
        match self.layout {
            Layout::Sharded(n) => n,
            Layout::Linear => u64::MAX,
        }
    }
}

fn corrupt(msg: &str) -> Error {
    Error::Corrupt(msg.to_string())
}

/// Write `contents` to `path` atomically: temp file in the same directory,
/// fsync, then rename over the target.
pub fn write_file_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(contents)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a newline-terminated decimal revision number (`current`,
/// `min-unpacked-rev`).
pub fn read_revnum_file(path: &Path) -> Result<Revnum> {
    let text = fs::read_to_string(path)?;
    let body = text
        .strip_suffix('\n')
        .ok_or_else(|| corrupt(&format!("{} missing trailing newline", path.display())))?;
    body.trim_end()
        .parse::<Revnum>()
        .map_err(|_| corrupt(&format!("malformed revision number in {}", path.display())))
}

/// Atomically write a newline-terminated decimal revision number.
pub fn write_revnum_file(path: &Path, rev: Revnum) -> Result<()> {
    write_file_atomic(path, format!("{rev}\n").as_bytes())
}

/// Read the next transaction id from `txn-current`.
pub fn read_txn_current(path: &Path) -> Result<TxnId> {
    let text = fs::read_to_string(path)?;
    let body = text
        .strip_suffix('\n')
        .ok_or_else(|| corrupt("txn-current missing trailing newline"))?;
    TxnId::from_base36(body)
}

/// Atomically write the next transaction id to `txn-current`.
pub fn write_txn_current(path: &Path, next: TxnId) -> Result<()> {
    write_file_atomic(path, format!("{next}\n").as_bytes())
}

/// Read the two base-36 counters of a transaction's `next-ids` file.
///
/// The format is exactly `<node-id> <copy-id>\n`; a missing space or missing
/// newline is corruption.
pub fn read_next_ids(path: &Path) -> Result<(u64, u64)> {
    let text = fs::read_to_string(path)?;
    let body = text
        .strip_suffix('\n')
        .ok_or_else(|| corrupt("next-ids missing trailing newline"))?;
    let (node, copy) = body
        .split_once(' ')
        .ok_or_else(|| corrupt("next-ids missing separator"))?;
    Ok((base36::parse(node)?, base36::parse(copy)?))
}

/// Atomically write a transaction's `next-ids` file.
pub fn write_next_ids(path: &Path, node_id: u64, copy_id: u64) -> Result<()> {
    let text = format!("{} {}\n", base36::encode(node_id), base36::encode(copy_id));
    write_file_atomic(path, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_format_round_trip() {
        let info = FormatInfo::current(1000);
        let parsed = FormatInfo::parse(&info.serialize()).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn test_format_linear_physical() {
        let info = FormatInfo {
            number: 1,
            layout: Layout::Linear,
            addressing: Addressing::Physical,
        };
        assert_eq!(
            info.serialize(),
            "1\nlayout linear\naddressing physical\n"
        );
        assert_eq!(FormatInfo::parse(&info.serialize()).unwrap(), info);
    }

    #[test]
    fn test_format_rejects_garbage() {
        assert!(FormatInfo::parse("").is_err());
        assert!(FormatInfo::parse("1\nlayout circular\n").is_err());
        assert!(FormatInfo::parse("1\nlayout sharded x\naddressing physical\n").is_err());
    }

    #[test]
    fn test_revnum_file_requires_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("current");

        write_revnum_file(&path, 7).unwrap();
        assert_eq!(read_revnum_file(&path).unwrap(), 7);

        fs::write(&path, "7").unwrap();
        assert!(matches!(read_revnum_file(&path), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_txn_current_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("txn-current");

        write_txn_current(&path, TxnId::new(36)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "10\n");
        assert_eq!(read_txn_current(&path).unwrap(), TxnId::new(36));
    }

    #[test]
    fn test_next_ids_format_is_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("next-ids");

        write_next_ids(&path, 0, 0).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0 0\n");
        assert_eq!(read_next_ids(&path).unwrap(), (0, 0));

        fs::write(&path, "3 4").unwrap();
        assert!(read_next_ids(&path).is_err());
        fs::write(&path, "34\n").unwrap();
        assert!(read_next_ids(&path).is_err());
    }

    #[test]
    fn test_atomic_write_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("current");
        write_file_atomic(&path, b"1\n").unwrap();
        write_file_atomic(&path, b"2\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "2\n");
        assert!(!path.with_extension("tmp").exists());
    }
}
