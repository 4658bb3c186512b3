//! Persistent rep-sharing index
//!
//! Content-addressed deduplication across revisions: a SHA-1 digest maps to
//! the representation that already stores that content. The index is
//! consulted when a representation is closed and populated once per commit,
//! after the write lock is released, in a single atomic rewrite.
//!
//! The index is an external collaborator behind the [`RepSharing`] trait;
//! the shipped implementation keeps a hash-style dump file at the repository
//! root.

use parking_lot::Mutex;
use revfs_core::{Result, Sha1Digest};
use revfs_storage::format::write_file_atomic;
use revfs_storage::hashfile;
use revfs_storage::Representation;
use std::collections::BTreeMap;
use std::fs;
use std::io::BufReader;
use std::path::PathBuf;

/// Key-value index from content SHA-1 to an existing representation.
pub trait RepSharing: Send + Sync {
    /// Look up a representation storing content with this digest.
    fn get(&self, sha1: &Sha1Digest) -> Result<Option<Representation>>;

    /// Record the given representations, all-or-nothing.
    fn insert_batch(&self, reps: &[(Sha1Digest, Representation)]) -> Result<()>;
}

/// Hash-dump-backed index stored at `<root>/rep-cache`.
#[derive(Debug)]
pub struct FileRepCache {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRepCache {
    /// Open (or lazily create) the index at `path`.
    pub fn new(path: PathBuf) -> Self {
        FileRepCache {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new())
            }
            Err(e) => return Err(e.into()),
        };
        hashfile::read_hash(&mut BufReader::new(file))
    }
}

impl RepSharing for FileRepCache {
    fn get(&self, sha1: &Sha1Digest) -> Result<Option<Representation>> {
        let map = self.load()?;
        match map.get(&sha1.to_string()) {
            Some(value) => {
                let text = std::str::from_utf8(value).map_err(|_| {
                    revfs_core::Error::Corrupt("non-UTF-8 rep-cache row".into())
                })?;
                Ok(Some(Representation::parse_field(text)?))
            }
            None => Ok(None),
        }
    }

    fn insert_batch(&self, reps: &[(Sha1Digest, Representation)]) -> Result<()> {
        if reps.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock();
        let mut map = self.load()?;
        for (sha1, rep) in reps {
            // first writer wins; an existing row already points at equal content
            map.entry(sha1.to_string())
                .or_insert_with(|| rep.to_field().into_bytes());
        }
        let mut out = Vec::new();
        hashfile::write_hash(&mut out, &map)?;
        write_file_atomic(&self.path, &out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revfs_core::{ChangeSet, Md5Digest};
    use tempfile::tempdir;

    fn rep(rev: u32, item: u64) -> Representation {
        Representation {
            change_set: ChangeSet::Revision(rev),
            item_index: item,
            size: 10,
            expanded_size: 20,
            md5: Md5Digest::of(b"content"),
            sha1: Some(Sha1Digest::of(b"content")),
        }
    }

    #[test]
    fn test_miss_on_fresh_cache() {
        let dir = tempdir().unwrap();
        let cache = FileRepCache::new(dir.path().join("rep-cache"));
        assert!(cache.get(&Sha1Digest::of(b"nothing")).unwrap().is_none());
    }

    #[test]
    fn test_insert_then_hit() {
        let dir = tempdir().unwrap();
        let cache = FileRepCache::new(dir.path().join("rep-cache"));
        let sha1 = Sha1Digest::of(b"content");
        cache.insert_batch(&[(sha1, rep(3, 7))]).unwrap();

        let found = cache.get(&sha1).unwrap().unwrap();
        assert_eq!(found, rep(3, 7));
    }

    #[test]
    fn test_first_writer_wins() {
        let dir = tempdir().unwrap();
        let cache = FileRepCache::new(dir.path().join("rep-cache"));
        let sha1 = Sha1Digest::of(b"content");
        cache.insert_batch(&[(sha1, rep(3, 7))]).unwrap();
        cache.insert_batch(&[(sha1, rep(9, 1))]).unwrap();
        assert_eq!(cache.get(&sha1).unwrap().unwrap(), rep(3, 7));
    }

    #[test]
    fn test_batch_is_atomic_on_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rep-cache");
        let cache = FileRepCache::new(path.clone());
        cache
            .insert_batch(&[
                (Sha1Digest::of(b"a"), rep(1, 3)),
                (Sha1Digest::of(b"b"), rep(1, 4)),
            ])
            .unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}
