//! Advisory file locks on sentinel files
//!
//! Cross-process exclusion uses `fs2` exclusive locks on zero-byte sentinel
//! files. If a sentinel does not exist at acquisition time it is created and
//! the open retried exactly once; a sentinel vanishing between the two
//! attempts propagates as an I/O error.

use fs2::FileExt;
use revfs_core::Result;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Holds an exclusive advisory lock; unlocks on drop.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        // unlock also happens when the descriptor closes; this just makes
        // the release deterministic
        let _ = self.file.unlock();
    }
}

fn open_sentinel(path: &Path) -> Result<File> {
    match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            // create it and retry once
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)
                .map_err(Into::into)
        }
        Err(e) => Err(e.into()),
    }
}

/// Acquire the lock, blocking until the current holder releases it.
pub fn acquire(path: &Path) -> Result<FileLockGuard> {
    let file = open_sentinel(path)?;
    file.lock_exclusive()?;
    Ok(FileLockGuard { file })
}

/// Try to acquire the lock without blocking; `None` means contention.
pub fn try_acquire(path: &Path) -> Result<Option<FileLockGuard>> {
    let file = open_sentinel(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(FileLockGuard { file })),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
        Err(e) => Err(e.into()),
    }
}
