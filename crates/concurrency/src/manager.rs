//! The four-lock manager
//!
//! Lock acquisition is callback-shaped: the caller hands a closure to
//! `with_write_lock` / `with_txn_current_lock` and the lock is released when
//! the closure returns, on success and on error alike. The per-transaction
//! proto-rev lock is guard-shaped instead, because the rep writer holds it
//! across a streaming write; [`ProtoRevGuard`] releases on drop.
//!
//! Each lock pairs an in-process `parking_lot::Mutex` (thread exclusion)
//! with an exclusive advisory lock on a sentinel file (process exclusion).

use crate::flock::{self, FileLockGuard};
use crate::registry::{TxnEntry, TxnRegistry};
use parking_lot::Mutex;
use revfs_core::{Error, Result, TxnId};
use revfs_storage::RepoLayout;
use std::sync::Arc;
use tracing::trace;

/// In-process half of the repository-wide locks.
#[derive(Debug, Default)]
pub struct LockManager {
    write_mutex: Mutex<()>,
    txn_current_mutex: Mutex<()>,
}

impl LockManager {
    /// Create a manager with both mutexes free.
    pub fn new() -> Self {
        LockManager::default()
    }

    /// Run `f` holding the global write lock.
    ///
    /// Serializes commits across threads and processes. The advisory lock on
    /// the `write-lock` sentinel is taken after the in-process mutex and
    /// released when `f` returns.
    pub fn with_write_lock<R>(
        &self,
        layout: &RepoLayout,
        f: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        let _thread = self.write_mutex.lock();
        let _file = flock::acquire(&layout.write_lock_path())?;
        trace!("write lock acquired");
        let result = f();
        trace!("write lock released");
        result
    }

    /// Run `f` holding the transaction-counter lock.
    ///
    /// Guards the read-modify-write of `txn-current`; held only for that.
    pub fn with_txn_current_lock<R>(
        &self,
        layout: &RepoLayout,
        f: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        let _thread = self.txn_current_mutex.lock();
        let _file = flock::acquire(&layout.txn_current_lock_path())?;
        f()
    }
}

/// Exclusive right to append to one transaction's proto-rev file.
///
/// While alive, the registry entry's `being_written` flag is set and the
/// `rev-lock` sentinel is held. Both are released on drop, so cleanup
/// composes with `?` propagation.
#[derive(Debug)]
pub struct ProtoRevGuard {
    entry: Arc<TxnEntry>,
    _file: FileLockGuard,
}

impl ProtoRevGuard {
    /// Acquire the proto-rev lock for `txn_id`.
    ///
    /// Fails with [`Error::RepBeingWritten`] when another thread of this
    /// process already writes to the transaction, or when another process
    /// holds the sentinel lock.
    pub fn acquire(
        layout: &RepoLayout,
        registry: &TxnRegistry,
        txn_id: TxnId,
    ) -> Result<Self> {
        let entry = registry.get_or_create(txn_id);
        if !entry.try_begin_write() {
            return Err(Error::RepBeingWritten(txn_id));
        }
        let file = match flock::try_acquire(&layout.proto_rev_lock_path(txn_id)) {
            Ok(Some(file)) => file,
            Ok(None) => {
                entry.end_write();
                return Err(Error::RepBeingWritten(txn_id));
            }
            Err(e) => {
                entry.end_write();
                return Err(e);
            }
        };
        trace!(txn = %txn_id, "proto-rev lock acquired");
        Ok(ProtoRevGuard { entry, _file: file })
    }
}

impl Drop for ProtoRevGuard {
    fn drop(&mut self) {
        self.entry.end_write();
        trace!(txn = %self.entry.txn_id(), "proto-rev lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn layout(dir: &std::path::Path) -> RepoLayout {
        RepoLayout::new(dir, 1000)
    }

    #[test]
    fn test_write_lock_runs_callback() {
        let dir = tempdir().unwrap();
        let layout = layout(dir.path());
        let manager = LockManager::new();
        let out = manager
            .with_write_lock(&layout, || Ok(41 + 1))
            .unwrap();
        assert_eq!(out, 42);
    }

    #[test]
    fn test_write_lock_released_after_error() {
        let dir = tempdir().unwrap();
        let layout = layout(dir.path());
        let manager = LockManager::new();
        let failed: Result<()> =
            manager.with_write_lock(&layout, || Err(Error::Corrupt("boom".into())));
        assert!(failed.is_err());
        // both halves must be free again
        manager.with_write_lock(&layout, || Ok(())).unwrap();
    }

    #[test]
    fn test_proto_rev_lock_is_exclusive_per_txn() {
        let dir = tempdir().unwrap();
        let layout = layout(dir.path());
        fs::create_dir_all(layout.txn_dir(TxnId::new(1))).unwrap();
        fs::create_dir_all(layout.txn_dir(TxnId::new(2))).unwrap();
        let registry = TxnRegistry::new();

        let first = ProtoRevGuard::acquire(&layout, &registry, TxnId::new(1)).unwrap();
        assert!(matches!(
            ProtoRevGuard::acquire(&layout, &registry, TxnId::new(1)),
            Err(Error::RepBeingWritten(_))
        ));
        // a different transaction is unaffected
        let _other = ProtoRevGuard::acquire(&layout, &registry, TxnId::new(2)).unwrap();

        drop(first);
        let _again = ProtoRevGuard::acquire(&layout, &registry, TxnId::new(1)).unwrap();
    }

    #[test]
    fn test_being_written_tracks_guard_lifetime() {
        let dir = tempdir().unwrap();
        let layout = layout(dir.path());
        fs::create_dir_all(layout.txn_dir(TxnId::new(5))).unwrap();
        let registry = TxnRegistry::new();

        let guard = ProtoRevGuard::acquire(&layout, &registry, TxnId::new(5)).unwrap();
        assert!(registry.lookup(TxnId::new(5)).unwrap().is_being_written());
        drop(guard);
        assert!(!registry.lookup(TxnId::new(5)).unwrap().is_being_written());
    }
}
