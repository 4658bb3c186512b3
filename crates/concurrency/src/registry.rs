//! Shared-transaction registry
//!
//! A process-wide table of active transactions. Each entry carries the
//! `being_written` flag that enforces the one-writer-per-proto-rev
//! invariant: the flag is true iff some thread holds the proto-rev lock for
//! that transaction.
//!
//! Invariant: at most one entry per transaction id. The map's internal shard
//! locking serializes registry access (the transaction-list lock).

use dashmap::DashMap;
use revfs_core::TxnId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Registry entry for one active transaction.
#[derive(Debug)]
pub struct TxnEntry {
    txn_id: TxnId,
    being_written: AtomicBool,
}

impl TxnEntry {
    fn new(txn_id: TxnId) -> Self {
        TxnEntry {
            txn_id,
            being_written: AtomicBool::new(false),
        }
    }

    /// The transaction this entry tracks.
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Whether some thread currently holds the proto-rev lock.
    pub fn is_being_written(&self) -> bool {
        self.being_written.load(Ordering::SeqCst)
    }

    /// Claim the writer slot. Returns false if another thread already has it.
    pub fn try_begin_write(&self) -> bool {
        self.being_written
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release the writer slot.
    pub fn end_write(&self) {
        self.being_written.store(false, Ordering::SeqCst);
    }
}

/// Process-wide table of active transactions.
#[derive(Debug, Default)]
pub struct TxnRegistry {
    entries: DashMap<TxnId, Arc<TxnEntry>>,
}

impl TxnRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        TxnRegistry {
            entries: DashMap::new(),
        }
    }

    /// Return the entry for `txn_id`, allocating it if absent.
    pub fn get_or_create(&self, txn_id: TxnId) -> Arc<TxnEntry> {
        self.entries
            .entry(txn_id)
            .or_insert_with(|| Arc::new(TxnEntry::new(txn_id)))
            .value()
            .clone()
    }

    /// Return the entry for `txn_id`, or nothing.
    pub fn lookup(&self, txn_id: TxnId) -> Option<Arc<TxnEntry>> {
        self.entries.get(&txn_id).map(|e| e.value().clone())
    }

    /// Unlink the entry for `txn_id`.
    pub fn remove(&self, txn_id: TxnId) {
        self.entries.remove(&txn_id);
    }

    /// Ids of every registered transaction.
    pub fn active_ids(&self) -> Vec<TxnId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_entry_per_txn() {
        let registry = TxnRegistry::new();
        let a = registry.get_or_create(TxnId::new(1));
        let b = registry.get_or_create(TxnId::new(1));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_lookup_and_remove() {
        let registry = TxnRegistry::new();
        assert!(registry.lookup(TxnId::new(2)).is_none());
        registry.get_or_create(TxnId::new(2));
        assert!(registry.lookup(TxnId::new(2)).is_some());
        registry.remove(TxnId::new(2));
        assert!(registry.lookup(TxnId::new(2)).is_none());
    }

    #[test]
    fn test_writer_slot_is_exclusive() {
        let entry = TxnEntry::new(TxnId::new(3));
        assert!(entry.try_begin_write());
        assert!(!entry.try_begin_write());
        assert!(entry.is_being_written());
        entry.end_write();
        assert!(entry.try_begin_write());
    }
}
