//! Store statistics.
//!
//! Counters are atomic and can be read while a commit is in progress.
//!
//! ```rust,ignore
//! let before = store.stats().snapshot();
//! tx.get_or_load(id)?;
//! assert_eq!(store.stats().snapshot().record_loads, before.record_loads + 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Store-level operation counters.
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Single-record loads.
    record_loads: AtomicU64,
    /// Related-record queries (single and collection).
    related_loads: AtomicU64,
    /// Successful persist calls.
    persists: AtomicU64,
    /// Records inserted or updated.
    records_written: AtomicU64,
    /// Records removed.
    records_deleted: AtomicU64,
    /// Persist calls rejected by a timestamp check.
    conflicts: AtomicU64,
}

impl StoreStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_load(&self) {
        self.record_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_related_load(&self) {
        self.related_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_persist(&self, written: u64, deleted: u64) {
        self.persists.fetch_add(1, Ordering::Relaxed);
        self.records_written.fetch_add(written, Ordering::Relaxed);
        self.records_deleted.fetch_add(deleted, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of single-record loads.
    pub fn record_loads(&self) -> u64 {
        self.record_loads.load(Ordering::Relaxed)
    }

    /// Returns the number of related-record queries.
    pub fn related_loads(&self) -> u64 {
        self.related_loads.load(Ordering::Relaxed)
    }

    /// Returns the number of successful persist calls.
    pub fn persists(&self) -> u64 {
        self.persists.load(Ordering::Relaxed)
    }

    /// Returns the number of records inserted or updated.
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    /// Returns the number of records removed.
    pub fn records_deleted(&self) -> u64 {
        self.records_deleted.load(Ordering::Relaxed)
    }

    /// Returns the number of rejected persist calls.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            record_loads: self.record_loads(),
            related_loads: self.related_loads(),
            persists: self.persists(),
            records_written: self.records_written(),
            records_deleted: self.records_deleted(),
            conflicts: self.conflicts(),
        }
    }
}

/// A point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Single-record loads.
    pub record_loads: u64,
    /// Related-record queries.
    pub related_loads: u64,
    /// Successful persist calls.
    pub persists: u64,
    /// Records inserted or updated.
    pub records_written: u64,
    /// Records removed.
    pub records_deleted: u64,
    /// Rejected persist calls.
    pub conflicts: u64,
}

impl StatsSnapshot {
    /// Returns the number of store round trips of any kind.
    #[must_use]
    pub fn round_trips(&self) -> u64 {
        self.record_loads + self.related_loads + self.persists
    }
}
