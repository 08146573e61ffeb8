//! A coarse, non-reentrant advisory lock per partition id, backed by a
//! small fixed pool of mutexes keyed by `pid mod NUM_LOCK_MUTEX`. See
//! spec.md §4.5: this is not used by the core on its hot path, only
//! offered for external subsystems (e.g. snapshot) to serialize
//! partition-wide operations against each other.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::ids::PartitionId;

/// Number of mutexes in the pool. Partitions hash into this pool by
/// `pid % NUM_LOCK_MUTEX`, so distinct partitions may alias onto the same
/// underlying mutex; this is an advisory lock, so a false conflict merely
/// costs the caller a retry.
const NUM_LOCK_MUTEX: usize = 64;

/// `lock`/`unlock` use a 0/1 counter rather than a real `Mutex` because the
/// contract is "try-lock, never block": `lock` reports whether it acquired
/// the slot instead of waiting for it.
pub struct PartitionLockTable {
    slots: Vec<AtomicU32>,
}

impl Default for PartitionLockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionLockTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: (0..NUM_LOCK_MUTEX).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    fn slot(&self, partition_id: PartitionId) -> &AtomicU32 {
        &self.slots[partition_id as usize % NUM_LOCK_MUTEX]
    }

    /// Returns `true` iff the lock was free and is now held (0 -> 1).
    pub fn lock(&self, partition_id: PartitionId) -> bool {
        self.slot(partition_id)
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the lock if held (1 -> 0). No-op otherwise.
    pub fn unlock(&self, partition_id: PartitionId) {
        let _ = self
            .slot(partition_id)
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_and_releasable() {
        let table = PartitionLockTable::new();
        assert!(table.lock(5));
        assert!(!table.lock(5));
        table.unlock(5);
        assert!(table.lock(5));
    }

    #[test]
    fn distinct_partitions_aliasing_the_same_slot_conflict() {
        let table = PartitionLockTable::new();
        let aliased = 5 + NUM_LOCK_MUTEX as PartitionId;
        assert!(table.lock(5));
        assert!(!table.lock(aliased));
        table.unlock(5);
        assert!(table.lock(aliased));
    }
}
