//! A hash map keyed by `K`, carrying `V`, with an absolute expiration time
//! per entry, organized so the entries due first can be found without
//! scanning the whole map (spec.md §4.1).
//!
//! Backed by a slab of slots plus a lazily-deleted binary min-heap ordered
//! on `expire_at`, per spec.md §9's "Arena / freelist" note. A slot's
//! `generation` counter makes heap entries left behind by `update`, `remove`
//! and slot reuse safe to ignore: a popped heap entry is only honoured if
//! its generation still matches the slot's current generation.
//!
//! `refresh` pops one due entry out of the heap-scheduling entirely: the
//! entry stays visible to `get`/`cursor`, but will not be reported again
//! until the caller calls `update` (or `remove`) on it. This mirrors the
//! original source's `refresh()` contract, where a popped context must be
//! explicitly re-registered by the scan that read it (see
//! `getTransactionTimeoutContextId` in `transaction_manager.cpp`, which
//! re-`update()`s every popped-but-not-timed-out entry before returning).

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

enum Slot<K, V> {
    Occupied {
        key: K,
        value: V,
        /// `None` means "no-expire" (invisible to `refresh`) or "currently
        /// unscheduled" (popped by `refresh`, not yet re-registered).
        expire_at: Option<i64>,
        generation: u64,
    },
    Free {
        next_free: Option<usize>,
        generation: u64,
    },
}

/// Returned by `create`/`create_no_expire` when the key is already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("key already exists in expiring map")]
pub struct KeyExistsError;

pub struct ExpiringMap<K, V> {
    slab: Vec<Slot<K, V>>,
    index: HashMap<K, usize>,
    heap: BinaryHeap<Reverse<(i64, u64, usize)>>,
    free_head: Option<usize>,
    free_count: usize,
    free_limit: usize,
}

impl<K, V> Default for ExpiringMap<K, V>
where
    K: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ExpiringMap<K, V>
where
    K: Copy + Eq + Hash,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            slab: Vec::new(),
            index: HashMap::new(),
            heap: BinaryHeap::new(),
            free_head: None,
            free_count: 0,
            free_limit: usize::MAX,
        }
    }

    /// Caps the number of freed slots retained for reuse. Beyond this, a
    /// freed slot is not linked back into the freelist: its storage is
    /// effectively returned to the arena instead of recycled.
    pub fn set_free_element_limit(&mut self, n: usize) {
        self.free_limit = n;
    }

    fn slot_generation(&self, idx: usize) -> u64 {
        match &self.slab[idx] {
            Slot::Occupied { generation, .. } | Slot::Free { generation, .. } => *generation,
        }
    }

    fn alloc_slot(&mut self, key: K, value: V, expire_at: Option<i64>) -> usize {
        if let Some(idx) = self.free_head {
            let (next_free, generation) = match &self.slab[idx] {
                Slot::Free {
                    next_free,
                    generation,
                } => (*next_free, *generation),
                Slot::Occupied { .. } => unreachable!("free_head points at occupied slot"),
            };
            self.free_head = next_free;
            self.free_count -= 1;
            self.slab[idx] = Slot::Occupied {
                key,
                value,
                expire_at,
                generation: generation.wrapping_add(1),
            };
            idx
        } else {
            self.slab.push(Slot::Occupied {
                key,
                value,
                expire_at,
                generation: 0,
            });
            self.slab.len() - 1
        }
    }

    fn insert(
        &mut self,
        key: K,
        value: V,
        expire_at: Option<i64>,
    ) -> Result<&mut V, KeyExistsError> {
        if self.index.contains_key(&key) {
            return Err(KeyExistsError);
        }
        let idx = self.alloc_slot(key, value, expire_at);
        self.index.insert(key, idx);
        if let Some(at) = expire_at {
            let generation = self.slot_generation(idx);
            self.heap.push(Reverse((at, generation, idx)));
        }
        Ok(match &mut self.slab[idx] {
            Slot::Occupied { value, .. } => value,
            Slot::Free { .. } => unreachable!(),
        })
    }

    /// Inserts a fresh entry with the given absolute expiry. Fails if an
    /// entry with this key already exists.
    pub fn create(&mut self, key: K, value: V, expire_at: i64) -> Result<&mut V, KeyExistsError> {
        self.insert(key, value, Some(expire_at))
    }

    /// Inserts a fresh entry that `refresh` never reports. Still visible to
    /// `get` and `cursor`. Fails if an entry with this key already exists.
    pub fn create_no_expire(&mut self, key: K, value: V) -> Result<&mut V, KeyExistsError> {
        self.insert(key, value, None)
    }

    /// Looks up an entry by key. No side effect on expiry scheduling.
    pub fn get(&mut self, key: &K) -> Option<&mut V> {
        let idx = *self.index.get(key)?;
        match &mut self.slab[idx] {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Free { .. } => unreachable!("index pointed at free slot"),
        }
    }

    /// Looks up an entry by key without requiring mutable access.
    #[must_use]
    pub fn get_ref(&self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        match &self.slab[idx] {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Free { .. } => unreachable!("index pointed at free slot"),
        }
    }

    /// Re-schedules an entry's expiry, or (re-)registers it for `refresh`
    /// after having been popped. Returns `false` if the key is absent.
    pub fn update(&mut self, key: &K, new_expire_at: i64) -> bool {
        let Some(&idx) = self.index.get(key) else {
            return false;
        };
        let generation = match &mut self.slab[idx] {
            Slot::Occupied {
                expire_at,
                generation,
                ..
            } => {
                *generation = generation.wrapping_add(1);
                *expire_at = Some(new_expire_at);
                *generation
            }
            Slot::Free { .. } => unreachable!("index pointed at free slot"),
        };
        self.heap.push(Reverse((new_expire_at, generation, idx)));
        true
    }

    /// Removes an entry. Idempotent: removing a missing key is not an error.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.index.remove(key)?;
        let (value, generation) = match std::mem::replace(
            &mut self.slab[idx],
            Slot::Free {
                next_free: None,
                generation: 0,
            },
        ) {
            Slot::Occupied {
                value, generation, ..
            } => (value, generation),
            Slot::Free { .. } => unreachable!("index pointed at free slot"),
        };
        if self.free_count < self.free_limit {
            self.slab[idx] = Slot::Free {
                next_free: self.free_head,
                generation,
            };
            self.free_head = Some(idx);
            self.free_count += 1;
        } else {
            // Beyond the retained-freelist cap: leave the slot as a
            // permanently dead tombstone (never reused) rather than
            // growing the freelist without bound.
            self.slab[idx] = Slot::Free {
                next_free: None,
                generation,
            };
        }
        Some(value)
    }

    /// Returns one entry whose `expire_at <= now`, popping it out of the
    /// expiry schedule. The caller must `update`, `remove`, or otherwise
    /// re-register the returned key before the entry will be considered by
    /// `refresh` again. Returns `None` when nothing is currently due.
    pub fn refresh(&mut self, now: i64) -> Option<(K, &mut V)> {
        loop {
            let Reverse((expire_at, generation, idx)) = *self.heap.peek()?;
            let current_generation = self.slot_generation(idx);
            if current_generation != generation {
                // Stale heap entry left behind by update/remove/reuse.
                self.heap.pop();
                continue;
            }
            if expire_at > now {
                return None;
            }
            self.heap.pop();
            return match &mut self.slab[idx] {
                Slot::Occupied {
                    key,
                    value,
                    expire_at: slot_expire,
                    generation,
                } => {
                    // Unschedule: bump generation so any other stale heap
                    // entries for this slot are ignored, and mark expiry
                    // unset until the caller re-registers it.
                    *generation = generation.wrapping_add(1);
                    *slot_expire = None;
                    Some((*key, value))
                }
                Slot::Free { .. } => unreachable!("stale generation check should have caught this"),
            };
        }
    }

    /// Iterates all entries, in unspecified order, without consuming them.
    pub fn cursor(&self) -> impl Iterator<Item = (&K, &V)> {
        self.slab.iter().filter_map(|slot| match slot {
            Slot::Occupied { key, value, .. } => Some((key, value)),
            Slot::Free { .. } => None,
        })
    }

    /// Number of live entries.
    #[must_use]
    pub fn size(&self) -> usize {
        self.index.len()
    }

    /// Alias for `size`, matching the spec's naming.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.size()
    }

    /// Number of freed slots currently retained for reuse.
    #[must_use]
    pub fn free_element_count(&self) -> usize {
        self.free_count
    }

    /// Rough heap footprint of one slot, for memory accounting.
    #[must_use]
    pub fn element_size_bytes(&self) -> usize {
        std::mem::size_of::<Slot<K, V>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get() {
        let mut map: ExpiringMap<u32, String> = ExpiringMap::new();
        map.create(1, "one".to_string(), 100).unwrap();
        assert_eq!(map.get(&1).map(|s| s.as_str()), Some("one"));
        assert_eq!(map.size(), 1);
    }

    #[test]
    fn create_duplicate_fails() {
        let mut map: ExpiringMap<u32, i32> = ExpiringMap::new();
        map.create(1, 10, 100).unwrap();
        assert!(map.create(1, 20, 200).is_err());
    }

    #[test]
    fn create_no_expire_invisible_to_refresh() {
        let mut map: ExpiringMap<u32, i32> = ExpiringMap::new();
        map.create_no_expire(1, 10).unwrap();
        assert_eq!(map.refresh(i64::MAX), None);
        assert_eq!(map.get(&1).copied(), Some(10));
    }

    #[test]
    fn refresh_reports_due_entries_and_unschedules() {
        let mut map: ExpiringMap<u32, i32> = ExpiringMap::new();
        map.create(1, 10, 100).unwrap();
        map.create(2, 20, 200).unwrap();

        assert_eq!(map.refresh(150), Some((1, &mut 10)));
        // Already popped; must not be reported again until re-registered.
        assert_eq!(map.refresh(150), None);

        // Re-register at a later expiry; now it's due at 999 but not at 150.
        map.update(&1, 999);
        assert_eq!(map.refresh(150), None);
        // Key 2 (expire_at=200) was never popped and is still scheduled; it
        // is due before key 1's rescheduled 999 and comes out first.
        assert_eq!(map.refresh(999), Some((2, &mut 20)));
        assert_eq!(map.refresh(999), Some((1, &mut 10)));
    }

    #[test]
    fn refresh_respects_ordering_by_expiry() {
        let mut map: ExpiringMap<u32, i32> = ExpiringMap::new();
        map.create(1, 1, 300).unwrap();
        map.create(2, 2, 100).unwrap();
        map.create(3, 3, 200).unwrap();

        assert_eq!(map.refresh(1_000).map(|(k, _)| k), Some(2));
        assert_eq!(map.refresh(1_000).map(|(k, _)| k), Some(3));
        assert_eq!(map.refresh(1_000).map(|(k, _)| k), Some(1));
        assert_eq!(map.refresh(1_000), None);
    }

    #[test]
    fn remove_is_idempotent_and_frees_slot_for_reuse() {
        let mut map: ExpiringMap<u32, i32> = ExpiringMap::new();
        map.create(1, 10, 100).unwrap();
        assert_eq!(map.remove(&1), Some(10));
        assert_eq!(map.remove(&1), None);
        assert_eq!(map.free_element_count(), 1);

        map.create(2, 20, 100).unwrap();
        assert_eq!(map.free_element_count(), 0);
        assert_eq!(map.size(), 1);
    }

    #[test]
    fn stale_heap_entries_from_update_are_skipped() {
        let mut map: ExpiringMap<u32, i32> = ExpiringMap::new();
        map.create(1, 10, 100).unwrap();
        map.update(&1, 50);
        map.update(&1, 10_000);
        // Only one live scheduling should remain, at 10_000.
        assert_eq!(map.refresh(9_999), None);
        assert_eq!(map.refresh(10_000).map(|(k, _)| k), Some(1));
        assert_eq!(map.refresh(10_000), None);
    }

    #[test]
    fn free_element_limit_caps_retained_slots() {
        let mut map: ExpiringMap<u32, i32> = ExpiringMap::new();
        map.set_free_element_limit(1);
        map.create(1, 1, 100).unwrap();
        map.create(2, 2, 100).unwrap();
        map.remove(&1);
        map.remove(&2);
        assert_eq!(map.free_element_count(), 1);
    }

    #[test]
    fn cursor_sees_all_entries_including_no_expire() {
        let mut map: ExpiringMap<u32, i32> = ExpiringMap::new();
        map.create(1, 1, 100).unwrap();
        map.create_no_expire(2, 2).unwrap();
        let mut keys: Vec<u32> = map.cursor().map(|(k, _)| *k).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![1, 2]);
    }

    #[test]
    fn generation_prevents_aba_after_slot_reuse() {
        let mut map: ExpiringMap<u32, i32> = ExpiringMap::new();
        map.create(1, 1, 100).unwrap();
        map.remove(&1); // slot freed, heap still has a stale (100, gen, idx) entry
        map.create(2, 2, 100_000).unwrap(); // likely reuses the freed slot
        assert_eq!(map.refresh(100), None);
        assert_eq!(map.refresh(100_000).map(|(k, _)| k), Some(2));
    }
}
