//! Fast in-process cache tier: LRU ordered, size capped, TTL aware.
//!
//! Recency order is the insertion order of the backing `IndexMap`: index 0 is the
//! least recently used entry, the last index the most recently used.

use crate::cache::CacheEntry;
use crate::types::Fingerprint;
use indexmap::IndexMap;
use parking_lot::Mutex;

/// Result of a fast-tier lookup
#[derive(Debug)]
pub enum MemoryLookup {
    Hit(CacheEntry),
    Expired,
    Miss,
}

pub struct MemoryTier {
    entries: Mutex<IndexMap<Fingerprint, CacheEntry>>,
    capacity: usize,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(IndexMap::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, fingerprint: &Fingerprint, now_ms: u64) -> MemoryLookup {
        let mut entries = self.entries.lock();
        let Some(mut entry) = entries.shift_remove(fingerprint) else {
            return MemoryLookup::Miss;
        };
        if entry.is_expired_at(now_ms) {
            return MemoryLookup::Expired;
        }
        entry.hit_count += 1;
        let found = entry.clone();
        // Re-inserting moves the entry to the most recently used position
        entries.insert(*fingerprint, entry);
        MemoryLookup::Hit(found)
    }

    /// Insert an entry, returning how many entries were evicted to stay under capacity.
    pub fn insert(&self, entry: CacheEntry) -> usize {
        if self.capacity == 0 {
            return 0;
        }
        let mut entries = self.entries.lock();
        entries.shift_remove(&entry.fingerprint);
        entries.insert(entry.fingerprint, entry);

        let mut evicted = 0;
        while entries.len() > self.capacity {
            if entries.shift_remove_index(0).is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.lock().shift_remove(fingerprint).is_some()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.lock().contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
