//! Durable cache tier over a `DurableStore`, with TTL expiry on read.

use crate::cache::CacheEntry;
use crate::error::StorageError;
use crate::store::DurableStore;
use crate::types::Fingerprint;
use std::sync::Arc;

const CACHE_KEY_PREFIX: &str = "cache:";

pub struct DurableTier {
    store: Arc<dyn DurableStore>,
}

/// Result of a durable-tier lookup
#[derive(Debug)]
pub enum DurableLookup {
    Hit(CacheEntry),
    Expired,
    Miss,
}

impl DurableTier {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    pub fn key_for(fingerprint: &Fingerprint) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, fingerprint.to_hex())
    }

    pub fn get(&self, fingerprint: &Fingerprint, now_ms: u64) -> Result<DurableLookup, StorageError> {
        let key = Self::key_for(fingerprint);
        let Some(raw) = self.store.load(&key)? else {
            return Ok(DurableLookup::Miss);
        };
        let entry = decode_entry(&raw)?;
        if entry.is_expired_at(now_ms) {
            self.store.remove(&key)?;
            return Ok(DurableLookup::Expired);
        }
        Ok(DurableLookup::Hit(entry))
    }

    pub fn put(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        let raw = bincode::serialize(entry)
            .map_err(|e| StorageError::Codec(format!("Failed to serialize cache entry: {}", e)))?;
        self.store.save(&Self::key_for(&entry.fingerprint), &raw)
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> Result<(), StorageError> {
        self.store.remove(&Self::key_for(fingerprint))
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self, now_ms: u64) -> Result<usize, StorageError> {
        let mut removed = 0usize;
        for (key, raw) in self.store.scan_prefix(CACHE_KEY_PREFIX)? {
            // Undecodable entries are treated as expired
            let expired = decode_entry(&raw)
                .map(|entry| entry.is_expired_at(now_ms))
                .unwrap_or(true);
            if expired {
                self.store.remove(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn decode_entry(raw: &[u8]) -> Result<CacheEntry, StorageError> {
    bincode::deserialize(raw)
        .map_err(|e| StorageError::Codec(format!("Failed to deserialize cache entry: {}", e)))
}
