//! Generation Artifact Cache
//!
//! Content-addressed, two-tier cache for outlines, section text and section images.
//! Lookups hit the fast in-process LRU tier first and fall back to the durable tier,
//! promoting durable hits. Entries carry a TTL and are never modified in place:
//! `put` writes a whole new entry and `invalidate` removes the key from both tiers.
//!
//! Durable-tier I/O failures are logged and counted, and degrade to a cache miss.

pub mod durable;
pub mod fingerprint;
pub mod memory;

pub use fingerprint::{canonicalize_text, FingerprintBuilder, OperationKind};

use crate::store::DurableStore;
use crate::types::{now_millis, Fingerprint};
use durable::{DurableLookup, DurableTier};
use memory::{MemoryLookup, MemoryTier};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries held in the fast tier
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// TTL applied when `put` is called without an explicit TTL (seconds)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_memory_capacity() -> usize {
    1024
}

fn default_ttl_secs() -> u64 {
    60 * 60 * 24
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: default_memory_capacity(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

/// One cached artifact blob and its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub blob: Vec<u8>,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn new(fingerprint: Fingerprint, blob: Vec<u8>, ttl: Duration) -> Self {
        let created_at_ms = now_millis();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        Self {
            fingerprint,
            blob,
            created_at_ms,
            expires_at_ms: created_at_ms.saturating_add(ttl_ms),
            hit_count: 0,
        }
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub fast_hits: u64,
    pub durable_hits: u64,
    pub expired: u64,
    pub durable_errors: u64,
    /// Entries superseded by a regeneration under the same fingerprint
    pub replacements: u64,
}

#[derive(Default)]
struct StatsCounters {
    misses: AtomicU64,
    evictions: AtomicU64,
    fast_hits: AtomicU64,
    durable_hits: AtomicU64,
    expired: AtomicU64,
    durable_errors: AtomicU64,
    replacements: AtomicU64,
}

/// Two-tier cache manager
pub struct CacheManager {
    memory: MemoryTier,
    durable: DurableTier,
    default_ttl: Duration,
    stats: StatsCounters,
}

impl CacheManager {
    pub fn new(store: Arc<dyn DurableStore>, config: &CacheConfig) -> Self {
        Self {
            memory: MemoryTier::new(config.memory_capacity),
            durable: DurableTier::new(store),
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            stats: StatsCounters::default(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a fingerprint: fast tier, then durable tier (promoting a durable hit).
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let now = now_millis();
        match self.memory.get(fingerprint, now) {
            MemoryLookup::Hit(entry) => {
                self.stats.fast_hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint.short(), tier = "memory", "Cache hit");
                return Some(entry);
            }
            MemoryLookup::Expired => {
                self.stats.expired.fetch_add(1, Ordering::Relaxed);
            }
            MemoryLookup::Miss => {}
        }

        match self.durable.get(fingerprint, now) {
            Ok(DurableLookup::Hit(mut entry)) => {
                self.stats.durable_hits.fetch_add(1, Ordering::Relaxed);
                entry.hit_count += 1;
                let evicted = self.memory.insert(entry.clone());
                self.stats
                    .evictions
                    .fetch_add(evicted as u64, Ordering::Relaxed);
                debug!(fingerprint = %fingerprint.short(), tier = "durable", "Cache hit, promoted");
                Some(entry)
            }
            Ok(DurableLookup::Expired) => {
                self.stats.expired.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Ok(DurableLookup::Miss) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.stats.durable_errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                warn!(fingerprint = %fingerprint.short(), error = %e, "Durable cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write a blob under a fingerprint in both tiers.
    pub fn put(&self, fingerprint: Fingerprint, blob: Vec<u8>, ttl: Option<Duration>) {
        let entry = CacheEntry::new(fingerprint, blob, ttl.unwrap_or(self.default_ttl));
        if let Err(e) = self.durable.put(&entry) {
            self.stats.durable_errors.fetch_add(1, Ordering::Relaxed);
            warn!(fingerprint = %fingerprint.short(), error = %e, "Durable cache write failed");
        }
        let evicted = self.memory.insert(entry);
        self.stats
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
    }

    /// Remove a fingerprint from both tiers.
    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.memory.remove(fingerprint);
        if let Err(e) = self.durable.remove(fingerprint) {
            self.stats.durable_errors.fetch_add(1, Ordering::Relaxed);
            warn!(fingerprint = %fingerprint.short(), error = %e, "Durable cache invalidation failed");
        }
        debug!(fingerprint = %fingerprint.short(), "Cache entry invalidated");
    }

    pub fn get_json<T: DeserializeOwned>(&self, fingerprint: &Fingerprint) -> Option<T> {
        let entry = self.get(fingerprint)?;
        match serde_json::from_slice(&entry.blob) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(fingerprint = %fingerprint.short(), error = %e, "Undecodable cache entry dropped");
                self.invalidate(fingerprint);
                None
            }
        }
    }

    pub fn put_json<T: Serialize>(&self, fingerprint: Fingerprint, value: &T, ttl: Option<Duration>) {
        match serde_json::to_vec(value) {
            Ok(blob) => self.put(fingerprint, blob, ttl),
            Err(e) => warn!(fingerprint = %fingerprint.short(), error = %e, "Failed to encode cache value"),
        }
    }

    /// Supersede whatever is stored under a fingerprint. Entries are never
    /// rewritten in place: the old one is invalidated, then a new one written.
    pub fn replace_json<T: Serialize>(&self, fingerprint: Fingerprint, value: &T, ttl: Option<Duration>) {
        let existed = self.memory.contains(&fingerprint)
            || matches!(
                self.durable.get(&fingerprint, now_millis()),
                Ok(DurableLookup::Hit(_))
            );
        if existed {
            self.stats.replacements.fetch_add(1, Ordering::Relaxed);
        }
        self.invalidate(&fingerprint);
        self.put_json(fingerprint, value, ttl);
    }

    /// Sweep expired entries from the durable tier.
    pub fn purge_expired(&self) -> usize {
        match self.durable.purge_expired(now_millis()) {
            Ok(removed) => {
                self.stats
                    .expired
                    .fetch_add(removed as u64, Ordering::Relaxed);
                removed
            }
            Err(e) => {
                self.stats.durable_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Durable cache purge failed");
                0
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let fast_hits = self.stats.fast_hits.load(Ordering::Relaxed);
        let durable_hits = self.stats.durable_hits.load(Ordering::Relaxed);
        CacheStats {
            hits: fast_hits + durable_hits,
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            fast_hits,
            durable_hits,
            expired: self.stats.expired.load(Ordering::Relaxed),
            durable_errors: self.stats.durable_errors.load(Ordering::Relaxed),
            replacements: self.stats.replacements.load(Ordering::Relaxed),
        }
    }
}
