//! Quorum key caching
//!
//! Wraps a [`QuorumKeyResolver`] so repeated verifications against the same
//! quorum do not hit the chain every time.
//!
//! Staleness policy:
//! - LRU eviction once `capacity` keys are held
//! - entries expire `ttl` after they were resolved
//! - an entry only serves requests whose core height is within
//!   `max_height_drift` blocks of the height it was resolved at
//! - failures are never cached

use crate::config::KeyCacheConfig;
use crate::quorum::{QuorumHash, QuorumKeyResolver, QuorumPublicKey, QuorumType};
use crate::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

type CacheKey = (QuorumType, QuorumHash);

/// Cache entry with timestamp
#[derive(Debug, Clone)]
struct CacheEntry {
    key: QuorumPublicKey,

    /// Core height the key was resolved for
    resolved_at_height: u32,

    /// Insertion time
    inserted_at: Instant,

    /// Last access time
    last_accessed: Instant,

    /// Access count
    access_count: u64,
}

impl CacheEntry {
    fn new(key: QuorumPublicKey, resolved_at_height: u32) -> Self {
        let now = Instant::now();
        Self {
            key,
            resolved_at_height,
            inserted_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }

    fn is_out_of_range(&self, height: u32, max_drift: u32) -> bool {
        self.resolved_at_height.abs_diff(height) > max_drift
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total cache hits
    pub hits: u64,

    /// Total cache misses
    pub misses: u64,

    /// Entries evicted to make room
    pub evictions: u64,

    /// Entries dropped for age or height distance
    pub expirations: u64,

    /// Current cache size
    pub current_size: usize,

    /// Maximum cache size
    pub max_size: usize,
}

impl CacheStats {
    /// Get hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    stats: CacheStats,
}

/// Caching [`QuorumKeyResolver`] decorator
pub struct CachedQuorumKeyResolver<R> {
    inner: R,
    state: RwLock<Inner>,
    max_size: usize,
    ttl: Duration,
    max_height_drift: u32,
}

impl<R: QuorumKeyResolver> CachedQuorumKeyResolver<R> {
    pub fn new(inner: R, config: &KeyCacheConfig) -> Self {
        let max_size = config.capacity.max(1);
        Self {
            inner,
            state: RwLock::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats {
                    max_size,
                    ..CacheStats::default()
                },
            }),
            max_size,
            ttl: config.ttl(),
            max_height_drift: config.max_height_drift,
        }
    }

    fn lookup(&self, cache_key: &CacheKey, height: u32) -> Option<QuorumPublicKey> {
        let mut state = self.state.write();
        let Inner { entries, stats } = &mut *state;

        match entries.get_mut(cache_key) {
            None => {
                stats.misses += 1;
                return None;
            }
            Some(entry)
                if !entry.is_expired(self.ttl)
                    && !entry.is_out_of_range(height, self.max_height_drift) =>
            {
                entry.touch();
                stats.hits += 1;
                trace!(
                    "Key cache hit: quorum {} (access count: {})",
                    cache_key.1,
                    entry.access_count
                );
                return Some(entry.key);
            }
            Some(_) => {}
        }

        debug!("Key cache entry stale: quorum {} at height {}", cache_key.1, height);
        entries.remove(cache_key);
        stats.expirations += 1;
        stats.misses += 1;
        stats.current_size = entries.len();
        None
    }

    fn store(&self, cache_key: CacheKey, key: QuorumPublicKey, height: u32) {
        let mut state = self.state.write();
        let Inner { entries, stats } = &mut *state;

        if !entries.contains_key(&cache_key) && entries.len() >= self.max_size {
            let lru = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(k, _)| *k);
            if let Some(lru) = lru {
                entries.remove(&lru);
                stats.evictions += 1;
                debug!("Key cache eviction: quorum {} (LRU)", lru.1);
            }
        }

        entries.insert(cache_key, CacheEntry::new(key, height));
        stats.current_size = entries.len();
    }

    /// Drop a quorum's key, e.g. after it produced a bad signature
    pub fn invalidate(&self, quorum_type: QuorumType, quorum_hash: &QuorumHash) -> bool {
        let mut state = self.state.write();
        let removed = state.entries.remove(&(quorum_type, *quorum_hash)).is_some();
        state.stats.current_size = state.entries.len();
        removed
    }

    /// Clear all cache entries
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.entries.clear();
        state.stats.current_size = 0;
        debug!("Key cache cleared");
    }

    /// Prune expired entries
    pub fn prune_expired(&self) -> usize {
        let mut state = self.state.write();
        let before = state.entries.len();
        let ttl = self.ttl;
        state.entries.retain(|_, entry| !entry.is_expired(ttl));

        let pruned = before - state.entries.len();
        state.stats.expirations += pruned as u64;
        state.stats.current_size = state.entries.len();
        pruned
    }

    pub fn stats(&self) -> CacheStats {
        self.state.read().stats.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: QuorumKeyResolver> QuorumKeyResolver for CachedQuorumKeyResolver<R> {
    fn resolve(
        &self,
        quorum_type: QuorumType,
        quorum_hash: &QuorumHash,
        core_chain_locked_height: u32,
    ) -> Result<QuorumPublicKey> {
        let cache_key = (quorum_type, *quorum_hash);
        if let Some(key) = self.lookup(&cache_key, core_chain_locked_height) {
            return Ok(key);
        }

        // The lock is not held while the inner resolver runs.
        let key = self
            .inner
            .resolve(quorum_type, quorum_hash, core_chain_locked_height)?;
        self.store(cache_key, key, core_chain_locked_height);
        Ok(key)
    }
}
