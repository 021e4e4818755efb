//! Bounded cache mapping old natural keys to newly assigned surrogate keys.
//!
//! The parent table may hold far more rows than fit comfortably in memory,
//! but children are typically processed in a locality-friendly order: many
//! consecutive child rows reference the same recently-migrated parent. A
//! bounded least-recently-used cache exploits that locality; correctness
//! never depends on it, because a miss falls back to a direct lookup against
//! the rebuilt parent table (see [`RemapContext`](crate::rekey::step::RemapContext)).

use std::collections::HashMap;

use serde::Serialize;

/// Default capacity, matching the store's historical lookup memoization.
pub const DEFAULT_CAPACITY: usize = 8192;

#[derive(Debug, Clone, Copy)]
struct Slot {
    value: i64,
    last_used: u64,
}

/// Statistics about cache usage.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of evicted entries.
    pub evictions: u64,
}

/// Bounded old-key → surrogate-key cache with LRU eviction.
///
/// Scoped to a single migration run and accessed only by the orchestrator
/// thread; it is never retained across runs.
#[derive(Debug)]
pub struct RemapCache {
    capacity: usize,
    entries: HashMap<i64, Slot>,
    tick: u64,
    stats: CacheStats,
}

impl RemapCache {
    /// Create a cache with the given capacity (at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    /// Record a mapping, evicting the least recently used entry if full.
    pub fn put(&mut self, old_key: i64, new_key: i64) {
        self.tick += 1;
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&old_key) {
            self.evict_lru();
        }
        self.entries.insert(
            old_key,
            Slot {
                value: new_key,
                last_used: self.tick,
            },
        );
    }

    /// Look up a mapping, refreshing its recency on a hit.
    pub fn get(&mut self, old_key: i64) -> Option<i64> {
        self.tick += 1;
        let tick = self.tick;
        match self.entries.get_mut(&old_key) {
            Some(slot) => {
                slot.last_used = tick;
                self.stats.hits += 1;
                Some(slot.value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Usage statistics for this run.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn evict_lru(&mut self) {
        if let Some(oldest) = self
            .entries
            .iter()
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(key, _)| *key)
        {
            self.entries.remove(&oldest);
            self.stats.evictions += 1;
        }
    }
}

impl Default for RemapCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
