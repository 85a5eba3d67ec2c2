//! In-memory leaf store with optional LRU bound.
//!
//! The concrete [`Cache`] at the bottom of every chain. Entries live in a
//! `HashMap` behind one `parking_lot` mutex; when `max_entries` is set and
//! the store is full, inserting a new key evicts the least-recently-used one.
//!
//! Hit, miss and eviction counters are emitted with every `tracing::debug`
//! event.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::cache::Cache;
use crate::error::CacheResult;
use crate::key::{CacheEntry, CacheKey};

struct Slot {
    entry: CacheEntry,
    /// Logical clock value of the last access, for LRU ordering.
    last_accessed: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner {
    slots: HashMap<CacheKey, Slot>,
    clock: u64,
    stats: MemoryCacheStats,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_lru(&mut self, cache: &str) {
        let lru_key = self
            .slots
            .iter()
            .min_by_key(|(_, slot)| slot.last_accessed)
            .map(|(key, _)| key.clone());

        if let Some(key) = lru_key {
            self.slots.remove(&key);
            self.stats.evictions += 1;
            tracing::debug!(
                cache = %cache,
                evicted_key = %key,
                cache_evictions = self.stats.evictions,
                "cache LRU eviction"
            );
        }
    }
}

/// Thread-safe map-backed cache.
pub struct MemoryCache {
    id: String,
    max_entries: Option<usize>,
    inner: Mutex<Inner>,
}

impl MemoryCache {
    /// Unbounded store.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_capacity(id, None)
    }

    /// Store holding at most `max_entries` keys. `None` or zero is unbounded.
    pub fn with_capacity(id: impl Into<String>, max_entries: Option<usize>) -> Self {
        Self {
            id: id.into(),
            max_entries: max_entries.filter(|&n| n > 0),
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                clock: 0,
                stats: MemoryCacheStats::default(),
            }),
        }
    }

    pub fn stats(&self) -> MemoryCacheStats {
        self.inner.lock().stats
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().slots.contains_key(key)
    }
}

impl Cache for MemoryCache {
    fn id(&self) -> &str {
        &self.id
    }

    fn size(&self) -> CacheResult<usize> {
        Ok(self.inner.lock().slots.len())
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let mut inner = self.inner.lock();
        let now = inner.tick();
        let entry = inner.slots.get_mut(key).map(|slot| {
            slot.last_accessed = now;
            slot.entry.clone()
        });
        if entry.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        tracing::debug!(
            cache = %self.id,
            key = %key,
            hit = entry.is_some(),
            cache_hits = inner.stats.hits,
            cache_misses = inner.stats.misses,
            "cache lookup"
        );
        Ok(entry)
    }

    fn put(&self, key: CacheKey, entry: CacheEntry) -> CacheResult<()> {
        let mut inner = self.inner.lock();
        let now = inner.tick();

        // Replacing an existing key never evicts.
        if let Some(slot) = inner.slots.get_mut(&key) {
            slot.entry = entry;
            slot.last_accessed = now;
            return Ok(());
        }

        if let Some(max) = self.max_entries {
            if inner.slots.len() >= max {
                inner.evict_lru(&self.id);
            }
        }
        inner.slots.insert(key, Slot { entry, last_accessed: now });
        Ok(())
    }

    fn contains_key(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.contains(key))
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        Ok(self.inner.lock().slots.remove(key).map(|slot| slot.entry))
    }

    fn clear(&self) -> CacheResult<()> {
        let mut inner = self.inner.lock();
        let cleared = inner.slots.len();
        inner.slots.clear();
        tracing::debug!(cache = %self.id, cleared, "cache cleared");
        Ok(())
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("id", &self.id)
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn found(n: u32) -> CacheEntry {
        CacheEntry::found(&n).unwrap()
    }

    // ── Get / Put ────────────────────────────────────────────────────

    #[test]
    fn new_cache_is_empty() {
        let cache = MemoryCache::new("users");
        assert_eq!(cache.id(), "users");
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn put_then_get() {
        let cache = MemoryCache::new("users");
        cache.put("k".into(), found(1)).unwrap();
        assert_eq!(cache.get(&"k".into()).unwrap(), Some(found(1)));
        assert_eq!(cache.size().unwrap(), 1);
    }

    #[test]
    fn known_absent_is_stored_and_returned() {
        let cache = MemoryCache::new("users");
        cache.put("k".into(), CacheEntry::KnownAbsent).unwrap();
        assert_eq!(cache.get(&"k".into()).unwrap(), Some(CacheEntry::KnownAbsent));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn put_replaces_existing_entry() {
        let cache = MemoryCache::new("users");
        cache.put("k".into(), found(1)).unwrap();
        cache.put("k".into(), found(2)).unwrap();
        assert_eq!(cache.get(&"k".into()).unwrap(), Some(found(2)));
        assert_eq!(cache.size().unwrap(), 1);
    }

    #[test]
    fn remove_returns_previous_entry() {
        let cache = MemoryCache::new("users");
        cache.put("k".into(), found(1)).unwrap();
        assert_eq!(cache.remove(&"k".into()).unwrap(), Some(found(1)));
        assert_eq!(cache.remove(&"k".into()).unwrap(), None);
    }

    #[test]
    fn clear_empties_the_store() {
        let cache = MemoryCache::new("users");
        cache.put("a".into(), found(1)).unwrap();
        cache.put("b".into(), found(2)).unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let cache = MemoryCache::new("users");
        cache.put("k".into(), found(1)).unwrap();
        cache.get(&"k".into()).unwrap();
        cache.get(&"missing".into()).unwrap();
        assert_eq!(
            cache.stats(),
            MemoryCacheStats { hits: 1, misses: 1, evictions: 0 }
        );
    }

    // ── LRU Eviction ─────────────────────────────────────────────────

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let cache = MemoryCache::with_capacity("users", Some(2));
        cache.put("a".into(), found(1)).unwrap();
        cache.put("b".into(), found(2)).unwrap();
        // Touch "a" so "b" becomes the LRU entry.
        cache.get(&"a".into()).unwrap();
        cache.put("c".into(), found(3)).unwrap();

        assert!(cache.contains(&"a".into()));
        assert!(!cache.contains(&"b".into()));
        assert!(cache.contains(&"c".into()));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn replacing_at_capacity_does_not_evict() {
        let cache = MemoryCache::with_capacity("users", Some(2));
        cache.put("a".into(), found(1)).unwrap();
        cache.put("b".into(), found(2)).unwrap();
        cache.put("a".into(), found(3)).unwrap();
        assert_eq!(cache.size().unwrap(), 2);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn zero_capacity_is_unbounded() {
        let cache = MemoryCache::with_capacity("users", Some(0));
        for i in 0..10 {
            cache.put(format!("k{i}").into(), found(i)).unwrap();
        }
        assert_eq!(cache.size().unwrap(), 10);
    }

    // ── Thread Safety ────────────────────────────────────────────────

    #[test]
    fn concurrent_writers_share_one_store() {
        let cache = Arc::new(MemoryCache::with_capacity("users", Some(64)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..100 {
                        let key = CacheKey::from(format!("{t}-{i}"));
                        cache.put(key.clone(), found(i)).unwrap();
                        cache.get(&key).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.size().unwrap(), 64);
    }
}
