//! Memory-pressure eviction with a strongly retained hot set.
//!
//! Every stored entry is tracked with an approximate weight. The most
//! recently read entries are retained (a bounded list, duplicates allowed);
//! everything else is reclaimable. When the tracked weight exceeds the
//! memory budget after a `put`, the least-recently-touched reclaimable keys
//! are queued as reclaimed. The queue is drained, removing those keys from
//! the delegate, at the start of the next operation.
//!
//! There is no collector deciding when memory is short, so eviction timing
//! is driven by the budget and by explicit [`SoftEvictingCache::reclaim_unretained`]
//! calls rather than by the runtime.
//!
//! Keys the delegate drops on its own (an LRU bound, say) are forgotten when
//! a read misses them, or when the tracked set outgrows the delegate.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;

use crate::cache::{Cache, SharedCache};
use crate::error::CacheResult;
use crate::key::{CacheEntry, CacheKey};

/// Default number of strongly retained recent reads.
pub const DEFAULT_RETENTION_SIZE: usize = 256;

/// Default bound on the summed weight of tracked entries (4 MiB of JSON).
pub const DEFAULT_MEMORY_BUDGET: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
struct Tracked {
    weight: usize,
    last_touched: u64,
}

#[derive(Debug, Default)]
struct Tracking {
    /// Most recent read at the front.
    retained: VecDeque<CacheKey>,
    tracked: HashMap<CacheKey, Tracked>,
    total_weight: usize,
    /// Reclaimed but not yet removed from the delegate.
    reclaimed: VecDeque<CacheKey>,
    reclaimed_total: u64,
    clock: u64,
}

impl Tracking {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn track(&mut self, key: CacheKey, weight: usize) {
        let now = self.tick();
        let previous = self.tracked.insert(key, Tracked { weight, last_touched: now });
        if let Some(previous) = previous {
            self.total_weight -= previous.weight;
        }
        self.total_weight += weight;
    }

    fn touch(&mut self, key: &CacheKey, entry: &CacheEntry) {
        let now = self.tick();
        match self.tracked.get_mut(key) {
            Some(tracked) => tracked.last_touched = now,
            None => self.track(key.clone(), entry.weight()),
        }
    }

    fn untrack(&mut self, key: &CacheKey) {
        if let Some(previous) = self.tracked.remove(key) {
            self.total_weight -= previous.weight;
        }
    }

    fn retain(&mut self, key: CacheKey, retention_size: usize) {
        self.retained.push_front(key);
        self.retained.truncate(retention_size);
    }

    fn retained_set(&self) -> HashSet<&CacheKey> {
        self.retained.iter().collect()
    }

    /// Tracked keys, least recently touched first.
    fn oldest_first(&self) -> Vec<CacheKey> {
        let mut keys: Vec<(u64, CacheKey)> = self
            .tracked
            .iter()
            .map(|(key, tracked)| (tracked.last_touched, key.clone()))
            .collect();
        keys.sort_unstable_by_key(|(last_touched, _)| *last_touched);
        keys.into_iter().map(|(_, key)| key).collect()
    }

    fn reclaim(&mut self, key: CacheKey) {
        self.untrack(&key);
        self.reclaimed.push_back(key);
        self.reclaimed_total += 1;
    }

    /// Queue unretained keys, least recently touched first, until the
    /// tracked weight fits `budget`.
    fn enforce_budget(&mut self, budget: usize) {
        if self.total_weight <= budget {
            return;
        }
        let retained: HashSet<CacheKey> = self.retained.iter().cloned().collect();
        let candidates: Vec<CacheKey> = self
            .oldest_first()
            .into_iter()
            .filter(|key| !retained.contains(key))
            .collect();

        for key in candidates {
            if self.total_weight <= budget {
                break;
            }
            self.reclaim(key);
        }
    }

    fn reclaim_unretained(&mut self) -> usize {
        let retained = self.retained_set();
        let victims: Vec<CacheKey> = self
            .tracked
            .keys()
            .filter(|key| !retained.contains(key))
            .cloned()
            .collect();
        drop(retained);
        let count = victims.len();
        for key in victims {
            self.reclaim(key);
        }
        count
    }
}

pub struct SoftEvictingCache {
    delegate: SharedCache,
    retention_size: usize,
    memory_budget: Option<usize>,
    tracking: Mutex<Tracking>,
}

impl SoftEvictingCache {
    pub fn new(delegate: SharedCache) -> Self {
        Self {
            delegate,
            retention_size: DEFAULT_RETENTION_SIZE,
            memory_budget: Some(DEFAULT_MEMORY_BUDGET),
            tracking: Mutex::new(Tracking::default()),
        }
    }

    pub fn with_retention_size(mut self, retention_size: usize) -> Self {
        self.retention_size = retention_size;
        self
    }

    /// Bound on the summed weight of tracked entries. `None` opts out:
    /// entries are then only reclaimed by [`reclaim_unretained`](Self::reclaim_unretained).
    pub fn with_memory_budget(mut self, memory_budget: Option<usize>) -> Self {
        self.memory_budget = memory_budget;
        self
    }

    pub fn retention_size(&self) -> usize {
        self.retention_size
    }

    pub fn memory_budget(&self) -> Option<usize> {
        self.memory_budget
    }

    /// Summed weight of entries not yet reclaimed.
    pub fn tracked_weight(&self) -> usize {
        self.tracking.lock().total_weight
    }

    /// Entries reclaimed since creation.
    pub fn reclaimed_count(&self) -> u64 {
        self.tracking.lock().reclaimed_total
    }

    /// Reclaim every entry outside the retained set, as a collector would
    /// under full memory pressure. Returns how many were reclaimed; they
    /// leave the delegate on the next operation.
    pub fn reclaim_unretained(&self) -> usize {
        let count = self.tracking.lock().reclaim_unretained();
        tracing::debug!(cache = %self.id(), reclaimed = count, "reclaimed unretained entries");
        count
    }

    /// Drop tracking for keys the delegate no longer holds, oldest first,
    /// until the tracked set is no larger than the delegate.
    fn forget_evicted(&self, tracking: &mut Tracking) -> CacheResult<()> {
        let held = self.delegate.size()?;
        if tracking.tracked.len() <= held {
            return Ok(());
        }
        for key in tracking.oldest_first() {
            if tracking.tracked.len() <= held {
                break;
            }
            if !self.delegate.contains_key(&key)? {
                tracing::trace!(cache = %self.id(), key = %key, "forgetting entry evicted below");
                tracking.untrack(&key);
                tracking.retained.retain(|retained| retained != &key);
            }
        }
        Ok(())
    }

    fn drain_reclaimed(&self, tracking: &mut Tracking) -> CacheResult<()> {
        while let Some(key) = tracking.reclaimed.pop_front() {
            tracing::trace!(cache = %self.id(), key = %key, "dropping reclaimed entry");
            self.delegate.remove(&key)?;
        }
        Ok(())
    }
}

impl Cache for SoftEvictingCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn size(&self) -> CacheResult<usize> {
        let mut tracking = self.tracking.lock();
        self.drain_reclaimed(&mut tracking)?;
        self.delegate.size()
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let mut tracking = self.tracking.lock();
        self.drain_reclaimed(&mut tracking)?;
        let entry = self.delegate.get(key)?;
        match &entry {
            Some(entry) => {
                tracking.touch(key, entry);
                tracking.retain(key.clone(), self.retention_size);
            }
            None => tracking.untrack(key),
        }
        Ok(entry)
    }

    fn put(&self, key: CacheKey, entry: CacheEntry) -> CacheResult<()> {
        let mut tracking = self.tracking.lock();
        self.drain_reclaimed(&mut tracking)?;
        let weight = entry.weight();
        self.delegate.put(key.clone(), entry)?;
        tracking.track(key, weight);
        self.forget_evicted(&mut tracking)?;
        if let Some(budget) = self.memory_budget {
            tracking.enforce_budget(budget);
        }
        Ok(())
    }

    fn contains_key(&self, key: &CacheKey) -> CacheResult<bool> {
        let mut tracking = self.tracking.lock();
        self.drain_reclaimed(&mut tracking)?;
        self.delegate.contains_key(key)
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let mut tracking = self.tracking.lock();
        self.drain_reclaimed(&mut tracking)?;
        tracking.untrack(key);
        self.delegate.remove(key)
    }

    fn clear(&self) -> CacheResult<()> {
        let mut tracking = self.tracking.lock();
        tracking.retained.clear();
        self.drain_reclaimed(&mut tracking)?;
        tracking.tracked.clear();
        tracking.total_weight = 0;
        self.delegate.clear()
    }
}

impl std::fmt::Debug for SoftEvictingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftEvictingCache")
            .field("id", &self.id())
            .field("retention_size", &self.retention_size)
            .field("memory_budget", &self.memory_budget)
            .finish_non_exhaustive()
    }
}
