//! Per-unit-of-work write buffer in front of a shared cache.
//!
//! Writes stay private until `commit`. Keys that missed during the unit of
//! work are written back as [`CacheEntry::KnownAbsent`] on commit, so later
//! lookups for rows that do not exist stop reaching the source of truth.

use std::collections::{HashMap, HashSet};

use crate::cache::SharedCache;
use crate::error::CacheResult;
use crate::key::{CacheEntry, CacheKey};

/// Owned by one unit of work; methods take `&mut self`. The delegate is
/// shared and must be thread-safe on its own.
pub struct TransactionalCache {
    delegate: SharedCache,
    clear_on_commit: bool,
    pending_writes: HashMap<CacheKey, CacheEntry>,
    missed_keys: HashSet<CacheKey>,
}

impl TransactionalCache {
    pub fn new(delegate: SharedCache) -> Self {
        Self {
            delegate,
            clear_on_commit: false,
            pending_writes: HashMap::new(),
            missed_keys: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        self.delegate.id()
    }

    pub fn size(&self) -> CacheResult<usize> {
        self.delegate.size()
    }

    pub fn delegate(&self) -> &SharedCache {
        &self.delegate
    }

    /// Reads go to the shared cache. Misses are remembered. After a pending
    /// `clear`, every read returns `None`.
    pub fn get(&mut self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let entry = self.delegate.get(key)?;
        if entry.is_none() {
            self.missed_keys.insert(key.clone());
        }
        if self.clear_on_commit {
            Ok(None)
        } else {
            Ok(entry)
        }
    }

    pub fn put(&mut self, key: CacheKey, entry: CacheEntry) {
        self.pending_writes.insert(key, entry);
    }

    /// No-op: removals are not buffered.
    pub fn remove(&mut self, _key: &CacheKey) -> Option<CacheEntry> {
        None
    }

    pub fn clear(&mut self) {
        self.clear_on_commit = true;
        self.pending_writes.clear();
    }

    pub fn has_pending_changes(&self) -> bool {
        self.clear_on_commit || !self.pending_writes.is_empty() || !self.missed_keys.is_empty()
    }

    /// Flush to the shared cache and start a fresh unit of work. State is
    /// reset even if a write fails; the first failure is returned.
    pub fn commit(&mut self) -> CacheResult<()> {
        let result = self.flush_pending_entries();
        self.reset();
        result
    }

    /// Drop buffered writes and release every key that missed, so callers
    /// waiting on a single-flight gate for those keys are not stuck.
    pub fn rollback(&mut self) {
        self.unlock_missed_entries();
        self.reset();
    }

    /// Every write is attempted, so no single-flight gate held by this unit
    /// of work is left closed by an earlier failure.
    fn flush_pending_entries(&mut self) -> CacheResult<()> {
        let mut first_error = None;
        if self.clear_on_commit {
            if let Err(e) = self.delegate.clear() {
                first_error.get_or_insert(e);
            }
        }
        let pending = std::mem::take(&mut self.pending_writes);
        let missed = std::mem::take(&mut self.missed_keys);
        let absent: Vec<_> = missed
            .into_iter()
            .filter(|key| !pending.contains_key(key))
            .map(|key| (key, CacheEntry::KnownAbsent))
            .collect();
        for (key, entry) in pending.into_iter().chain(absent) {
            if let Err(e) = self.delegate.put(key, entry) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn unlock_missed_entries(&mut self) {
        for key in self.missed_keys.drain() {
            if let Err(e) = self.delegate.remove(&key) {
                tracing::warn!(
                    cache = %self.delegate.id(),
                    key = %key,
                    error = %e,
                    "failed to release key on rollback"
                );
            }
        }
    }

    fn reset(&mut self) {
        self.clear_on_commit = false;
        self.pending_writes.clear();
        self.missed_keys.clear();
    }
}

impl std::fmt::Debug for TransactionalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionalCache")
            .field("id", &self.id())
            .field("clear_on_commit", &self.clear_on_commit)
            .field("pending_writes", &self.pending_writes.len())
            .field("missed_keys", &self.missed_keys.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocking::BlockingCache;
    use crate::cache::Cache;
    use crate::memory::MemoryCache;
    use std::sync::Arc;
    use std::time::Duration;

    fn found(n: u32) -> CacheEntry {
        CacheEntry::found(&n).unwrap()
    }

    fn setup() -> (TransactionalCache, Arc<MemoryCache>) {
        let memory = Arc::new(MemoryCache::new("orders"));
        (TransactionalCache::new(memory.clone()), memory)
    }

    #[test]
    fn put_is_invisible_until_commit() {
        let (mut tx, memory) = setup();
        tx.put("k".into(), found(1));
        assert_eq!(memory.get(&"k".into()).unwrap(), None);

        tx.commit().unwrap();
        assert_eq!(memory.get(&"k".into()).unwrap(), Some(found(1)));
        assert!(!tx.has_pending_changes());
    }

    #[test]
    fn rollback_discards_pending_writes() {
        let (mut tx, memory) = setup();
        memory.put("k".into(), found(1)).unwrap();
        tx.put("k".into(), found(2));

        tx.rollback();
        assert_eq!(memory.get(&"k".into()).unwrap(), Some(found(1)));
        assert!(!tx.has_pending_changes());
    }

    #[test]
    fn commit_records_missed_keys_as_known_absent() {
        let (mut tx, memory) = setup();
        assert_eq!(tx.get(&"ghost".into()).unwrap(), None);

        tx.commit().unwrap();
        assert_eq!(memory.get(&"ghost".into()).unwrap(), Some(CacheEntry::KnownAbsent));
    }

    #[test]
    fn written_miss_is_not_marked_absent() {
        let (mut tx, memory) = setup();
        assert_eq!(tx.get(&"k".into()).unwrap(), None);
        tx.put("k".into(), found(3));

        tx.commit().unwrap();
        assert_eq!(memory.get(&"k".into()).unwrap(), Some(found(3)));
    }

    #[test]
    fn clear_hides_reads_and_drops_earlier_writes() {
        let (mut tx, memory) = setup();
        memory.put("a".into(), found(1)).unwrap();
        tx.put("b".into(), found(2));

        tx.clear();
        assert_eq!(tx.get(&"a".into()).unwrap(), None);

        tx.commit().unwrap();
        assert_eq!(memory.size().unwrap(), 0);
    }

    #[test]
    fn writes_after_clear_survive_commit() {
        let (mut tx, memory) = setup();
        memory.put("a".into(), found(1)).unwrap();
        tx.clear();
        tx.put("b".into(), found(2));

        tx.commit().unwrap();
        assert_eq!(memory.get(&"a".into()).unwrap(), None);
        assert_eq!(memory.get(&"b".into()).unwrap(), Some(found(2)));
    }

    #[test]
    fn remove_is_a_no_op() {
        let (mut tx, memory) = setup();
        memory.put("k".into(), found(1)).unwrap();
        assert_eq!(tx.remove(&"k".into()), None);
        tx.commit().unwrap();
        assert_eq!(memory.get(&"k".into()).unwrap(), Some(found(1)));
    }

    #[test]
    fn state_resets_after_commit() {
        let (mut tx, memory) = setup();
        tx.clear();
        tx.commit().unwrap();

        memory.put("k".into(), found(1)).unwrap();
        assert_eq!(tx.get(&"k".into()).unwrap(), Some(found(1)));
    }

    #[test]
    fn rollback_releases_single_flight_gates() {
        let memory = Arc::new(MemoryCache::new("orders"));
        let blocking = Arc::new(BlockingCache::with_timeout(
            memory,
            Some(Duration::from_millis(200)),
        ));
        let mut tx = TransactionalCache::new(blocking.clone());

        assert_eq!(tx.get(&"k".into()).unwrap(), None);
        assert_eq!(blocking.locked_keys(), 1);

        tx.rollback();
        assert_eq!(blocking.locked_keys(), 0);
        assert_eq!(blocking.size().unwrap(), 0);
    }

    #[test]
    fn rollback_swallows_release_errors() {
        let memory = Arc::new(MemoryCache::new("orders"));
        let blocking = Arc::new(BlockingCache::new(memory));
        let mut tx = TransactionalCache::new(blocking.clone());

        assert_eq!(tx.get(&"k".into()).unwrap(), None);
        // Release the gate behind the unit of work's back.
        blocking.remove(&"k".into()).unwrap();

        tx.rollback();
        assert!(!tx.has_pending_changes());
    }
}
