//! Unit-of-work boundary across every cache a session touches.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::SharedCache;
use crate::error::CacheResult;
use crate::key::{CacheEntry, CacheKey};
use crate::transactional::TransactionalCache;

/// Lazily wraps each shared cache in a [`TransactionalCache`] the first time
/// it is used, and fans `commit`/`rollback` out to all of them.
///
/// Wrappers are keyed by the identity of the shared chain, not its id: two
/// distinct caches that happen to share an id get separate wrappers.
#[derive(Debug, Default)]
pub struct CacheCoordinator {
    caches: HashMap<usize, TransactionalCache>,
}

/// Address of the shared chain, stable while any handle to it is alive.
fn identity(cache: &SharedCache) -> usize {
    Arc::as_ptr(cache) as *const () as usize
}

impl CacheCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The unit-of-work wrapper for `cache`, created on first use.
    pub fn transactional(&mut self, cache: &SharedCache) -> &mut TransactionalCache {
        self.caches
            .entry(identity(cache))
            .or_insert_with(|| TransactionalCache::new(SharedCache::clone(cache)))
    }

    pub fn get(&mut self, cache: &SharedCache, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        self.transactional(cache).get(key)
    }

    pub fn put(&mut self, cache: &SharedCache, key: CacheKey, entry: CacheEntry) {
        self.transactional(cache).put(key, entry);
    }

    pub fn clear(&mut self, cache: &SharedCache) {
        self.transactional(cache).clear();
    }

    /// Number of caches touched since the coordinator was created.
    pub fn touched(&self) -> usize {
        self.caches.len()
    }

    /// Commit every touched cache. All of them are committed even if one
    /// fails; the first failure is returned.
    pub fn commit(&mut self) -> CacheResult<()> {
        let mut first_error = None;
        for cache in self.caches.values_mut() {
            if let Err(e) = cache.commit() {
                tracing::warn!(cache = %cache.id(), error = %e, "cache commit failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn rollback(&mut self) {
        for cache in self.caches.values_mut() {
            cache.rollback();
        }
    }
}
