//! The cache capability shared by the leaf store and every decorator.

use std::sync::Arc;

use crate::error::CacheResult;
use crate::key::{CacheEntry, CacheKey};

/// A thread-safe key/value store identified by `id`.
///
/// Decorators wrap an `Arc<dyn Cache>` and forward to it, so a chain such as
/// blocking → soft-evicting → memory is itself a `Cache`.
pub trait Cache: Send + Sync {
    /// Identity of the cache, shared by every layer of one chain.
    fn id(&self) -> &str;

    /// Number of entries currently held.
    fn size(&self) -> CacheResult<usize>;

    /// `Ok(None)` is a miss. `Ok(Some(CacheEntry::KnownAbsent))` is a hit
    /// recording that the source of truth has no such row.
    fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;

    fn put(&self, key: CacheKey, entry: CacheEntry) -> CacheResult<()>;

    /// Whether `key` is held, without counting as an access. Layers that
    /// gate or reorder on `get` override this to bypass that.
    fn contains_key(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn remove(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;

    fn clear(&self) -> CacheResult<()>;
}

/// Shared handle to a cache chain.
pub type SharedCache = Arc<dyn Cache>;
