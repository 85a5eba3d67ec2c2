//! Single-flight decorator: at most one in-flight miss per key.
//!
//! A `get` that misses keeps the key's gate closed until the same caller
//! `put`s the computed value (or `remove`s the key to give up). Concurrent
//! `get`s on that key block on the gate instead of all recomputing the
//! value from the source of truth.
//!
//! ```text
//! get(k)  → insert gate for k if absent, else wait for it → delegate.get
//!             → hit  → open gate
//!             → miss → gate stays closed, caller computes the value
//! put(k)  → delegate.put → open gate
//! remove(k)            → open gate (delegate untouched)
//! ```
//!
//! Without a timeout, a caller that misses and never calls `put` or
//! `remove` blocks every other caller on that key forever.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex};

use crate::cache::{Cache, SharedCache};
use crate::error::{CacheError, CacheResult};
use crate::key::{CacheEntry, CacheKey};

/// One-shot latch. Opening it wakes every waiter.
struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            open: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    /// Block until opened. Returns false if `deadline` passed first.
    fn wait(&self, deadline: Option<Instant>) -> bool {
        let mut open = self.open.lock();
        while !*open {
            match deadline {
                None => self.cv.wait(&mut open),
                Some(deadline) => {
                    if self.cv.wait_until(&mut open, deadline).timed_out() {
                        return *open;
                    }
                }
            }
        }
        true
    }

    fn release(&self) {
        *self.open.lock() = true;
        self.cv.notify_all();
    }
}

pub struct BlockingCache {
    delegate: SharedCache,
    gates: DashMap<CacheKey, Arc<Gate>>,
    /// `None` or zero waits forever.
    timeout: Mutex<Option<Duration>>,
}

impl BlockingCache {
    pub fn new(delegate: SharedCache) -> Self {
        Self {
            delegate,
            gates: DashMap::new(),
            timeout: Mutex::new(None),
        }
    }

    pub fn with_timeout(delegate: SharedCache, timeout: Option<Duration>) -> Self {
        let cache = Self::new(delegate);
        cache.set_timeout(timeout);
        cache
    }

    pub fn timeout(&self) -> Option<Duration> {
        *self.timeout.lock()
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) {
        *self.timeout.lock() = timeout.filter(|t| !t.is_zero());
    }

    /// Number of keys whose gate is currently held.
    pub fn locked_keys(&self) -> usize {
        self.gates.len()
    }

    fn acquire(&self, key: &CacheKey) -> CacheResult<()> {
        let timeout = self.timeout();
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            // The entry guard locks the shard; it must be gone before waiting.
            let gate = match self.gates.entry(key.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::new(Gate::new()));
                    return Ok(());
                }
                Entry::Occupied(occupied) => Arc::clone(occupied.get()),
            };

            tracing::trace!(cache = %self.id(), key = %key, "waiting for in-flight miss");
            if !gate.wait(deadline) {
                return Err(CacheError::LockTimeout {
                    key: key.clone(),
                    cache: self.id().to_string(),
                    timeout: timeout.unwrap_or_default(),
                });
            }
            // Woken: race the other waiters for the next gate.
        }
    }

    fn release(&self, key: &CacheKey) -> CacheResult<()> {
        match self.gates.remove(key) {
            Some((_, gate)) => {
                gate.release();
                Ok(())
            }
            None => {
                tracing::error!(
                    cache = %self.id(),
                    key = %key,
                    "released a key that was never locked"
                );
                Err(CacheError::InvalidGateRelease {
                    key: key.clone(),
                    cache: self.id().to_string(),
                })
            }
        }
    }
}

impl Cache for BlockingCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn size(&self) -> CacheResult<usize> {
        self.delegate.size()
    }

    /// A hit opens the gate before returning. A miss leaves it closed for
    /// this caller to `put` or `remove`.
    fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        self.acquire(key)?;
        match self.delegate.get(key) {
            Ok(Some(entry)) => {
                self.release(key)?;
                Ok(Some(entry))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.release(key)?;
                Err(e)
            }
        }
    }

    fn put(&self, key: CacheKey, entry: CacheEntry) -> CacheResult<()> {
        let written = self.delegate.put(key.clone(), entry);
        self.release(&key)?;
        written
    }

    /// Ungated; never waits on another caller's miss.
    fn contains_key(&self, key: &CacheKey) -> CacheResult<bool> {
        self.delegate.contains_key(key)
    }

    /// Only opens the gate. The delegate is not touched.
    fn remove(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        self.release(key)?;
        Ok(None)
    }

    fn clear(&self) -> CacheResult<()> {
        self.delegate.clear()
    }
}

impl std::fmt::Debug for BlockingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingCache")
            .field("id", &self.id())
            .field("timeout", &self.timeout())
            .field("locked_keys", &self.gates.len())
            .finish_non_exhaustive()
    }
}
