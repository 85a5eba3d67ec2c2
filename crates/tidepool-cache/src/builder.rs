//! CacheSettings and the standard decorator chain.

use std::sync::Arc;
use std::time::Duration;

use tidepool_core::config::CacheSection;
use tidepool_core::duration::parse_duration_field;

use crate::blocking::BlockingCache;
use crate::cache::SharedCache;
use crate::memory::MemoryCache;
use crate::soft::{DEFAULT_MEMORY_BUDGET, DEFAULT_RETENTION_SIZE, SoftEvictingCache};

/// How one named cache is assembled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSettings {
    pub id: String,
    /// Wrap the chain in a [`BlockingCache`] (default: true).
    pub blocking: bool,
    /// Bound on waiting for another caller's miss. `None` waits forever.
    pub blocking_timeout: Option<Duration>,
    /// Strongly retained recent reads (default: 256).
    pub retention_size: usize,
    /// LRU bound on the leaf store. `None` is unbounded.
    pub max_entries: Option<usize>,
    /// Summed entry weight above which unretained entries are reclaimed
    /// (default: 4 MiB). `None` opts out of budget eviction.
    pub memory_budget: Option<usize>,
}

impl CacheSettings {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            blocking: true,
            blocking_timeout: None,
            retention_size: DEFAULT_RETENTION_SIZE,
            max_entries: None,
            memory_budget: Some(DEFAULT_MEMORY_BUDGET),
        }
    }

    /// Build settings from the `[cache]` section of tidepool.toml. A
    /// `memory_budget` of 0 disables budget eviction.
    pub fn from_section(id: impl Into<String>, section: &CacheSection) -> anyhow::Result<Self> {
        let defaults = Self::new(id);
        let blocking_timeout =
            parse_duration_field("blocking_timeout", section.blocking_timeout.as_deref())?
                .filter(|t| !t.is_zero());
        Ok(Self {
            blocking: section.blocking.unwrap_or(defaults.blocking),
            blocking_timeout,
            retention_size: section.retention_size.unwrap_or(defaults.retention_size),
            max_entries: section.max_entries.or(defaults.max_entries),
            memory_budget: match section.memory_budget {
                Some(0) => None,
                Some(budget) => Some(budget),
                None => defaults.memory_budget,
            },
            id: defaults.id,
        })
    }

    /// Assemble `Blocking → SoftEvicting → Memory` (blocking optional).
    pub fn build(&self) -> SharedCache {
        let memory: SharedCache = Arc::new(MemoryCache::with_capacity(&self.id, self.max_entries));
        let soft: SharedCache = Arc::new(
            SoftEvictingCache::new(memory)
                .with_retention_size(self.retention_size)
                .with_memory_budget(self.memory_budget),
        );
        let cache: SharedCache = if self.blocking {
            let blocking: SharedCache = Arc::new(BlockingCache::with_timeout(soft, self.blocking_timeout));
            blocking
        } else {
            soft
        };
        tracing::debug!(
            cache = %self.id,
            blocking = self.blocking,
            retention_size = self.retention_size,
            max_entries = ?self.max_entries,
            memory_budget = ?self.memory_budget,
            "built cache"
        );
        cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::key::{CacheEntry, CacheKey};

    #[test]
    fn defaults() {
        let settings = CacheSettings::new("users");
        assert!(settings.blocking);
        assert_eq!(settings.blocking_timeout, None);
        assert_eq!(settings.retention_size, 256);
        assert_eq!(settings.max_entries, None);
        assert_eq!(settings.memory_budget, Some(DEFAULT_MEMORY_BUDGET));
    }

    #[test]
    fn zero_memory_budget_opts_out() {
        let section = CacheSection {
            memory_budget: Some(0),
            ..CacheSection::default()
        };
        let settings = CacheSettings::from_section("users", &section).unwrap();
        assert_eq!(settings.memory_budget, None);
    }

    #[test]
    fn default_chain_evicts_under_churn() {
        let cache = CacheSettings::new("users").build();
        let payload = "x".repeat(64 * 1024);
        let entry = CacheEntry::found(&payload).unwrap();
        let count = 2 * DEFAULT_MEMORY_BUDGET / entry.weight() + 1;

        for i in 0..count {
            let key = CacheKey::from(format!("k{i}"));
            assert_eq!(cache.get(&key).unwrap(), None);
            cache.put(key, entry.clone()).unwrap();
        }

        let held = cache.size().unwrap();
        assert!(held < count);
        assert!(held * entry.weight() <= DEFAULT_MEMORY_BUDGET);
    }

    #[test]
    fn from_section_reads_every_field() {
        let section = CacheSection {
            blocking: Some(false),
            blocking_timeout: Some("250ms".to_string()),
            retention_size: Some(8),
            max_entries: Some(100),
            memory_budget: Some(4096),
        };
        let settings = CacheSettings::from_section("users", &section).unwrap();
        assert!(!settings.blocking);
        assert_eq!(settings.blocking_timeout, Some(Duration::from_millis(250)));
        assert_eq!(settings.retention_size, 8);
        assert_eq!(settings.max_entries, Some(100));
        assert_eq!(settings.memory_budget, Some(4096));
    }

    #[test]
    fn zero_blocking_timeout_waits_forever() {
        let section = CacheSection {
            blocking_timeout: Some("0s".to_string()),
            ..CacheSection::default()
        };
        let settings = CacheSettings::from_section("users", &section).unwrap();
        assert_eq!(settings.blocking_timeout, None);
    }

    #[test]
    fn from_section_rejects_bad_timeout() {
        let section = CacheSection {
            blocking_timeout: Some("soon".to_string()),
            ..CacheSection::default()
        };
        let err = CacheSettings::from_section("users", &section).unwrap_err();
        assert!(err.to_string().contains("blocking_timeout"));
    }

    #[test]
    fn built_chain_round_trips_through_every_layer() {
        let cache = CacheSettings::new("users").build();
        assert_eq!(cache.id(), "users");

        let key = CacheKey::from("k");
        assert_eq!(cache.get(&key).unwrap(), None);
        cache.put(key.clone(), CacheEntry::found(&1).unwrap()).unwrap();
        assert_eq!(cache.get(&key).unwrap(), Some(CacheEntry::found(&1).unwrap()));
        assert_eq!(cache.size().unwrap(), 1);
    }

    #[test]
    fn non_blocking_chain_allows_put_without_get() {
        let settings = CacheSettings {
            blocking: false,
            ..CacheSettings::new("users")
        };
        let cache = settings.build();
        cache.put("k".into(), CacheEntry::KnownAbsent).unwrap();
        assert_eq!(cache.size().unwrap(), 1);
    }
}
