//! Full-chain cache tests: concurrent units of work, each with its own
//! `CacheCoordinator`, sharing one chain built from `CacheSettings`.
//!
//! The test stack: `CacheCoordinator` → `TransactionalCache` → `BlockingCache`
//! → `SoftEvictingCache` → `MemoryCache`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Once};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tidepool_cache::{
    Cache, CacheCoordinator, CacheEntry, CacheError, CacheKey, CacheSettings, SharedCache,
};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing subscriber for debug output in CI.
/// Controlled by `RUST_LOG` env var (e.g. `RUST_LOG=tidepool_cache=debug`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

fn shared_cache(timeout: Option<Duration>) -> SharedCache {
    init_tracing();
    CacheSettings {
        blocking_timeout: timeout,
        ..CacheSettings::new("users")
    }
    .build()
}

fn user_key(id: u64) -> CacheKey {
    CacheKey::builder()
        .part("select_user_by_id")
        .value(&id)
        .unwrap()
        .build()
}

/// Look up a user through the cache, falling back to the "database".
fn load_user(
    coordinator: &mut CacheCoordinator,
    cache: &SharedCache,
    id: u64,
    queries: &AtomicUsize,
) -> Option<User> {
    let key = user_key(id);
    if let Some(entry) = coordinator.get(cache, &key).unwrap() {
        return entry.decode().unwrap();
    }
    queries.fetch_add(1, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(20));
    let user = (id < 100).then(|| User { id, name: format!("user-{id}") });
    if let Some(user) = &user {
        coordinator.put(cache, key, CacheEntry::found(user).unwrap());
    }
    user
}

#[test]
fn concurrent_units_of_work_query_once_per_key() {
    let cache = shared_cache(Some(Duration::from_secs(5)));
    let queries = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let queries = Arc::clone(&queries);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut coordinator = CacheCoordinator::new();
                barrier.wait();
                let user = load_user(&mut coordinator, &cache, 7, &queries);
                coordinator.commit().unwrap();
                user
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(
            handle.join().unwrap(),
            Some(User { id: 7, name: "user-7".to_string() })
        );
    }
    assert_eq!(queries.load(Ordering::SeqCst), 1);
}

#[test]
fn held_key_times_out_other_callers() {
    let cache = shared_cache(Some(Duration::from_millis(50)));
    let mut holder = CacheCoordinator::new();
    assert_eq!(holder.get(&cache, &"x".into()).unwrap(), None);

    let other = Arc::clone(&cache);
    let started = Instant::now();
    let result = thread::spawn(move || CacheCoordinator::new().get(&other, &"x".into()))
        .join()
        .unwrap();

    assert!(matches!(result, Err(CacheError::LockTimeout { .. })));
    assert!(started.elapsed() < Duration::from_secs(5));
    holder.rollback();
}

#[test]
fn rollback_unblocks_waiters_and_writes_nothing() {
    let cache = shared_cache(Some(Duration::from_secs(5)));
    let mut first = CacheCoordinator::new();
    let key = user_key(1);
    assert_eq!(first.get(&cache, &key).unwrap(), None);
    first.put(&cache, key.clone(), CacheEntry::found(&"stale").unwrap());

    let waiter = {
        let cache = Arc::clone(&cache);
        let key = key.clone();
        thread::spawn(move || {
            let mut second = CacheCoordinator::new();
            let seen = second.get(&cache, &key).unwrap();
            second.rollback();
            seen
        })
    };
    thread::sleep(Duration::from_millis(20));
    first.rollback();

    assert_eq!(waiter.join().unwrap(), None);
    assert_eq!(cache.size().unwrap(), 0);
}

#[test]
fn missing_row_is_cached_as_known_absent() {
    let cache = shared_cache(Some(Duration::from_secs(5)));
    let queries = AtomicUsize::new(0);

    let mut first = CacheCoordinator::new();
    assert_eq!(load_user(&mut first, &cache, 404, &queries), None);
    first.commit().unwrap();

    let mut second = CacheCoordinator::new();
    assert_eq!(load_user(&mut second, &cache, 404, &queries), None);
    second.commit().unwrap();

    assert_eq!(queries.load(Ordering::SeqCst), 1);
    assert_eq!(
        CacheCoordinator::new().get(&cache, &user_key(404)).unwrap(),
        Some(CacheEntry::KnownAbsent)
    );
}

#[test]
fn clear_then_commit_empties_shared_cache() {
    let cache = shared_cache(Some(Duration::from_secs(5)));
    let queries = AtomicUsize::new(0);
    let mut warmup = CacheCoordinator::new();
    for id in 1..=3 {
        load_user(&mut warmup, &cache, id, &queries);
    }
    warmup.commit().unwrap();
    assert_eq!(cache.size().unwrap(), 3);

    let mut writer = CacheCoordinator::new();
    writer.put(&cache, user_key(9), CacheEntry::found(&"buffered").unwrap());
    writer.clear(&cache);
    writer.commit().unwrap();

    assert_eq!(cache.size().unwrap(), 0);
}

#[test]
fn soft_layer_keeps_recent_reads_under_budget() {
    init_tracing();
    let cache = CacheSettings {
        retention_size: 2,
        memory_budget: Some(256),
        ..CacheSettings::new("products")
    }
    .build();

    let queries = AtomicUsize::new(0);
    let mut coordinator = CacheCoordinator::new();
    for id in 0..50 {
        load_user(&mut coordinator, &cache, id, &queries);
    }
    coordinator.commit().unwrap();

    // Reload two users, then read them again so they are retained.
    for id in [10, 20] {
        load_user(&mut coordinator, &cache, id, &queries);
    }
    coordinator.commit().unwrap();
    for id in [10, 20] {
        assert!(load_user(&mut coordinator, &cache, id, &queries).is_some());
    }
    coordinator.commit().unwrap();

    // Churn more writes through the budget.
    for id in 50..99 {
        load_user(&mut coordinator, &cache, id, &queries);
    }
    coordinator.commit().unwrap();

    assert!(cache.size().unwrap() < 99);
    let before = queries.load(Ordering::SeqCst);
    for id in [10, 20] {
        assert!(load_user(&mut coordinator, &cache, id, &queries).is_some());
    }
    coordinator.commit().unwrap();
    assert_eq!(queries.load(Ordering::SeqCst), before);
}
