//! Concurrent workload against a simulated database.
//!
//! Workers share one [`ConnectionPoolManager`] and one cache chain. Each
//! iteration is its own unit of work: check out a connection, look the row
//! up through a [`CacheCoordinator`], query on a miss, commit, release.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tidepool_cache::{CacheCoordinator, CacheEntry, CacheKey, SharedCache};
use tidepool_core::{Credentials, DataSource, TidepoolConfig};
use tidepool_pool::{
    Connection, ConnectionFactory, ConnectionPoolManager, PoolStatus, PooledConnection,
};

use super::check::{CACHE_ID, Resolved, resolve};

#[derive(Clone, Copy, Debug)]
pub struct SimulateOptions {
    pub workers: usize,
    pub iterations: usize,
    pub rows: u64,
}

// ── Simulated database ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct Server {
    opened: AtomicU64,
    closed: AtomicU64,
    statements: AtomicU64,
}

#[derive(Debug)]
struct SimulatedConnection {
    server: Arc<Server>,
    auto_commit: bool,
    closed: bool,
}

impl Connection for SimulatedConnection {
    fn is_closed(&self) -> Result<bool, String> {
        Ok(self.closed)
    }

    fn auto_commit(&self) -> Result<bool, String> {
        Ok(self.auto_commit)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), String> {
        self.auto_commit = enabled;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn execute(&mut self, _statement: &str) -> Result<(), String> {
        if self.closed {
            return Err("connection is closed".to_string());
        }
        self.server.statements.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&mut self) -> Result<(), String> {
        if !self.closed {
            self.closed = true;
            self.server.closed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

struct SimulatedFactory {
    server: Arc<Server>,
}

impl ConnectionFactory for SimulatedFactory {
    fn open(
        &self,
        source: &DataSource,
        _credentials: &Credentials,
    ) -> Result<Box<dyn Connection>, String> {
        self.server.opened.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(url = %source.url, "simulated connect");
        Ok(Box::new(SimulatedConnection {
            server: Arc::clone(&self.server),
            auto_commit: true,
            closed: false,
        }))
    }
}

/// Every fourth row does not exist.
fn row_exists(row_id: u64) -> bool {
    row_id % 4 != 3
}

// ── Workload ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Cached,
    CachedAbsent,
    Queried,
    QueriedAbsent,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    cached: u64,
    cached_absent: u64,
    queried: u64,
    queried_absent: u64,
}

impl Tally {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Cached => self.cached += 1,
            Outcome::CachedAbsent => self.cached_absent += 1,
            Outcome::Queried => self.queried += 1,
            Outcome::QueriedAbsent => self.queried_absent += 1,
        }
    }

    fn merge(&mut self, other: Tally) {
        self.cached += other.cached;
        self.cached_absent += other.cached_absent;
        self.queried += other.queried;
        self.queried_absent += other.queried_absent;
    }

    fn total(&self) -> u64 {
        self.cached + self.cached_absent + self.queried + self.queried_absent
    }
}

fn row_key(row_id: u64) -> anyhow::Result<CacheKey> {
    Ok(CacheKey::builder().part("select_row_by_id").value(&row_id)?.build())
}

/// Query the row after a miss and buffer what was found.
fn load_row(
    conn: &PooledConnection,
    coordinator: &mut CacheCoordinator,
    cache: &SharedCache,
    key: CacheKey,
    row_id: u64,
) -> anyhow::Result<Outcome> {
    let statement = format!("SELECT id, name FROM rows WHERE id = {row_id}");
    conn.with_connection(|c| c.execute(&statement))?;
    if !row_exists(row_id) {
        return Ok(Outcome::QueriedAbsent);
    }
    let row = serde_json::json!({ "id": row_id, "name": format!("row-{row_id}") });
    coordinator.put(cache, key, CacheEntry::found(&row)?);
    Ok(Outcome::Queried)
}

/// One unit of work. Runs on a blocking thread: a cache miss holds the
/// key's gate until commit, and other workers wait on it synchronously.
fn lookup(conn: &PooledConnection, cache: &SharedCache, row_id: u64) -> anyhow::Result<Outcome> {
    let mut coordinator = CacheCoordinator::new();
    let key = row_key(row_id)?;

    let outcome = match coordinator.get(cache, &key)? {
        Some(entry) if entry.is_absent() => Outcome::CachedAbsent,
        Some(_) => Outcome::Cached,
        None => match load_row(conn, &mut coordinator, cache, key, row_id) {
            Ok(outcome) => outcome,
            Err(e) => {
                // The miss left the key's gate closed.
                coordinator.rollback();
                return Err(e);
            }
        },
    };
    coordinator.commit()?;
    Ok(outcome)
}

async fn worker(
    pool: Arc<ConnectionPoolManager>,
    cache: SharedCache,
    index: usize,
    options: SimulateOptions,
) -> anyhow::Result<Tally> {
    let mut tally = Tally::default();
    for i in 0..options.iterations {
        let row_id = ((index * 7919 + i * 31) as u64) % options.rows.max(1);
        let conn = pool.acquire_default().await?;

        let cache = Arc::clone(&cache);
        let (conn, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = lookup(&conn, &cache, row_id);
            (conn, outcome)
        })
        .await?;

        pool.release(conn).await;
        tally.record(outcome?);
    }
    Ok(tally)
}

struct Report {
    status: PoolStatus,
    tally: Tally,
    cache_size: usize,
    opened: u64,
    closed: u64,
    statements: u64,
    elapsed_ms: u64,
}

async fn run(resolved: Resolved, options: SimulateOptions) -> anyhow::Result<Report> {
    let server = Arc::new(Server::default());
    let factory = Arc::new(SimulatedFactory { server: Arc::clone(&server) });
    let pool = Arc::new(ConnectionPoolManager::new(resolved.source, resolved.pool, factory));
    let cache = resolved.cache.build();

    tracing::info!(
        workers = options.workers,
        iterations = options.iterations,
        rows = options.rows,
        cache = CACHE_ID,
        "starting simulation"
    );
    let started = Instant::now();

    let handles: Vec<_> = (0..options.workers)
        .map(|index| {
            tokio::spawn(worker(Arc::clone(&pool), Arc::clone(&cache), index, options))
        })
        .collect();

    let mut tally = Tally::default();
    for handle in handles {
        tally.merge(handle.await??);
    }
    let elapsed_ms = started.elapsed().as_millis() as u64;

    pool.log_stats().await;
    let status = pool.status().await;
    pool.shutdown().await;

    Ok(Report {
        status,
        tally,
        cache_size: cache.size()?,
        opened: server.opened.load(Ordering::Relaxed),
        closed: server.closed.load(Ordering::Relaxed),
        statements: server.statements.load(Ordering::Relaxed),
        elapsed_ms,
    })
}

pub fn simulate(config: Option<&str>, options: SimulateOptions, format: &str) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => TidepoolConfig::from_file(Path::new(path))?,
        None => TidepoolConfig::scaffold("sim://localhost/tidepool", "sim"),
    };
    let resolved = resolve(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let report = runtime.block_on(run(resolved, options))?;

    match format {
        "json" => {
            let json = serde_json::json!({
                "elapsed_ms": report.elapsed_ms,
                "pool": report.status,
                "cache": {
                    "id": CACHE_ID,
                    "size": report.cache_size,
                    "hits": report.tally.cached,
                    "known_absent_hits": report.tally.cached_absent,
                    "misses": report.tally.queried + report.tally.queried_absent,
                },
                "database": {
                    "opened": report.opened,
                    "closed": report.closed,
                    "statements": report.statements,
                },
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            println!("{}", report.status);
            println!("=== workload ===");
            println!(" units_of_work                  {}", report.tally.total());
            println!(" cache_hits                     {}", report.tally.cached);
            println!(" known_absent_hits              {}", report.tally.cached_absent);
            println!(" rows_queried                   {}", report.tally.queried);
            println!(" absent_rows_queried            {}", report.tally.queried_absent);
            println!(" cache_size                     {}", report.cache_size);
            println!(" connections_opened             {}", report.opened);
            println!(" connections_closed             {}", report.closed);
            println!(" elapsed                        {}ms", report.elapsed_ms);
        }
    }
    Ok(())
}
