use std::path::Path;

use tidepool_cache::CacheSettings;
use tidepool_core::{DataSource, TidepoolConfig};
use tidepool_pool::PoolConfig;

/// Cache id used for query results.
pub const CACHE_ID: &str = "rows";

/// A config file turned into the values the pool and cache are built from.
#[derive(Debug)]
pub struct Resolved {
    pub source: DataSource,
    pub pool: PoolConfig,
    pub cache: CacheSettings,
}

pub fn resolve(config: &TidepoolConfig) -> anyhow::Result<Resolved> {
    let pool = match &config.pool {
        Some(section) => PoolConfig::from_section(section)?,
        None => PoolConfig::default(),
    };
    let cache = match &config.cache {
        Some(section) => CacheSettings::from_section(CACHE_ID, section)?,
        None => CacheSettings::new(CACHE_ID),
    };
    if pool.max_active == 0 {
        anyhow::bail!("pool.max_active must be at least 1");
    }
    Ok(Resolved {
        source: DataSource::from_config(&config.datasource),
        pool,
        cache,
    })
}

pub fn check(path: &str, format: &str) -> anyhow::Result<()> {
    let config = TidepoolConfig::from_file(Path::new(path))?;
    let resolved = resolve(&config)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&to_json(&resolved))?),
        _ => print!("{}", format_text(&resolved)),
    }
    Ok(())
}

fn to_json(resolved: &Resolved) -> serde_json::Value {
    let pool = &resolved.pool;
    let cache = &resolved.cache;
    serde_json::json!({
        "datasource": {
            "url": resolved.source.url,
            "username": resolved.source.credentials.username,
            "password_set": resolved.source.credentials.password.is_some(),
            "fingerprint": resolved.source.fingerprint().short(),
        },
        "pool": {
            "max_active": pool.max_active,
            "max_idle": pool.max_idle,
            "max_checkout_time_ms": pool.max_checkout_time.as_millis() as u64,
            "time_to_wait_ms": pool.time_to_wait.as_millis() as u64,
            "bad_connection_tolerance": pool.bad_connection_tolerance,
            "ping_enabled": pool.ping_enabled,
            "ping_query": pool.ping_query,
            "ping_connections_not_used_for_ms": pool.ping_connections_not_used_for.as_millis() as u64,
        },
        "cache": {
            "id": cache.id,
            "blocking": cache.blocking,
            "blocking_timeout_ms": cache.blocking_timeout.map(|t| t.as_millis() as u64),
            "retention_size": cache.retention_size,
            "max_entries": cache.max_entries,
            "memory_budget": cache.memory_budget,
        },
    })
}

fn format_text(resolved: &Resolved) -> String {
    let pool = &resolved.pool;
    let cache = &resolved.cache;
    let mut out = String::new();
    out.push_str(&format!("✓ {} ({})\n", resolved.source.url, resolved.source.fingerprint()));
    out.push_str(&format!(
        "  pool: max_active={} max_idle={} max_checkout_time={:?} time_to_wait={:?} tolerance={}\n",
        pool.max_active,
        pool.max_idle,
        pool.max_checkout_time,
        pool.time_to_wait,
        pool.bad_connection_tolerance,
    ));
    if pool.ping_enabled {
        out.push_str(&format!(
            "  ping: {:?} after {:?} idle\n",
            pool.ping_query, pool.ping_connections_not_used_for
        ));
    }
    out.push_str(&format!(
        "  cache {}: blocking={} timeout={} retention={} max_entries={} budget={}\n",
        cache.id,
        cache.blocking,
        cache.blocking_timeout.map_or("none".to_string(), |t| format!("{t:?}")),
        cache.retention_size,
        cache.max_entries.map_or("unbounded".to_string(), |n| n.to_string()),
        cache.memory_budget.map_or("unbounded".to_string(), |n| n.to_string()),
    ));
    out
}
