//! PoolConfig: sizing, overdue and liveness-probe policy.

use std::time::Duration;

use serde::Serialize;
use tidepool_core::config::PoolSection;
use tidepool_core::duration::parse_duration_field;

/// Ping query used until one is configured.
pub const NO_PING_QUERY: &str = "NO PING QUERY SET";

/// Configuration for the connection pool manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PoolConfig {
    /// Maximum connections checked out at once (default: 10).
    pub max_active: usize,
    /// Maximum connections retained in the idle set (default: 5).
    pub max_idle: usize,
    /// Checkout age at which an active connection may be reclaimed (default: 20s).
    pub max_checkout_time: Duration,
    /// Bound on a single wait for a free slot (default: 20s). Zero waits
    /// until a connection is released.
    pub time_to_wait: Duration,
    /// Extra bad connections tolerated per acquire beyond `max_idle` (default: 3).
    pub bad_connection_tolerance: usize,
    /// Whether idle-long-enough connections are probed with `ping_query` (default: false).
    pub ping_enabled: bool,
    /// Cheap statement run to probe a connection.
    pub ping_query: String,
    /// Connections used more recently than this are not probed (default: 0).
    pub ping_connections_not_used_for: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 10,
            max_idle: 5,
            max_checkout_time: Duration::from_secs(20),
            time_to_wait: Duration::from_secs(20),
            bad_connection_tolerance: 3,
            ping_enabled: false,
            ping_query: NO_PING_QUERY.to_string(),
            ping_connections_not_used_for: Duration::ZERO,
        }
    }
}

impl PoolConfig {
    /// Build a `PoolConfig` from the `[pool]` section of tidepool.toml,
    /// falling back to defaults for anything left out.
    pub fn from_section(section: &PoolSection) -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_active: section.max_active.unwrap_or(defaults.max_active),
            max_idle: section.max_idle.unwrap_or(defaults.max_idle),
            max_checkout_time: parse_duration_field(
                "max_checkout_time",
                section.max_checkout_time.as_deref(),
            )?
            .unwrap_or(defaults.max_checkout_time),
            time_to_wait: parse_duration_field("time_to_wait", section.time_to_wait.as_deref())?
                .unwrap_or(defaults.time_to_wait),
            bad_connection_tolerance: section
                .bad_connection_tolerance
                .unwrap_or(defaults.bad_connection_tolerance),
            ping_enabled: section.ping_enabled.unwrap_or(defaults.ping_enabled),
            ping_query: section.ping_query.clone().unwrap_or(defaults.ping_query),
            ping_connections_not_used_for: parse_duration_field(
                "ping_connections_not_used_for",
                section.ping_connections_not_used_for.as_deref(),
            )?
            .unwrap_or(defaults.ping_connections_not_used_for),
        })
    }

    /// Number of bad connections a single acquire may discard before failing.
    pub fn local_bad_connection_limit(&self) -> usize {
        self.max_idle + self.bad_connection_tolerance
    }
}
