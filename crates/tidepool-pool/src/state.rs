//! Pool state guarded by the manager's single lock, and the statistics
//! snapshot derived from it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tidepool_core::{DataSource, Fingerprint};

use crate::config::PoolConfig;
use crate::connection::{Checkout, Detached};

/// Raw counters. Averages are derived in [`PoolStats`], never stored.
#[derive(Debug, Default, Clone)]
pub(crate) struct Counters {
    pub request_count: u64,
    pub accumulated_request_time: Duration,
    pub accumulated_checkout_time: Duration,
    pub claimed_overdue_count: u64,
    pub accumulated_overdue_checkout_time: Duration,
    pub accumulated_wait_time: Duration,
    pub had_to_wait_count: u64,
    pub bad_connection_count: u64,
}

#[derive(Debug)]
pub(crate) struct PoolState {
    pub source: DataSource,
    pub config: PoolConfig,
    /// Front-removed on acquire, back-inserted on release.
    pub idle: VecDeque<Detached>,
    /// Oldest checkout first.
    pub active: VecDeque<Arc<Checkout>>,
    pub counters: Counters,
    pub expected_fingerprint: Fingerprint,
    pub next_physical_id: u64,
    /// Set by `shutdown()`; acquire fails from then on.
    pub closed: bool,
}

impl PoolState {
    pub fn new(source: DataSource, config: PoolConfig) -> Self {
        let expected_fingerprint = source.fingerprint();
        Self {
            source,
            config,
            idle: VecDeque::new(),
            active: VecDeque::new(),
            counters: Counters::default(),
            expected_fingerprint,
            next_physical_id: 1,
            closed: false,
        }
    }

    pub fn allocate_physical_id(&mut self) -> u64 {
        let id = self.next_physical_id;
        self.next_physical_id += 1;
        id
    }

    /// Remove a checkout from the active set. Returns false if it was no
    /// longer there (reclaimed or force-closed in the meantime).
    pub fn remove_active(&mut self, checkout: &Arc<Checkout>) -> bool {
        match self.active.iter().position(|c| Arc::ptr_eq(c, checkout)) {
            Some(index) => {
                self.active.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.counters;
        PoolStats {
            active: self.active.len(),
            idle: self.idle.len(),
            request_count: c.request_count,
            average_request_time_ms: average_ms(c.accumulated_request_time, c.request_count),
            average_checkout_time_ms: average_ms(c.accumulated_checkout_time, c.request_count),
            claimed_overdue: c.claimed_overdue_count,
            average_overdue_checkout_time_ms: average_ms(
                c.accumulated_overdue_checkout_time,
                c.claimed_overdue_count,
            ),
            had_to_wait: c.had_to_wait_count,
            average_wait_time_ms: average_ms(c.accumulated_wait_time, c.had_to_wait_count),
            bad_connection_count: c.bad_connection_count,
        }
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            url: self.source.url.clone(),
            username: self.source.credentials.username.clone(),
            password_set: self.source.credentials.password.is_some(),
            config: self.config.clone(),
            stats: self.stats(),
        }
    }
}

fn average_ms(total: Duration, count: u64) -> u64 {
    if count == 0 {
        0
    } else {
        (total.as_millis() / u128::from(count)) as u64
    }
}

/// Live counters for operational monitoring. Times are in milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections currently checked out.
    pub active: usize,
    /// Connections sitting in the idle set.
    pub idle: usize,
    pub request_count: u64,
    pub average_request_time_ms: u64,
    pub average_checkout_time_ms: u64,
    /// Active connections reclaimed because they were checked out too long.
    pub claimed_overdue: u64,
    pub average_overdue_checkout_time_ms: u64,
    /// Acquire calls that had to wait at least once.
    pub had_to_wait: u64,
    pub average_wait_time_ms: u64,
    pub bad_connection_count: u64,
}

/// Configuration plus statistics snapshot. The password is never included.
#[derive(Clone, Debug, Serialize)]
pub struct PoolStatus {
    pub url: String,
    pub username: Option<String>,
    pub password_set: bool,
    pub config: PoolConfig,
    pub stats: PoolStats,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cfg = &self.config;
        let s = &self.stats;
        writeln!(f, "=== configuration ===")?;
        writeln!(f, " url                            {}", self.url)?;
        writeln!(f, " username                       {}", self.username.as_deref().unwrap_or("NULL"))?;
        writeln!(f, " password                       {}", if self.password_set { "************" } else { "NULL" })?;
        writeln!(f, " max_active                     {}", cfg.max_active)?;
        writeln!(f, " max_idle                       {}", cfg.max_idle)?;
        writeln!(f, " max_checkout_time              {:?}", cfg.max_checkout_time)?;
        writeln!(f, " time_to_wait                   {:?}", cfg.time_to_wait)?;
        writeln!(f, " bad_connection_tolerance       {}", cfg.bad_connection_tolerance)?;
        writeln!(f, " ping_enabled                   {}", cfg.ping_enabled)?;
        writeln!(f, " ping_query                     {}", cfg.ping_query)?;
        writeln!(f, " ping_connections_not_used_for  {:?}", cfg.ping_connections_not_used_for)?;
        writeln!(f, "=== status ===")?;
        writeln!(f, " active                         {}", s.active)?;
        writeln!(f, " idle                           {}", s.idle)?;
        writeln!(f, " request_count                  {}", s.request_count)?;
        writeln!(f, " average_request_time           {}ms", s.average_request_time_ms)?;
        writeln!(f, " average_checkout_time          {}ms", s.average_checkout_time_ms)?;
        writeln!(f, " claimed_overdue                {}", s.claimed_overdue)?;
        writeln!(f, " average_overdue_checkout_time  {}ms", s.average_overdue_checkout_time_ms)?;
        writeln!(f, " had_to_wait                    {}", s.had_to_wait)?;
        writeln!(f, " average_wait_time              {}ms", s.average_wait_time_ms)?;
        write!(f, " bad_connection_count           {}", s.bad_connection_count)
    }
}
