//! ConnectionPoolManager: acquire/release over a bounded set of connections.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tidepool_core::{Credentials, DataSource};
use tokio::sync::{Mutex, Notify};

use crate::config::PoolConfig;
use crate::connection::{
    Checkout, ConnectionFactory, Detached, Physical, PooledConnection, rollback_if_needed,
};
use crate::error::{PoolError, PoolResult};
use crate::state::{PoolState, PoolStats, PoolStatus};

/// Hands out pooled connections to one data source.
///
/// All pool state (idle set, active set, counters, configuration) lives
/// behind a single lock. A caller that finds the pool full and nothing
/// overdue waits on `released` for at most `time_to_wait`, with the lock
/// dropped while waiting, then retries.
///
/// Any configuration change force-closes every connection; connections are
/// never reconfigured in place. Call [`shutdown`](Self::shutdown) when done;
/// dropping the manager does not close physical connections.
pub struct ConnectionPoolManager {
    state: Mutex<PoolState>,
    /// Signalled on every release and whenever the pool is reset.
    released: Notify,
    factory: Arc<dyn ConnectionFactory>,
}

impl ConnectionPoolManager {
    /// Create a new `ConnectionPoolManager` for the data source.
    pub fn new(source: DataSource, config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            state: Mutex::new(PoolState::new(source, config)),
            released: Notify::new(),
            factory,
        }
    }

    /// Acquire a connection under the configured credentials.
    pub async fn acquire_default(&self) -> PoolResult<PooledConnection> {
        let credentials = self.state.lock().await.source.credentials.clone();
        self.acquire(&credentials).await
    }

    /// Acquire a connection, fingerprinted with the requested credentials.
    ///
    /// Tries, in order: the oldest idle connection, a freshly opened one if
    /// fewer than `max_active` are checked out, the oldest active one if it
    /// is overdue. Otherwise waits for a release and starts over. Each
    /// candidate is validated; bad ones are discarded and the loop retried
    /// until `max_idle + bad_connection_tolerance` of them have been seen.
    pub async fn acquire(&self, credentials: &Credentials) -> PoolResult<PooledConnection> {
        let started = Instant::now();
        let mut counted_wait = false;
        let mut local_bad_connections = 0usize;

        loop {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(PoolError::Exhausted("pool has been shut down".to_string()));
            }

            let candidate = if let Some(idle) = state.idle.pop_front() {
                tracing::debug!(id = idle.physical_id, "checked out connection from pool");
                idle
            } else if state.active.len() < state.config.max_active {
                self.open_connection(&mut state, credentials)?
            } else if let Some(overdue) = Self::claim_overdue(&mut state) {
                overdue
            } else {
                if !counted_wait {
                    state.counters.had_to_wait_count += 1;
                    counted_wait = true;
                }
                let time_to_wait = state.config.time_to_wait;
                tracing::debug!(?time_to_wait, "waiting for connection");

                // Register interest before the lock is dropped so a release
                // in between is not missed.
                let notified = self.released.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                drop(state);

                let wait_started = Instant::now();
                if time_to_wait.is_zero() {
                    notified.await;
                } else {
                    let _ = tokio::time::timeout(time_to_wait, notified).await;
                }
                self.state.lock().await.counters.accumulated_wait_time += wait_started.elapsed();
                continue;
            };

            let physical_id = candidate.physical_id;
            match Self::validate(&state.config, &candidate.physical, physical_id, candidate.last_used_at) {
                Ok(()) => {
                    let fingerprint = state.source.fingerprint_for(credentials);
                    if let Err(e) = rollback_if_needed(candidate.physical.lock().as_mut()) {
                        tracing::debug!(id = physical_id, error = %e, "rollback on checkout failed");
                    }
                    let checkout = Arc::new(Checkout::new(candidate, fingerprint));
                    state.active.push_back(Arc::clone(&checkout));
                    state.counters.request_count += 1;
                    state.counters.accumulated_request_time += started.elapsed();
                    tracing::debug!(
                        id = physical_id,
                        fingerprint = %checkout.fingerprint,
                        active = state.active.len(),
                        idle = state.idle.len(),
                        "connection acquired"
                    );
                    return Ok(PooledConnection::new(checkout));
                }
                Err(e) => {
                    tracing::debug!(error = %e, "discarded candidate, getting another connection");
                    let _ = candidate.physical.lock().close();
                    state.counters.bad_connection_count += 1;
                    local_bad_connections += 1;
                    if local_bad_connections > state.config.local_bad_connection_limit() {
                        tracing::debug!("could not get a good connection to the database");
                        return Err(PoolError::Exhausted(format!(
                            "could not get a good connection after {local_bad_connections} bad connections"
                        )));
                    }
                }
            }
        }
    }

    /// Return a connection to the pool.
    ///
    /// A valid connection goes back to the idle set if there is room and it
    /// was checked out under the current fingerprint; otherwise it is closed.
    /// An invalid one is only counted: it was already reclaimed, closed, or
    /// failed its probe.
    pub async fn release(&self, connection: PooledConnection) {
        let checkout = connection.checkout;
        let physical_id = checkout.physical_id;
        let mut state = self.state.lock().await;
        state.remove_active(&checkout);

        let valid = checkout.is_valid()
            && Self::validate(&state.config, &checkout.physical, physical_id, checkout.last_used_at)
                .is_ok();
        if !valid {
            checkout.invalidate();
            tracing::debug!(id = physical_id, "a bad connection attempted to return to the pool, discarding");
            state.counters.bad_connection_count += 1;
            drop(state);
            self.released.notify_one();
            return;
        }

        state.counters.accumulated_checkout_time += checkout.checkout_time();
        let reusable = state.idle.len() < state.config.max_idle
            && checkout.fingerprint == state.expected_fingerprint;
        {
            let mut conn = checkout.physical.lock();
            checkout.invalidate();
            if let Err(e) = rollback_if_needed(conn.as_mut()) {
                tracing::debug!(id = physical_id, error = %e, "rollback on release failed");
            }
            if !reusable {
                if let Err(e) = conn.close() {
                    tracing::debug!(id = physical_id, error = %e, "close on release failed");
                }
            }
        }

        if reusable {
            state.idle.push_back(checkout.detach());
            tracing::debug!(id = physical_id, idle = state.idle.len(), "returned connection to pool");
        } else {
            tracing::debug!(id = physical_id, "closed connection");
        }
        // Either an idle connection or an active slot just became available.
        drop(state);
        self.released.notify_one();
    }

    /// Invalidate and close every active and idle connection, and recompute
    /// the expected fingerprint from the current configuration.
    pub async fn force_close_all(&self) {
        let mut state = self.state.lock().await;
        Self::close_all_locked(&mut state);
        drop(state);
        self.released.notify_waiters();
    }

    /// Close every connection and refuse further acquires. Callers waiting
    /// for a connection fail with [`PoolError::Exhausted`].
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        Self::close_all_locked(&mut state);
        tracing::info!(
            requests = state.counters.request_count,
            bad_connections = state.counters.bad_connection_count,
            "connection pool shut down"
        );
        drop(state);
        self.released.notify_waiters();
    }

    pub async fn is_shut_down(&self) -> bool {
        self.state.lock().await.closed
    }

    // ── Reconfiguration ─────────────────────────────────────────────

    /// Apply a configuration change, then force-close every connection.
    pub async fn reconfigure(&self, change: impl FnOnce(&mut DataSource, &mut PoolConfig)) {
        let mut state = self.state.lock().await;
        let PoolState { source, config, .. } = &mut *state;
        change(source, config);
        Self::close_all_locked(&mut state);
        drop(state);
        self.released.notify_waiters();
    }

    pub async fn set_url(&self, url: &str) {
        self.reconfigure(|source, _| source.url = url.to_string()).await;
    }

    pub async fn set_credentials(&self, credentials: Credentials) {
        self.reconfigure(|source, _| source.credentials = credentials).await;
    }

    pub async fn set_driver_properties(&self, properties: BTreeMap<String, String>) {
        self.reconfigure(|source, _| source.properties = properties).await;
    }

    pub async fn set_default_auto_commit(&self, auto_commit: Option<bool>) {
        self.reconfigure(|source, _| source.auto_commit = auto_commit).await;
    }

    pub async fn set_max_active(&self, max_active: usize) {
        self.reconfigure(|_, config| config.max_active = max_active).await;
    }

    pub async fn set_max_idle(&self, max_idle: usize) {
        self.reconfigure(|_, config| config.max_idle = max_idle).await;
    }

    pub async fn set_max_checkout_time(&self, max_checkout_time: Duration) {
        self.reconfigure(|_, config| config.max_checkout_time = max_checkout_time).await;
    }

    pub async fn set_time_to_wait(&self, time_to_wait: Duration) {
        self.reconfigure(|_, config| config.time_to_wait = time_to_wait).await;
    }

    pub async fn set_ping_enabled(&self, enabled: bool) {
        self.reconfigure(|_, config| config.ping_enabled = enabled).await;
    }

    pub async fn set_ping_query(&self, query: &str) {
        self.reconfigure(|_, config| config.ping_query = query.to_string()).await;
    }

    pub async fn set_ping_connections_not_used_for(&self, threshold: Duration) {
        self.reconfigure(|_, config| config.ping_connections_not_used_for = threshold).await;
    }

    /// Tolerance only affects future acquires, so connections stay open.
    pub async fn set_bad_connection_tolerance(&self, tolerance: usize) {
        self.state.lock().await.config.bad_connection_tolerance = tolerance;
    }

    // ── Diagnostics ─────────────────────────────────────────────────

    pub async fn config(&self) -> PoolConfig {
        self.state.lock().await.config.clone()
    }

    pub async fn stats(&self) -> PoolStats {
        self.state.lock().await.stats()
    }

    /// Configuration and statistics snapshot, password masked.
    pub async fn status(&self) -> PoolStatus {
        self.state.lock().await.status()
    }

    /// Log pool statistics at `tracing::info` level.
    pub async fn log_stats(&self) {
        let state = self.state.lock().await;
        let stats = state.stats();
        tracing::info!(
            url = %state.source.url,
            active = stats.active,
            idle = stats.idle,
            requests = stats.request_count,
            avg_request_ms = stats.average_request_time_ms,
            avg_checkout_ms = stats.average_checkout_time_ms,
            claimed_overdue = stats.claimed_overdue,
            had_to_wait = stats.had_to_wait,
            avg_wait_ms = stats.average_wait_time_ms,
            bad_connections = stats.bad_connection_count,
            "pool statistics"
        );
    }

    // ── Internals (pool lock held) ──────────────────────────────────

    fn open_connection(&self, state: &mut PoolState, credentials: &Credentials) -> PoolResult<Detached> {
        let mut conn = self
            .factory
            .open(&state.source, credentials)
            .map_err(PoolError::Connect)?;
        if let Some(auto_commit) = state.source.auto_commit {
            conn.set_auto_commit(auto_commit).map_err(PoolError::Connect)?;
        }
        let physical_id = state.allocate_physical_id();
        tracing::debug!(id = physical_id, url = %state.source.url, "created connection");
        let now = Instant::now();
        Ok(Detached {
            physical_id,
            physical: Arc::new(parking_lot::Mutex::new(conn)),
            created_at: now,
            last_used_at: now,
        })
    }

    /// Take over the oldest active connection if it has been checked out for
    /// at least `max_checkout_time`. The old handle is invalidated; a failed
    /// rollback is logged and the connection handed on for validation.
    fn claim_overdue(state: &mut PoolState) -> Option<Detached> {
        let oldest = state.active.front()?;
        let checkout_time = oldest.checkout_time();
        if checkout_time < state.config.max_checkout_time {
            return None;
        }
        let oldest = state.active.pop_front()?;

        let counters = &mut state.counters;
        counters.claimed_overdue_count += 1;
        counters.accumulated_overdue_checkout_time += checkout_time;
        counters.accumulated_checkout_time += checkout_time;

        {
            let mut conn = oldest.physical.lock();
            oldest.invalidate();
            if let Err(e) = rollback_if_needed(conn.as_mut()) {
                tracing::debug!(id = oldest.physical_id, error = %e, "bad connection, could not roll back");
            }
        }
        tracing::debug!(id = oldest.physical_id, ?checkout_time, "claimed overdue connection");
        Some(oldest.detach())
    }

    /// Liveness check. A closed connection is bad; an open one that has sat
    /// unused for at least `ping_connections_not_used_for` is probed with
    /// the ping query when pinging is enabled. A failed probe closes it.
    fn validate(
        config: &PoolConfig,
        physical: &Physical,
        physical_id: u64,
        last_used_at: Instant,
    ) -> PoolResult<()> {
        let mut conn = physical.lock();
        match conn.is_closed() {
            Ok(false) => {}
            Ok(true) => return Err(PoolError::BadConnection(physical_id)),
            Err(e) => {
                tracing::debug!(id = physical_id, error = %e, "connection is BAD");
                return Err(PoolError::BadConnection(physical_id));
            }
        }

        if !config.ping_enabled || last_used_at.elapsed() < config.ping_connections_not_used_for {
            return Ok(());
        }

        tracing::debug!(id = physical_id, "testing connection");
        let probe = conn
            .execute(&config.ping_query)
            .and_then(|()| rollback_if_needed(conn.as_mut()));
        match probe {
            Ok(()) => {
                tracing::debug!(id = physical_id, "connection is GOOD");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    id = physical_id,
                    query = %config.ping_query,
                    error = %e,
                    "execution of ping query failed"
                );
                let _ = conn.close();
                Err(PoolError::BadConnection(physical_id))
            }
        }
    }

    fn close_all_locked(state: &mut PoolState) {
        state.expected_fingerprint = state.source.fingerprint();
        let active = state.active.len();
        let idle = state.idle.len();
        for checkout in state.active.drain(..) {
            let mut conn = checkout.physical.lock();
            checkout.invalidate();
            let _ = rollback_if_needed(conn.as_mut());
            let _ = conn.close();
        }
        for detached in state.idle.drain(..) {
            let mut conn = detached.physical.lock();
            let _ = rollback_if_needed(conn.as_mut());
            let _ = conn.close();
        }
        tracing::debug!(active, idle, "forcefully closed/removed all connections");
    }
}

// ── Debug impl (cannot auto-derive due to dyn trait) ────────────────

impl std::fmt::Debug for ConnectionPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPoolManager").finish_non_exhaustive()
    }
}
