//! Physical connections and the pooled handles wrapping them.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tidepool_core::{Credentials, DataSource, Fingerprint};

use crate::error::{PoolError, PoolResult};

/// Trait abstracting the underlying driver connection for testability.
///
/// Errors are plain strings: the pool only logs them or wraps them in
/// [`PoolError`], it never inspects driver-specific detail.
pub trait Connection: Send + fmt::Debug {
    /// Cheap liveness check that does not hit the server.
    fn is_closed(&self) -> Result<bool, String>;
    /// Whether the connection is in auto-commit mode.
    fn auto_commit(&self) -> Result<bool, String>;
    /// Switch auto-commit mode.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), String>;
    /// Roll back the open transaction, if any.
    fn rollback(&mut self) -> Result<(), String>;
    /// Execute a statement, discarding any result.
    fn execute(&mut self, statement: &str) -> Result<(), String>;
    /// Close the underlying transport.
    fn close(&mut self) -> Result<(), String>;
}

/// Factory for opening physical connections, injected for testability.
pub trait ConnectionFactory: Send + Sync {
    /// Open a new connection to the data source under the given credentials.
    fn open(
        &self,
        source: &DataSource,
        credentials: &Credentials,
    ) -> Result<Box<dyn Connection>, String>;
}

pub(crate) type Physical = Arc<Mutex<Box<dyn Connection>>>;

/// Roll back if the connection is not in auto-commit mode.
pub(crate) fn rollback_if_needed(conn: &mut dyn Connection) -> Result<(), String> {
    if !conn.auto_commit()? {
        conn.rollback()?;
    }
    Ok(())
}

/// A physical connection not currently handed to any caller: either sitting
/// in the idle set or picked as an acquire candidate.
#[derive(Debug)]
pub(crate) struct Detached {
    pub physical_id: u64,
    pub physical: Physical,
    pub created_at: Instant,
    pub last_used_at: Instant,
}

/// Bookkeeping for one checkout of a physical connection, shared by the
/// pool's active set and the caller's [`PooledConnection`].
#[derive(Debug)]
pub(crate) struct Checkout {
    pub physical_id: u64,
    pub physical: Physical,
    pub valid: AtomicBool,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub checked_out_at: Instant,
    pub fingerprint: Fingerprint,
}

impl Checkout {
    pub fn new(detached: Detached, fingerprint: Fingerprint) -> Self {
        let now = Instant::now();
        Self {
            physical_id: detached.physical_id,
            physical: detached.physical,
            valid: AtomicBool::new(true),
            created_at: detached.created_at,
            last_used_at: now,
            checked_out_at: now,
            fingerprint,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    pub fn checkout_time(&self) -> Duration {
        self.checked_out_at.elapsed()
    }

    /// Re-wrap the physical connection, carrying its timestamps forward.
    /// The caller is responsible for invalidating `self`.
    pub fn detach(&self) -> Detached {
        Detached {
            physical_id: self.physical_id,
            physical: Arc::clone(&self.physical),
            created_at: self.created_at,
            last_used_at: self.last_used_at,
        }
    }
}

/// A connection checked out of a [`ConnectionPoolManager`](crate::ConnectionPoolManager).
///
/// The handle owns the checkout exclusively; hand it back with
/// [`release`](crate::ConnectionPoolManager::release). A handle that is
/// never released stays active until it is reclaimed as overdue. Once the
/// pool reclaims or force-closes it, every use fails with
/// [`PoolError::InvalidConnection`].
pub struct PooledConnection {
    pub(crate) checkout: Arc<Checkout>,
}

impl PooledConnection {
    pub(crate) fn new(checkout: Arc<Checkout>) -> Self {
        Self { checkout }
    }

    /// Identity of the physical connection. Stable across re-wraps, so a
    /// reclaimed connection handed to another caller keeps its id.
    pub fn physical_id(&self) -> u64 {
        self.checkout.physical_id
    }

    pub fn is_valid(&self) -> bool {
        self.checkout.is_valid()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.checkout.fingerprint
    }

    pub fn created_at(&self) -> Instant {
        self.checkout.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.checkout.last_used_at
    }

    pub fn checked_out_at(&self) -> Instant {
        self.checkout.checked_out_at
    }

    /// How long this handle has been checked out.
    pub fn checkout_time(&self) -> Duration {
        self.checkout.checkout_time()
    }

    /// Run driver calls against the physical connection.
    ///
    /// Validity is checked while holding the physical connection's lock, so
    /// a concurrent reclaim can never leave two callers on one connection.
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&mut dyn Connection) -> Result<R, String>,
    ) -> PoolResult<R> {
        let mut conn = self.checkout.physical.lock();
        if !self.checkout.is_valid() {
            return Err(PoolError::InvalidConnection(self.checkout.physical_id));
        }
        f(conn.as_mut()).map_err(PoolError::Driver)
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("physical_id", &self.checkout.physical_id)
            .field("valid", &self.checkout.is_valid())
            .field("fingerprint", &self.checkout.fingerprint)
            .finish_non_exhaustive()
    }
}
