//! Error types for the connection pool.

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors that can occur while acquiring or using pooled connections.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No good connection could be handed out: the per-call bad-connection
    /// tolerance was exceeded, or the wait was interrupted by shutdown.
    #[error("connection pool exhausted: {0}")]
    Exhausted(String),

    /// A candidate connection failed its validity check. Retried inside
    /// `acquire` up to the configured tolerance, never returned from it.
    #[error("bad connection {0}")]
    BadConnection(u64),

    /// The connection factory could not open a physical connection.
    #[error("failed to open connection: {0}")]
    Connect(String),

    /// The handle was invalidated (reclaimed, released or force-closed).
    #[error("connection {0} is invalid")]
    InvalidConnection(u64),

    /// A driver call made through a checked-out connection failed.
    #[error("driver error: {0}")]
    Driver(String),
}
