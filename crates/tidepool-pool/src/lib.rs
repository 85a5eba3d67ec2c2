//! Connection pool manager.
//!
//! Hands out a bounded set of reusable physical connections to concurrent
//! callers. Connections come from an injected [`ConnectionFactory`]; the
//! pool never speaks a wire protocol itself.
//!
//! # Architecture
//!
//! ```text
//! acquire(credentials)
//!   → idle connection available          → validate → check out
//!   → fewer than max_active checked out  → open new → validate → check out
//!   → oldest active connection overdue   → reclaim  → validate → check out
//!   → otherwise                          → wait up to time_to_wait, retry
//!
//! release(connection)
//!   → valid, room in idle, fingerprint current → roll back, back to idle
//!   → valid otherwise                          → roll back, close
//!   → invalid                                  → count as bad connection
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod state;

pub use config::PoolConfig;
pub use connection::{Connection, ConnectionFactory, PooledConnection};
pub use error::{PoolError, PoolResult};
pub use manager::ConnectionPoolManager;
pub use state::{PoolStats, PoolStatus};
