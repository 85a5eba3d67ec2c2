//! Error types for the cache chain.

use std::time::Duration;

use thiserror::Error;

use crate::key::CacheKey;

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in a cache or one of its decorators.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Waiting for another caller's in-flight miss on the same key exceeded
    /// the configured bound. Distinct from a cache miss.
    #[error("could not acquire lock on key {key} in cache {cache} within {timeout:?}")]
    LockTimeout {
        key: CacheKey,
        cache: String,
        timeout: Duration,
    },

    /// A gate was released that no caller held. Always a logic bug in the
    /// caller's get/put/remove pairing.
    #[error("released key {key} in cache {cache} without holding its lock")]
    InvalidGateRelease { key: CacheKey, cache: String },

    /// A value could not be converted to or from its cached form.
    #[error("cache value serialization failed: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}
