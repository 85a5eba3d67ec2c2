//! Cache keys and cached entries.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CacheResult;

/// Opaque, immutable cache key. Cheap to clone.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Start building a key from the parts that identify a query: statement
    /// id, parameters, paging bounds and so on.
    pub fn builder() -> CacheKeyBuilder {
        CacheKeyBuilder::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0)
    }
}

/// Hashes an ordered list of parts into a [`CacheKey`].
///
/// Each part is length-prefixed, so `["ab", "c"]` and `["a", "bc"]` give
/// different keys.
#[derive(Default)]
pub struct CacheKeyBuilder {
    hasher: Sha256,
    parts: usize,
}

impl CacheKeyBuilder {
    pub fn part(mut self, part: impl AsRef<[u8]>) -> Self {
        let bytes = part.as_ref();
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self.parts += 1;
        self
    }

    /// Add a serializable part (query parameters, row bounds).
    pub fn value(self, value: &impl Serialize) -> CacheResult<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.part(bytes))
    }

    pub fn build(self) -> CacheKey {
        let digest = hex::encode(self.hasher.finalize());
        CacheKey::from(format!("{}:{digest}", self.parts))
    }
}

/// What a cache holds for a key.
///
/// `KnownAbsent` records that the key was looked up in the source of truth
/// and nothing was there. It is a hit, not a miss.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheEntry {
    Found(Arc<Value>),
    KnownAbsent,
}

impl CacheEntry {
    pub fn found(value: &impl Serialize) -> CacheResult<Self> {
        Ok(Self::Found(Arc::new(serde_json::to_value(value)?)))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Found(value) => Some(value),
            Self::KnownAbsent => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::KnownAbsent)
    }

    /// Approximate memory weight: the serialized length of the value.
    pub fn weight(&self) -> usize {
        match self {
            Self::Found(value) => value.to_string().len(),
            Self::KnownAbsent => 0,
        }
    }

    /// Decode a found value. `Ok(None)` for a known-absent entry.
    pub fn decode<T: DeserializeOwned>(&self) -> CacheResult<Option<T>> {
        match self {
            Self::Found(value) => Ok(Some(serde_json::from_value(Value::clone(value))?)),
            Self::KnownAbsent => Ok(None),
        }
    }
}
