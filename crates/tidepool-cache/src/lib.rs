//! Layered second-level cache.
//!
//! A shared cache is a chain of decorators over a leaf store, each layer
//! implementing [`Cache`] and forwarding to the next. Units of work reach it
//! through a [`CacheCoordinator`], which buffers their writes until commit.
//!
//! # Architecture
//!
//! ```text
//! CacheCoordinator (one per unit of work)
//!   → TransactionalCache   buffer writes, record misses, flush on commit
//!     → BlockingCache      one in-flight miss per key
//!       → SoftEvictingCache retain recent reads, reclaim the rest under budget
//!         → MemoryCache    map + optional LRU bound
//! ```
//!
//! Everything below the coordinator is shared across units of work and is
//! thread-safe. The coordinator and its transactional wrappers are not.

pub mod blocking;
pub mod builder;
pub mod cache;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod memory;
pub mod soft;
pub mod transactional;

pub use blocking::BlockingCache;
pub use builder::CacheSettings;
pub use cache::{Cache, SharedCache};
pub use coordinator::CacheCoordinator;
pub use error::{CacheError, CacheResult};
pub use key::{CacheEntry, CacheKey, CacheKeyBuilder};
pub use memory::{MemoryCache, MemoryCacheStats};
pub use soft::SoftEvictingCache;
pub use transactional::TransactionalCache;
