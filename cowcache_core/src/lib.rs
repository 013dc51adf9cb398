//! Append-mostly, copy-on-write key/value cache with lock-free reads.
//!
//! Lookups probe an immutable store swapped in whole on publication, so the
//! read path costs what an unsynchronized hash map costs. Writers are
//! serialized by one lock and batched: inserts collect in a pending buffer
//! until a debounced copy delay elapses, then merge into a fresh store
//! generation. Built for permanent, growing caches (memoized results,
//! interned objects) where reads vastly outnumber writes.
//!
//! ```
//! use cowcache_core::CowCache;
//!
//! let cache = CowCache::<String, u32>::new();
//! cache.try_insert("answer".to_string(), 42);
//! assert_eq!(cache.get("answer"), Some(42));
//! ```

/// Batching window applied to buffered writes unless configured otherwise.
pub const DEFAULT_COPY_DELAY: std::time::Duration = std::time::Duration::from_millis(30);

pub mod cache;
pub mod error;

pub use cache::cow_cache::{CowCache, CowCacheBuilder};
pub use cache::iter::{Iter, Keys, Values};
pub use error::{CacheError, Result};
