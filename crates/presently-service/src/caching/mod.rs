//! # Caching infrastructure
//!
//! Every expensive artifact is described by a [`Future`](crate::pipeline::Future), and every
//! realization goes through an in-memory [`MemCache`]. The caches deduplicate concurrent requests
//! for equal futures (by their [`FutureKey`](crate::pipeline::FutureKey)), so each computation is
//! run at most once while its result is cached.
//!
//! ## Cache Layers
//!
//! A [`CachePackage`] bundles the caches and the compute scheduler that are shared by the whole
//! process:
//!
//! - The *document fetch* cache holds realized source documents and is used by synchronous
//!   realizations, which run on the calling thread.
//! - The *async* cache holds handles to computations that were moved onto the scheduler's
//!   workers. Realizing an asynchronous future never blocks and yields an
//!   [`AsyncRef`](crate::pipeline::AsyncRef) to the scheduled computation, which in turn realizes
//!   the synchronous future through the document fetch cache.
//!
//! Both paths produce the same result for the same future.
//!
//! ## Eviction
//!
//! Cache entries are reference counted. The cache holds one reference per resident entry, and
//! every consumer holds another one for as long as it uses the result. When a new entry displaces
//! an old one, the cache only releases its own reference to the old entry once the new entry has
//! completed. The old entry stays valid for its remaining consumers, and is removed once the last
//! of them dropped it.
//!
//! The victim is picked by an [`EvictionPolicy`]. By default this is a [`LruPolicy`] bounded by
//! the configured capacity, see [`Config::caches`](crate::config::Config::caches).
//!
//! ### Metrics
//!
//! Each of these metrics is tagged with a `cache` field that corresponds to the cache name:
//!
//! - `caches.access`: All accesses.
//! - `caches.memory.hit`: Accesses served by an existing entry.
//! - `caches.computation`: Accesses that inserted a new entry and triggered a computation.
//! - `caches.eviction`: Entries whose cache reference was released.

mod eviction;
mod mem_cache;
mod package;

pub use eviction::{EvictionCandidate, EvictionPolicy, LruPolicy, Unbounded, policy_from_config};
pub use mem_cache::{Execution, MemCache, MemCacheFuture};
pub use package::CachePackage;
