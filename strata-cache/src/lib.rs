//! Strata Cache - Backend Contract and Implementations
//!
//! Every backend exposes the same minimal capability: a batched write with a
//! per-batch ttl and a batched read returning only the keys it found.
//!
//! # Backends
//!
//! - [`InMemoryCache`]: size-bounded in-process store.
//! - [`RemoteCache`]: remote cache service (redis protocol) read through a
//!   client-side cache with its own fixed freshness window.
//! - [`LmdbIndexCache`]: index cache splitting postings between a local LMDB
//!   environment and a wrapped fallback index cache.
//!
//! # Failure Model
//!
//! Store and fetch never fail the caller. Backend I/O errors are logged and
//! the affected keys read as misses.

pub mod index;
pub mod memory;
pub mod metrics;
pub mod remote;
pub mod traits;

pub use index::{
    connect_tiered, BackendIndexCache, CacheKey, Fetched, IndexCache, LmdbIndexCache,
    TieredIndexCache,
};
pub use memory::InMemoryCache;
pub use remote::{RedisClient, RedisConnection, RemoteCache, RemoteKv};
pub use traits::{missing_keys, CacheBackend};
