//! Index caches for postings and series.
//!
//! Postings are keyed by block and label, series by block and series
//! reference. [`BackendIndexCache`] maps both onto any [`CacheBackend`]
//! and [`LmdbIndexCache`] keeps the postings of one label on local disk in
//! front of another index cache.
//!
//! [`CacheBackend`]: crate::CacheBackend

mod lmdb;
mod remote;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;
use prometheus::Registry;
use strata_core::{BlockId, DiskTierConfig, Label, RemoteCacheConfig, SeriesRef, StrataResult};

use crate::remote::RemoteCache;

pub use lmdb::LmdbIndexCache;
pub use remote::{BackendIndexCache, INDEX_ENTRY_TTL};

/// Disk tier in front of the remote cache service.
pub type TieredIndexCache = LmdbIndexCache<BackendIndexCache<RemoteCache>>;

/// Connect the remote cache service and open the disk tier in front of it.
pub async fn connect_tiered(
    disk: &DiskTierConfig,
    remote: &RemoteCacheConfig,
    registry: &Registry,
) -> StrataResult<TieredIndexCache> {
    let backend = RemoteCache::connect("index-cache", remote, registry).await?;
    LmdbIndexCache::new(disk, BackendIndexCache::new(backend))
}

/// Result of a multi-key index lookup.
///
/// Every requested key lands in exactly one of `hits` or `misses`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<K: Eq + Hash> {
    pub hits: HashMap<K, Vec<u8>>,
    pub misses: Vec<K>,
}

impl<K: Eq + Hash> Default for Fetched<K> {
    fn default() -> Self {
        Self {
            hits: HashMap::new(),
            misses: Vec::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> Fetched<K> {
    /// Fold `other` into `self`.
    ///
    /// A key that is a hit on either side is a hit, and each remaining miss
    /// is listed once.
    pub fn merge(&mut self, other: Fetched<K>) {
        self.hits.extend(other.hits);
        self.misses.extend(other.misses);

        let hits = &self.hits;
        let mut seen = HashSet::with_capacity(self.misses.len());
        self.misses
            .retain(|key| !hits.contains_key(key) && seen.insert(key.clone()));
    }
}

/// Cache for index lookups of immutable blocks.
#[async_trait]
pub trait IndexCache: Send + Sync {
    /// Store the postings list of `label` in `block`.
    async fn store_postings(&self, block: BlockId, label: &Label, value: Vec<u8>);

    /// Fetch postings for `labels` in `block`.
    async fn fetch_multi_postings(&self, block: BlockId, labels: &[Label]) -> Fetched<Label>;

    /// Store the encoded series `series` of `block`.
    async fn store_series(&self, block: BlockId, series: SeriesRef, value: Vec<u8>);

    /// Fetch encoded series for `refs` in `block`.
    async fn fetch_multi_series(&self, block: BlockId, refs: &[SeriesRef]) -> Fetched<SeriesRef>;
}

/// Key of one index cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Postings(BlockId, Label),
    Series(BlockId, SeriesRef),
}

impl CacheKey {
    /// Encode into the flat string form used as a backend key.
    ///
    /// The label name is length-prefixed, so a `:` inside the name or value
    /// cannot make two postings keys collide.
    pub fn encode(&self) -> String {
        match self {
            CacheKey::Postings(block, label) => format!(
                "P:{}:{}:{}:{}",
                block,
                label.name.len(),
                label.name,
                label.value
            ),
            CacheKey::Series(block, series) => format!("S:{}:{}", block, series.0),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
