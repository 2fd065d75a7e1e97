//! Index cache over the generic backend contract.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use strata_core::{BlockId, Label, SeriesRef};

use super::{CacheKey, Fetched, IndexCache};
use crate::traits::CacheBackend;

/// Blocks are immutable, so index entries only expire to bound space.
pub const INDEX_ENTRY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Index cache storing postings and series through a [`CacheBackend`].
pub struct BackendIndexCache<B> {
    backend: B,
    ttl: Duration,
}

impl<B: CacheBackend> BackendIndexCache<B> {
    pub fn new(backend: B) -> Self {
        Self::with_ttl(backend, INDEX_ENTRY_TTL)
    }

    pub fn with_ttl(backend: B, ttl: Duration) -> Self {
        tracing::info!(backend = %backend.name(), ttl = ?ttl, "created index cache");
        Self { backend, ttl }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn store_one(&self, key: CacheKey, value: Vec<u8>) {
        let mut data = HashMap::with_capacity(1);
        data.insert(key.encode(), value);
        self.backend.store(data, self.ttl).await;
    }

    /// Fetch `ids` under the keys `to_key` derives, splitting into hits and misses.
    ///
    /// Repeated ids are looked up once and reported once.
    async fn fetch_keyed<K, F>(&self, ids: &[K], to_key: F) -> Fetched<K>
    where
        K: Clone + Eq + std::hash::Hash + Send + Sync,
        F: Fn(&K) -> CacheKey + Send + Sync,
    {
        if ids.is_empty() {
            return Fetched::default();
        }
        let mut seen = HashSet::with_capacity(ids.len());
        let unique: Vec<&K> = ids.iter().filter(|id| seen.insert(*id)).collect();
        let keys: Vec<String> = unique.iter().map(|id| to_key(*id).encode()).collect();
        let mut found = self.backend.fetch(&keys).await;

        let mut fetched = Fetched::default();
        for (id, key) in unique.into_iter().zip(&keys) {
            match found.remove(key) {
                Some(value) => {
                    fetched.hits.insert(id.clone(), value);
                }
                None => fetched.misses.push(id.clone()),
            }
        }
        fetched
    }
}

#[async_trait]
impl<B: CacheBackend> IndexCache for BackendIndexCache<B> {
    async fn store_postings(&self, block: BlockId, label: &Label, value: Vec<u8>) {
        self.store_one(CacheKey::Postings(block, label.clone()), value)
            .await;
    }

    async fn fetch_multi_postings(&self, block: BlockId, labels: &[Label]) -> Fetched<Label> {
        self.fetch_keyed(labels, |label| CacheKey::Postings(block, label.clone()))
            .await
    }

    async fn store_series(&self, block: BlockId, series: SeriesRef, value: Vec<u8>) {
        self.store_one(CacheKey::Series(block, series), value).await;
    }

    async fn fetch_multi_series(&self, block: BlockId, refs: &[SeriesRef]) -> Fetched<SeriesRef> {
        self.fetch_keyed(refs, |series| CacheKey::Series(block, *series))
            .await
    }
}
