//! Tiered index cache: one label's postings on local disk, the rest elsewhere.
//!
//! Postings whose label satisfies the routing matcher live in an LMDB
//! environment on the node. Everything else, including all series, goes to
//! the wrapped fallback index cache.
//!
//! # Consistency
//!
//! Routed writes are synchronous: the LMDB write transaction has committed
//! by the time `store_postings` returns. LMDB entries never expire; the
//! environment is bounded by its map size instead.
//!
//! Disk transactions run inline on the calling task and block its executor
//! thread until the read returns or the commit is flushed.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use strata_core::{BlockId, CacheError, DiskTierConfig, Label, LabelMatcher, SeriesRef, StrataResult};

use super::{CacheKey, Fetched, IndexCache};

/// Map sizes are rounded up to this, a multiple of every common page size.
const MAP_SIZE_ALIGN: usize = 64 * 1024;

fn disk_error(e: impl std::fmt::Display) -> CacheError {
    CacheError::Disk {
        reason: e.to_string(),
    }
}

/// Index cache keeping routed postings in LMDB in front of a fallback.
pub struct LmdbIndexCache<F> {
    env: Env,
    db: Database<Bytes, Bytes>,
    fallback: F,
    route: LabelMatcher,
}

impl<F: IndexCache> LmdbIndexCache<F> {
    /// Open (or create) the LMDB environment described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn new(config: &DiskTierConfig, fallback: F) -> StrataResult<Self> {
        let (env, db) = open_env(&config.path, config.max_size.as_u64())?;

        tracing::info!(
            path = %config.path.display(),
            max_size = %config.max_size,
            route = %config.route,
            "created disk index cache"
        );

        Ok(Self {
            env,
            db,
            fallback,
            route: config.route.clone(),
        })
    }

    /// The wrapped fallback cache.
    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), heed::Error> {
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, key, value)?;
        wtxn.commit()
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, heed::Error> {
        let rtxn = self.env.read_txn()?;
        let value = self.db.get(&rtxn, key)?.map(<[u8]>::to_vec);
        Ok(value)
    }
}

fn open_env(path: &Path, max_size: u64) -> Result<(Env, Database<Bytes, Bytes>), CacheError> {
    std::fs::create_dir_all(path).map_err(disk_error)?;

    let map_size = usize::try_from(max_size)
        .unwrap_or(usize::MAX)
        .max(MAP_SIZE_ALIGN)
        .div_ceil(MAP_SIZE_ALIGN)
        .saturating_mul(MAP_SIZE_ALIGN);

    // SAFETY: the environment directory is owned by this process and not
    // opened a second time while `Env` is alive.
    let env = unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(1).open(path) }
        .map_err(disk_error)?;

    let mut wtxn = env.write_txn().map_err(disk_error)?;
    let db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, None).map_err(disk_error)?;
    wtxn.commit().map_err(disk_error)?;

    Ok((env, db))
}

#[async_trait]
impl<F: IndexCache> IndexCache for LmdbIndexCache<F> {
    async fn store_postings(&self, block: BlockId, label: &Label, value: Vec<u8>) {
        if !self.route.matches(label) {
            self.fallback.store_postings(block, label, value).await;
            return;
        }

        let key = CacheKey::Postings(block, label.clone()).encode();
        if let Err(e) = self.put(key.as_bytes(), &value) {
            tracing::warn!(key = %key, size = value.len(), error = %e, "failed to write postings to disk");
        }
    }

    async fn fetch_multi_postings(&self, block: BlockId, labels: &[Label]) -> Fetched<Label> {
        let mut remaining = labels.to_vec();
        let routed = remaining
            .iter()
            .position(|label| self.route.matches(label))
            .map(|i| remaining.swap_remove(i));

        let mut fetched = Fetched::default();
        if let Some(label) = routed {
            let key = CacheKey::Postings(block, label.clone()).encode();
            match self.get(key.as_bytes()) {
                Ok(Some(value)) => {
                    fetched.hits.insert(label, value);
                }
                Ok(None) => fetched.misses.push(label),
                Err(e) => {
                    tracing::debug!(key = %key, error = %e, "disk postings read failed, treating as miss");
                    fetched.misses.push(label);
                }
            }
        }

        if !remaining.is_empty() {
            let from_fallback = self.fallback.fetch_multi_postings(block, &remaining).await;
            fetched.merge(from_fallback);
        }
        fetched
    }

    async fn store_series(&self, block: BlockId, series: SeriesRef, value: Vec<u8>) {
        self.fallback.store_series(block, series, value).await;
    }

    async fn fetch_multi_series(&self, block: BlockId, refs: &[SeriesRef]) -> Fetched<SeriesRef> {
        self.fallback.fetch_multi_series(block, refs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BackendIndexCache;
    use crate::memory::InMemoryCache;
    use prometheus::Registry;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use strata_core::ByteSize;
    use tempfile::TempDir;

    type Fallback = BackendIndexCache<InMemoryCache>;

    fn tiered(dir: &TempDir) -> LmdbIndexCache<Fallback> {
        let backend = InMemoryCache::new("fallback", ByteSize(1 << 20), ByteSize(0), &Registry::new())
            .expect("cache creation should succeed");
        let config = DiskTierConfig {
            path: dir.path().join("index"),
            max_size: ByteSize(10 << 20),
            route: LabelMatcher::new("app", "core"),
        };
        LmdbIndexCache::new(&config, BackendIndexCache::new(backend))
            .expect("disk cache creation should succeed")
    }

    fn core() -> Label {
        Label::new("app", "core")
    }

    #[tokio::test]
    async fn test_routed_postings_go_to_disk_only() {
        let dir = TempDir::new().expect("tempdir");
        let cache = tiered(&dir);
        let block = BlockId::now_v7();
        cache.store_postings(block, &core(), vec![1, 2]).await;

        let from_fallback = cache.fallback().fetch_multi_postings(block, &[core()]).await;
        assert!(from_fallback.hits.is_empty());

        let fetched = cache.fetch_multi_postings(block, &[core()]).await;
        assert_eq!(fetched.hits.get(&core()), Some(&vec![1, 2]));
        assert!(fetched.misses.is_empty());
    }

    #[tokio::test]
    async fn test_other_postings_go_to_fallback() {
        let dir = TempDir::new().expect("tempdir");
        let cache = tiered(&dir);
        let block = BlockId::now_v7();
        let other = Label::new("app", "edge");
        cache.store_postings(block, &other, vec![9]).await;

        let from_fallback = cache
            .fallback()
            .fetch_multi_postings(block, &[other.clone()])
            .await;
        assert_eq!(from_fallback.hits.get(&other), Some(&vec![9]));
    }

    #[tokio::test]
    async fn test_fetch_merges_disk_and_fallback() {
        let dir = TempDir::new().expect("tempdir");
        let cache = tiered(&dir);
        let block = BlockId::now_v7();
        let stored = Label::new("job", "api");
        let absent = Label::new("job", "db");
        cache.store_postings(block, &core(), vec![1]).await;
        cache.store_postings(block, &stored, vec![2]).await;

        let fetched = cache
            .fetch_multi_postings(block, &[stored.clone(), core(), absent.clone()])
            .await;
        assert_eq!(fetched.hits.len(), 2);
        assert_eq!(fetched.hits[&core()], vec![1]);
        assert_eq!(fetched.hits[&stored], vec![2]);
        assert_eq!(fetched.misses, vec![absent]);
    }

    #[tokio::test]
    async fn test_routed_miss_is_reported() {
        let dir = TempDir::new().expect("tempdir");
        let cache = tiered(&dir);

        let fetched = cache.fetch_multi_postings(BlockId::now_v7(), &[core()]).await;
        assert!(fetched.hits.is_empty());
        assert_eq!(fetched.misses, vec![core()]);
    }

    #[tokio::test]
    async fn test_repeated_routed_label_is_a_single_hit() {
        let dir = TempDir::new().expect("tempdir");
        let cache = tiered(&dir);
        let block = BlockId::now_v7();
        cache.store_postings(block, &core(), vec![8]).await;

        let fetched = cache.fetch_multi_postings(block, &[core(), core()]).await;
        assert_eq!(fetched.hits.len(), 1);
        assert_eq!(fetched.hits[&core()], vec![8]);
        assert!(fetched.misses.is_empty());
    }

    #[tokio::test]
    async fn test_repeated_routed_miss_is_reported_once() {
        let dir = TempDir::new().expect("tempdir");
        let cache = tiered(&dir);

        let fetched = cache
            .fetch_multi_postings(BlockId::now_v7(), &[core(), core(), core()])
            .await;
        assert!(fetched.hits.is_empty());
        assert_eq!(fetched.misses, vec![core()]);
    }

    #[tokio::test]
    async fn test_disk_entries_survive_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let block = BlockId::now_v7();
        {
            let cache = tiered(&dir);
            cache.store_postings(block, &core(), vec![5]).await;
        }

        let cache = tiered(&dir);
        let fetched = cache.fetch_multi_postings(block, &[core()]).await;
        assert_eq!(fetched.hits.get(&core()), Some(&vec![5]));
    }

    #[tokio::test]
    async fn test_series_pass_through_to_fallback() {
        let dir = TempDir::new().expect("tempdir");
        let cache = tiered(&dir);
        let block = BlockId::now_v7();
        cache.store_series(block, SeriesRef(1), vec![3]).await;

        let fetched = cache
            .fallback()
            .fetch_multi_series(block, &[SeriesRef(1)])
            .await;
        assert_eq!(fetched.hits[&SeriesRef(1)], vec![3]);
    }

    fn label_strategy() -> impl Strategy<Value = Label> {
        prop_oneof![
            Just(core()),
            ("[a-c]{1,2}", "[x-z]{1,2}").prop_map(|(name, value)| Label::new(name, value)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Every distinct requested label is either a hit or a miss, never
        /// both, and appears once however often it was requested.
        #[test]
        fn prop_fetch_partitions_request(
            stored in prop::collection::hash_set(label_strategy(), 0..6),
            requested in prop::collection::vec(label_strategy(), 0..12),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime");
            let dir = TempDir::new().expect("tempdir");
            let cache = tiered(&dir);
            let block = BlockId::now_v7();

            let fetched = rt.block_on(async {
                for label in &stored {
                    cache.store_postings(block, label, label.value.as_bytes().to_vec()).await;
                }
                cache.fetch_multi_postings(block, &requested).await
            });

            let distinct: HashSet<&Label> = requested.iter().collect();
            let misses: HashSet<&Label> = fetched.misses.iter().collect();
            prop_assert_eq!(misses.len(), fetched.misses.len());
            for label in &distinct {
                let hit = fetched.hits.contains_key(*label);
                prop_assert!(hit != misses.contains(*label));
                prop_assert_eq!(hit, stored.contains(*label));
            }
            prop_assert_eq!(fetched.hits.len() + misses.len(), distinct.len());
        }
    }
}
