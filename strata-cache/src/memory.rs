//! Size-bounded in-process cache.
//!
//! Entries are weighted by key plus value bytes and carry their own ttl.
//! Eviction order is whatever moka decides once the weight budget is spent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::sync::Cache;
use moka::Expiry;
use prometheus::{Counter, Registry};
use strata_core::{ByteSize, ConfigError, StrataResult};

use crate::metrics::named_counter;
use crate::traits::CacheBackend;

#[derive(Clone)]
struct CachedValue {
    data: Arc<Vec<u8>>,
    ttl: Duration,
}

/// Expires each entry after the ttl of the batch that wrote it.
struct PerEntryTtl;

impl Expiry<String, CachedValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache bounded by total size and by item size.
pub struct InMemoryCache {
    name: String,
    max_item_size: u64,
    entries: Cache<String, CachedValue>,
    added: Counter,
    overflowed: Counter,
}

impl InMemoryCache {
    /// Create a new in-process cache.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_item_size` exceeds `max_size` or if the
    /// metrics cannot be registered.
    pub fn new(
        name: &str,
        max_size: ByteSize,
        max_item_size: ByteSize,
        registry: &Registry,
    ) -> StrataResult<Self> {
        if max_item_size > max_size {
            return Err(ConfigError::InvalidValue {
                field: "max_item_size".to_string(),
                value: max_item_size.to_string(),
                reason: format!("must not exceed max_size ({})", max_size),
            }
            .into());
        }

        let entries = Cache::builder()
            .max_capacity(max_size.as_u64())
            .weigher(|key: &String, value: &CachedValue| -> u32 {
                (key.len() + value.data.len()).try_into().unwrap_or(u32::MAX)
            })
            .expire_after(PerEntryTtl)
            .build();

        let added = named_counter(
            registry,
            "strata_cache_inmemory_items_added_total",
            "Total number of items added to the in-process cache.",
            name,
        )?;
        let overflowed = named_counter(
            registry,
            "strata_cache_inmemory_items_overflowed_total",
            "Total number of items rejected for exceeding the item size limit.",
            name,
        )?;

        tracing::info!(
            name = %name,
            max_size = %max_size,
            max_item_size = %max_item_size,
            "created in-memory cache"
        );

        Ok(Self {
            name: name.to_string(),
            max_item_size: max_item_size.as_u64(),
            entries,
            added,
            overflowed,
        })
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    fn fits(&self, key: &str, value: &[u8]) -> bool {
        self.max_item_size == 0 || (key.len() + value.len()) as u64 <= self.max_item_size
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn store(&self, data: HashMap<String, Vec<u8>>, ttl: Duration) {
        for (key, value) in data {
            if !self.fits(&key, &value) {
                tracing::debug!(
                    name = %self.name,
                    key = %key,
                    size = value.len(),
                    "item exceeds max item size, not caching"
                );
                self.overflowed.inc();
                continue;
            }
            self.entries.insert(
                key,
                CachedValue {
                    data: Arc::new(value),
                    ttl,
                },
            );
            self.added.inc();
        }
    }

    async fn fetch(&self, keys: &[String]) -> HashMap<String, Vec<u8>> {
        keys.iter()
            .filter_map(|key| {
                self.entries
                    .get(key)
                    .map(|entry| (key.clone(), (*entry.data).clone()))
            })
            .collect()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
