//! [`CacheBackend`] over the remote cache service.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use prometheus::{Counter, Registry};
use strata_core::{RemoteCacheConfig, StrataResult};

use super::client::RedisClient;
use super::connection::{RedisConnection, RemoteKv};
use crate::metrics::named_counter;
use crate::traits::CacheBackend;

/// Remote cache backend.
pub struct RemoteCache<K = RedisConnection> {
    name: String,
    client: RedisClient<K>,
    requests: Counter,
    hits: Counter,
}

impl RemoteCache<RedisConnection> {
    /// Connect to the service and wrap it as a cache backend.
    pub async fn connect(
        name: &str,
        config: &RemoteCacheConfig,
        registry: &Registry,
    ) -> StrataResult<Self> {
        let client = RedisClient::connect(name, config, registry).await?;
        Self::new(name, client, registry)
    }
}

impl<K: RemoteKv> RemoteCache<K> {
    /// Wrap an existing client.
    pub fn new(name: &str, client: RedisClient<K>, registry: &Registry) -> StrataResult<Self> {
        let requests = named_counter(
            registry,
            "strata_cache_redis_requests_total",
            "Total number of keys requested from the remote cache.",
            name,
        )?;
        let hits = named_counter(
            registry,
            "strata_cache_redis_hits_total",
            "Total number of requested keys found in the remote cache.",
            name,
        )?;

        tracing::info!(name = %name, "created redis cache");

        Ok(Self {
            name: name.to_string(),
            client,
            requests,
            hits,
        })
    }

    /// The wrapped client.
    pub fn client(&self) -> &RedisClient<K> {
        &self.client
    }

    /// Close the connection to the service.
    pub async fn stop(&self) {
        self.client.stop().await;
    }
}

#[async_trait]
impl<K: RemoteKv> CacheBackend for RemoteCache<K> {
    async fn store(&self, data: HashMap<String, Vec<u8>>, ttl: Duration) {
        self.client.set_multi(&data, ttl).await;
    }

    async fn fetch(&self, keys: &[String]) -> HashMap<String, Vec<u8>> {
        self.requests.inc_by(keys.len() as f64);
        let results = self.client.get_multi(keys).await;
        self.hits.inc_by(results.len() as f64);
        results
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::FakeKv;
    use crate::traits::missing_keys;
    use std::sync::atomic::Ordering;

    fn remote_cache(registry: &Registry) -> RemoteCache<FakeKv> {
        let config = RemoteCacheConfig {
            addr: "fake:6379".to_string(),
            ..Default::default()
        };
        let client = RedisClient::with_kv("index", FakeKv::default(), &config, registry)
            .expect("client creation should succeed");
        RemoteCache::new("index", client, registry).expect("cache creation should succeed")
    }

    #[tokio::test]
    async fn test_fetch_counts_requests_and_hits() {
        let cache = remote_cache(&Registry::new());
        let mut data = HashMap::new();
        data.insert("a".to_string(), b"1".to_vec());
        data.insert("b".to_string(), b"2".to_vec());
        cache.store(data, Duration::from_secs(60)).await;

        let requested: Vec<String> = ["a", "b", "c"].iter().map(|k| k.to_string()).collect();
        let hits = cache.fetch(&requested).await;

        assert_eq!(hits.len(), 2);
        assert_eq!(missing_keys(&requested, &hits), vec!["c"]);
        assert_eq!(cache.requests.get(), 3.0);
        assert_eq!(cache.hits.get(), 2.0);
        assert_eq!(cache.name(), "index");
    }

    #[tokio::test]
    async fn test_service_failure_reads_as_miss() {
        let cache = remote_cache(&Registry::new());
        cache.client().kv().fail.store(true, Ordering::SeqCst);

        let hits = cache.fetch(&["a".to_string()]).await;
        assert!(hits.is_empty());
        assert_eq!(cache.requests.get(), 1.0);
        assert_eq!(cache.hits.get(), 0.0);
    }

    #[test]
    fn test_second_instance_with_same_name_fails_registration() {
        let registry = Registry::new();
        let _first = remote_cache(&registry);
        let config = RemoteCacheConfig {
            addr: "fake:6379".to_string(),
            ..Default::default()
        };
        let again = RedisClient::with_kv("index", FakeKv::default(), &config, &registry);
        assert!(again.is_err());
    }
}
