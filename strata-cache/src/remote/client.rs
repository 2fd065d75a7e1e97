//! Remote cache client with a client-side read cache.
//!
//! Reads go through a local cache whose freshness window is fixed at
//! construction and has nothing to do with the ttl entries are written
//! with. A value can therefore be served locally after the service already
//! expired it, or be fetched again locally before it expired remotely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use prometheus::{Histogram, Registry};
use strata_core::{RemoteCacheConfig, StrataResult};

use super::connection::{RedisConnection, RemoteKv};
use crate::metrics::operation_histogram;

const OP_SET: &str = "set";
const OP_SET_MULTI: &str = "setmulti";
const OP_GET_MULTI: &str = "getmulti";

/// Whole seconds of `ttl`, never less than one; the service rejects a zero expiry.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Client for a redis-protocol cache service.
pub struct RedisClient<K = RedisConnection> {
    kv: K,
    local: Cache<String, Arc<Vec<u8>>>,
    duration_set: Histogram,
    duration_set_multi: Histogram,
    duration_get_multi: Histogram,
}

impl RedisClient<RedisConnection> {
    /// Connect to the service described by `config`.
    pub async fn connect(
        name: &str,
        config: &RemoteCacheConfig,
        registry: &Registry,
    ) -> StrataResult<Self> {
        config.validate()?;
        let kv = RedisConnection::connect(config).await?;
        Self::with_kv(name, kv, config, registry)
    }
}

impl<K: RemoteKv> RedisClient<K> {
    /// Build a client over an established connection.
    pub fn with_kv(
        name: &str,
        kv: K,
        config: &RemoteCacheConfig,
        registry: &Registry,
    ) -> StrataResult<Self> {
        let duration = operation_histogram(
            registry,
            "strata_redis_operation_duration_seconds",
            "Duration of operations against redis.",
            name,
        )?;

        let local = Cache::builder()
            .max_capacity(config.effective_cache_size().as_u64())
            .weigher(|key: &String, value: &Arc<Vec<u8>>| -> u32 {
                (key.len() + value.len()).try_into().unwrap_or(u32::MAX)
            })
            .time_to_live(config.client_cache_ttl)
            .build();

        Ok(Self {
            kv,
            local,
            duration_set: duration.with_label_values(&[OP_SET]),
            duration_set_multi: duration.with_label_values(&[OP_SET_MULTI]),
            duration_get_multi: duration.with_label_values(&[OP_GET_MULTI]),
        })
    }

    /// Set a single key. Failures are logged, not returned.
    ///
    /// The local copy is dropped once the service answered, so a read racing
    /// the write cannot pin the previous value locally.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) {
        let start = Instant::now();
        let result = self.kv.set_ex(key, value, ttl_secs(ttl)).await;
        self.local.invalidate(key);
        if let Err(e) = result {
            tracing::warn!(
                key = %key,
                value_size = value.len(),
                error = %e,
                "failed to set item into redis"
            );
            return;
        }
        self.duration_set.observe(start.elapsed().as_secs_f64());
    }

    /// Set all keys of `data` in one batch.
    ///
    /// On failure the latency is not observed and writes that already
    /// landed are left in place. Local copies are dropped either way.
    pub async fn set_multi(&self, data: &HashMap<String, Vec<u8>>, ttl: Duration) {
        if data.is_empty() {
            return;
        }
        let start = Instant::now();
        let result = self.kv.set_ex_multi(data, ttl_secs(ttl)).await;
        for key in data.keys() {
            self.local.invalidate(key);
        }
        if let Err(e) = result {
            tracing::warn!(items = data.len(), error = %e, "failed to set multi items into redis");
            return;
        }
        self.duration_set_multi.observe(start.elapsed().as_secs_f64());
    }

    /// Get `keys`, consulting the client-side cache first. Returns hits only.
    pub async fn get_multi(&self, keys: &[String]) -> HashMap<String, Vec<u8>> {
        if keys.is_empty() {
            return HashMap::new();
        }
        let start = Instant::now();
        let mut results = HashMap::with_capacity(keys.len());
        let mut remote_keys = Vec::new();

        for key in keys {
            match self.local.get(key) {
                Some(value) => {
                    results.insert(key.clone(), (*value).clone());
                }
                None => remote_keys.push(key.clone()),
            }
        }

        if !remote_keys.is_empty() {
            match self.kv.mget(&remote_keys).await {
                Ok(values) => {
                    for (key, value) in remote_keys.into_iter().zip(values) {
                        if let Some(value) = value {
                            self.local.insert(key.clone(), Arc::new(value.clone()));
                            results.insert(key, value);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(items = remote_keys.len(), error = %e, "failed to mget items from redis");
                }
            }
        }

        self.duration_get_multi.observe(start.elapsed().as_secs_f64());
        results
    }

    /// Close the underlying connection.
    pub async fn stop(&self) {
        self.kv.close().await;
    }

    /// The wrapped connection.
    pub fn kv(&self) -> &K {
        &self.kv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::FakeKv;
    use std::sync::atomic::Ordering;
    use tokio::sync::Notify;

    fn client_over(kv: FakeKv, client_cache_ttl: Duration) -> RedisClient<FakeKv> {
        let config = RemoteCacheConfig {
            addr: "fake:6379".to_string(),
            client_cache_ttl,
            ..Default::default()
        };
        RedisClient::with_kv("test", kv, &config, &Registry::new())
            .expect("client creation should succeed")
    }

    fn client(client_cache_ttl: Duration) -> RedisClient<FakeKv> {
        client_over(FakeKv::default(), client_cache_ttl)
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_multi_then_get_multi() {
        let client = client(Duration::from_secs(3600));
        let mut data = HashMap::new();
        data.insert("a".to_string(), b"1".to_vec());
        data.insert("b".to_string(), b"2".to_vec());
        client.set_multi(&data, Duration::from_secs(30)).await;

        let hits = client.get_multi(&keys(&["a", "b", "c"])).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits["a"], b"1".to_vec());
        assert_eq!(client.kv().ttl_of("a"), Some(30));
        assert_eq!(client.duration_set_multi.get_sample_count(), 1);
        assert_eq!(client.duration_get_multi.get_sample_count(), 1);
    }

    #[tokio::test]
    async fn test_sub_second_ttl_rounds_up_to_one_second() {
        let client = client(Duration::from_secs(3600));
        client.set("k", b"v", Duration::from_millis(200)).await;
        assert_eq!(client.kv().ttl_of("k"), Some(1));
        assert_eq!(client.duration_set.get_sample_count(), 1);
    }

    #[tokio::test]
    async fn test_local_cache_serves_after_remote_expiry() {
        let client = client(Duration::from_secs(3600));
        client.set("k", b"v", Duration::from_secs(1)).await;

        assert!(client.get_multi(&keys(&["k"])).await.contains_key("k"));
        client.kv().expire("k");

        let hits = client.get_multi(&keys(&["k"])).await;
        assert_eq!(hits["k"], b"v".to_vec());
        assert_eq!(client.kv().mget_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_cache_window_elapses_independently() {
        let client = client(Duration::from_millis(20));
        client.set("k", b"v", Duration::from_secs(3600)).await;
        client.get_multi(&keys(&["k"])).await;

        std::thread::sleep(Duration::from_millis(60));

        let hits = client.get_multi(&keys(&["k"])).await;
        assert!(hits.contains_key("k"));
        assert_eq!(client.kv().mget_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_own_write_replaces_local_copy() {
        let client = client(Duration::from_secs(3600));
        client.set("k", b"old", Duration::from_secs(60)).await;
        client.get_multi(&keys(&["k"])).await;
        client.set("k", b"new", Duration::from_secs(60)).await;

        let hits = client.get_multi(&keys(&["k"])).await;
        assert_eq!(hits["k"], b"new".to_vec());
    }

    #[tokio::test]
    async fn test_read_during_pending_write_is_not_kept_locally() {
        let gate = Arc::new(Notify::new());
        let client = client_over(FakeKv::gated(Arc::clone(&gate)), Duration::from_secs(3600));
        client.set("k", b"old", Duration::from_secs(60)).await;

        let mut data = HashMap::new();
        data.insert("k".to_string(), b"new".to_vec());
        let ((), during) = tokio::join!(client.set_multi(&data, Duration::from_secs(60)), async {
            let during = client.get_multi(&keys(&["k"])).await;
            gate.notify_one();
            during
        });
        assert_eq!(during["k"], b"old".to_vec());

        let after = client.get_multi(&keys(&["k"])).await;
        assert_eq!(after["k"], b"new".to_vec());
    }

    #[tokio::test]
    async fn test_failed_write_drops_local_copy() {
        let client = client(Duration::from_secs(3600));
        client.set("k", b"old", Duration::from_secs(60)).await;
        client.get_multi(&keys(&["k"])).await;

        client.kv().fail.store(true, Ordering::SeqCst);
        client.set("k", b"new", Duration::from_secs(60)).await;
        client.kv().fail.store(false, Ordering::SeqCst);

        client.get_multi(&keys(&["k"])).await;
        assert_eq!(client.kv().mget_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_batch_skips_latency() {
        let client = client(Duration::from_secs(3600));
        client.kv().fail.store(true, Ordering::SeqCst);

        let mut data = HashMap::new();
        data.insert("a".to_string(), b"1".to_vec());
        client.set_multi(&data, Duration::from_secs(30)).await;
        assert_eq!(client.duration_set_multi.get_sample_count(), 0);

        let hits = client.get_multi(&keys(&["a"])).await;
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_empty_inputs_do_nothing() {
        let client = client(Duration::from_secs(3600));
        client.set_multi(&HashMap::new(), Duration::from_secs(30)).await;
        assert!(client.get_multi(&[]).await.is_empty());
        assert_eq!(client.duration_set_multi.get_sample_count(), 0);
        assert_eq!(client.duration_get_multi.get_sample_count(), 0);
        assert_eq!(client.kv().mget_calls.load(Ordering::SeqCst), 0);
    }
}
