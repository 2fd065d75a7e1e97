//! Cache backend contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Cache backend trait for pluggable cache implementations.
///
/// Implementations must be safe to share between many concurrent callers.
///
/// # Writes
///
/// `store` is best effort. Errors are logged inside the backend and never
/// reach the caller, and callers must not assume the data is visible or
/// durable afterwards. A batch is one logical write, but nothing guarantees
/// atomicity across its keys.
///
/// # Reads
///
/// `fetch` returns only the keys that were found. Misses are the set
/// difference between the requested keys and the returned map, see
/// [`missing_keys`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Store every entry of `data`, expiring after `ttl`.
    async fn store(&self, data: HashMap<String, Vec<u8>>, ttl: Duration);

    /// Fetch the given keys, returning the hits.
    async fn fetch(&self, keys: &[String]) -> HashMap<String, Vec<u8>>;

    /// Name of this backend instance, used as a metric label.
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: CacheBackend + ?Sized> CacheBackend for Arc<T> {
    async fn store(&self, data: HashMap<String, Vec<u8>>, ttl: Duration) {
        (**self).store(data, ttl).await
    }

    async fn fetch(&self, keys: &[String]) -> HashMap<String, Vec<u8>> {
        (**self).fetch(keys).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Requested keys absent from `hits`, in request order.
pub fn missing_keys(requested: &[String], hits: &HashMap<String, Vec<u8>>) -> Vec<String> {
    requested
        .iter()
        .filter(|key| !hits.contains_key(key.as_str()))
        .cloned()
        .collect()
}
