//! Wire-level access to the remote cache service.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use strata_core::{CacheError, RemoteCacheConfig};

/// The handful of commands the cache needs from the remote service.
#[async_trait]
pub trait RemoteKv: Send + Sync {
    /// Set one key with an expiry in whole seconds.
    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), CacheError>;

    /// Set every key of `items` in one round trip. Writes that went through
    /// before a failure stay written.
    async fn set_ex_multi(
        &self,
        items: &HashMap<String, Vec<u8>>,
        ttl_secs: u64,
    ) -> Result<(), CacheError>;

    /// Read `keys` in one round trip; the result is positionally aligned
    /// with `keys`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError>;

    /// Release the connection.
    async fn close(&self) {}
}

/// Connection to a redis-protocol cache service.
#[derive(Clone)]
pub struct RedisConnection {
    conn: ConnectionManager,
    addr: String,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RedisConnection {
    /// Connect to the first reachable address.
    ///
    /// Addresses are tried in random order so that a fleet of nodes spreads
    /// its initial connections.
    pub async fn connect(config: &RemoteCacheConfig) -> Result<Self, CacheError> {
        let mut addrs = config.addresses();
        addrs.shuffle(&mut rand::rng());

        let mut last_error = None;
        for addr in addrs {
            match Self::connect_addr(config, &addr).await {
                Ok(conn) => {
                    tracing::info!(addr = %addr, "connected to remote cache");
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::warn!(addr = %addr, error = %e, "failed to connect to remote cache");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CacheError::Connection {
            addr: String::new(),
            reason: "no address configured".to_string(),
        }))
    }

    async fn connect_addr(config: &RemoteCacheConfig, addr: &str) -> Result<Self, CacheError> {
        let connection_error = |reason: String| CacheError::Connection {
            addr: addr.to_string(),
            reason,
        };

        let client = redis::Client::open(connection_url(config, addr))
            .map_err(|e| connection_error(e.to_string()))?;
        let conn = tokio::time::timeout(config.dial_timeout, client.get_connection_manager())
            .await
            .map_err(|_| connection_error(format!("dial timed out after {:?}", config.dial_timeout)))?
            .map_err(|e| connection_error(e.to_string()))?;

        Ok(Self {
            conn,
            addr: addr.to_string(),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        })
    }

    /// Address this connection was established to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

/// Build a `redis://` url carrying credentials and the database index.
fn connection_url(config: &RemoteCacheConfig, addr: &str) -> String {
    let auth = match (config.username.is_empty(), config.password.is_empty()) {
        (_, true) => String::new(),
        (true, false) => format!(":{}@", urlencoding::encode(&config.password)),
        (false, false) => format!(
            "{}:{}@",
            urlencoding::encode(&config.username),
            urlencoding::encode(&config.password)
        ),
    };
    format!("redis://{}{}/{}", auth, addr, config.db)
}

async fn with_timeout<T, F>(command: &str, timeout: Duration, fut: F) -> Result<T, CacheError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CacheError::Command {
            command: command.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(CacheError::Command {
            command: command.to_string(),
            reason: format!("timed out after {:?}", timeout),
        }),
    }
}

#[async_trait]
impl RemoteKv for RedisConnection {
    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        with_timeout(
            "SET",
            self.write_timeout,
            conn.set_ex::<_, _, ()>(key, value, ttl_secs),
        )
        .await
    }

    async fn set_ex_multi(
        &self,
        items: &HashMap<String, Vec<u8>>,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        let mut pipe = redis::pipe();
        for (key, value) in items {
            pipe.cmd("SETEX")
                .arg(key)
                .arg(ttl_secs)
                .arg(value.as_slice())
                .ignore();
        }

        let mut conn = self.conn.clone();
        with_timeout::<(), _>("SETEX", self.write_timeout, pipe.query_async(&mut conn)).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("MGET");
        cmd.arg(keys);
        with_timeout::<Vec<Option<Vec<u8>>>, _>("MGET", self.read_timeout, cmd.query_async(&mut conn))
            .await
    }
}
