//! Configuration Module
//!
//! Configuration for the stream response cache, the remote cache client and
//! the disk tier of the index cache. Everything is loaded from environment
//! variables with defaults suitable for a single node; the remote client can
//! also be described by a YAML document.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;
use crate::types::LabelMatcher;

/// Fixed ttl of recorded stream responses.
pub const DEFAULT_STREAM_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Client-side read cache size used when none is configured.
pub const DEFAULT_CLIENT_CACHE_SIZE: ByteSize = ByteSize(1024 * 1024 * 1024);

/// Local freshness window of the client-side read cache.
pub const DEFAULT_CLIENT_CACHE_TTL: Duration = Duration::from_secs(8 * 60 * 60);

// ============================================================================
// BYTE SIZES
// ============================================================================

/// A size in bytes.
///
/// Parses plain integers and integers with a base-2 unit suffix:
/// `K`/`KB`/`KiB`, `M`/`MB`/`MiB`, `G`/`GB`/`GiB`, `T`/`TB`/`TiB`, or `B`.
/// Decimal-looking suffixes are base 2 as well, so `64MB` is 64 * 2^20.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for ByteSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            field: "byte_size".to_string(),
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);
        if digits.is_empty() {
            return Err(invalid("expected a number"));
        }
        let number: u64 = digits.parse().map_err(|_| invalid("number out of range"))?;

        let shift = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 0,
            "k" | "kb" | "kib" => 10,
            "m" | "mb" | "mib" => 20,
            "g" | "gb" | "gib" => 30,
            "t" | "tb" | "tib" => 40,
            _ => return Err(invalid("unknown unit")),
        };

        number
            .checked_mul(1u64 << shift)
            .map(ByteSize)
            .ok_or_else(|| invalid("size overflows u64"))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}

impl Serialize for ByteSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(ByteSize(n)),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// ============================================================================
// ENVIRONMENT HELPERS
// ============================================================================

fn lookup_parsed<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map(Some).map_err(|_| {
            ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw.clone(),
                reason: format!("cannot parse as {}", std::any::type_name::<T>()),
            }
        }),
        _ => Ok(None),
    }
}

fn lookup_duration<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => humantime::parse_duration(raw.trim())
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
        _ => Ok(None),
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// ============================================================================
// STREAM RESPONSE CACHE
// ============================================================================

/// Sizing of the stream response cache.
///
/// A `max_size` of zero disables caching entirely: no backend is built and
/// every call passes through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCacheConfig {
    /// Maximum total size of the in-process store.
    pub max_size: ByteSize,
    /// Maximum size of a single cached message.
    pub max_item_size: ByteSize,
    /// Ttl applied to every recorded response entry.
    pub ttl: Duration,
}

impl Default for StreamCacheConfig {
    fn default() -> Self {
        Self {
            max_size: ByteSize(0),
            max_item_size: ByteSize(0),
            ttl: DEFAULT_STREAM_CACHE_TTL,
        }
    }
}

impl StreamCacheConfig {
    pub fn new(max_size: ByteSize, max_item_size: ByteSize) -> Self {
        Self {
            max_size,
            max_item_size,
            ttl: DEFAULT_STREAM_CACHE_TTL,
        }
        .normalized()
    }

    /// Create config from environment variables.
    ///
    /// Environment variables:
    /// - `STRATA_GRPC_CACHE_MAX_SIZE`: total store size (default: 0, disabled)
    /// - `STRATA_GRPC_CACHE_MAX_ITEM_SIZE`: largest cacheable message (default: 0)
    /// - `STRATA_GRPC_CACHE_TTL`: entry ttl, humantime format (default: 5m)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Same as [`StreamCacheConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            max_size: lookup_parsed(&lookup, "STRATA_GRPC_CACHE_MAX_SIZE")?
                .unwrap_or(defaults.max_size),
            max_item_size: lookup_parsed(&lookup, "STRATA_GRPC_CACHE_MAX_ITEM_SIZE")?
                .unwrap_or(defaults.max_item_size),
            ttl: lookup_duration(&lookup, "STRATA_GRPC_CACHE_TTL")?.unwrap_or(defaults.ttl),
        }
        .normalized())
    }

    /// Whether the cache is switched on at all.
    pub fn is_enabled(&self) -> bool {
        !self.max_size.is_zero()
    }

    fn normalized(mut self) -> Self {
        if self.max_size.is_zero() {
            self.max_item_size = ByteSize(0);
        }
        self
    }
}

// ============================================================================
// REMOTE CACHE CLIENT
// ============================================================================

/// Connection parameters of the remote cache service (redis protocol).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteCacheConfig {
    /// Single server address, `host:port`.
    pub addr: String,
    /// Several server addresses; mutually exclusive with `addr`.
    pub addrs: Vec<String>,
    pub username: String,
    pub password: String,
    pub db: i64,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    /// Size of the client-side read cache; zero selects the 1 GiB default.
    pub cache_size: ByteSize,
    /// Local freshness window of the client-side read cache. Independent of
    /// the ttl entries are written with.
    #[serde(with = "humantime_serde")]
    pub client_cache_ttl: Duration,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            addrs: Vec::new(),
            username: String::new(),
            password: String::new(),
            db: 0,
            dial_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(3),
            cache_size: ByteSize(0),
            client_cache_ttl: DEFAULT_CLIENT_CACHE_TTL,
        }
    }
}

impl fmt::Debug for RemoteCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCacheConfig")
            .field("addr", &self.addr)
            .field("addrs", &self.addrs)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "<redacted>" })
            .field("db", &self.db)
            .field("dial_timeout", &self.dial_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("cache_size", &self.cache_size)
            .field("client_cache_ttl", &self.client_cache_ttl)
            .finish()
    }
}

impl RemoteCacheConfig {
    /// Parse a YAML document, then validate it.
    pub fn from_yaml(doc: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(doc).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create config from environment variables, then validate it.
    ///
    /// Environment variables:
    /// - `STRATA_REDIS_ADDR` or `STRATA_REDIS_ADDRS` (comma-separated)
    /// - `STRATA_REDIS_USERNAME`, `STRATA_REDIS_PASSWORD`, `STRATA_REDIS_DB`
    /// - `STRATA_REDIS_DIAL_TIMEOUT`, `STRATA_REDIS_WRITE_TIMEOUT`,
    ///   `STRATA_REDIS_READ_TIMEOUT` (humantime format)
    /// - `STRATA_REDIS_CACHE_SIZE`: client-side read cache size
    /// - `STRATA_REDIS_CLIENT_CACHE_TTL`: client-side freshness window (default: 8h)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Same as [`RemoteCacheConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let addrs = lookup("STRATA_REDIS_ADDRS")
            .map(|s| {
                s.split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            addr: lookup("STRATA_REDIS_ADDR").unwrap_or_default().trim().to_string(),
            addrs,
            username: lookup("STRATA_REDIS_USERNAME").unwrap_or_default(),
            password: lookup("STRATA_REDIS_PASSWORD").unwrap_or_default(),
            db: lookup_parsed(&lookup, "STRATA_REDIS_DB")?.unwrap_or(defaults.db),
            dial_timeout: lookup_duration(&lookup, "STRATA_REDIS_DIAL_TIMEOUT")?
                .unwrap_or(defaults.dial_timeout),
            write_timeout: lookup_duration(&lookup, "STRATA_REDIS_WRITE_TIMEOUT")?
                .unwrap_or(defaults.write_timeout),
            read_timeout: lookup_duration(&lookup, "STRATA_REDIS_READ_TIMEOUT")?
                .unwrap_or(defaults.read_timeout),
            cache_size: lookup_parsed(&lookup, "STRATA_REDIS_CACHE_SIZE")?
                .unwrap_or(defaults.cache_size),
            client_cache_ttl: lookup_duration(&lookup, "STRATA_REDIS_CLIENT_CACHE_TTL")?
                .unwrap_or(defaults.client_cache_ttl),
        };
        config.validate()?;
        Ok(config)
    }

    /// Exactly one of `addr` and `addrs` must be given.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.addr.is_empty(), self.addrs.is_empty()) {
            (true, true) => Err(ConfigError::MissingRequired {
                field: "addr".to_string(),
            }),
            (false, false) => Err(ConfigError::IncompatibleOptions {
                option_a: "addr".to_string(),
                option_b: "addrs".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// The server addresses to dial.
    pub fn addresses(&self) -> Vec<String> {
        if self.addrs.is_empty() {
            vec![self.addr.clone()]
        } else {
            self.addrs.clone()
        }
    }

    /// Client-side read cache size with the default applied.
    pub fn effective_cache_size(&self) -> ByteSize {
        if self.cache_size.is_zero() {
            DEFAULT_CLIENT_CACHE_SIZE
        } else {
            self.cache_size
        }
    }
}

// ============================================================================
// DISK TIER
// ============================================================================

/// Disk tier of the index cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskTierConfig {
    /// Directory holding the LMDB environment.
    pub path: PathBuf,
    /// LMDB map size.
    pub max_size: ByteSize,
    /// Postings for this label go to disk; everything else to the fallback.
    pub route: LabelMatcher,
}

impl Default for DiskTierConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/index-cache"),
            max_size: ByteSize(1024 * 1024 * 1024),
            route: LabelMatcher::default(),
        }
    }
}

impl DiskTierConfig {
    /// Create config from environment variables.
    ///
    /// Environment variables:
    /// - `STRATA_INDEX_DISK_PATH` (default: ./data/index-cache)
    /// - `STRATA_INDEX_DISK_MAX_SIZE` (default: 1GiB)
    /// - `STRATA_INDEX_DISK_ROUTE`: `name=value` (default: app=core)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Same as [`DiskTierConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            path: lookup("STRATA_INDEX_DISK_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            max_size: lookup_parsed(&lookup, "STRATA_INDEX_DISK_MAX_SIZE")?
                .unwrap_or(defaults.max_size),
            route: match lookup("STRATA_INDEX_DISK_ROUTE") {
                Some(raw) if !raw.trim().is_empty() => raw.parse()?,
                _ => defaults.route,
            },
        })
    }
}
