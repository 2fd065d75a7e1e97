//! Strata Core - Shared Types
//!
//! Identifiers, error taxonomy and configuration shared by the cache
//! backends and the stream response cache. Every other crate depends on this.

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ByteSize, DiskTierConfig, RemoteCacheConfig, StreamCacheConfig, DEFAULT_CLIENT_CACHE_SIZE,
    DEFAULT_CLIENT_CACHE_TTL, DEFAULT_STREAM_CACHE_TTL,
};
pub use error::{CacheError, ConfigError, StrataError, StrataResult};
pub use types::{BlockId, Label, LabelMatcher, SeriesRef};
