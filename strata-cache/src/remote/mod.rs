//! Remote cache service backend.
//!
//! [`RedisClient`] wraps the wire connection with batching, a client-side
//! read cache and latency histograms. [`RemoteCache`] adapts it to the
//! [`CacheBackend`](crate::CacheBackend) contract and counts requested and
//! hit keys.

mod cache;
mod client;
mod connection;
#[cfg(test)]
mod fake;

pub use cache::RemoteCache;
pub use client::RedisClient;
pub use connection::{RedisConnection, RemoteKv};
