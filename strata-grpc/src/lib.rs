//! Strata gRPC - Stream Response Cache
//!
//! Caches the full response sequence of selected server-streaming client
//! calls. The first request of a call is fingerprinted together with the
//! call target; a complete entry under that fingerprint is replayed to the
//! caller, otherwise the responses are recorded and written back once the
//! stream ends cleanly.
//!
//! # Example
//!
//! ```ignore
//! use strata_grpc::{CachedMethod, StreamCacheInterceptor};
//!
//! let registry = prometheus::Registry::new();
//! let config = strata_core::StreamCacheConfig::from_env()?;
//! let interceptor =
//!     StreamCacheInterceptor::from_config(&config, CachedMethod::store_series(), &registry)?;
//!
//! let stream = GrpcServerStream::open(channel, &CachedMethod::store_series())?;
//! let mut call = interceptor.intercept("/strata.Store/Series", "store-1:10901", stream);
//! call.send_msg(&request).await?;
//! while let Some(response) = call.recv_msg().await? {
//!     // ...
//! }
//! ```

pub mod entry;
pub mod fingerprint;
pub mod grpc;
pub mod interceptor;
pub mod method;
pub mod stream;
pub mod telemetry;

pub use entry::{encode_entry, fetch_entry, EntryMiss};
pub use fingerprint::Fingerprint;
pub use grpc::GrpcServerStream;
pub use interceptor::{CachingStream, InterceptedStream, StreamCacheInterceptor};
pub use method::{split_method_name, CachedMethod};
pub use stream::ClientStream;
pub use telemetry::{init_tracing, LogFormat};
