//! Response cache for server-streaming client calls.
//!
//! Each selected call moves through `Init`, then on its first request to
//! either `Replay` (a complete entry was found) or `Record`, and finally
//! `Done`. Cache problems never fail a call: every lookup failure is a miss
//! and every write is best effort.
//!
//! The request is always forwarded upstream, including on a hit. A hit only
//! changes what the local caller reads back.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prometheus::{Counter, Opts, Registry};
use prost::Message;
use strata_cache::metrics::register;
use strata_cache::{CacheBackend, InMemoryCache};
use strata_core::{CacheError, StreamCacheConfig, StrataResult};
use tonic::Status;

use crate::entry::{encode_entry, fetch_entry};
use crate::fingerprint::Fingerprint;
use crate::method::CachedMethod;
use crate::stream::ClientStream;

const CACHE_NAME: &str = "cachinginterceptor";

/// Builds per-call caching wrappers around client streams.
///
/// Holds the shared backend and counter; a disabled interceptor owns no
/// backend and hands every stream back untouched.
pub struct StreamCacheInterceptor<B: ?Sized = InMemoryCache> {
    backend: Option<Arc<B>>,
    method: CachedMethod,
    ttl: Duration,
    cached_calls: Counter,
}

impl StreamCacheInterceptor<InMemoryCache> {
    /// Build the interceptor and its in-process store from `config`.
    ///
    /// A zero `max_size` disables caching; no store is constructed then.
    pub fn from_config(
        config: &StreamCacheConfig,
        method: CachedMethod,
        registry: &Registry,
    ) -> StrataResult<Self> {
        let backend = if config.is_enabled() {
            Some(Arc::new(InMemoryCache::new(
                CACHE_NAME,
                config.max_size,
                config.max_item_size,
                registry,
            )?))
        } else {
            tracing::info!(method = %method.path(), "stream response cache disabled");
            None
        };
        Self::build(backend, method, config.ttl, registry)
    }
}

impl<B: CacheBackend + ?Sized> StreamCacheInterceptor<B> {
    /// Build an interceptor over an existing backend.
    pub fn with_backend(
        backend: Arc<B>,
        method: CachedMethod,
        ttl: Duration,
        registry: &Registry,
    ) -> StrataResult<Self> {
        Self::build(Some(backend), method, ttl, registry)
    }

    /// An interceptor that never caches.
    pub fn passthrough(method: CachedMethod, registry: &Registry) -> StrataResult<Self> {
        Self::build(None, method, Duration::ZERO, registry)
    }

    fn build(
        backend: Option<Arc<B>>,
        method: CachedMethod,
        ttl: Duration,
        registry: &Registry,
    ) -> StrataResult<Self> {
        let cached_calls = Counter::with_opts(Opts::new(
            "strata_grpc_cached_calls_total",
            "How many calls were served entirely from the response cache.",
        ))
        .map_err(|e| CacheError::Metrics {
            metric: "strata_grpc_cached_calls_total".to_string(),
            reason: e.to_string(),
        })?;
        let cached_calls = register(registry, cached_calls)?;

        if let Some(backend) = &backend {
            tracing::info!(
                method = %method.path(),
                backend = %backend.name(),
                ttl = ?ttl,
                "stream response cache enabled"
            );
        }

        Ok(Self {
            backend,
            method,
            ttl,
            cached_calls,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.backend.is_none()
    }

    pub fn backend(&self) -> Option<&Arc<B>> {
        self.backend.as_ref()
    }

    /// Calls fully served from the cache so far.
    pub fn cached_calls(&self) -> &Counter {
        &self.cached_calls
    }

    /// Wrap a freshly opened stream for the call `full_method` to `target`.
    ///
    /// Streams for other methods, and all streams when caching is
    /// disabled, come back as [`InterceptedStream::Passthrough`].
    pub fn intercept<S: ClientStream>(
        &self,
        full_method: &str,
        target: &str,
        stream: S,
    ) -> InterceptedStream<S, B> {
        match &self.backend {
            Some(backend) if self.method.matches(full_method) => {
                InterceptedStream::Cached(CachingStream {
                    inner: stream,
                    target: target.to_string(),
                    backend: Arc::clone(backend),
                    ttl: self.ttl,
                    cached_calls: self.cached_calls.clone(),
                    state: CallState::Init,
                })
            }
            _ => InterceptedStream::Passthrough(stream),
        }
    }
}

/// A client stream as returned by [`StreamCacheInterceptor::intercept`].
pub enum InterceptedStream<S: ClientStream, B: ?Sized> {
    Passthrough(S),
    Cached(CachingStream<S, B>),
}

impl<S: ClientStream, B: ?Sized> InterceptedStream<S, B> {
    pub fn is_cached(&self) -> bool {
        matches!(self, InterceptedStream::Cached(_))
    }
}

#[async_trait]
impl<S, B> ClientStream for InterceptedStream<S, B>
where
    S: ClientStream,
    B: CacheBackend + ?Sized,
{
    type Request = S::Request;
    type Response = S::Response;

    async fn send_msg(&mut self, request: &Self::Request) -> Result<(), Status> {
        match self {
            InterceptedStream::Passthrough(inner) => inner.send_msg(request).await,
            InterceptedStream::Cached(caching) => caching.send_msg(request).await,
        }
    }

    async fn recv_msg(&mut self) -> Result<Option<Self::Response>, Status> {
        match self {
            InterceptedStream::Passthrough(inner) => inner.recv_msg().await,
            InterceptedStream::Cached(caching) => caching.recv_msg().await,
        }
    }
}

enum CallState<M> {
    /// No request sent yet.
    Init,
    /// Serving a complete cached entry.
    Replay(VecDeque<M>),
    /// Reading from upstream and buffering encoded replies.
    Record {
        fingerprint: Fingerprint,
        buffer: Vec<Vec<u8>>,
    },
    /// Finished or abandoned; reads go straight to the transport.
    Done,
}

/// Per-call wrapper that replays or records one call's responses.
pub struct CachingStream<S: ClientStream, B: ?Sized> {
    inner: S,
    target: String,
    backend: Arc<B>,
    ttl: Duration,
    cached_calls: Counter,
    state: CallState<S::Response>,
}

impl<S: ClientStream, B: CacheBackend + ?Sized> CachingStream<S, B> {
    async fn lookup(&mut self, request: &S::Request) {
        let fingerprint = Fingerprint::compute(&self.target, request);
        match fetch_entry::<S::Response, B>(&self.backend, &fingerprint).await {
            Ok(messages) => {
                tracing::debug!(
                    fingerprint = %fingerprint,
                    messages = messages.len(),
                    "serving call from response cache"
                );
                self.cached_calls.inc();
                self.state = CallState::Replay(messages.into());
            }
            Err(miss) => {
                tracing::debug!(fingerprint = %fingerprint, reason = %miss, "response cache miss");
                self.state = CallState::Record {
                    fingerprint,
                    buffer: Vec::new(),
                };
            }
        }
    }

    async fn persist(&mut self) {
        let state = std::mem::replace(&mut self.state, CallState::Done);
        if let CallState::Record {
            fingerprint,
            buffer,
        } = state
        {
            if buffer.is_empty() {
                return;
            }
            let messages = buffer.len();
            self.backend
                .store(encode_entry(&fingerprint, buffer), self.ttl)
                .await;
            tracing::debug!(fingerprint = %fingerprint, messages, "recorded call into response cache");
        }
    }

    async fn send_msg(&mut self, request: &S::Request) -> Result<(), Status> {
        if matches!(self.state, CallState::Init) {
            self.lookup(request).await;
        }
        let sent = self.inner.send_msg(request).await;
        if sent.is_err() {
            self.state = CallState::Done;
        }
        sent
    }

    async fn recv_msg(&mut self) -> Result<Option<S::Response>, Status> {
        match &mut self.state {
            CallState::Init | CallState::Done => self.inner.recv_msg().await,
            CallState::Replay(buffered) => Ok(buffered.pop_front()),
            CallState::Record { buffer, .. } => match self.inner.recv_msg().await {
                Ok(Some(message)) => {
                    buffer.push(message.encode_to_vec());
                    Ok(Some(message))
                }
                Ok(None) => {
                    self.persist().await;
                    Ok(None)
                }
                Err(status) => {
                    self.state = CallState::Done;
                    Err(status)
                }
            },
        }
    }
}
