//! Strata Test Utilities
//!
//! Shared test infrastructure for the strata workspace:
//! - Protobuf messages standing in for the store API
//! - A scripted client stream with an inspectable probe
//! - Mock cache backends and an in-memory remote KV
//! - Proptest generators for response sequences

pub use strata_cache::{CacheBackend, RemoteKv};
pub use strata_core::{CacheError, StrataError, StrataResult};
pub use strata_grpc::{ClientStream, Fingerprint};

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tonic::Status;

// ============================================================================
// MESSAGES
// ============================================================================

/// Series read request.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SeriesRequest {
    #[prost(int64, tag = "1")]
    pub min_time: i64,
    #[prost(int64, tag = "2")]
    pub max_time: i64,
    #[prost(string, repeated, tag = "3")]
    pub matchers: Vec<String>,
}

/// One frame of a series read response.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SeriesResponse {
    #[prost(string, tag = "1")]
    pub series: String,
    #[prost(bytes = "vec", tag = "2")]
    pub chunk: Vec<u8>,
}

// ============================================================================
// SCRIPTED STREAM
// ============================================================================

#[derive(Debug, Default)]
struct ProbeState {
    sent: Vec<SeriesRequest>,
    recv_calls: usize,
}

/// Shared view into what a [`ScriptedStream`] was asked to do.
///
/// Stays usable after the stream itself was moved into an interceptor.
#[derive(Debug, Clone, Default)]
pub struct StreamProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl StreamProbe {
    /// Requests that reached the transport.
    pub fn sent(&self) -> Vec<SeriesRequest> {
        self.state.lock().expect("probe lock").sent.clone()
    }

    /// Number of reads that reached the transport.
    pub fn recv_calls(&self) -> usize {
        self.state.lock().expect("probe lock").recv_calls
    }
}

/// Client stream answering reads from a fixed script.
///
/// Yields the scripted responses in order, then either end of stream or
/// the configured error.
pub struct ScriptedStream {
    responses: VecDeque<SeriesResponse>,
    trailing_error: Option<Status>,
    send_error: Option<Status>,
    probe: StreamProbe,
}

impl ScriptedStream {
    pub fn new(responses: Vec<SeriesResponse>) -> Self {
        Self {
            responses: responses.into(),
            trailing_error: None,
            send_error: None,
            probe: StreamProbe::default(),
        }
    }

    /// Fail with `status` after the scripted responses instead of ending.
    pub fn failing_with(mut self, status: Status) -> Self {
        self.trailing_error = Some(status);
        self
    }

    /// Reject the outbound request with `status`.
    pub fn rejecting_send(mut self, status: Status) -> Self {
        self.send_error = Some(status);
        self
    }

    pub fn probe(&self) -> StreamProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl ClientStream for ScriptedStream {
    type Request = SeriesRequest;
    type Response = SeriesResponse;

    async fn send_msg(&mut self, request: &SeriesRequest) -> Result<(), Status> {
        self.probe
            .state
            .lock()
            .expect("probe lock")
            .sent
            .push(request.clone());
        match &self.send_error {
            Some(status) => Err(status.clone()),
            None => Ok(()),
        }
    }

    async fn recv_msg(&mut self) -> Result<Option<SeriesResponse>, Status> {
        self.probe.state.lock().expect("probe lock").recv_calls += 1;
        if let Some(status) = &self.send_error {
            return Err(status.clone());
        }
        match self.responses.pop_front() {
            Some(response) => Ok(Some(response)),
            None => match self.trailing_error.take() {
                Some(status) => Err(status),
                None => Ok(None),
            },
        }
    }
}

// ============================================================================
// MOCK BACKENDS
// ============================================================================

/// Unbounded map backend that records every call.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    stores: AtomicUsize,
    fetches: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().expect("backend lock").get(key).cloned()
    }

    /// Drop `key`, as an eviction would.
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().expect("backend lock").remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("backend lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `store` calls.
    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    /// Number of `fetch` calls.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheBackend for RecordingBackend {
    async fn store(&self, data: HashMap<String, Vec<u8>>, _ttl: Duration) {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().expect("backend lock").extend(data);
    }

    async fn fetch(&self, keys: &[String]) -> HashMap<String, Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let entries = self.entries.lock().expect("backend lock");
        keys.iter()
            .filter_map(|key| entries.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Remote KV kept in process memory, with switchable failure.
#[derive(Debug, Default)]
pub struct InMemoryKv {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following command fail, or succeed again.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Drop `key`, as the service's own expiry would.
    pub fn expire(&self, key: &str) {
        self.entries.lock().expect("kv lock").remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().expect("kv lock").contains_key(key)
    }

    fn check(&self, command: &str) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Command {
                command: command.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteKv for InMemoryKv {
    async fn set_ex(&self, key: &str, value: &[u8], _ttl_secs: u64) -> Result<(), CacheError> {
        self.check("SET")?;
        self.entries
            .lock()
            .expect("kv lock")
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn set_ex_multi(
        &self,
        items: &HashMap<String, Vec<u8>>,
        _ttl_secs: u64,
    ) -> Result<(), CacheError> {
        self.check("SETEX")?;
        let mut entries = self.entries.lock().expect("kv lock");
        for (key, value) in items {
            entries.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        self.check("MGET")?;
        let entries = self.entries.lock().expect("kv lock");
        Ok(keys.iter().map(|key| entries.get(key).cloned()).collect())
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    pub fn arb_series_response() -> impl Strategy<Value = SeriesResponse> {
        ("[a-z_]{1,12}", prop::collection::vec(any::<u8>(), 0..64))
            .prop_map(|(series, chunk)| SeriesResponse { series, chunk })
    }

    /// Non-empty response sequences.
    pub fn arb_response_sequence() -> impl Strategy<Value = Vec<SeriesResponse>> {
        prop::collection::vec(arb_series_response(), 1..16)
    }

    pub fn arb_series_request() -> impl Strategy<Value = SeriesRequest> {
        (
            any::<i64>(),
            any::<i64>(),
            prop::collection::vec("[a-z]{1,8}=\"[a-z0-9]{1,8}\"", 0..4),
        )
            .prop_map(|(min_time, max_time, matchers)| SeriesRequest {
                min_time,
                max_time,
                matchers,
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    pub const STORE_TARGET: &str = "store-1:10901";
    pub const SERIES_METHOD: &str = "/strata.Store/Series";

    pub fn series_request() -> SeriesRequest {
        SeriesRequest {
            min_time: 0,
            max_time: 3_600_000,
            matchers: vec!["job=\"api\"".to_string()],
        }
    }

    /// `count` distinct responses, `series-0`, `series-1`, ...
    pub fn series_responses(count: usize) -> Vec<SeriesResponse> {
        (0..count)
            .map(|i| SeriesResponse {
                series: format!("series-{}", i),
                chunk: vec![i as u8; 4],
            })
            .collect()
    }
}
