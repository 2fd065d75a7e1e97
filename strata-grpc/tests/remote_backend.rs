//! Stream response cache over the remote cache backend.

use std::sync::Arc;
use std::time::Duration;

use prometheus::Registry;
use strata_cache::{RedisClient, RemoteCache};
use strata_core::RemoteCacheConfig;
use strata_grpc::{CachedMethod, ClientStream, Fingerprint, StreamCacheInterceptor};
use strata_test_utils::fixtures::{series_request, series_responses, SERIES_METHOD, STORE_TARGET};
use strata_test_utils::{InMemoryKv, ScriptedStream, SeriesResponse};
use tonic::Status;

type Backend = RemoteCache<InMemoryKv>;

fn setup(registry: &Registry) -> (Arc<Backend>, StreamCacheInterceptor<Backend>) {
    let config = RemoteCacheConfig {
        addr: "cache:6379".to_string(),
        ..Default::default()
    };
    let client = RedisClient::with_kv("responses", InMemoryKv::new(), &config, registry)
        .expect("client creation should succeed");
    let backend = Arc::new(RemoteCache::new("responses", client, registry).expect("backend"));
    let interceptor = StreamCacheInterceptor::with_backend(
        Arc::clone(&backend),
        CachedMethod::store_series(),
        Duration::from_secs(300),
        registry,
    )
    .expect("interceptor");
    (backend, interceptor)
}

async fn run_call(
    interceptor: &StreamCacheInterceptor<Backend>,
    upstream: ScriptedStream,
) -> Result<Vec<SeriesResponse>, Status> {
    let mut call = interceptor.intercept(SERIES_METHOD, STORE_TARGET, upstream);
    call.send_msg(&series_request()).await?;
    let mut received = Vec::new();
    while let Some(message) = call.recv_msg().await? {
        received.push(message);
    }
    Ok(received)
}

#[tokio::test]
async fn test_remote_backend_records_and_replays() {
    let registry = Registry::new();
    let (backend, interceptor) = setup(&registry);
    let recorded = series_responses(3);

    run_call(&interceptor, ScriptedStream::new(recorded.clone()))
        .await
        .expect("first call");
    let fp = Fingerprint::compute(STORE_TARGET, &series_request());
    assert!(backend.client().kv().contains(&fp.count_key()));

    let upstream = ScriptedStream::new(Vec::new());
    let probe = upstream.probe();
    let replayed = run_call(&interceptor, upstream).await.expect("second call");
    assert_eq!(replayed, recorded);
    assert_eq!(probe.recv_calls(), 0);
    assert_eq!(interceptor.cached_calls().get(), 1.0);
}

#[tokio::test]
async fn test_unreachable_service_never_fails_the_call() {
    let registry = Registry::new();
    let (backend, interceptor) = setup(&registry);
    backend.client().kv().set_failing(true);

    let responses = series_responses(2);
    let received = run_call(&interceptor, ScriptedStream::new(responses.clone()))
        .await
        .expect("call succeeds while the cache is down");
    assert_eq!(received, responses);

    backend.client().kv().set_failing(false);
    let upstream = ScriptedStream::new(responses.clone());
    let probe = upstream.probe();
    let received = run_call(&interceptor, upstream).await.expect("second call");
    assert_eq!(received, responses);
    assert_eq!(probe.recv_calls(), 3);
    assert_eq!(interceptor.cached_calls().get(), 0.0);
}

#[tokio::test]
async fn test_service_side_expiry_hidden_by_local_read_cache() {
    let registry = Registry::new();
    let (backend, interceptor) = setup(&registry);
    let recorded = series_responses(2);
    run_call(&interceptor, ScriptedStream::new(recorded.clone()))
        .await
        .expect("first call");

    // Warm the client-side cache, then let the service expire everything.
    run_call(&interceptor, ScriptedStream::new(Vec::new()))
        .await
        .expect("second call");
    let fp = Fingerprint::compute(STORE_TARGET, &series_request());
    let kv = backend.client().kv();
    kv.expire(&fp.count_key());
    for i in 0..recorded.len() {
        kv.expire(&fp.index_key(i));
    }

    let replayed = run_call(&interceptor, ScriptedStream::new(Vec::new()))
        .await
        .expect("third call");
    assert_eq!(replayed, recorded);
    assert_eq!(interceptor.cached_calls().get(), 2.0);
}
