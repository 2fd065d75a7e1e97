//! Prometheus metric helpers for cache backends.
//!
//! Metrics are registered into a registry handed in by the caller, never a
//! process-global one.

use prometheus::core::Collector;
use prometheus::{Counter, HistogramOpts, HistogramVec, Opts, Registry};
use strata_core::CacheError;

/// Remote operation latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 200ms, 500ms, 1s, 3s, 6s, 10s
pub const REMOTE_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.0, 3.0, 6.0, 10.0,
];

/// Register `collector` and hand it back.
pub fn register<C>(registry: &Registry, collector: C) -> Result<C, CacheError>
where
    C: Collector + Clone + 'static,
{
    let metric = collector
        .desc()
        .first()
        .map(|desc| desc.fq_name.clone())
        .unwrap_or_default();
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| CacheError::Metrics {
            metric,
            reason: e.to_string(),
        })?;
    Ok(collector)
}

/// Build and register a counter carrying a `name` const label.
pub fn named_counter(
    registry: &Registry,
    metric: &str,
    help: &str,
    name: &str,
) -> Result<Counter, CacheError> {
    let counter = Counter::with_opts(Opts::new(metric, help).const_label("name", name)).map_err(
        |e| CacheError::Metrics {
            metric: metric.to_string(),
            reason: e.to_string(),
        },
    )?;
    register(registry, counter)
}

/// Build and register a latency histogram partitioned by `operation`.
pub fn operation_histogram(
    registry: &Registry,
    metric: &str,
    help: &str,
    name: &str,
) -> Result<HistogramVec, CacheError> {
    let histogram = HistogramVec::new(
        HistogramOpts::new(metric, help)
            .const_label("name", name)
            .buckets(REMOTE_LATENCY_BUCKETS.to_vec()),
        &["operation"],
    )
    .map_err(|e| CacheError::Metrics {
        metric: metric.to_string(),
        reason: e.to_string(),
    })?;
    register(registry, histogram)
}
