//! Thin wrapper around the `prometheus` crate: a process-wide registry, a
//! fixed latency bucket set shared by every RPC histogram, and a text
//! exposition encoder. Pulling metrics over HTTP is left to the caller (see
//! `helianthus_rpc::http`); this crate only knows how to hold and render
//! them.

mod error;

pub use error::MetricsError;
pub use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry};

use prometheus::{Encoder, TextEncoder};

/// Millisecond-scale histogram buckets used by every RPC latency metric.
/// Fixed so that dashboards built against one service's histograms stay
/// meaningful when pointed at another.
pub const LATENCY_BUCKETS_MS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0, 25.0,
    50.0, 75.0, 100.0,
];

/// Creates a `Histogram` pre-configured with [`LATENCY_BUCKETS_MS`] and
/// registers it with `registry`.
pub fn register_latency_histogram(
    registry: &Registry,
    name: &str,
    help: &str,
) -> Result<Histogram, MetricsError> {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(name, help).buckets(LATENCY_BUCKETS_MS.to_vec()),
    )?;
    registry.register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

pub fn register_counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, MetricsError> {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

pub fn register_gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntGaugeVec, MetricsError> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

/// Renders every metric in `registry` using the Prometheus text exposition
/// format (version 0.0.4).
pub fn encode(registry: &Registry) -> Result<String, MetricsError> {
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(feature = "pull")]
pub mod pull;
