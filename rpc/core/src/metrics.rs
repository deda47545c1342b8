//! Observability surface: per-endpoint counters and Welford-free latency
//! histograms (a bounded raw-sample buffer, not running statistics — the
//! spec asks for precise quantiles, which a decaying mean/variance estimator
//! can't give you). Everything here registers into one
//! [`helianthus_metrics::Registry`] so `/metrics` can render it all with a
//! single `encode` call.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use helianthus_metrics::{
    register_counter_vec, register_gauge_vec, register_latency_histogram, Histogram, IntCounterVec, IntGaugeVec,
    MetricsError, Registry, LATENCY_BUCKETS_MS,
};

/// Number of raw samples a [`LatencyHistogram`] keeps for quantile queries.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 10_000;

/// A per-endpoint latency histogram: a Prometheus `Histogram` (for the
/// `_bucket`/`_sum`/`_count` exposition lines) plus a bounded FIFO of the
/// most recent raw samples, sorted on query to answer quantile questions the
/// fixed bucket edges can't answer precisely.
pub struct LatencyHistogram {
    prometheus: Histogram,
    samples: Mutex<VecDeque<f64>>,
    capacity: usize,
}

impl LatencyHistogram {
    pub fn new(registry: &Registry, name: &str, help: &str) -> Result<Self, MetricsError> {
        Self::with_capacity(registry, name, help, DEFAULT_SAMPLE_CAPACITY)
    }

    pub fn with_capacity(registry: &Registry, name: &str, help: &str, capacity: usize) -> Result<Self, MetricsError> {
        Ok(Self {
            prometheus: register_latency_histogram(registry, name, help)?,
            samples: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        })
    }

    pub fn observe(&self, latency_ms: f64) {
        self.prometheus.observe(latency_ms);
        let mut samples = self.samples.lock().expect("latency sample buffer poisoned");
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(latency_ms);
    }

    /// Snapshot-sorts the current sample buffer and returns the value at
    /// quantile `q` (0.0..=1.0). `None` if no samples have been recorded yet.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        let samples = self.samples.lock().expect("latency sample buffer poisoned");
        if samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() - 1) as f64 * q.clamp(0.0, 1.0)).round() as usize;
        Some(sorted[idx])
    }

    pub fn p50(&self) -> Option<f64> {
        self.quantile(0.50)
    }

    pub fn p95(&self) -> Option<f64> {
        self.quantile(0.95)
    }

    pub fn p99(&self) -> Option<f64> {
        self.quantile(0.99)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().expect("latency sample buffer poisoned").len()
    }
}

/// Process-wide RPC counters and per-endpoint latency histograms. One
/// instance is normally shared (behind an `Arc`) between every `Server`,
/// `Client`, and interceptor in a process so `/metrics` reflects the whole
/// picture, not just one connection's.
pub struct RpcMetrics {
    registry: Registry,
    calls_total: IntCounterVec,
    calls_active: IntGaugeVec,
    late_responses: IntCounterVec,
    quantiles: IntGaugeVec,
    endpoints: Mutex<HashMap<String, std::sync::Arc<LatencyHistogram>>>,
}

/// The outcome bucket a completed call is recorded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
}

impl CallOutcome {
    fn label(self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::Timeout => "timeout",
        }
    }
}

impl RpcMetrics {
    pub fn new(registry: Registry) -> Result<Self, MetricsError> {
        Ok(Self {
            calls_total: register_counter_vec(
                &registry,
                "helianthus_rpc_calls_total",
                "total RPC calls observed, by service and outcome",
                &["service", "outcome"],
            )?,
            calls_active: register_gauge_vec(
                &registry,
                "helianthus_rpc_calls_active",
                "in-flight RPC calls, by service",
                &["service"],
            )?,
            late_responses: register_counter_vec(
                &registry,
                "helianthus_rpc_late_responses_total",
                "responses that arrived after their call had already timed out",
                &["service"],
            )?,
            quantiles: register_gauge_vec(
                &registry,
                "helianthus_rpc_latency_quantile_ms",
                "latency quantiles in milliseconds, by endpoint and quantile",
                &["endpoint", "quantile"],
            )?,
            endpoints: Mutex::new(HashMap::new()),
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn call_started(&self, service: &str) {
        self.calls_active.with_label_values(&[service]).inc();
    }

    pub fn call_finished(&self, service: &str, outcome: CallOutcome) {
        self.calls_active.with_label_values(&[service]).dec();
        self.calls_total.with_label_values(&[service, outcome.label()]).inc();
    }

    pub fn late_response(&self, service: &str) {
        self.late_responses.with_label_values(&[service]).inc();
    }

    /// Returns the latency histogram for `endpoint` (conventionally
    /// `"service.method"`), creating and registering it on first use.
    pub fn endpoint_histogram(&self, endpoint: &str) -> std::sync::Arc<LatencyHistogram> {
        let mut endpoints = self.endpoints.lock().expect("endpoint histogram map poisoned");
        if let Some(existing) = endpoints.get(endpoint) {
            return existing.clone();
        }
        let metric_name = format!("helianthus_rpc_latency_ms_{}", sanitize_metric_name(endpoint));
        let histogram = std::sync::Arc::new(
            LatencyHistogram::new(&self.registry, &metric_name, "per-endpoint RPC latency in milliseconds")
                .expect("endpoint histogram names are derived and always valid"),
        );
        endpoints.insert(endpoint.to_string(), histogram.clone());
        histogram
    }

    /// Records a completed call's latency against its endpoint histogram and
    /// refreshes the p50/p95/p99 gauges that histogram exposes.
    pub fn observe_latency(&self, endpoint: &str, latency_ms: f64) {
        let histogram = self.endpoint_histogram(endpoint);
        histogram.observe(latency_ms);
        if let Some(p50) = histogram.p50() {
            self.quantiles.with_label_values(&[endpoint, "p50"]).set(p50);
        }
        if let Some(p95) = histogram.p95() {
            self.quantiles.with_label_values(&[endpoint, "p95"]).set(p95);
        }
        if let Some(p99) = histogram.p99() {
            self.quantiles.with_label_values(&[endpoint, "p99"]).set(p99);
        }
    }
}

/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`; endpoint
/// names carry a `.` separating service and method, which isn't valid.
fn sanitize_metric_name(endpoint: &str) -> String {
    endpoint
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Every histogram this crate registers shares [`LATENCY_BUCKETS_MS`] — kept
/// visible here so callers building their own ad hoc histogram (e.g. a test)
/// can match the same buckets without reaching into `helianthus_metrics`
/// directly.
pub const LATENCY_BUCKETS: &[f64] = LATENCY_BUCKETS_MS;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_is_none_with_no_samples() {
        let registry = Registry::new();
        let histogram = LatencyHistogram::new(&registry, "test_latency_ms", "test").unwrap();
        assert!(histogram.p50().is_none());
    }

    #[test]
    fn quantile_reflects_recorded_samples() {
        let registry = Registry::new();
        let histogram = LatencyHistogram::new(&registry, "test_latency_ms2", "test").unwrap();
        for ms in 1..=100 {
            histogram.observe(ms as f64);
        }
        let p50 = histogram.p50().unwrap();
        assert!((40.0..=60.0).contains(&p50));
        let p99 = histogram.p99().unwrap();
        assert!(p99 >= 95.0);
    }

    #[test]
    fn sample_buffer_is_bounded() {
        let registry = Registry::new();
        let histogram = LatencyHistogram::with_capacity(&registry, "test_latency_ms3", "test", 10).unwrap();
        for ms in 0..100 {
            histogram.observe(ms as f64);
        }
        assert_eq!(histogram.sample_count(), 10);
    }

    #[test]
    fn metrics_round_trip_through_prometheus_text() {
        let registry = Registry::new();
        let metrics = RpcMetrics::new(registry).unwrap();
        metrics.call_started("CalculatorService");
        metrics.observe_latency("CalculatorService.add", 2.5);
        metrics.call_finished("CalculatorService", CallOutcome::Success);

        let text = helianthus_metrics::encode(metrics.registry()).unwrap();
        assert!(text.contains("helianthus_rpc_calls_total"));
        assert!(text.contains("helianthus_rpc_latency_quantile_ms"));
    }
}
