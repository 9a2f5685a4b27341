//! Prometheus metrics for the query service.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};

/// Global metrics instance.
static METRICS: OnceLock<Arc<Metrics>> = OnceLock::new();

/// Get or initialize the global metrics instance.
pub fn get_metrics() -> Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new())).clone()
}

/// Latency buckets in seconds, 1ms to 10s.
fn default_latency_buckets() -> Vec<f64> {
    vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

pub struct Metrics {
    pub registry: Registry,

    // =========================================================================
    // Counters
    // =========================================================================
    /// Natural-language queries received.
    pub queries_total: IntCounter,
    /// Failed queries by error code.
    pub query_errors_total: IntCounterVec,
    /// Rows dropped during type coercion.
    pub rows_dropped_total: IntCounter,
    /// Sub-queries sent to each store.
    pub store_requests_total: IntCounterVec,
    /// Sub-queries that failed or timed out, per store.
    pub store_failures_total: IntCounterVec,

    // =========================================================================
    // Gauges
    // =========================================================================
    /// Last observed reachability per store (1 up, 0 down).
    pub store_up: IntGaugeVec,
    pub uptime_seconds: IntGauge,

    // =========================================================================
    // Histograms (durations in seconds)
    // =========================================================================
    /// End-to-end query duration.
    pub query_duration_seconds: Histogram,
    /// Per-store sub-query duration.
    pub store_duration_seconds: HistogramVec,

    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let queries_total = IntCounter::new(
            "ecofed_queries_total",
            "Total number of natural-language queries received",
        )
        .expect("failed to create counter");

        let query_errors_total = IntCounterVec::new(
            Opts::new("ecofed_query_errors_total", "Total number of failed queries"),
            &["kind"],
        )
        .expect("failed to create counter");

        let rows_dropped_total = IntCounter::new(
            "ecofed_rows_dropped_total",
            "Total number of rows dropped during type coercion",
        )
        .expect("failed to create counter");

        let store_requests_total = IntCounterVec::new(
            Opts::new(
                "ecofed_store_requests_total",
                "Total number of sub-queries sent to a store",
            ),
            &["store"],
        )
        .expect("failed to create counter");

        let store_failures_total = IntCounterVec::new(
            Opts::new(
                "ecofed_store_failures_total",
                "Total number of failed or timed out sub-queries",
            ),
            &["store"],
        )
        .expect("failed to create counter");

        let store_up = IntGaugeVec::new(
            Opts::new("ecofed_store_up", "Whether the store answered its last ping"),
            &["store"],
        )
        .expect("failed to create gauge");

        let uptime_seconds = IntGauge::new("ecofed_uptime_seconds", "Server uptime in seconds")
            .expect("failed to create gauge");

        let query_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "ecofed_query_duration_seconds",
                "End-to-end natural-language query duration in seconds",
            )
            .buckets(default_latency_buckets()),
        )
        .expect("failed to create histogram");

        let store_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "ecofed_store_duration_seconds",
                "Store sub-query duration in seconds",
            )
            .buckets(default_latency_buckets()),
            &["store"],
        )
        .expect("failed to create histogram");

        registry
            .register(Box::new(queries_total.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(query_errors_total.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(rows_dropped_total.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(store_requests_total.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(store_failures_total.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(store_up.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(uptime_seconds.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(query_duration_seconds.clone()))
            .expect("failed to register metric");
        registry
            .register(Box::new(store_duration_seconds.clone()))
            .expect("failed to register metric");

        Self {
            registry,
            queries_total,
            query_errors_total,
            rows_dropped_total,
            store_requests_total,
            store_failures_total,
            store_up,
            uptime_seconds,
            query_duration_seconds,
            store_duration_seconds,
            start_time: Instant::now(),
        }
    }

    pub fn record_store_up(&self, store: &str, up: bool) {
        self.store_up.with_label_values(&[store]).set(up as i64);
    }

    pub fn record_store_request(&self, store: &str, elapsed: Duration, ok: bool) {
        self.store_requests_total.with_label_values(&[store]).inc();
        self.store_duration_seconds
            .with_label_values(&[store])
            .observe(elapsed.as_secs_f64());
        if !ok {
            self.store_failures_total.with_label_values(&[store]).inc();
        }
    }

    pub fn record_query_error(&self, code: &str) {
        self.query_errors_total.with_label_values(&[code]).inc();
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;
        self.uptime_seconds
            .set(self.start_time.elapsed().as_secs() as i64);

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Start a timer that records duration to a histogram when dropped.
    pub fn start_timer(histogram: &Histogram) -> HistogramTimer {
        HistogramTimer {
            histogram: histogram.clone(),
            start: Instant::now(),
        }
    }
}

/// Timer that records duration to a histogram when dropped.
pub struct HistogramTimer {
    histogram: Histogram,
    start: Instant,
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

impl HistogramTimer {
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
