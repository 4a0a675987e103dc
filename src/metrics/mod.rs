//! Prometheus metrics for the nsproxy query layer
//!
//! Collected in a process-global registry; `gather()` renders the text
//! exposition format for whatever endpoint the embedding server provides.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::OnceLock;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// nsproxy metrics collection
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Session metrics
    /// Query contexts currently open
    pub sessions_active: IntGauge,
    /// Authentication attempts by result
    pub auth_total: IntCounterVec,

    // Query metrics
    /// Total queries processed
    pub queries_total: IntCounterVec,
    /// Query latency histogram (in seconds)
    pub query_duration_seconds: HistogramVec,
    /// Query errors by type
    pub query_errors_total: IntCounterVec,

    // Backend pool metrics
    /// Connections handed out by namespace pools
    pub backend_acquires_total: IntCounterVec,
    /// Acquire attempts that produced no connection
    pub backend_acquire_failures_total: IntCounterVec,
    /// Connections given back, by whether they were kept for reuse
    pub backend_releases_total: IntCounterVec,
    /// Connections currently pinned to a transaction
    pub pinned_connections: IntGauge,
}

impl Metrics {
    /// Create a new metrics collection
    pub fn new() -> Self {
        let registry = Registry::new();

        // Session metrics
        let sessions_active = IntGauge::new(
            "nsproxy_sessions_active",
            "Current number of open query contexts",
        )
        .expect("valid metric definition");

        let auth_total = IntCounterVec::new(
            Opts::new("nsproxy_auth_total", "Total number of authentication attempts"),
            &["result"], // success, failure
        )
        .expect("valid metric definition");

        // Query metrics
        let queries_total = IntCounterVec::new(
            Opts::new("nsproxy_queries_total", "Total number of queries processed"),
            &["type"], // select, insert, begin, etc.
        )
        .expect("valid metric definition");

        let query_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "nsproxy_query_duration_seconds",
                "Query latency in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                10.0,
            ]),
            &["type", "namespace"],
        )
        .expect("valid metric definition");

        let query_errors_total = IntCounterVec::new(
            Opts::new("nsproxy_query_errors_total", "Total number of query errors"),
            &["type"], // syntax, backend_unavailable, backend, connection_lost, etc.
        )
        .expect("valid metric definition");

        // Backend pool metrics
        let backend_acquires_total = IntCounterVec::new(
            Opts::new(
                "nsproxy_backend_acquires_total",
                "Total number of backend connections acquired from pools",
            ),
            &["namespace"],
        )
        .expect("valid metric definition");

        let backend_acquire_failures_total = IntCounterVec::new(
            Opts::new(
                "nsproxy_backend_acquire_failures_total",
                "Total number of failed backend connection acquires",
            ),
            &["namespace", "reason"], // timeout, connect, cancelled, closed
        )
        .expect("valid metric definition");

        let backend_releases_total = IntCounterVec::new(
            Opts::new(
                "nsproxy_backend_releases_total",
                "Total number of backend connections released to pools",
            ),
            &["namespace", "outcome"], // reused, discarded
        )
        .expect("valid metric definition");

        let pinned_connections = IntGauge::new(
            "nsproxy_pinned_connections",
            "Current number of backend connections pinned to a transaction",
        )
        .expect("valid metric definition");

        // Register all metrics
        for collector in [
            Box::new(sessions_active.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(auth_total.clone()),
            Box::new(queries_total.clone()),
            Box::new(query_duration_seconds.clone()),
            Box::new(query_errors_total.clone()),
            Box::new(backend_acquires_total.clone()),
            Box::new(backend_acquire_failures_total.clone()),
            Box::new(backend_releases_total.clone()),
            Box::new(pinned_connections.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric names are unique");
        }

        Self {
            registry,
            sessions_active,
            auth_total,
            queries_total,
            query_duration_seconds,
            query_errors_total,
            backend_acquires_total,
            backend_acquire_failures_total,
            backend_releases_total,
            pinned_connections,
        }
    }

    /// Record a query execution
    pub fn record_query(&self, query_type: &str, namespace: &str, duration_secs: f64) {
        self.queries_total.with_label_values(&[query_type]).inc();
        self.query_duration_seconds
            .with_label_values(&[query_type, namespace])
            .observe(duration_secs);
    }

    /// Record a query error
    pub fn record_query_error(&self, error_type: &str) {
        self.query_errors_total
            .with_label_values(&[error_type])
            .inc();
    }

    /// Record an authentication attempt
    pub fn record_auth(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        self.auth_total.with_label_values(&[result]).inc();
    }

    /// Record a new query context
    pub fn record_session_opened(&self) {
        self.sessions_active.inc();
    }

    /// Record a query context closed
    pub fn record_session_closed(&self) {
        self.sessions_active.dec();
    }

    /// Record a connection handed out by a pool
    pub fn record_backend_acquire(&self, namespace: &str) {
        self.backend_acquires_total
            .with_label_values(&[namespace])
            .inc();
    }

    /// Record an acquire that produced no connection
    pub fn record_backend_acquire_failure(&self, namespace: &str, reason: &str) {
        self.backend_acquire_failures_total
            .with_label_values(&[namespace, reason])
            .inc();
    }

    /// Record a connection given back to a pool
    pub fn record_backend_release(&self, namespace: &str, reused: bool) {
        let outcome = if reused { "reused" } else { "discarded" };
        self.backend_releases_total
            .with_label_values(&[namespace, outcome])
            .inc();
    }

    /// Record a connection pinned to a transaction
    pub fn record_pin(&self) {
        self.pinned_connections.inc();
    }

    /// Record a pinned connection released
    pub fn record_unpin(&self) {
        self.pinned_connections.dec();
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
