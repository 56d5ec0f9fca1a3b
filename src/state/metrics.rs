use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;
use std::time::Instant;

pub const CLIENT_TO_SERVER: &str = "client_to_server";
pub const SERVER_TO_CLIENT: &str = "server_to_client";

pub struct Metrics {
    registry: Registry,

    // Connection metrics
    pub connections_accepted: IntCounter,
    pub active_connections: IntGauge,
    pub connections_rejected: IntCounter,
    pub upstream_failures: IntCounter,

    // Frame accounting, labelled by direction
    pub frames_received: IntCounterVec,
    pub frames_forwarded: IntCounterVec,
    pub frames_dropped: IntCounterVec,

    // Rewrite metrics
    pub queries_inspected: IntCounter,
    pub queries_rewritten: IntCounter,
    pub rewrite_duration: Histogram,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_accepted = IntCounter::new(
            "sqlmask_proxy_connections_accepted_total",
            "Total number of accepted client connections",
        )
        .expect("metric creation failed");
        let active_connections = IntGauge::new(
            "sqlmask_proxy_active_connections",
            "Number of currently paired client connections",
        )
        .expect("metric creation failed");
        let connections_rejected = IntCounter::new(
            "sqlmask_proxy_connections_rejected_total",
            "Connections rejected because the connection limit was reached",
        )
        .expect("metric creation failed");
        let upstream_failures = IntCounter::new(
            "sqlmask_proxy_upstream_failures_total",
            "Client connections closed because the upstream connect failed",
        )
        .expect("metric creation failed");

        let frames_received = IntCounterVec::new(
            Opts::new("sqlmask_proxy_frames_received_total", "Frames decoded"),
            &["direction"],
        )
        .expect("metric creation failed");
        let frames_forwarded = IntCounterVec::new(
            Opts::new("sqlmask_proxy_frames_forwarded_total", "Frames written to the peer"),
            &["direction"],
        )
        .expect("metric creation failed");
        let frames_dropped = IntCounterVec::new(
            Opts::new(
                "sqlmask_proxy_frames_dropped_total",
                "Frames discarded after decode",
            ),
            &["direction"],
        )
        .expect("metric creation failed");

        let queries_inspected = IntCounter::new(
            "sqlmask_proxy_queries_inspected_total",
            "COM_QUERY frames inspected for masking",
        )
        .expect("metric creation failed");
        let queries_rewritten = IntCounter::new(
            "sqlmask_proxy_queries_rewritten_total",
            "COM_QUERY frames forwarded with masking applied",
        )
        .expect("metric creation failed");
        let rewrite_duration = Histogram::with_opts(prometheus::HistogramOpts::new(
            "sqlmask_proxy_rewrite_duration_seconds",
            "Time spent rewriting a query in seconds",
        ))
        .expect("metric creation failed");

        registry
            .register(Box::new(connections_accepted.clone()))
            .unwrap();
        registry
            .register(Box::new(active_connections.clone()))
            .unwrap();
        registry
            .register(Box::new(connections_rejected.clone()))
            .unwrap();
        registry
            .register(Box::new(upstream_failures.clone()))
            .unwrap();
        registry
            .register(Box::new(frames_received.clone()))
            .unwrap();
        registry
            .register(Box::new(frames_forwarded.clone()))
            .unwrap();
        registry.register(Box::new(frames_dropped.clone())).unwrap();
        registry
            .register(Box::new(queries_inspected.clone()))
            .unwrap();
        registry
            .register(Box::new(queries_rewritten.clone()))
            .unwrap();
        registry
            .register(Box::new(rewrite_duration.clone()))
            .unwrap();

        Self {
            registry,
            connections_accepted,
            active_connections,
            connections_rejected,
            upstream_failures,
            frames_received,
            frames_forwarded,
            frames_dropped,
            queries_inspected,
            queries_rewritten,
            rewrite_duration,
        }
    }

    pub fn record_accept(&self) {
        self.connections_accepted.inc();
    }

    pub fn record_rejected(&self) {
        self.connections_rejected.inc();
    }

    pub fn record_upstream_failure(&self) {
        self.upstream_failures.inc();
    }

    pub fn increment_active_connections(&self) {
        self.active_connections.inc();
    }

    pub fn decrement_active_connections(&self) {
        self.active_connections.dec();
    }

    pub fn record_frame_received(&self, direction: &str) {
        self.frames_received.with_label_values(&[direction]).inc();
    }

    pub fn record_frame_forwarded(&self, direction: &str) {
        self.frames_forwarded.with_label_values(&[direction]).inc();
    }

    pub fn record_frame_dropped(&self, direction: &str) {
        self.frames_dropped.with_label_values(&[direction]).inc();
    }

    /// `(received, forwarded, dropped)` for one direction.
    pub fn frame_counts(&self, direction: &str) -> (u64, u64, u64) {
        (
            self.frames_received.with_label_values(&[direction]).get(),
            self.frames_forwarded.with_label_values(&[direction]).get(),
            self.frames_dropped.with_label_values(&[direction]).get(),
        )
    }

    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Text exposition format of every registered metric.
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = prometheus::TextEncoder::new().encode(&self.gather_metrics(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Times one query rewrite and records whether it changed the statement.
pub struct RewriteTimer {
    start: Instant,
    metrics: Arc<Metrics>,
}

impl RewriteTimer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        metrics.queries_inspected.inc();
        Self {
            start: Instant::now(),
            metrics,
        }
    }

    pub fn finish(self, masked: bool) {
        self.metrics
            .rewrite_duration
            .observe(self.start.elapsed().as_secs_f64());
        if masked {
            self.metrics.queries_rewritten.inc();
        }
    }
}
