use std::net::SocketAddr;

use anyhow::Context;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus HTTP exporter on `port`.
/// After this call, any metrics recorded via the `metrics` crate
/// macros (counter!, histogram!) are automatically exported at /metrics.
/// Without it the macros are no-ops.
pub fn init_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("failed to start Prometheus metrics server on {addr}"))
}

// ── Exchange client metrics ──────────────────────────────────────

pub fn record_request(endpoint: &str, outcome: &str) {
    counter!("exchange_requests_total", "endpoint" => endpoint.to_string(), "outcome" => outcome.to_string())
        .increment(1);
}

pub fn record_request_latency(endpoint: &str, latency_ms: f64) {
    histogram!("exchange_request_latency_ms", "endpoint" => endpoint.to_string())
        .record(latency_ms);
}

/// Rejected locally before sending, budget exhausted.
pub fn record_rate_limited(endpoint: &str) {
    counter!("exchange_rate_limited_total", "endpoint" => endpoint.to_string())
        .increment(1);
}

// ── Cache metrics ────────────────────────────────────────────────

pub fn record_cache_read(cache: &str, state: &str) {
    counter!("cache_reads_total", "cache" => cache.to_string(), "state" => state.to_string())
        .increment(1);
}

pub fn record_refresh(cache: &str, outcome: &str, duration_ms: f64) {
    counter!("cache_refreshes_total", "cache" => cache.to_string(), "outcome" => outcome.to_string())
        .increment(1);
    histogram!("cache_refresh_duration_ms", "cache" => cache.to_string())
        .record(duration_ms);
}

// ── Dashboard metrics ────────────────────────────────────────────

pub fn record_frame(widgets: usize) {
    counter!("dashboard_frames_total").increment(1);
    histogram!("dashboard_frame_widgets").record(widgets as f64);
}
