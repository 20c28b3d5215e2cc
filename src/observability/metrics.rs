//! Metrics collection and exposition.
//!
//! # Metrics
//! - `hook_proxy_requests_total` (counter): requests by method, status
//! - `hook_proxy_request_duration_seconds` (histogram): latency distribution
//! - `hook_proxy_hook_calls_total` (counter): pre-hook calls by outcome
//! - `hook_proxy_raw_sessions_total` (counter): downgraded responses
//! - `hook_proxy_active_connections` (gauge): current client connections
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "hook_proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("hook_proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record one pre-hook call.
pub fn record_hook_call(outcome: &'static str) {
    counter!("hook_proxy_hook_calls_total", "outcome" => outcome).increment(1);
}

/// Record a response downgraded to a raw stream.
pub fn record_raw_session() {
    counter!("hook_proxy_raw_sessions_total").increment(1);
}

pub fn set_active_connections(count: u64) {
    gauge!("hook_proxy_active_connections").set(count as f64);
}
