//! Metrics collection and exposition.
//!
//! # Metrics
//! - `later_requests_total` (counter): inbound requests by response status
//! - `later_replays_total` (counter): finished deliveries by outcome
//! - `later_retries_total` (counter): deliveries queued for another attempt
//! - `later_queue_errors_total` (counter): storage failures by operation
//!
//! # Design Decisions
//! - Recording before `init_metrics` is a no-op, so tests need no setup
//! - The exporter serves its own scrape endpoint

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(status: u16) {
    metrics::counter!("later_requests_total", "status" => status.to_string()).increment(1);
}

pub fn record_replay(outcome: &'static str) {
    metrics::counter!("later_replays_total", "outcome" => outcome).increment(1);
}

pub fn record_retry() {
    metrics::counter!("later_retries_total").increment(1);
}

pub fn record_queue_error(operation: &'static str) {
    metrics::counter!("later_queue_errors_total", "operation" => operation).increment(1);
}
