//! Metrics collection and exposition.
//!
//! # Metrics
//! - `pool_borrows_total` (counter): borrows by outcome
//! - `client_response_timeouts_total` (counter): expired responses
//! - `rest_responses_total` (counter): REST responses by status
//! - `proxy_bytes_total` (counter): relayed bytes by direction
//! - `proxy_active_pairings` (gauge): live front/back pairings

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to start metrics endpoint"),
    }
}

pub fn record_pool_borrow(outcome: &'static str) {
    counter!("pool_borrows_total", "outcome" => outcome).increment(1);
}

pub fn record_response_timeout() {
    counter!("client_response_timeouts_total").increment(1);
}

pub fn record_rest_response(status: u16) {
    counter!("rest_responses_total", "status" => status.to_string()).increment(1);
}

pub fn record_proxy_bytes(direction: &'static str, bytes: usize) {
    counter!("proxy_bytes_total", "direction" => direction).increment(bytes as u64);
}

pub fn record_pairing_opened() {
    gauge!("proxy_active_pairings").increment(1.0);
}

pub fn record_pairing_closed() {
    gauge!("proxy_active_pairings").decrement(1.0);
}
