//! Metrics exposition.
//!
//! # Metrics
//! - `proxy_connections_total` (counter): accepted client connections
//! - `proxy_connections_rejected_total` (counter): accepts refused at capacity
//! - `proxy_active_connections` (gauge): currently open connections
//! - `proxy_requests_total` (counter): parsed client requests
//! - `proxy_policy_blocks_total` (counter): ACL/filter denials
//! - `proxy_protocol_errors_total` (counter): malformed framing
//! - `proxy_upstream_failures_total` (counter): failed upstream connects
//! - `proxy_bytes_total{direction}` (counter): relayed payload bytes
//!
//! # Design Decisions
//! - Low-overhead updates (atomic operations via the `metrics` macros)
//! - Prometheus exposition served from its own listener

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the global Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to start metrics endpoint"),
    }
}
