//! Read-only runtime counters.
//!
//! # Responsibilities
//! - Count connections, requests, blocks and failures as they happen
//! - Expose a consistent snapshot for an external stats consumer
//!
//! # Design Decisions
//! - Plain atomics; recording is wait-free on the hot path
//! - Counter updates also feed the metrics exporter so both views agree

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters, updated by the relay and read by anyone.
#[derive(Debug, Default)]
pub struct ProxyStats {
    active_connections: AtomicU64,
    total_connections: AtomicU64,
    rejected_connections: AtomicU64,
    total_requests: AtomicU64,
    policy_blocks: AtomicU64,
    protocol_errors: AtomicU64,
    upstream_failures: AtomicU64,
    bytes_client_to_upstream: AtomicU64,
    bytes_upstream_to_client: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub active_connections: u64,
    pub total_connections: u64,
    pub rejected_connections: u64,
    pub total_requests: u64,
    pub policy_blocks: u64,
    pub protocol_errors: u64,
    pub upstream_failures: u64,
    pub bytes_client_to_upstream: u64,
    pub bytes_upstream_to_client: u64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("proxy_active_connections").increment(1.0);
        metrics::counter!("proxy_connections_total").increment(1);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!("proxy_active_connections").decrement(1.0);
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("proxy_connections_rejected_total").increment(1);
    }

    pub fn request_received(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("proxy_requests_total").increment(1);
    }

    pub fn policy_block(&self) {
        self.policy_blocks.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("proxy_policy_blocks_total").increment(1);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("proxy_protocol_errors_total").increment(1);
    }

    pub fn upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("proxy_upstream_failures_total").increment(1);
    }

    pub fn bytes_relayed(&self, client_to_upstream: u64, upstream_to_client: u64) {
        self.bytes_client_to_upstream
            .fetch_add(client_to_upstream, Ordering::Relaxed);
        self.bytes_upstream_to_client
            .fetch_add(upstream_to_client, Ordering::Relaxed);
        metrics::counter!("proxy_bytes_total", "direction" => "client_to_upstream")
            .increment(client_to_upstream);
        metrics::counter!("proxy_bytes_total", "direction" => "upstream_to_client")
            .increment(upstream_to_client);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            policy_blocks: self.policy_blocks.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            bytes_client_to_upstream: self.bytes_client_to_upstream.load(Ordering::Relaxed),
            bytes_upstream_to_client: self.bytes_upstream_to_client.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_lifecycle() {
        let stats = ProxyStats::new();
        stats.connection_opened();
        stats.connection_opened();
        stats.request_received();
        stats.connection_closed();
        let snap = stats.snapshot();
        assert_eq!(snap.active_connections, 1);
        assert_eq!(snap.total_connections, 2);
        assert_eq!(snap.total_requests, 1);
    }

    #[test]
    fn byte_counters_accumulate() {
        let stats = ProxyStats::new();
        stats.bytes_relayed(10, 200);
        stats.bytes_relayed(5, 50);
        let snap = stats.snapshot();
        assert_eq!(snap.bytes_client_to_upstream, 15);
        assert_eq!(snap.bytes_upstream_to_client, 250);
    }
}
