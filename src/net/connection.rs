//! Connection identity and deadline tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track per-connection idle and hard-lifetime deadlines
//! - Tie slot accounting and stats to the connection's lifetime
//!
//! # Design Decisions
//! - IDs come from a relaxed atomic counter: uniqueness matters,
//!   synchronization does not
//! - Deadlines are plain instants compared at await points; the runtime's
//!   timer wheel provides the nearest-deadline ordering

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::net::listener::ConnectionPermit;
use crate::observability::stats::ProxyStats;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Idle and hard-lifetime deadlines for one connection.
///
/// The idle deadline slides forward on every successful read or write; the
/// hard deadline, when present, never moves.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    idle_timeout: Duration,
    idle_at: Instant,
    hard_at: Option<Instant>,
}

impl Deadlines {
    pub fn new(idle_timeout: Duration, max_lifetime: Option<Duration>) -> Self {
        let now = Instant::now();
        Self {
            idle_timeout,
            idle_at: now + idle_timeout,
            hard_at: max_lifetime.map(|d| now + d),
        }
    }

    /// Record activity: the idle deadline slides forward.
    pub fn touch(&mut self) {
        self.idle_at = Instant::now() + self.idle_timeout;
    }

    /// The nearest deadline to wait against.
    pub fn next(&self) -> Instant {
        match self.hard_at {
            Some(hard) if hard < self.idle_at => hard,
            _ => self.idle_at,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn hard_at(&self) -> Option<Instant> {
        self.hard_at
    }
}

/// Guard tying a connection's slot permit and stats entry to its lifetime.
///
/// Dropping it releases the slot and decrements the active-connection gauge.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: ConnectionId,
    stats: Arc<ProxyStats>,
    _permit: ConnectionPermit,
}

impl ConnectionGuard {
    pub fn new(permit: ConnectionPermit, stats: Arc<ProxyStats>) -> Self {
        stats.connection_opened();
        Self {
            id: ConnectionId::new(),
            stats,
            _permit: permit,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats.connection_closed();
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn idle_deadline_slides_on_touch() {
        let mut deadlines = Deadlines::new(Duration::from_secs(10), None);
        let first = deadlines.next();
        tokio::time::sleep(Duration::from_millis(20)).await;
        deadlines.touch();
        assert!(deadlines.next() > first);
    }

    #[tokio::test]
    async fn hard_deadline_caps_the_wait() {
        let deadlines = Deadlines::new(
            Duration::from_secs(600),
            Some(Duration::from_secs(1)),
        );
        assert_eq!(deadlines.next(), deadlines.hard_at().unwrap());
    }
}
