//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges via Prometheus exposition)
//!     → stats.rs (read-only atomic counters for external consumers)
//! ```
//!
//! # Design Decisions
//! - Counter updates are atomic increments; never on a lock
//! - The stats snapshot and the metrics endpoint are fed from the same
//!   recording calls, so they cannot drift

pub mod logging;
pub mod metrics;
pub mod stats;

pub use stats::{ProxyStats, StatsSnapshot};
