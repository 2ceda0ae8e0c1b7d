//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection budget, over-budget refusal)
//!     → connection.rs (identity, deadlines, slot accounting)
//!     → Hand off to the relay engine
//! ```
//!
//! # Design Decisions
//! - The budget bounds total concurrency; everything past accept is owned by
//!   exactly one connection task
//! - Refusal at capacity is immediate; queueing accepts would just move the
//!   overload somewhere less visible

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, Deadlines};
pub use listener::{ConnectionPermit, Listener, ListenerError};
