//! Relay subsystem: the per-connection engine and its supporting pieces.
//!
//! # Data Flow
//! ```text
//! Admitted TCP connection
//!     → server.rs (spawn one task per connection, rule snapshot capture)
//!     → engine.rs (request cycle state machine)
//!     → upstream.rs (route establishment, parent handshakes)
//!     → tunnel.rs (opaque bidirectional pump for CONNECT)
//! ```
//!
//! # Design Decisions
//! - One failure is one connection: nothing in this subsystem is fatal to
//!   the process
//! - Client-side and upstream-side protocol violations are distinguished so
//!   the right party gets blamed in the synthesized response

pub mod engine;
pub mod server;
pub mod tunnel;
pub mod upstream;

pub use engine::{RelayEngine, RelaySettings};
pub use server::ProxyServer;
pub use upstream::ConnectError;

use crate::http::parser::ProtocolError;

/// Why a connection ended early.
///
/// Policy blocks are not represented here: denying a request is a deliberate
/// decision, handled inline, not a failure.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("client protocol error: {0}")]
    ClientProtocol(ProtocolError),
    #[error("upstream protocol error: {0}")]
    UpstreamProtocol(ProtocolError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("connection deadline expired")]
    DeadlineExpired,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
