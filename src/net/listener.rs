//! TCP listener with a hard connection budget.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Refuse accepts outright once the budget is spent; no queueing
//! - Graceful handling of accept errors
//!
//! # Design Decisions
//! - The budget is a semaphore; a permit is held for a connection's whole
//!   lifetime and released on drop, so a leak cannot outlive its connection
//! - An over-budget client gets a terse 503 and an immediate close; existing
//!   connections are untouched

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::schema::ListenerConfig;
use crate::http::response::SynthesizedResponse;
use crate::observability::stats::ProxyStats;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),
    #[error("Failed to accept: {0}")]
    Accept(std::io::Error),
}

/// A bounded TCP listener that refuses connections over the limit.
pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with the configured budget.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Accept the next connection that fits in the budget.
    ///
    /// Over-budget accepts are answered with a terse error and closed
    /// inline; this method only returns admitted connections, each carrying
    /// the permit that must live as long as the connection does.
    pub async fn accept(
        &self,
        stats: &ProxyStats,
    ) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        loop {
            let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

            match self.slots.clone().try_acquire_owned() {
                Ok(permit) => {
                    tracing::debug!(
                        peer_addr = %addr,
                        available_slots = self.slots.available_permits(),
                        "Connection accepted"
                    );
                    return Ok((stream, addr, ConnectionPermit { _permit: permit }));
                }
                Err(_) => {
                    tracing::warn!(peer_addr = %addr, "Connection refused, at capacity");
                    stats.connection_rejected();
                    tokio::spawn(refuse(stream));
                }
            }
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// Best-effort terse refusal; the write may fail, the close may not.
async fn refuse(mut stream: TcpStream) {
    let _ = stream
        .write_all(&SynthesizedResponse::at_capacity().to_bytes())
        .await;
    let _ = stream.shutdown().await;
}

/// A permit representing a connection slot.
///
/// When dropped, the slot returns to the budget. Holding it in the connection
/// task keeps the accounting correct even if the handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize) -> ListenerConfig {
        ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections: max,
        }
    }

    #[tokio::test]
    async fn admits_within_budget() {
        let stats = ProxyStats::new();
        let listener = Listener::bind(&config(2)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let (_s1, _a1, _p1) = listener.accept(&stats).await.unwrap();
        assert_eq!(listener.available_slots(), 1);
    }

    #[tokio::test]
    async fn releasing_a_permit_frees_a_slot() {
        let stats = ProxyStats::new();
        let listener = Listener::bind(&config(1)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let (_s1, _a1, p1) = listener.accept(&stats).await.unwrap();
        assert_eq!(listener.available_slots(), 0);
        drop(p1);
        assert_eq!(listener.available_slots(), 1);
    }
}
