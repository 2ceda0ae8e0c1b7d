//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use forward_proxy::config::schema::ProxyConfig;
use forward_proxy::lifecycle::Shutdown;
use forward_proxy::net::listener::Listener;
use forward_proxy::observability::stats::ProxyStats;
use forward_proxy::relay::server::ProxyServer;

/// A running proxy bound to an ephemeral port.
pub struct ProxyHandle {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub stats: Arc<ProxyStats>,
    /// Feeds the server's reload channel, standing in for the file watcher.
    pub config_tx: mpsc::UnboundedSender<ProxyConfig>,
}

/// Start the proxy with the given configuration on an ephemeral port.
pub async fn spawn_proxy(mut config: ProxyConfig) -> ProxyHandle {
    config.listener.bind_address = "127.0.0.1:0".to_string();
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = ProxyServer::new(config).unwrap();
    let stats = server.stats();
    let (config_tx, config_rx) = mpsc::unbounded_channel();
    let shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, config_rx, shutdown_rx).await;
    });

    ProxyHandle {
        addr,
        shutdown,
        stats,
        config_tx,
    }
}

/// Start a mock origin that answers every request with fixed bytes and
/// closes. Returns its address and a hit counter.
pub async fn start_mock_origin(response: &'static [u8]) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let _ = read_head(&mut socket).await;
                        let _ = socket.write_all(response).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, hits)
}

/// Start a mock origin that reads a request with a Content-Length body and
/// echoes the body back.
#[allow(dead_code)]
pub async fn start_echo_body_origin() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let (head, mut body) = match read_head(&mut socket).await {
                            Some(parts) => parts,
                            None => return,
                        };
                        let length = content_length(&head).unwrap_or(0);
                        while body.len() < length {
                            let mut tmp = [0u8; 1024];
                            match socket.read(&mut tmp).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => body.extend_from_slice(&tmp[..n]),
                            }
                        }
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            length
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.write_all(&body[..length]).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Start a raw TCP echo server, for tunnel tests.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        loop {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => {
                                    if socket.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Read until the end of the header section. Returns the head and any body
/// bytes that arrived with it.
async fn read_head(socket: &mut tokio::net::TcpStream) -> Option<(Vec<u8>, Vec<u8>)> {
    let mut data = Vec::new();
    let mut tmp = [0u8; 1024];
    loop {
        if let Some(pos) = find_head_end(&data) {
            let body = data.split_off(pos);
            return Some((data, body));
        }
        match socket.read(&mut tmp).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => data.extend_from_slice(&tmp[..n]),
        }
    }
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

#[allow(dead_code)]
fn content_length(head: &[u8]) -> Option<usize> {
    let text = String::from_utf8_lossy(head);
    for line in text.lines() {
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                return value.trim().parse().ok();
            }
        }
    }
    None
}
