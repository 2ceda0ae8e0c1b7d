//! Upstream connection establishment.
//!
//! # Responsibilities
//! - Open the outbound socket for a request: straight to the destination, or
//!   to a parent proxy
//! - Perform the CONNECT handshake with tunnel-kind parents
//! - Map connect failures onto the 502/504 responses the client sees
//!
//! # Design Decisions
//! - Failures are never retried here; retrying would amplify load toward a
//!   destination that is already failing
//! - The whole dial-plus-handshake is bounded by one connect timeout

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::http::buffer::Buffer;
use crate::http::message::Authority;
use crate::http::parser::{MessageKind, MessageParser, ParserLimits};
use crate::http::response::SynthesizedResponse;
use crate::policy::{ProxyKind, UpstreamAction, UpstreamProxy};

/// DNS, connect or handshake failure. Surfaced as 502/504, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connect to {dest} failed: {source}")]
    Unreachable {
        dest: String,
        source: std::io::Error,
    },
    #[error("connect to {dest} timed out")]
    Timeout { dest: String },
    #[error("parent proxy {proxy} refused the tunnel with status {status}")]
    TunnelRefused { proxy: String, status: u16 },
    #[error("parent proxy {proxy} sent an unparseable handshake reply")]
    TunnelHandshake { proxy: String },
}

impl ConnectError {
    /// The response the client receives for this failure.
    pub fn response(&self) -> SynthesizedResponse {
        match self {
            ConnectError::Timeout { .. } => SynthesizedResponse::gateway_timeout(),
            _ => SynthesizedResponse::bad_gateway(),
        }
    }
}

/// What the engine talks to once the route is up.
#[derive(Debug)]
pub enum UpstreamLink {
    /// The socket reaches the destination itself (possibly through an
    /// already-established parent tunnel).
    Direct(TcpStream),
    /// The socket reaches a parent proxy that expects proxy-form HTTP.
    Proxy {
        stream: TcpStream,
        /// Pre-encoded `Proxy-Authorization` value for the parent, if any.
        credentials: Option<String>,
    },
}

/// An established route plus any bytes read past the handshake.
#[derive(Debug)]
pub struct Established {
    pub link: UpstreamLink,
    /// Bytes the parent sent after its handshake reply; they belong to the
    /// destination stream and must not be dropped.
    pub leftover: Bytes,
}

/// Open the outbound side for `dest` according to the selected route.
pub async fn establish(
    route: &UpstreamAction,
    dest: &Authority,
    connect_timeout: Duration,
    limits: ParserLimits,
) -> Result<Established, ConnectError> {
    match route {
        UpstreamAction::Direct => {
            let stream = dial(&dest.host, dest.port, connect_timeout).await?;
            Ok(Established {
                link: UpstreamLink::Direct(stream),
                leftover: Bytes::new(),
            })
        }
        UpstreamAction::Via(proxy) => match proxy.kind {
            ProxyKind::Http => {
                let stream = dial(&proxy.host, proxy.port, connect_timeout).await?;
                Ok(Established {
                    link: UpstreamLink::Proxy {
                        stream,
                        credentials: proxy.credentials.clone(),
                    },
                    leftover: Bytes::new(),
                })
            }
            ProxyKind::Connect => {
                let stream = dial(&proxy.host, proxy.port, connect_timeout).await?;
                let (stream, leftover) =
                    connect_handshake(stream, proxy, dest, connect_timeout, limits).await?;
                Ok(Established {
                    link: UpstreamLink::Direct(stream),
                    leftover,
                })
            }
        },
    }
}

async fn dial(host: &str, port: u16, connect_timeout: Duration) -> Result<TcpStream, ConnectError> {
    let dest = format!("{host}:{port}");
    match tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ConnectError::Unreachable { dest, source }),
        Err(_) => Err(ConnectError::Timeout { dest }),
    }
}

/// Ask a tunnel-kind parent to open a raw connection to `dest`.
async fn connect_handshake(
    mut stream: TcpStream,
    proxy: &UpstreamProxy,
    dest: &Authority,
    connect_timeout: Duration,
    limits: ParserLimits,
) -> Result<(TcpStream, Bytes), ConnectError> {
    let proxy_name = proxy.to_string();
    let mut request = format!("CONNECT {dest} HTTP/1.1\r\nHost: {dest}\r\n");
    if let Some(credentials) = &proxy.credentials {
        request.push_str(&format!("Proxy-Authorization: {credentials}\r\n"));
    }
    request.push_str("\r\n");

    let handshake = async {
        stream.write_all(request.as_bytes()).await?;

        let mut buf = Buffer::with_capacity(limits.max_head_bytes);
        let mut parser = MessageParser::new(
            MessageKind::Response {
                head_request: false,
                connect_request: true,
            },
            limits,
        );
        let mut scratch = [0u8; 4096];
        loop {
            match parser.poll_head(&mut buf) {
                Ok(Some(reply)) => {
                    let status = reply.status_code().unwrap_or(0);
                    return Ok::<_, HandshakeFailure>((status, buf.pull(buf.len())));
                }
                Ok(None) => {}
                Err(_) => return Err(HandshakeFailure::Malformed),
            }
            let want = buf.spare().min(scratch.len());
            if want == 0 {
                return Err(HandshakeFailure::Malformed);
            }
            let n = stream.read(&mut scratch[..want]).await?;
            if n == 0 {
                return Err(HandshakeFailure::Malformed);
            }
            if buf.push(&scratch[..n]).is_err() {
                return Err(HandshakeFailure::Malformed);
            }
        }
    };

    match tokio::time::timeout(connect_timeout, handshake).await {
        Ok(Ok((status, leftover))) if (200..300).contains(&status) => Ok((stream, leftover)),
        Ok(Ok((status, _))) => Err(ConnectError::TunnelRefused {
            proxy: proxy_name,
            status,
        }),
        Ok(Err(HandshakeFailure::Malformed)) => Err(ConnectError::TunnelHandshake {
            proxy: proxy_name,
        }),
        Ok(Err(HandshakeFailure::Io(source))) => Err(ConnectError::Unreachable {
            dest: proxy_name,
            source,
        }),
        Err(_) => Err(ConnectError::Timeout { dest: proxy_name }),
    }
}

#[derive(Debug)]
enum HandshakeFailure {
    Malformed,
    Io(std::io::Error),
}

impl From<std::io::Error> for HandshakeFailure {
    fn from(e: std::io::Error) -> Self {
        HandshakeFailure::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn direct_route_dials_the_destination() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dest = Authority {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        let established = establish(
            &UpstreamAction::Direct,
            &dest,
            Duration::from_secs(2),
            ParserLimits::default(),
        )
        .await
        .unwrap();
        assert!(matches!(established.link, UpstreamLink::Direct(_)));
    }

    #[tokio::test]
    async fn refused_connect_maps_to_unreachable() {
        // Bind then drop to find a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dest = Authority {
            host: addr.ip().to_string(),
            port: addr.port(),
        };
        let err = establish(
            &UpstreamAction::Direct,
            &dest,
            Duration::from_secs(2),
            ParserLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectError::Unreachable { .. }));
        assert_eq!(err.response().status, 502);
    }

    #[tokio::test]
    async fn tunnel_parent_handshake_round_trip() {
        let parent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let parent_addr = parent.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = parent.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = sock.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]);
            assert!(head.starts_with("CONNECT dest.example:443 HTTP/1.1\r\n"));
            assert!(head.contains("Proxy-Authorization: Basic "));
            sock.write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
        });

        let proxy = UpstreamProxy::new(
            ProxyKind::Connect,
            parent_addr.ip().to_string(),
            parent_addr.port(),
        )
        .with_credentials("user:pw");
        let dest = Authority {
            host: "dest.example".into(),
            port: 443,
        };
        let established = establish(
            &UpstreamAction::Via(proxy),
            &dest,
            Duration::from_secs(2),
            ParserLimits::default(),
        )
        .await
        .unwrap();
        assert!(matches!(established.link, UpstreamLink::Direct(_)));
        assert!(established.leftover.is_empty());
    }

    #[tokio::test]
    async fn tunnel_refusal_carries_parent_status() {
        let parent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let parent_addr = parent.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = parent.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let proxy = UpstreamProxy::new(
            ProxyKind::Connect,
            parent_addr.ip().to_string(),
            parent_addr.port(),
        );
        let dest = Authority {
            host: "dest.example".into(),
            port: 443,
        };
        let err = establish(
            &UpstreamAction::Via(proxy),
            &dest,
            Duration::from_secs(2),
            ParserLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ConnectError::TunnelRefused { status: 403, .. }
        ));
    }
}
