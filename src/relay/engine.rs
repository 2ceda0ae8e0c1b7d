//! Per-connection relay state machine.
//!
//! # Data Flow
//! ```text
//! await request → resolve policy → connect upstream
//!     → (CONNECT: handshake + opaque tunnel)
//!     → stream request body → stream response
//!     → persistent? re-arm parser on the same client socket : close
//! ```
//!
//! # Design Decisions
//! - Everything a connection owns (buffers, parser, sockets) lives in this
//!   task; the only shared state is the rule snapshot and the counters
//! - The rule snapshot is captured once per connection, so a reload never
//!   changes the rules mid-flight
//! - Error responses are written only while nothing has been relayed to the
//!   client yet; after that the only safe move is to close

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::schema::ProxyConfig;
use crate::http::buffer::Buffer;
use crate::http::message::{Authority, ParsedMessage};
use crate::http::parser::{BodyFramer, MessageKind, MessageParser, ParserLimits, ProtocolError};
use crate::http::response::SynthesizedResponse;
use crate::net::connection::{ConnectionId, Deadlines};
use crate::observability::stats::ProxyStats;
use crate::policy::{self, PolicyDecision, PolicyRules, UpstreamAction};
use crate::relay::tunnel;
use crate::relay::upstream::{self, UpstreamLink};
use crate::relay::RelayError;

/// Immutable per-connection settings derived from configuration.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub buffer_capacity: usize,
    pub limits: ParserLimits,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Option<Duration>,
}

impl RelaySettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            buffer_capacity: config.relay.buffer_capacity,
            limits: ParserLimits {
                max_head_bytes: config.relay.max_header_bytes,
                max_headers: config.relay.max_headers,
            },
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            idle_timeout: Duration::from_secs(config.timeouts.idle_secs),
            max_lifetime: match config.timeouts.max_lifetime_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// Drives one client connection from accept to close.
pub struct RelayEngine {
    settings: RelaySettings,
    rules: Arc<PolicyRules>,
    stats: Arc<ProxyStats>,
    id: ConnectionId,
    peer: SocketAddr,
}

impl RelayEngine {
    pub fn new(
        settings: RelaySettings,
        rules: Arc<PolicyRules>,
        stats: Arc<ProxyStats>,
        id: ConnectionId,
        peer: SocketAddr,
    ) -> Self {
        Self {
            settings,
            rules,
            stats,
            id,
            peer,
        }
    }

    /// Serve request/response cycles until the connection ends.
    pub async fn run(self, mut client: TcpStream) -> Result<(), RelayError> {
        let mut deadlines = Deadlines::new(self.settings.idle_timeout, self.settings.max_lifetime);
        let mut client_buf = Buffer::with_capacity(self.settings.buffer_capacity);
        let mut parser = MessageParser::new(MessageKind::Request, self.settings.limits);

        loop {
            let request = match self
                .await_request(&mut client, &mut client_buf, &mut parser, &mut deadlines)
                .await
            {
                Ok(Some(request)) => request,
                // Clean close between requests: nothing to answer.
                Ok(None) => return Ok(()),
                Err(e) => {
                    if let RelayError::ClientProtocol(_) = &e {
                        self.stats.protocol_error();
                        best_effort(&mut client, SynthesizedResponse::bad_request()).await;
                    }
                    return Err(e);
                }
            };
            self.stats.request_received();

            match self
                .serve_request(&mut client, &mut client_buf, request, &mut deadlines)
                .await?
            {
                CycleEnd::KeepAlive => {
                    parser.reset();
                    continue;
                }
                CycleEnd::Close => {
                    let _ = client.shutdown().await;
                    return Ok(());
                }
            }
        }
    }

    /// Drive the parser on the client buffer until a head completes or the
    /// client goes away.
    async fn await_request(
        &self,
        client: &mut TcpStream,
        buf: &mut Buffer,
        parser: &mut MessageParser,
        deadlines: &mut Deadlines,
    ) -> Result<Option<ParsedMessage>, RelayError> {
        loop {
            if let Some(msg) = parser
                .poll_head(buf)
                .map_err(RelayError::ClientProtocol)?
            {
                return Ok(Some(msg));
            }
            if buf.is_full() {
                return Err(RelayError::ClientProtocol(ProtocolError::HeadersTooLarge(
                    buf.capacity(),
                )));
            }
            let n = read_into(client, buf, deadlines).await?;
            if n == 0 {
                // EOF mid-head is indistinguishable from a client that never
                // wanted another request; either way there is no one to answer.
                return Ok(None);
            }
        }
    }

    /// One full cycle after a parsed request head.
    async fn serve_request(
        &self,
        client: &mut TcpStream,
        client_buf: &mut Buffer,
        request: ParsedMessage,
        deadlines: &mut Deadlines,
    ) -> Result<CycleEnd, RelayError> {
        let dest = match Authority::from_request(&request) {
            Ok(dest) => dest,
            Err(e) => {
                self.stats.protocol_error();
                best_effort(client, SynthesizedResponse::bad_request()).await;
                return Err(RelayError::ClientProtocol(e));
            }
        };

        let decision = policy::evaluate(&self.rules, self.peer.ip(), &request, &dest);
        let (route, rewritten_target) = match decision {
            PolicyDecision::Deny { status } => {
                self.stats.policy_block();
                tracing::info!(
                    connection_id = %self.id,
                    client = %self.peer,
                    destination = %dest,
                    status,
                    "Request blocked by policy"
                );
                write_with_deadline(
                    client,
                    &SynthesizedResponse::forbidden().to_bytes(),
                    deadlines,
                )
                .await?;
                return Ok(CycleEnd::Close);
            }
            PolicyDecision::Permit {
                upstream,
                rewritten_target,
            } => (upstream, rewritten_target),
        };

        let established = match upstream::establish(
            &route,
            &dest,
            self.settings.connect_timeout,
            self.settings.limits,
        )
        .await
        {
            Ok(established) => established,
            Err(e) => {
                self.stats.upstream_failure();
                tracing::warn!(
                    connection_id = %self.id,
                    destination = %dest,
                    error = %e,
                    "Upstream connect failed"
                );
                write_with_deadline(client, &e.response().to_bytes(), deadlines).await?;
                return Ok(CycleEnd::Close);
            }
        };

        tracing::debug!(
            connection_id = %self.id,
            destination = %dest,
            via_parent = matches!(route, UpstreamAction::Via(_)),
            method = request.method().unwrap_or(""),
            "Upstream connected"
        );

        match established.link {
            UpstreamLink::Direct(mut upstream_sock) => {
                if request.is_connect() {
                    write_with_deadline(
                        client,
                        &SynthesizedResponse::tunnel_established().to_bytes(),
                        deadlines,
                    )
                    .await?;
                    let mut u2c = Buffer::with_capacity(self.settings.buffer_capacity);
                    if !established.leftover.is_empty() {
                        u2c.push(&established.leftover)
                            .map_err(|_| std::io::Error::other("handshake leftover overflow"))?;
                    }
                    self.tunnel(client, &mut upstream_sock, client_buf, u2c, deadlines)
                        .await?;
                    return Ok(CycleEnd::Close);
                }
                self.forward_and_relay(
                    client,
                    client_buf,
                    &request,
                    rewritten_target,
                    None,
                    upstream_sock,
                    deadlines,
                )
                .await
            }
            UpstreamLink::Proxy {
                stream: mut parent,
                credentials,
            } => {
                if request.is_connect() {
                    return self
                        .relay_connect_via_parent(
                            client,
                            client_buf,
                            &request,
                            credentials,
                            &mut parent,
                            deadlines,
                        )
                        .await;
                }
                self.forward_and_relay(
                    client,
                    client_buf,
                    &request,
                    rewritten_target,
                    credentials,
                    parent,
                    deadlines,
                )
                .await
            }
        }
    }

    /// Ordinary request: forward the head and body, relay the response back.
    #[allow(clippy::too_many_arguments)]
    async fn forward_and_relay(
        &self,
        client: &mut TcpStream,
        client_buf: &mut Buffer,
        request: &ParsedMessage,
        rewritten_target: Option<String>,
        credentials: Option<String>,
        mut upstream_sock: TcpStream,
        deadlines: &mut Deadlines,
    ) -> Result<CycleEnd, RelayError> {
        let head = build_forward_head(request, rewritten_target.as_deref(), credentials.as_deref());
        write_with_deadline(&mut upstream_sock, &head, deadlines).await?;

        // STREAM_REQUEST_BODY
        let mut request_framer = BodyFramer::new(request.framing);
        let body_up = self
            .stream_framed(
                client,
                &mut upstream_sock,
                client_buf,
                &mut request_framer,
                deadlines,
                Side::Client,
            )
            .await?;

        // STREAM_RESPONSE
        let mut upstream_buf = Buffer::with_capacity(self.settings.buffer_capacity);
        let head_request = request.method().is_some_and(|m| m.eq_ignore_ascii_case("HEAD"));
        let mut response_parser = MessageParser::new(
            MessageKind::Response {
                head_request,
                connect_request: false,
            },
            self.settings.limits,
        );
        let response = loop {
            match response_parser.poll_head(&mut upstream_buf) {
                Ok(Some(response)) => break response,
                Ok(None) => {}
                Err(e) => {
                    self.stats.protocol_error();
                    best_effort(client, SynthesizedResponse::bad_gateway()).await;
                    return Err(RelayError::UpstreamProtocol(e));
                }
            }
            if upstream_buf.is_full() {
                self.stats.protocol_error();
                best_effort(client, SynthesizedResponse::bad_gateway()).await;
                return Err(RelayError::UpstreamProtocol(ProtocolError::HeadersTooLarge(
                    upstream_buf.capacity(),
                )));
            }
            let n = read_into(&mut upstream_sock, &mut upstream_buf, deadlines).await?;
            if n == 0 {
                self.stats.protocol_error();
                best_effort(client, SynthesizedResponse::bad_gateway()).await;
                return Err(RelayError::UpstreamProtocol(ProtocolError::UnexpectedEof));
            }
        };

        write_with_deadline(client, &response.raw_head, deadlines).await?;

        let mut response_framer = BodyFramer::new(response.framing);
        let body_down = self
            .stream_framed(
                &mut upstream_sock,
                client,
                &mut upstream_buf,
                &mut response_framer,
                deadlines,
                Side::Upstream,
            )
            .await?;

        self.stats.bytes_relayed(
            head.len() as u64 + body_up,
            response.raw_head.len() as u64 + body_down,
        );

        let _ = upstream_sock.shutdown().await;
        if request.persistent && response.persistent {
            Ok(CycleEnd::KeepAlive)
        } else {
            Ok(CycleEnd::Close)
        }
    }

    /// CONNECT through an HTTP-kind parent: forward the client's CONNECT head
    /// and relay whatever the parent answers; tunnel only on success.
    async fn relay_connect_via_parent(
        &self,
        client: &mut TcpStream,
        client_buf: &mut Buffer,
        request: &ParsedMessage,
        credentials: Option<String>,
        parent: &mut TcpStream,
        deadlines: &mut Deadlines,
    ) -> Result<CycleEnd, RelayError> {
        let head = build_forward_head(request, None, credentials.as_deref());
        write_with_deadline(parent, &head, deadlines).await?;

        let mut parent_buf = Buffer::with_capacity(self.settings.buffer_capacity);
        let mut response_parser = MessageParser::new(
            MessageKind::Response {
                head_request: false,
                connect_request: true,
            },
            self.settings.limits,
        );
        let response = loop {
            match response_parser.poll_head(&mut parent_buf) {
                Ok(Some(response)) => break response,
                Ok(None) => {}
                Err(e) => {
                    self.stats.protocol_error();
                    best_effort(client, SynthesizedResponse::bad_gateway()).await;
                    return Err(RelayError::UpstreamProtocol(e));
                }
            }
            let n = read_into(parent, &mut parent_buf, deadlines).await?;
            if n == 0 {
                self.stats.protocol_error();
                best_effort(client, SynthesizedResponse::bad_gateway()).await;
                return Err(RelayError::UpstreamProtocol(ProtocolError::UnexpectedEof));
            }
        };

        // The parent's verdict reaches the client verbatim either way.
        write_with_deadline(client, &response.raw_head, deadlines).await?;

        let status = response.status_code().unwrap_or(0);
        if (200..300).contains(&status) {
            self.tunnel(client, parent, client_buf, parent_buf, deadlines)
                .await?;
            return Ok(CycleEnd::Close);
        }

        // Refused: relay the parent's error body, then close.
        let mut framer = BodyFramer::new(response.framing);
        self.stream_framed(parent, client, &mut parent_buf, &mut framer, deadlines, Side::Upstream)
            .await?;
        Ok(CycleEnd::Close)
    }

    /// Hand both sockets to the opaque pump, taking the client buffer's
    /// pipelined bytes along.
    async fn tunnel(
        &self,
        client: &mut TcpStream,
        upstream_sock: &mut TcpStream,
        client_buf: &mut Buffer,
        u2c: Buffer,
        deadlines: &mut Deadlines,
    ) -> Result<(), RelayError> {
        let c2u = std::mem::replace(
            client_buf,
            Buffer::with_capacity(self.settings.buffer_capacity),
        );
        let outcome = tunnel::pump(client, upstream_sock, c2u, u2c, *deadlines).await?;
        self.stats
            .bytes_relayed(outcome.client_to_upstream, outcome.upstream_to_client);
        tracing::debug!(
            connection_id = %self.id,
            client_to_upstream = outcome.client_to_upstream,
            upstream_to_client = outcome.upstream_to_client,
            "Tunnel closed"
        );
        Ok(())
    }

    /// Pump one message body from `reader` to `writer`, honoring the framing
    /// mode. Returns the number of body bytes forwarded.
    async fn stream_framed(
        &self,
        reader: &mut TcpStream,
        writer: &mut TcpStream,
        buf: &mut Buffer,
        framer: &mut BodyFramer,
        deadlines: &mut Deadlines,
        reader_side: Side,
    ) -> Result<u64, RelayError> {
        let mut total = 0u64;
        loop {
            while !buf.is_empty() && !framer.is_complete() {
                let (n, done) = framer
                    .advance(buf.as_slice())
                    .map_err(|e| reader_side.protocol_error(e))?;
                if n > 0 {
                    tokio::time::timeout_at(deadlines.next(), writer.write_all(&buf.as_slice()[..n]))
                        .await
                        .map_err(|_| RelayError::DeadlineExpired)??;
                    buf.consume(n);
                    total += n as u64;
                    deadlines.touch();
                }
                if done {
                    return Ok(total);
                }
                if n == 0 {
                    break;
                }
            }
            if framer.is_complete() {
                return Ok(total);
            }
            let n = read_into(reader, buf, deadlines).await?;
            if n == 0 {
                framer
                    .finish_on_eof()
                    .map_err(|e| reader_side.protocol_error(e))?;
                return Ok(total);
            }
        }
    }
}

/// Whether a framing violation came from the client or the upstream side.
#[derive(Debug, Clone, Copy)]
enum Side {
    Client,
    Upstream,
}

impl Side {
    fn protocol_error(self, e: ProtocolError) -> RelayError {
        match self {
            Side::Client => RelayError::ClientProtocol(e),
            Side::Upstream => RelayError::UpstreamProtocol(e),
        }
    }
}

/// How a finished cycle leaves the client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleEnd {
    KeepAlive,
    Close,
}

/// The forwarded head: raw bytes as received unless a target rewrite or a
/// parent credential forces re-serialization.
fn build_forward_head(
    request: &ParsedMessage,
    rewritten_target: Option<&str>,
    credentials: Option<&str>,
) -> Vec<u8> {
    let mut head = match rewritten_target {
        Some(target) => {
            let mut serialized = request.serialize_head_with_target(target);
            serialized.truncate(serialized.len() - 2);
            serialized
        }
        None => match credentials {
            None => return request.raw_head.to_vec(),
            Some(_) => request.head_sans_terminator().to_vec(),
        },
    };
    if let Some(credentials) = credentials {
        head.extend_from_slice(b"Proxy-Authorization: ");
        head.extend_from_slice(credentials.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    head
}

/// Read into the buffer's spare room, bounded by the nearest deadline.
async fn read_into(
    sock: &mut TcpStream,
    buf: &mut Buffer,
    deadlines: &mut Deadlines,
) -> Result<usize, RelayError> {
    let mut scratch = [0u8; 8 * 1024];
    let want = buf.spare().min(scratch.len());
    let n = tokio::time::timeout_at(deadlines.next(), sock.read(&mut scratch[..want]))
        .await
        .map_err(|_| RelayError::DeadlineExpired)??;
    if n > 0 {
        buf.push(&scratch[..n])
            .map_err(|_| std::io::Error::other("read past buffer capacity"))?;
        deadlines.touch();
    }
    Ok(n)
}

/// Write bounded by the nearest deadline.
async fn write_with_deadline(
    sock: &mut TcpStream,
    data: &[u8],
    deadlines: &mut Deadlines,
) -> Result<(), RelayError> {
    tokio::time::timeout_at(deadlines.next(), sock.write_all(data))
        .await
        .map_err(|_| RelayError::DeadlineExpired)??;
    deadlines.touch();
    Ok(())
}

/// Last-ditch error reply; the client may already be gone.
async fn best_effort(client: &mut TcpStream, response: SynthesizedResponse) {
    let _ = client.write_all(&response.to_bytes()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::parser::{MessageKind, MessageParser, ParserLimits};

    fn request(raw: &[u8]) -> ParsedMessage {
        let mut buf = Buffer::with_capacity(8192);
        buf.push(raw).unwrap();
        MessageParser::new(MessageKind::Request, ParserLimits::default())
            .poll_head(&mut buf)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn forward_head_is_verbatim_without_modifications() {
        let raw = b"GET http://example.com/a?b=c HTTP/1.1\r\nHost: example.com\r\nX-Odd:  spacing \r\n\r\n";
        let req = request(raw);
        assert_eq!(build_forward_head(&req, None, None), raw.to_vec());
    }

    #[test]
    fn forward_head_appends_parent_credentials() {
        let raw = b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let req = request(raw);
        let head = build_forward_head(&req, None, Some("Basic Zm9vOmJhcg=="));
        let text = String::from_utf8(head).unwrap();
        assert!(text.starts_with("GET http://example.com/ HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.ends_with("Proxy-Authorization: Basic Zm9vOmJhcg==\r\n\r\n"));
    }

    #[test]
    fn forward_head_honors_target_rewrite() {
        let raw = b"GET http://example.com/old HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let req = request(raw);
        let head = build_forward_head(&req, Some("http://example.com/new"), None);
        let text = String::from_utf8(head).unwrap();
        assert!(text.starts_with("GET http://example.com/new HTTP/1.1\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn settings_translate_config_values() {
        let mut config = ProxyConfig::default();
        config.timeouts.max_lifetime_secs = 30;
        let settings = RelaySettings::from_config(&config);
        assert_eq!(settings.max_lifetime, Some(Duration::from_secs(30)));
        assert_eq!(settings.buffer_capacity, config.relay.buffer_capacity);

        config.timeouts.max_lifetime_secs = 0;
        assert_eq!(RelaySettings::from_config(&config).max_lifetime, None);
    }
}
