//! Incremental HTTP/1.x framing parser.
//!
//! # Responsibilities
//! - Recognize request-lines, status-lines and header sections from a
//!   [`Buffer`](crate::http::Buffer) without ever blocking
//! - Resolve body framing (none / content-length / chunked / close-delimited)
//!   and connection persistence
//! - Track chunked and fixed-length body boundaries byte-exactly so the relay
//!   knows where a message ends
//!
//! # Design Decisions
//! - The parser consumes lines from the buffer and keeps the raw header bytes
//!   so a request can be forwarded exactly as received
//! - Conflicting or ambiguous framing headers are rejected outright; a proxy
//!   that guesses invites request smuggling
//! - `NeedMoreData` is modeled as `Ok(None)`: the caller waits for I/O and
//!   re-invokes

use std::str;

use bytes::BytesMut;

use crate::http::buffer::Buffer;
use crate::http::message::{
    FramingMode, HeaderList, ParsedMessage, StartLine, Version,
};

/// Malformed or adversarial framing. Never retried; the connection is closed
/// after a best-effort error response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed start line: {0:?}")]
    MalformedStartLine(String),
    #[error("unsupported protocol version: {0:?}")]
    UnsupportedVersion(String),
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("header continuation with no preceding header")]
    FoldWithoutHeader,
    #[error("header section exceeds {0} bytes")]
    HeadersTooLarge(usize),
    #[error("more than {0} header fields")]
    TooManyHeaders(usize),
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),
    #[error("conflicting Content-Length values")]
    ConflictingContentLength,
    #[error("both Content-Length and chunked Transfer-Encoding present")]
    AmbiguousFraming,
    #[error("unsupported Transfer-Encoding on request")]
    UnsupportedTransferEncoding,
    #[error("invalid chunk size line: {0:?}")]
    InvalidChunkSize(String),
    #[error("invalid request target: {0:?}")]
    InvalidTarget(String),
    #[error("peer closed mid-message")]
    UnexpectedEof,
}

/// Hard limits on the header section, from configuration.
#[derive(Debug, Clone, Copy)]
pub struct ParserLimits {
    pub max_head_bytes: usize,
    pub max_headers: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_head_bytes: 16 * 1024,
            max_headers: 128,
        }
    }
}

/// Whether the parser expects a request or a response, and for responses the
/// request context that changes body framing.
#[derive(Debug, Clone, Copy)]
pub enum MessageKind {
    Request,
    Response {
        /// Responses to HEAD carry headers describing a body that never
        /// arrives.
        head_request: bool,
        /// A 2xx reply to CONNECT has no body; the tunnel payload follows.
        connect_request: bool,
    },
}

#[derive(Debug, Clone, Copy)]
enum HeadState {
    StartLine,
    Headers,
    Complete,
}

/// Incremental parser for one message's header section.
///
/// Re-used across messages on a persistent connection via [`reset`].
///
/// [`reset`]: MessageParser::reset
#[derive(Debug)]
pub struct MessageParser {
    kind: MessageKind,
    limits: ParserLimits,
    state: HeadState,
    start: Option<StartLine>,
    headers: HeaderList,
    raw_head: BytesMut,
}

impl MessageParser {
    pub fn new(kind: MessageKind, limits: ParserLimits) -> Self {
        Self {
            kind,
            limits,
            state: HeadState::StartLine,
            start: None,
            headers: HeaderList::new(),
            raw_head: BytesMut::new(),
        }
    }

    /// Clear all per-message state so the next message can be parsed.
    pub fn reset(&mut self) {
        self.state = HeadState::StartLine;
        self.start = None;
        self.headers = HeaderList::new();
        self.raw_head = BytesMut::new();
    }

    /// Drive the parser over whatever the buffer currently holds.
    ///
    /// Returns `Ok(None)` when more bytes are needed, `Ok(Some(msg))` once the
    /// header section is complete. Body bytes (if any) remain in the buffer.
    pub fn poll_head(&mut self, buf: &mut Buffer) -> Result<Option<ParsedMessage>, ProtocolError> {
        loop {
            if matches!(self.state, HeadState::Complete) {
                return Ok(None);
            }
            let line = match buf.peek_line() {
                Some(line) => line.to_vec(),
                None => {
                    if self.raw_head.len() + buf.len() > self.limits.max_head_bytes {
                        return Err(ProtocolError::HeadersTooLarge(self.limits.max_head_bytes));
                    }
                    return Ok(None);
                }
            };
            if self.raw_head.len() + line.len() > self.limits.max_head_bytes {
                return Err(ProtocolError::HeadersTooLarge(self.limits.max_head_bytes));
            }
            buf.consume(line.len());
            let text = trim_terminator(&line);
            let text = str::from_utf8(text)
                .map_err(|_| ProtocolError::MalformedHeader(String::from_utf8_lossy(text).into_owned()))?
                .to_string();

            match self.state {
                HeadState::StartLine => {
                    // Tolerate blank lines before the start line; they are not
                    // part of the message and are not forwarded.
                    if text.is_empty() {
                        continue;
                    }
                    self.start = Some(self.parse_start_line(&text)?);
                    self.raw_head.extend_from_slice(&line);
                    self.state = HeadState::Headers;
                }
                HeadState::Headers => {
                    self.raw_head.extend_from_slice(&line);
                    if text.is_empty() {
                        let terminator_len = line.len();
                        let msg = self.finish(terminator_len)?;
                        self.state = HeadState::Complete;
                        return Ok(Some(msg));
                    }
                    if text.starts_with(' ') || text.starts_with('\t') {
                        if !self.headers.fold_into_last(text.trim()) {
                            return Err(ProtocolError::FoldWithoutHeader);
                        }
                        continue;
                    }
                    let (name, value) = text
                        .split_once(':')
                        .ok_or_else(|| ProtocolError::MalformedHeader(text.clone()))?;
                    // A name with trailing whitespace is a classic smuggling
                    // vector; reject it.
                    if name.is_empty() || name.trim_end() != name {
                        return Err(ProtocolError::MalformedHeader(text.clone()));
                    }
                    if self.headers.len() >= self.limits.max_headers {
                        return Err(ProtocolError::TooManyHeaders(self.limits.max_headers));
                    }
                    self.headers.push(name.to_string(), value.trim().to_string());
                }
                HeadState::Complete => unreachable!(),
            }
        }
    }

    fn parse_start_line(&self, text: &str) -> Result<StartLine, ProtocolError> {
        match self.kind {
            MessageKind::Request => {
                let mut parts = text.splitn(3, ' ');
                let method = parts.next().unwrap_or_default();
                let target = parts.next().unwrap_or_default();
                let version = parts.next().unwrap_or_default();
                if method.is_empty() || target.is_empty() || version.is_empty() {
                    return Err(ProtocolError::MalformedStartLine(text.to_string()));
                }
                if !method.bytes().all(|b| b.is_ascii_alphabetic()) {
                    return Err(ProtocolError::MalformedStartLine(text.to_string()));
                }
                Ok(StartLine::Request {
                    method: method.to_string(),
                    target: target.to_string(),
                    version: parse_version(version)?,
                })
            }
            MessageKind::Response { .. } => {
                let mut parts = text.splitn(3, ' ');
                let version = parts.next().unwrap_or_default();
                let code = parts.next().unwrap_or_default();
                let reason = parts.next().unwrap_or_default();
                let version = parse_version(version)?;
                if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(ProtocolError::MalformedStartLine(text.to_string()));
                }
                let code: u16 = code
                    .parse()
                    .map_err(|_| ProtocolError::MalformedStartLine(text.to_string()))?;
                Ok(StartLine::Status {
                    version,
                    code,
                    reason: reason.to_string(),
                })
            }
        }
    }

    fn finish(&mut self, terminator_len: usize) -> Result<ParsedMessage, ProtocolError> {
        let start = self.start.take().expect("start line parsed before headers");
        let headers = std::mem::take(&mut self.headers);
        let version = match &start {
            StartLine::Request { version, .. } | StartLine::Status { version, .. } => *version,
        };
        let mut persistent = resolve_persistence(version, &headers);
        let framing = match self.kind {
            MessageKind::Request => resolve_request_framing(&start, &headers)?,
            MessageKind::Response {
                head_request,
                connect_request,
            } => resolve_response_framing(&start, &headers, head_request, connect_request)?,
        };
        // A close-delimited response cannot outlive its body.
        if framing == FramingMode::UntilClose {
            persistent = false;
        }
        let raw_head = std::mem::take(&mut self.raw_head).freeze();
        Ok(ParsedMessage {
            start,
            headers,
            framing,
            persistent,
            raw_head,
            terminator_len,
        })
    }
}

fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_version(s: &str) -> Result<Version, ProtocolError> {
    match s {
        "HTTP/1.1" => Ok(Version::Http11),
        "HTTP/1.0" => Ok(Version::Http10),
        other if other.starts_with("HTTP/") => {
            Err(ProtocolError::UnsupportedVersion(other.to_string()))
        }
        other => Err(ProtocolError::MalformedStartLine(other.to_string())),
    }
}

/// HTTP/1.1 defaults to persistent unless `Connection: close`; HTTP/1.0
/// defaults to non-persistent unless `Connection: keep-alive`.
fn resolve_persistence(version: Version, headers: &HeaderList) -> bool {
    match version {
        Version::Http11 => !headers.has_token("connection", "close"),
        Version::Http10 => headers.has_token("connection", "keep-alive"),
    }
}

fn content_length(headers: &HeaderList) -> Result<Option<u64>, ProtocolError> {
    let mut resolved: Option<u64> = None;
    for value in headers.all("content-length") {
        // A single field may itself carry a comma-separated list.
        for item in value.split(',') {
            let item = item.trim();
            if item.is_empty() || !item.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ProtocolError::InvalidContentLength(value.to_string()));
            }
            let n: u64 = item
                .parse()
                .map_err(|_| ProtocolError::InvalidContentLength(value.to_string()))?;
            match resolved {
                None => resolved = Some(n),
                Some(prev) if prev == n => {}
                Some(_) => return Err(ProtocolError::ConflictingContentLength),
            }
        }
    }
    Ok(resolved)
}

fn resolve_request_framing(
    start: &StartLine,
    headers: &HeaderList,
) -> Result<FramingMode, ProtocolError> {
    if let StartLine::Request { method, .. } = start {
        if method.eq_ignore_ascii_case("CONNECT") {
            // Anything after the CONNECT head is tunnel payload, not a body.
            return Ok(FramingMode::None);
        }
    }
    let chunked = headers.has_token("transfer-encoding", "chunked");
    let te_present = headers.first("transfer-encoding").is_some();
    let length = content_length(headers)?;
    if chunked && length.is_some() {
        return Err(ProtocolError::AmbiguousFraming);
    }
    if chunked {
        return Ok(FramingMode::Chunked);
    }
    if te_present {
        // A request body with an encoding we cannot delimit cannot be relayed.
        return Err(ProtocolError::UnsupportedTransferEncoding);
    }
    Ok(match length {
        Some(n) => FramingMode::ContentLength(n),
        None => FramingMode::None,
    })
}

fn resolve_response_framing(
    start: &StartLine,
    headers: &HeaderList,
    head_request: bool,
    connect_request: bool,
) -> Result<FramingMode, ProtocolError> {
    let code = match start {
        StartLine::Status { code, .. } => *code,
        StartLine::Request { .. } => 0,
    };
    if head_request || (100..200).contains(&code) || code == 204 || code == 304 {
        return Ok(FramingMode::None);
    }
    if connect_request && (200..300).contains(&code) {
        return Ok(FramingMode::None);
    }
    let chunked = headers.has_token("transfer-encoding", "chunked");
    let length = content_length(headers)?;
    if chunked && length.is_some() {
        return Err(ProtocolError::AmbiguousFraming);
    }
    if chunked {
        return Ok(FramingMode::Chunked);
    }
    if headers.first("transfer-encoding").is_some() {
        // Unknown encoding: the only safe delimiter left is connection close.
        return Ok(FramingMode::UntilClose);
    }
    Ok(match length {
        Some(n) => FramingMode::ContentLength(n),
        None => FramingMode::UntilClose,
    })
}

const MAX_CHUNK_SIZE_LINE: usize = 128;

#[derive(Debug)]
enum ChunkPhase {
    SizeLine { line: Vec<u8> },
    Data { remaining: u64 },
    DataEnd { cr_seen: bool },
    TrailerLine { line: Vec<u8> },
}

#[derive(Debug)]
enum FramerPhase {
    NoBody,
    Fixed { remaining: u64 },
    Chunked(ChunkPhase),
    UntilClose,
    Complete,
}

/// Tracks where a message body ends without copying or re-encoding it.
///
/// `advance` scans a slice of incoming bytes and reports how many of them
/// belong to the current message; the relay forwards exactly those bytes
/// verbatim (chunk framing included) and leaves the rest for the next message.
#[derive(Debug)]
pub struct BodyFramer {
    phase: FramerPhase,
}

impl BodyFramer {
    pub fn new(mode: FramingMode) -> Self {
        let phase = match mode {
            FramingMode::None => FramerPhase::NoBody,
            FramingMode::ContentLength(0) => FramerPhase::NoBody,
            FramingMode::ContentLength(n) => FramerPhase::Fixed { remaining: n },
            FramingMode::Chunked => FramerPhase::Chunked(ChunkPhase::SizeLine { line: Vec::new() }),
            FramingMode::UntilClose => FramerPhase::UntilClose,
        };
        Self { phase }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.phase, FramerPhase::Complete | FramerPhase::NoBody)
    }

    /// True if a peer close at this point is a legal end of message.
    pub fn eof_is_end(&self) -> bool {
        matches!(
            self.phase,
            FramerPhase::UntilClose | FramerPhase::Complete | FramerPhase::NoBody
        )
    }

    /// Mark the body finished after a legal peer close.
    pub fn finish_on_eof(&mut self) -> Result<(), ProtocolError> {
        if self.eof_is_end() {
            self.phase = FramerPhase::Complete;
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedEof)
        }
    }

    /// Scan `data` and return how many leading bytes belong to this message,
    /// plus whether the message is now complete.
    pub fn advance(&mut self, data: &[u8]) -> Result<(usize, bool), ProtocolError> {
        match &mut self.phase {
            FramerPhase::NoBody | FramerPhase::Complete => {
                self.phase = FramerPhase::Complete;
                Ok((0, true))
            }
            FramerPhase::UntilClose => Ok((data.len(), false)),
            FramerPhase::Fixed { remaining } => {
                let take = (*remaining).min(data.len() as u64) as usize;
                *remaining -= take as u64;
                if *remaining == 0 {
                    self.phase = FramerPhase::Complete;
                    Ok((take, true))
                } else {
                    Ok((take, false))
                }
            }
            FramerPhase::Chunked(_) => self.advance_chunked(data),
        }
    }

    fn advance_chunked(&mut self, data: &[u8]) -> Result<(usize, bool), ProtocolError> {
        let mut pos = 0;
        while pos < data.len() {
            let phase = match &mut self.phase {
                FramerPhase::Chunked(p) => p,
                _ => break,
            };
            match phase {
                ChunkPhase::SizeLine { line } => {
                    let byte = data[pos];
                    pos += 1;
                    if byte == b'\n' {
                        let size = parse_chunk_size(line)?;
                        if size == 0 {
                            self.phase =
                                FramerPhase::Chunked(ChunkPhase::TrailerLine { line: Vec::new() });
                        } else {
                            self.phase =
                                FramerPhase::Chunked(ChunkPhase::Data { remaining: size });
                        }
                    } else {
                        if line.len() >= MAX_CHUNK_SIZE_LINE {
                            return Err(ProtocolError::InvalidChunkSize(
                                String::from_utf8_lossy(line).into_owned(),
                            ));
                        }
                        line.push(byte);
                    }
                }
                ChunkPhase::Data { remaining } => {
                    let take = (*remaining).min((data.len() - pos) as u64) as usize;
                    pos += take;
                    *remaining -= take as u64;
                    if *remaining == 0 {
                        self.phase = FramerPhase::Chunked(ChunkPhase::DataEnd { cr_seen: false });
                    }
                }
                ChunkPhase::DataEnd { cr_seen } => {
                    let byte = data[pos];
                    pos += 1;
                    match byte {
                        b'\r' if !*cr_seen => *cr_seen = true,
                        b'\n' => {
                            self.phase =
                                FramerPhase::Chunked(ChunkPhase::SizeLine { line: Vec::new() });
                        }
                        other => {
                            return Err(ProtocolError::InvalidChunkSize(format!(
                                "expected CRLF after chunk data, got 0x{other:02x}"
                            )))
                        }
                    }
                }
                ChunkPhase::TrailerLine { line } => {
                    let byte = data[pos];
                    pos += 1;
                    if byte == b'\n' {
                        let text = trim_terminator(line);
                        if text.is_empty() {
                            self.phase = FramerPhase::Complete;
                            return Ok((pos, true));
                        }
                        line.clear();
                    } else {
                        if line.len() >= MAX_CHUNK_SIZE_LINE * 8 {
                            return Err(ProtocolError::HeadersTooLarge(MAX_CHUNK_SIZE_LINE * 8));
                        }
                        line.push(byte);
                    }
                }
            }
        }
        Ok((pos, self.is_complete()))
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ProtocolError> {
    let text = str::from_utf8(trim_terminator(line))
        .map_err(|_| ProtocolError::InvalidChunkSize(String::from_utf8_lossy(line).into_owned()))?;
    // Chunk extensions after ';' are framing-irrelevant; skip them.
    let size = text.split(';').next().unwrap_or_default().trim();
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidChunkSize(text.to_string()));
    }
    u64::from_str_radix(size, 16)
        .map_err(|_| ProtocolError::InvalidChunkSize(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::message::FramingMode;

    fn buf_with(data: &[u8]) -> Buffer {
        let mut buf = Buffer::with_capacity(64 * 1024);
        buf.push(data).unwrap();
        buf
    }

    fn parse_request(data: &[u8]) -> Result<Option<ParsedMessage>, ProtocolError> {
        let mut parser = MessageParser::new(MessageKind::Request, ParserLimits::default());
        parser.poll_head(&mut buf_with(data))
    }

    #[test]
    fn parses_proxy_request_head() {
        let raw = b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n";
        let msg = parse_request(raw).unwrap().unwrap();
        assert_eq!(msg.method(), Some("GET"));
        assert_eq!(msg.target(), Some("http://example.com/"));
        assert_eq!(msg.version(), Version::Http11);
        assert_eq!(msg.framing, FramingMode::None);
        assert!(!msg.persistent);
        assert_eq!(&msg.raw_head[..], &raw[..]);
    }

    #[test]
    fn needs_more_data_on_partial_head() {
        let mut parser = MessageParser::new(MessageKind::Request, ParserLimits::default());
        let mut buf = buf_with(b"GET http://example.com/ HTTP/1.1\r\nHost: exa");
        assert!(parser.poll_head(&mut buf).unwrap().is_none());
        buf.push(b"mple.com\r\n\r\n").unwrap();
        let msg = parser.poll_head(&mut buf).unwrap().unwrap();
        assert_eq!(msg.headers.first("host"), Some("example.com"));
    }

    #[test]
    fn one_byte_at_a_time_matches_single_shot() {
        let raw = b"POST http://h/ HTTP/1.1\r\nContent-Length: 3\r\n\r\n";
        let mut parser = MessageParser::new(MessageKind::Request, ParserLimits::default());
        let mut buf = Buffer::with_capacity(1024);
        let mut out = None;
        for &b in raw.iter() {
            buf.push(&[b]).unwrap();
            if let Some(msg) = parser.poll_head(&mut buf).unwrap() {
                out = Some(msg);
            }
        }
        let msg = out.expect("head should complete on final byte");
        assert_eq!(msg.framing, FramingMode::ContentLength(3));
    }

    #[test]
    fn folded_header_joins_continuation() {
        let raw = b"GET http://h/ HTTP/1.1\r\nX-Note: first\r\n  second part\r\n\r\n";
        let msg = parse_request(raw).unwrap().unwrap();
        assert_eq!(msg.headers.first("x-note"), Some("first second part"));
    }

    #[test]
    fn fold_before_any_header_is_rejected() {
        let raw = b"GET http://h/ HTTP/1.1\r\n  dangling\r\n\r\n";
        assert_eq!(parse_request(raw), Err(ProtocolError::FoldWithoutHeader));
    }

    #[test]
    fn conflicting_content_lengths_rejected() {
        let raw = b"POST http://h/ HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 6\r\n\r\n";
        assert_eq!(
            parse_request(raw),
            Err(ProtocolError::ConflictingContentLength)
        );
        // Identical duplicates are tolerated.
        let raw = b"POST http://h/ HTTP/1.1\r\nContent-Length: 5\r\nContent-Length: 5\r\n\r\n";
        let msg = parse_request(raw).unwrap().unwrap();
        assert_eq!(msg.framing, FramingMode::ContentLength(5));
    }

    #[test]
    fn content_length_with_chunked_rejected() {
        let raw = b"POST http://h/ HTTP/1.1\r\nContent-Length: 5\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert_eq!(parse_request(raw), Err(ProtocolError::AmbiguousFraming));
    }

    #[test]
    fn chunked_takes_precedence_in_responses() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        let mut parser = MessageParser::new(
            MessageKind::Response {
                head_request: false,
                connect_request: false,
            },
            ParserLimits::default(),
        );
        let msg = parser.poll_head(&mut buf_with(raw)).unwrap().unwrap();
        assert_eq!(msg.framing, FramingMode::Chunked);
        assert!(msg.persistent);
    }

    #[test]
    fn response_without_framing_is_close_delimited() {
        let raw = b"HTTP/1.1 200 OK\r\nServer: x\r\n\r\n";
        let mut parser = MessageParser::new(
            MessageKind::Response {
                head_request: false,
                connect_request: false,
            },
            ParserLimits::default(),
        );
        let msg = parser.poll_head(&mut buf_with(raw)).unwrap().unwrap();
        assert_eq!(msg.framing, FramingMode::UntilClose);
        assert!(!msg.persistent, "close-delimited response cannot persist");
    }

    #[test]
    fn head_response_has_no_body_despite_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n";
        let mut parser = MessageParser::new(
            MessageKind::Response {
                head_request: true,
                connect_request: false,
            },
            ParserLimits::default(),
        );
        let msg = parser.poll_head(&mut buf_with(raw)).unwrap().unwrap();
        assert_eq!(msg.framing, FramingMode::None);
    }

    #[test]
    fn persistence_follows_version_defaults() {
        let msg = parse_request(b"GET http://h/ HTTP/1.1\r\n\r\n").unwrap().unwrap();
        assert!(msg.persistent);
        let msg = parse_request(b"GET http://h/ HTTP/1.0\r\n\r\n").unwrap().unwrap();
        assert!(!msg.persistent);
        let msg =
            parse_request(b"GET http://h/ HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n")
                .unwrap()
                .unwrap();
        assert!(msg.persistent);
        let msg = parse_request(b"GET http://h/ HTTP/1.1\r\nConnection: close\r\n\r\n")
            .unwrap()
            .unwrap();
        assert!(!msg.persistent);
    }

    #[test]
    fn unsupported_version_rejected() {
        assert!(matches!(
            parse_request(b"GET http://h/ HTTP/2\r\n\r\n"),
            Err(ProtocolError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn leading_blank_lines_skipped() {
        let raw = b"\r\n\r\nGET http://h/ HTTP/1.1\r\n\r\n";
        let msg = parse_request(raw).unwrap().unwrap();
        assert_eq!(msg.method(), Some("GET"));
        assert!(msg.raw_head.starts_with(b"GET "));
    }

    #[test]
    fn oversized_head_rejected() {
        let limits = ParserLimits {
            max_head_bytes: 64,
            max_headers: 128,
        };
        let mut parser = MessageParser::new(MessageKind::Request, limits);
        let mut buf = buf_with(b"GET http://h/ HTTP/1.1\r\nX-Pad: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n\r\n");
        assert!(matches!(
            parser.poll_head(&mut buf),
            Err(ProtocolError::HeadersTooLarge(_))
        ));
    }

    #[test]
    fn fixed_framer_stops_at_exact_length() {
        let mut framer = BodyFramer::new(FramingMode::ContentLength(5));
        assert_eq!(framer.advance(b"ab").unwrap(), (2, false));
        assert_eq!(framer.advance(b"cdefgh").unwrap(), (3, true));
        assert!(framer.is_complete());
    }

    #[test]
    fn fixed_framer_byte_at_a_time() {
        let mut framer = BodyFramer::new(FramingMode::ContentLength(3));
        let mut total = 0;
        for b in b"xyz" {
            let (n, _) = framer.advance(std::slice::from_ref(b)).unwrap();
            total += n;
        }
        assert_eq!(total, 3);
        assert!(framer.is_complete());
    }

    #[test]
    fn chunked_framer_consumes_exact_message() {
        let body = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\nNEXT";
        let mut framer = BodyFramer::new(FramingMode::Chunked);
        let (n, done) = framer.advance(body).unwrap();
        assert!(done);
        assert_eq!(&body[..n], b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
        assert_eq!(&body[n..], b"NEXT");
    }

    #[test]
    fn chunked_framer_empty_body() {
        let mut framer = BodyFramer::new(FramingMode::Chunked);
        let (n, done) = framer.advance(b"0\r\n\r\n").unwrap();
        assert_eq!(n, 5);
        assert!(done);
    }

    #[test]
    fn chunked_framer_single_byte_feed() {
        let body = b"1\r\na\r\n0\r\n\r\n";
        let mut framer = BodyFramer::new(FramingMode::Chunked);
        let mut consumed = 0;
        for b in body.iter() {
            let (n, _) = framer.advance(std::slice::from_ref(b)).unwrap();
            consumed += n;
        }
        assert_eq!(consumed, body.len());
        assert!(framer.is_complete());
    }

    #[test]
    fn chunked_framer_handles_bodies_larger_than_any_buffer() {
        // One 256 KiB chunk delivered in 4 KiB slices.
        let mut message = b"40000\r\n".to_vec();
        message.extend(std::iter::repeat(b'x').take(0x40000));
        message.extend_from_slice(b"\r\n0\r\n\r\n");

        let mut framer = BodyFramer::new(FramingMode::Chunked);
        let mut consumed = 0;
        for slice in message.chunks(4096) {
            let (n, _) = framer.advance(slice).unwrap();
            assert_eq!(n, slice.len());
            consumed += n;
        }
        assert_eq!(consumed, message.len());
        assert!(framer.is_complete());
    }

    #[test]
    fn chunked_framer_with_extension_and_trailers() {
        let body = b"4;name=val\r\nwxyz\r\n0\r\nX-Trailer: t\r\n\r\n";
        let mut framer = BodyFramer::new(FramingMode::Chunked);
        let (n, done) = framer.advance(body).unwrap();
        assert_eq!(n, body.len());
        assert!(done);
    }

    #[test]
    fn chunked_framer_rejects_bad_hex() {
        let mut framer = BodyFramer::new(FramingMode::Chunked);
        assert!(matches!(
            framer.advance(b"zz\r\n"),
            Err(ProtocolError::InvalidChunkSize(_))
        ));
    }

    #[test]
    fn until_close_only_ends_on_eof() {
        let mut framer = BodyFramer::new(FramingMode::UntilClose);
        assert_eq!(framer.advance(b"some data").unwrap(), (9, false));
        assert!(framer.eof_is_end());
        framer.finish_on_eof().unwrap();
        assert!(framer.is_complete());
    }

    #[test]
    fn eof_mid_fixed_body_is_error() {
        let mut framer = BodyFramer::new(FramingMode::ContentLength(10));
        framer.advance(b"12345").unwrap();
        assert_eq!(framer.finish_on_eof(), Err(ProtocolError::UnexpectedEof));
    }
}
