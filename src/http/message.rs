//! Parsed message model shared by the framing parser and the relay engine.
//!
//! # Design Decisions
//! - Headers keep arrival order and duplicates; the engine forwards the raw
//!   header section verbatim, so this list exists for inspection, not
//!   re-serialization (except when a target rewrite forces one)
//! - Only framing-relevant header semantics are interpreted here

use std::fmt;

use bytes::Bytes;

use crate::http::parser::ProtocolError;

/// HTTP versions the relay speaks on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Http10 => write!(f, "HTTP/1.0"),
            Version::Http11 => write!(f, "HTTP/1.1"),
        }
    }
}

/// How a message body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    /// No body follows the header section.
    None,
    /// Exactly this many body bytes follow.
    ContentLength(u64),
    /// `Transfer-Encoding: chunked` framing.
    Chunked,
    /// Body ends when the peer closes; responses only.
    UntilClose,
}

/// A single header as received, name case preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Ordered header list preserving duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<Header>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: String, value: String) {
        self.entries.push(Header { name, value });
    }

    /// Append a folded continuation line to the most recent header.
    /// Returns false when there is no header to continue.
    pub fn fold_into_last(&mut self, continuation: &str) -> bool {
        match self.entries.last_mut() {
            Some(h) => {
                h.value.push(' ');
                h.value.push_str(continuation);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    /// First value for `name`, case-insensitive.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// All values for `name`, case-insensitive, in arrival order.
    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    /// True if any value of `name` contains `token` as a comma-separated
    /// element, compared case-insensitively.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.all(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }
}

/// First line of a request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request {
        method: String,
        target: String,
        version: Version,
    },
    Status {
        version: Version,
        code: u16,
        reason: String,
    },
}

/// A fully parsed header section, rebuilt per message on persistent
/// connections.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub start: StartLine,
    pub headers: HeaderList,
    pub framing: FramingMode,
    /// Resolved keep-alive signal; the relay engine decides what to do with it.
    pub persistent: bool,
    /// The header section exactly as received, including the terminating
    /// empty line.
    pub raw_head: Bytes,
    /// Length of the final empty-line terminator within `raw_head`.
    pub terminator_len: usize,
}

impl ParsedMessage {
    pub fn method(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Status { .. } => None,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match &self.start {
            StartLine::Request { target, .. } => Some(target),
            StartLine::Status { .. } => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match &self.start {
            StartLine::Status { code, .. } => Some(*code),
            StartLine::Request { .. } => None,
        }
    }

    pub fn version(&self) -> Version {
        match &self.start {
            StartLine::Request { version, .. } | StartLine::Status { version, .. } => *version,
        }
    }

    pub fn is_connect(&self) -> bool {
        self.method()
            .is_some_and(|m| m.eq_ignore_ascii_case("CONNECT"))
    }

    /// Raw header section without the trailing empty line, for callers that
    /// append headers before re-terminating.
    pub fn head_sans_terminator(&self) -> &[u8] {
        &self.raw_head[..self.raw_head.len() - self.terminator_len]
    }

    /// Re-serialize the head with a replacement request target.
    ///
    /// Only meaningful for requests; header order and duplicates are kept.
    pub fn serialize_head_with_target(&self, target: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.raw_head.len() + target.len());
        if let StartLine::Request {
            method, version, ..
        } = &self.start
        {
            out.extend_from_slice(method.as_bytes());
            out.push(b' ');
            out.extend_from_slice(target.as_bytes());
            out.push(b' ');
            out.extend_from_slice(version.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        for h in self.headers.iter() {
            out.extend_from_slice(h.name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(h.value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out
    }
}

/// Destination host and port extracted from a request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Authority {
    /// Parse an authority-form target (`host:port`), as used by CONNECT.
    /// A missing port defaults to 443, the common tunnel destination.
    pub fn from_authority_form(target: &str) -> Result<Self, ProtocolError> {
        if target.is_empty() || target.contains('/') || target.contains('@') {
            return Err(ProtocolError::InvalidTarget(target.to_string()));
        }
        // Bracketed IPv6 literal with optional port.
        if let Some(rest) = target.strip_prefix('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| ProtocolError::InvalidTarget(target.to_string()))?;
            let host = &rest[..close];
            let port = match &rest[close + 1..] {
                "" => 443,
                p => parse_port(p.strip_prefix(':').unwrap_or(p))
                    .ok_or_else(|| ProtocolError::InvalidTarget(target.to_string()))?,
            };
            if host.is_empty() {
                return Err(ProtocolError::InvalidTarget(target.to_string()));
            }
            return Ok(Self {
                host: host.to_string(),
                port,
            });
        }
        match target.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = parse_port(port)
                    .ok_or_else(|| ProtocolError::InvalidTarget(target.to_string()))?;
                Ok(Self {
                    host: host.to_string(),
                    port,
                })
            }
            Some(_) => Err(ProtocolError::InvalidTarget(target.to_string())),
            None => Ok(Self {
                host: target.to_string(),
                port: 443,
            }),
        }
    }

    /// Parse an absolute-form target (`http://host[:port]/path`), as required
    /// for ordinary proxy requests. Only the `http` scheme is accepted; TLS
    /// destinations arrive via CONNECT.
    pub fn from_absolute_form(target: &str) -> Result<Self, ProtocolError> {
        let url = url::Url::parse(target)
            .map_err(|_| ProtocolError::InvalidTarget(target.to_string()))?;
        if url.scheme() != "http" {
            return Err(ProtocolError::InvalidTarget(target.to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ProtocolError::InvalidTarget(target.to_string()))?;
        // Strip IPv6 brackets so the host compares cleanly against rules.
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(Self {
            host: host.to_string(),
            port: url.port().unwrap_or(80),
        })
    }

    /// Extract the destination from a parsed request.
    pub fn from_request(req: &ParsedMessage) -> Result<Self, ProtocolError> {
        let target = req
            .target()
            .ok_or_else(|| ProtocolError::InvalidTarget(String::new()))?;
        if req.is_connect() {
            Self::from_authority_form(target)
        } else {
            Self::from_absolute_form(target)
        }
    }
}

fn parse_port(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
