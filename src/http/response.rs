//! Synthesized responses written directly on the client half.
//!
//! The relay never fabricates responses on behalf of an origin; these are the
//! fixed set of messages the proxy itself is allowed to emit.

/// A minimal response: status line, a couple of headers, short body.
#[derive(Debug, Clone, Copy)]
pub struct SynthesizedResponse {
    pub status: u16,
    reason: &'static str,
    body: &'static str,
    close: bool,
}

impl SynthesizedResponse {
    /// 400: the client sent something the parser refused.
    pub fn bad_request() -> Self {
        Self {
            status: 400,
            reason: "Bad Request",
            body: "Malformed request.\n",
            close: true,
        }
    }

    /// 403: ACL or content filter block.
    pub fn forbidden() -> Self {
        Self {
            status: 403,
            reason: "Forbidden",
            body: "Request blocked by proxy policy.\n",
            close: true,
        }
    }

    /// 502: the upstream connection could not be established.
    pub fn bad_gateway() -> Self {
        Self {
            status: 502,
            reason: "Bad Gateway",
            body: "Could not reach the requested destination.\n",
            close: true,
        }
    }

    /// 504: the upstream connect attempt timed out.
    pub fn gateway_timeout() -> Self {
        Self {
            status: 504,
            reason: "Gateway Timeout",
            body: "Timed out reaching the requested destination.\n",
            close: true,
        }
    }

    /// 503: the connection budget is exhausted; terse by design.
    pub fn at_capacity() -> Self {
        Self {
            status: 503,
            reason: "Service Unavailable",
            body: "",
            close: true,
        }
    }

    /// 200: CONNECT handshake succeeded; tunnel bytes follow.
    pub fn tunnel_established() -> Self {
        Self {
            status: 200,
            reason: "Connection established",
            body: "",
            close: false,
        }
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        if self.close {
            out.push_str("Connection: close\r\n");
            out.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
            if !self.body.is_empty() {
                out.push_str("Content-Type: text/plain\r\n");
            }
        }
        out.push_str("\r\n");
        out.push_str(self.body);
        out.into_bytes()
    }
}
