//! Upstream proxy selection.
//!
//! # Responsibilities
//! - Map a destination host/port to the route a connection should take:
//!   direct, or through a configured parent proxy
//! - First matching rule wins; the fallback is a direct connection
//!
//! # Design Decisions
//! - Host rules are exact names or `.suffix` domain matches; no regex in this
//!   path, lookups stay O(rules)
//! - Credentials are pre-encoded at load time so the hot path only appends a
//!   header value

use std::fmt;

use base64::Engine as _;

/// How to speak to a parent proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyKind {
    /// Forward the request head as-is; the parent understands proxy-form HTTP.
    Http,
    /// Always open a CONNECT tunnel through the parent first.
    Connect,
}

/// A configured parent proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamProxy {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    /// Pre-encoded `Basic` credential, ready for `Proxy-Authorization`.
    pub credentials: Option<String>,
}

impl UpstreamProxy {
    pub fn new(kind: ProxyKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind,
            host: host.into(),
            port,
            credentials: None,
        }
    }

    /// Attach `user:pass` credentials, stored Base64-encoded.
    pub fn with_credentials(mut self, userinfo: &str) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(userinfo.as_bytes());
        self.credentials = Some(format!("Basic {encoded}"));
        self
    }
}

impl fmt::Display for UpstreamProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The route a request takes to its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamAction {
    Direct,
    Via(UpstreamProxy),
}

/// Host condition of a selector rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// Matches every destination.
    Any,
    /// Exact host name, case-insensitive.
    Exact(String),
    /// Domain suffix: `.example.com` matches the domain and its subdomains.
    Suffix(String),
}

impl HostPattern {
    /// Parse from config syntax: `*` is any, a leading dot is a suffix,
    /// anything else is exact.
    pub fn parse(s: &str) -> Self {
        if s == "*" {
            HostPattern::Any
        } else if let Some(suffix) = s.strip_prefix('.') {
            HostPattern::Suffix(suffix.to_ascii_lowercase())
        } else {
            HostPattern::Exact(s.to_ascii_lowercase())
        }
    }

    fn matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        match self {
            HostPattern::Any => true,
            HostPattern::Exact(name) => host == *name,
            HostPattern::Suffix(suffix) => {
                host == *suffix || host.ends_with(&format!(".{suffix}"))
            }
        }
    }
}

/// One ordered selector rule.
#[derive(Debug, Clone)]
pub struct UpstreamRule {
    pub action: UpstreamAction,
    pub hosts: Vec<HostPattern>,
    /// When set, the rule only applies to this destination port.
    pub port: Option<u16>,
}

impl UpstreamRule {
    fn matches(&self, host: &str, port: u16) -> bool {
        if self.port.is_some_and(|p| p != port) {
            return false;
        }
        self.hosts.iter().any(|h| h.matches(host))
    }
}

/// Compiled, immutable selector.
#[derive(Debug, Clone, Default)]
pub struct UpstreamSelector {
    rules: Vec<UpstreamRule>,
}

impl UpstreamSelector {
    pub fn new(rules: Vec<UpstreamRule>) -> Self {
        Self { rules }
    }

    /// Every destination connects directly.
    pub fn direct_only() -> Self {
        Self::default()
    }

    /// First matching rule decides; unmatched destinations go direct.
    pub fn select(&self, host: &str, port: u16) -> UpstreamAction {
        for rule in &self.rules {
            if rule.matches(host, port) {
                return rule.action.clone();
            }
        }
        UpstreamAction::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn via(host: &str) -> UpstreamAction {
        UpstreamAction::Via(UpstreamProxy::new(ProxyKind::Http, host, 3128))
    }

    #[test]
    fn suffix_matches_domain_and_subdomains() {
        let p = HostPattern::parse(".example.com");
        assert!(p.matches("example.com"));
        assert!(p.matches("a.b.example.com"));
        assert!(!p.matches("badexample.com"));
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let p = HostPattern::parse("Example.COM");
        assert!(p.matches("example.com"));
        assert!(!p.matches("www.example.com"));
    }

    #[test]
    fn first_matching_rule_wins() {
        let selector = UpstreamSelector::new(vec![
            UpstreamRule {
                action: UpstreamAction::Direct,
                hosts: vec![HostPattern::parse(".internal.corp")],
                port: None,
            },
            UpstreamRule {
                action: via("parent.corp"),
                hosts: vec![HostPattern::Any],
                port: None,
            },
        ]);
        assert_eq!(
            selector.select("db.internal.corp", 80),
            UpstreamAction::Direct
        );
        assert_eq!(selector.select("example.com", 80), via("parent.corp"));
    }

    #[test]
    fn unmatched_falls_back_to_direct() {
        let selector = UpstreamSelector::new(vec![UpstreamRule {
            action: via("parent.corp"),
            hosts: vec![HostPattern::parse(".example.com")],
            port: None,
        }]);
        assert_eq!(selector.select("other.net", 80), UpstreamAction::Direct);
    }

    #[test]
    fn port_condition_narrows_the_rule() {
        let selector = UpstreamSelector::new(vec![UpstreamRule {
            action: via("tls-parent.corp"),
            hosts: vec![HostPattern::Any],
            port: Some(443),
        }]);
        assert_eq!(selector.select("example.com", 443), via("tls-parent.corp"));
        assert_eq!(selector.select("example.com", 80), UpstreamAction::Direct);
    }

    #[test]
    fn credentials_are_preencoded() {
        let proxy =
            UpstreamProxy::new(ProxyKind::Connect, "parent", 8080).with_credentials("user:secret");
        assert_eq!(
            proxy.credentials.as_deref(),
            Some("Basic dXNlcjpzZWNyZXQ=")
        );
    }
}
