//! Content filtering over request destinations.
//!
//! # Responsibilities
//! - Match the destination host (or the full URL) against an ordered pattern
//!   list, as an allow-list or a deny-list
//! - Restrict which ports CONNECT may tunnel to
//!
//! # Design Decisions
//! - Patterns are compiled regexes, built once at load time
//! - Allow-list mode: only explicitly matched destinations pass.
//!   Deny-list mode: matched destinations are blocked
//! - An empty CONNECT port list permits any port

use regex::Regex;

/// Interpretation of the pattern list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Default deny; a match is required to pass.
    AllowList,
    /// Default allow; a match blocks.
    DenyList,
}

/// What the patterns are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterScope {
    /// Destination host only.
    Host,
    /// The full request target URL.
    Url,
}

/// Compiled, immutable content filter.
#[derive(Debug)]
pub struct ContentFilter {
    enabled: bool,
    mode: FilterMode,
    scope: FilterScope,
    patterns: Vec<Regex>,
    connect_ports: Vec<u16>,
}

impl ContentFilter {
    pub fn new(
        enabled: bool,
        mode: FilterMode,
        scope: FilterScope,
        patterns: Vec<Regex>,
        connect_ports: Vec<u16>,
    ) -> Self {
        Self {
            enabled,
            mode,
            scope,
            patterns,
            connect_ports,
        }
    }

    /// A filter that passes everything.
    pub fn disabled() -> Self {
        Self::new(false, FilterMode::DenyList, FilterScope::Host, Vec::new(), Vec::new())
    }

    /// Whether the destination passes the pattern list.
    pub fn permits(&self, host: &str, url: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let subject = match self.scope {
            FilterScope::Host => host,
            FilterScope::Url => url,
        };
        let matched = self.patterns.iter().any(|p| p.is_match(subject));
        match self.mode {
            FilterMode::AllowList => matched,
            FilterMode::DenyList => !matched,
        }
    }

    /// Whether CONNECT may tunnel to this destination port.
    pub fn permits_connect_port(&self, port: u16) -> bool {
        self.connect_ports.is_empty() || self.connect_ports.contains(&port)
    }
}
