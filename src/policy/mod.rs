//! Policy pipeline: decides what happens between "request parsed" and
//! "destination connected".
//!
//! # Data Flow
//! ```text
//! Parsed request + client address
//!     → acl.rs (client allowed at all?)
//!     → filter.rs (destination allowed? CONNECT port allowed?)
//!     → upstream.rs (direct, or via which parent proxy?)
//!     → PolicyDecision consumed once by the relay engine
//! ```
//!
//! # Design Decisions
//! - Evaluation is a pure function of (client address, request, rule sets);
//!   a block at any stage short-circuits the rest
//! - Rule sets are immutable snapshots; reload swaps the snapshot observed by
//!   new connections, never mutates in place

pub mod acl;
pub mod filter;
pub mod upstream;

use std::net::IpAddr;

pub use acl::{AccessList, AclAction, AclRule};
pub use filter::{ContentFilter, FilterMode, FilterScope};
pub use upstream::{
    HostPattern, ProxyKind, UpstreamAction, UpstreamProxy, UpstreamRule, UpstreamSelector,
};

use crate::http::message::{Authority, ParsedMessage};

/// The immutable rule snapshot every connection evaluates against.
#[derive(Debug)]
pub struct PolicyRules {
    pub acl: AccessList,
    pub filter: ContentFilter,
    pub upstreams: UpstreamSelector,
}

impl PolicyRules {
    /// Rules that allow everything and connect everywhere directly.
    pub fn permissive() -> Self {
        Self {
            acl: AccessList::allow_all(),
            filter: ContentFilter::disabled(),
            upstreams: UpstreamSelector::direct_only(),
        }
    }
}

/// Outcome of one evaluation; computed once per request, immutable after.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyDecision {
    /// The request proceeds toward its destination.
    Permit {
        upstream: UpstreamAction,
        /// Replacement request target; when set, the engine re-serializes the
        /// head instead of forwarding the raw bytes.
        rewritten_target: Option<String>,
    },
    /// Terminal block; the engine answers with this status and closes.
    Deny { status: u16 },
}

/// Run the pipeline stages in order. Not an error path: a deny is a
/// deliberate decision.
pub fn evaluate(
    rules: &PolicyRules,
    client: IpAddr,
    request: &ParsedMessage,
    destination: &Authority,
) -> PolicyDecision {
    if !rules.acl.permits(client) {
        return PolicyDecision::Deny { status: 403 };
    }

    let url = request.target().unwrap_or_default();
    if !rules.filter.permits(&destination.host, url) {
        return PolicyDecision::Deny { status: 403 };
    }
    if request.is_connect() && !rules.filter.permits_connect_port(destination.port) {
        return PolicyDecision::Deny { status: 403 };
    }

    PolicyDecision::Permit {
        upstream: rules.upstreams.select(&destination.host, destination.port),
        rewritten_target: None,
    }
}
