//! Client-address access control.
//!
//! # Responsibilities
//! - Match the client address against an ordered allow/deny list
//! - First match wins; a configurable default covers the rest
//!
//! # Design Decisions
//! - Rules are parsed into `IpNetwork` once at load; the hot path is a linear
//!   scan with no allocation
//! - A bare address in config behaves as a /32 (or /128) network

use std::net::IpAddr;

use ipnetwork::IpNetwork;

/// Allow or deny a matching client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclAction {
    Allow,
    Deny,
}

/// One ordered entry of the access list.
#[derive(Debug, Clone)]
pub struct AclRule {
    pub action: AclAction,
    pub network: IpNetwork,
}

/// Compiled, immutable access list.
#[derive(Debug, Clone)]
pub struct AccessList {
    rules: Vec<AclRule>,
    default_allow: bool,
}

impl AccessList {
    pub fn new(rules: Vec<AclRule>, default_allow: bool) -> Self {
        Self {
            rules,
            default_allow,
        }
    }

    /// An empty list that admits everyone.
    pub fn allow_all() -> Self {
        Self::new(Vec::new(), true)
    }

    /// First matching rule decides; otherwise the configured default.
    pub fn permits(&self, client: IpAddr) -> bool {
        for rule in &self.rules {
            if rule.network.contains(client) {
                return rule.action == AclAction::Allow;
            }
        }
        self.default_allow
    }
}
