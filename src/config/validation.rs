//! Configuration validation and rule compilation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Compile textual rules into the runtime forms the policy pipeline uses:
//!   parsed CIDR blocks, compiled regexes, resolved parent proxies
//! - Validate value ranges (capacities and ceilings non-zero, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Compilation happens once here; the hot path never parses rule text

use std::net::SocketAddr;

use ipnetwork::IpNetwork;
use regex::Regex;

use crate::config::schema::{
    AclActionConfig, FilterModeConfig, ProxyConfig, UpstreamKindConfig,
};
use crate::policy::{
    AccessList, AclAction, AclRule, ContentFilter, FilterMode, FilterScope, HostPattern,
    PolicyRules, ProxyKind, UpstreamAction, UpstreamProxy, UpstreamRule, UpstreamSelector,
};

/// A single semantic problem found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a valid socket address")]
    InvalidBindAddress(String),
    #[error("listener.max_connections must be greater than zero")]
    ZeroMaxConnections,
    #[error("relay.buffer_capacity must be greater than zero")]
    ZeroBufferCapacity,
    #[error("relay.max_header_bytes must be greater than zero")]
    ZeroHeaderLimit,
    #[error("acl rule address {0:?} is not an IP address or CIDR block")]
    InvalidAclAddress(String),
    #[error("filter pattern {0:?} does not compile: {1}")]
    InvalidFilterPattern(String, String),
    #[error("upstream rule address {0:?} is not host:port")]
    InvalidUpstreamAddress(String),
    #[error("upstream rule of kind {0:?} requires an address")]
    MissingUpstreamAddress(String),
    #[error("observability.metrics_address {0:?} is not a valid socket address")]
    InvalidMetricsAddress(String),
}

/// Check everything and report every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }
    if config.relay.buffer_capacity == 0 {
        errors.push(ValidationError::ZeroBufferCapacity);
    }
    if config.relay.max_header_bytes == 0 || config.relay.max_headers == 0 {
        errors.push(ValidationError::ZeroHeaderLimit);
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if let Err(mut policy_errors) = compile_policy(config) {
        errors.append(&mut policy_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Compile the textual rule sections into the immutable runtime snapshot.
pub fn compile_policy(config: &ProxyConfig) -> Result<PolicyRules, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut acl_rules = Vec::new();
    for rule in &config.acl.rules {
        match parse_network(&rule.address) {
            Some(network) => acl_rules.push(AclRule {
                action: match rule.action {
                    AclActionConfig::Allow => AclAction::Allow,
                    AclActionConfig::Deny => AclAction::Deny,
                },
                network,
            }),
            None => errors.push(ValidationError::InvalidAclAddress(rule.address.clone())),
        }
    }

    let mut patterns = Vec::new();
    for pattern in &config.filter.patterns {
        match Regex::new(pattern) {
            Ok(re) => patterns.push(re),
            Err(e) => errors.push(ValidationError::InvalidFilterPattern(
                pattern.clone(),
                e.to_string(),
            )),
        }
    }

    let mut upstream_rules = Vec::new();
    for rule in &config.upstream.rules {
        let action = match rule.kind {
            UpstreamKindConfig::None => Some(UpstreamAction::Direct),
            UpstreamKindConfig::Http | UpstreamKindConfig::Connect => {
                let kind = match rule.kind {
                    UpstreamKindConfig::Http => ProxyKind::Http,
                    _ => ProxyKind::Connect,
                };
                match &rule.address {
                    None => {
                        errors.push(ValidationError::MissingUpstreamAddress(format!(
                            "{:?}",
                            rule.kind
                        )));
                        None
                    }
                    Some(address) => match parse_host_port(address) {
                        Some((host, port)) => {
                            let mut proxy = UpstreamProxy::new(kind, host, port);
                            if let Some(creds) = &rule.credentials {
                                proxy = proxy.with_credentials(creds);
                            }
                            Some(UpstreamAction::Via(proxy))
                        }
                        None => {
                            errors
                                .push(ValidationError::InvalidUpstreamAddress(address.clone()));
                            None
                        }
                    },
                }
            }
        };
        if let Some(action) = action {
            let hosts = if rule.hosts.is_empty() {
                vec![HostPattern::Any]
            } else {
                rule.hosts.iter().map(|h| HostPattern::parse(h)).collect()
            };
            upstream_rules.push(UpstreamRule {
                action,
                hosts,
                port: rule.port,
            });
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(PolicyRules {
        acl: AccessList::new(acl_rules, config.acl.default_allow),
        filter: ContentFilter::new(
            config.filter.enabled,
            match config.filter.mode {
                FilterModeConfig::AllowList => FilterMode::AllowList,
                FilterModeConfig::DenyList => FilterMode::DenyList,
            },
            if config.filter.match_urls {
                FilterScope::Url
            } else {
                FilterScope::Host
            },
            patterns,
            config.filter.connect_ports.clone(),
        ),
        upstreams: UpstreamSelector::new(upstream_rules),
    })
}

/// Accept either a CIDR block or a bare address (treated as a host network).
fn parse_network(s: &str) -> Option<IpNetwork> {
    if let Ok(network) = s.parse::<IpNetwork>() {
        return Some(network);
    }
    s.parse::<std::net::IpAddr>()
        .ok()
        .map(|addr| IpNetwork::from(addr))
}

fn parse_host_port(s: &str) -> Option<(String, u16)> {
    let (host, port) = s.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    Some((host.to_string(), port))
}
