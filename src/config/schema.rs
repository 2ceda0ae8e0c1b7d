//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection ceiling).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Relay buffer and header limits.
    pub relay: RelayConfig,

    /// Client-address access control.
    pub acl: AclConfig,

    /// Destination content filter.
    pub filter: FilterConfig,

    /// Parent proxy selection rules.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8888").
    pub bind_address: String,

    /// Maximum concurrent client connections; accepts beyond this are
    /// refused immediately.
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8888".to_string(),
            max_connections: 100,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Idle timeout in seconds; reset by any successful read or write.
    pub idle_secs: u64,

    /// Hard per-connection lifetime ceiling in seconds; 0 disables it.
    pub max_lifetime_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            idle_secs: 600,
            max_lifetime_secs: 0,
        }
    }
}

/// Relay buffer sizing and header-section limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Per-direction buffer capacity in bytes.
    pub buffer_capacity: usize,

    /// Maximum size of a message header section in bytes.
    pub max_header_bytes: usize,

    /// Maximum number of header fields per message.
    pub max_headers: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 32 * 1024,
            max_header_bytes: 16 * 1024,
            max_headers: 128,
        }
    }
}

/// Allow or deny, as written in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AclActionConfig {
    Allow,
    Deny,
}

/// One access-control entry; `address` is an IP or CIDR block.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AclRuleConfig {
    pub action: AclActionConfig,
    pub address: String,
}

/// Access-control configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AclConfig {
    /// Applied when no rule matches.
    pub default_allow: bool,

    /// Ordered rules; first match wins.
    pub rules: Vec<AclRuleConfig>,
}

impl Default for AclConfig {
    fn default() -> Self {
        Self {
            default_allow: true,
            rules: Vec::new(),
        }
    }
}

/// Pattern-list semantics, as written in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FilterModeConfig {
    AllowList,
    #[default]
    DenyList,
}

/// Content filter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Enable the pattern filter.
    pub enabled: bool,

    /// Allow-list or deny-list interpretation of `patterns`.
    pub mode: FilterModeConfig,

    /// Match patterns against full URLs instead of hosts only.
    pub match_urls: bool,

    /// Ordered regular expressions.
    pub patterns: Vec<String>,

    /// Ports CONNECT may tunnel to; empty permits any port.
    pub connect_ports: Vec<u16>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: FilterModeConfig::DenyList,
            match_urls: false,
            patterns: Vec::new(),
            connect_ports: Vec::new(),
        }
    }
}

/// How to reach a parent proxy, as written in config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamKindConfig {
    /// Forward proxy-form HTTP to the parent.
    Http,
    /// Tunnel through the parent with CONNECT.
    Connect,
    /// Explicitly direct, overriding later rules.
    None,
}

/// One parent-proxy selection rule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamRuleConfig {
    pub kind: UpstreamKindConfig,

    /// Parent address as "host:port"; required unless `kind = "none"`.
    #[serde(default)]
    pub address: Option<String>,

    /// Optional "user:password" for Proxy-Authorization.
    #[serde(default)]
    pub credentials: Option<String>,

    /// Destination host patterns: exact name, ".suffix", or "*".
    /// An empty list matches every destination.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Restrict the rule to one destination port.
    #[serde(default)]
    pub port: Option<u16>,
}

/// Parent proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Ordered rules; first match wins, unmatched destinations go direct.
    pub rules: Vec<UpstreamRuleConfig>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_allow_minimal_config() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.max_connections, 100);
        assert!(config.acl.default_allow);
        assert!(!config.filter.enabled);
        assert!(config.upstream.rules.is_empty());
        assert_eq!(config.relay.buffer_capacity, 32 * 1024);
    }

    #[test]
    fn full_config_round_trips() {
        let text = r#"
            [listener]
            bind_address = "0.0.0.0:3128"
            max_connections = 500

            [timeouts]
            connect_secs = 5
            idle_secs = 120

            [acl]
            default_allow = false
            rules = [
                { action = "allow", address = "10.0.0.0/8" },
                { action = "deny", address = "10.1.2.3" },
            ]

            [filter]
            enabled = true
            mode = "deny-list"
            patterns = ["ads"]
            connect_ports = [443]

            [[upstream.rules]]
            kind = "http"
            address = "parent.corp:3128"
            credentials = "user:pass"
            hosts = [".example.com"]
        "#;
        let config: ProxyConfig = toml::from_str(text).unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:3128");
        assert_eq!(config.acl.rules.len(), 2);
        assert_eq!(config.acl.rules[0].action, AclActionConfig::Allow);
        assert_eq!(config.filter.mode, FilterModeConfig::DenyList);
        assert_eq!(config.upstream.rules[0].kind, UpstreamKindConfig::Http);
        assert_eq!(
            config.upstream.rules[0].credentials.as_deref(),
            Some("user:pass")
        );
    }
}
