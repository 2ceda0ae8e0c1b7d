//! Accept loop and connection dispatch.
//!
//! # Responsibilities
//! - Accept admitted connections and spawn one relay task per connection
//! - Hold the current rule snapshot and swap it atomically on reload
//! - Stop accepting on shutdown; in-flight connections drain on their own
//!
//! # Design Decisions
//! - Each connection captures the rule snapshot at accept time; a reload
//!   affects new connections only
//! - The accept loop never awaits a connection task; a stuck peer cannot
//!   stall accepts

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc};

use crate::config::loader::ConfigError;
use crate::config::schema::ProxyConfig;
use crate::config::validation::compile_policy;
use crate::net::connection::ConnectionGuard;
use crate::net::listener::{Listener, ListenerError};
use crate::observability::stats::ProxyStats;
use crate::policy::PolicyRules;
use crate::relay::engine::{RelayEngine, RelaySettings};

/// The proxy's top-level server: owns the compiled rules and the counters.
pub struct ProxyServer {
    settings: RelaySettings,
    rules: ArcSwap<PolicyRules>,
    stats: Arc<ProxyStats>,
}

impl ProxyServer {
    /// Compile the configuration into a runnable server.
    pub fn new(config: ProxyConfig) -> Result<Self, ConfigError> {
        let rules = compile_policy(&config).map_err(ConfigError::Validation)?;
        Ok(Self {
            settings: RelaySettings::from_config(&config),
            rules: ArcSwap::from_pointee(rules),
            stats: Arc::new(ProxyStats::new()),
        })
    }

    /// The read-only counters, for an external stats consumer.
    pub fn stats(&self) -> Arc<ProxyStats> {
        Arc::clone(&self.stats)
    }

    /// Run until shutdown, accepting connections and applying config reloads.
    pub async fn run(
        self,
        listener: Listener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        tracing::info!(
            max_connections = listener.max_connections(),
            "Proxy accepting connections"
        );
        loop {
            tokio::select! {
                accepted = listener.accept(&self.stats) => {
                    let (stream, peer, permit) = accepted?;
                    let guard = ConnectionGuard::new(permit, Arc::clone(&self.stats));
                    let engine = RelayEngine::new(
                        self.settings.clone(),
                        self.rules.load_full(),
                        Arc::clone(&self.stats),
                        guard.id(),
                        peer,
                    );
                    tokio::spawn(async move {
                        let _guard = guard;
                        match engine.run(stream).await {
                            Ok(()) => {
                                tracing::debug!(client = %peer, "Connection finished");
                            }
                            Err(e) => {
                                tracing::debug!(client = %peer, error = %e, "Connection ended with error");
                            }
                        }
                    });
                }
                Some(new_config) = config_updates.recv() => {
                    match compile_policy(&new_config) {
                        Ok(rules) => {
                            self.rules.store(Arc::new(rules));
                            tracing::info!("Policy rules swapped");
                        }
                        Err(errors) => {
                            tracing::error!(?errors, "Reloaded configuration rejected");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    return Ok(());
                }
            }
        }
    }
}
