//! Forward HTTP/HTTPS Proxy
//!
//! A forward proxy daemon built with Tokio: it accepts proxy-form HTTP
//! requests and CONNECT tunnels, applies access-control and content-filter
//! policy, optionally relays through a parent proxy, and pumps bytes until
//! either side closes or a deadline fires.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌────────────────────────────────────────────────┐
//!                      │                 FORWARD PROXY                  │
//!                      │                                                │
//!   Client Request     │  ┌─────────┐   ┌─────────┐   ┌─────────────┐  │
//!   ──────────────────▶│  │   net   │──▶│  http   │──▶│   policy    │  │
//!                      │  │listener │   │ parser  │   │ acl/filter/ │  │
//!                      │  └─────────┘   └─────────┘   │  upstream   │  │
//!                      │                              └──────┬──────┘  │
//!                      │                                     ▼         │
//!   Client Response    │  ┌─────────┐   ┌─────────┐   ┌─────────────┐  │      Destination
//!   ◀──────────────────┼──│ buffers │◀──│  relay  │◀──│  upstream   │◀─┼────  or parent
//!                      │  └─────────┘   │ engine  │   │  connect    │  │      proxy
//!                      │                └─────────┘   └─────────────┘  │
//!                      │                                                │
//!                      │  config · observability · lifecycle            │
//!                      └────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod policy;
pub mod relay;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ProxyConfig;
use crate::config::watcher::ConfigWatcher;
use crate::lifecycle::Shutdown;
use crate::net::listener::Listener;
use crate::relay::server::ProxyServer;

/// Forward HTTP/HTTPS proxy daemon.
#[derive(Debug, Parser)]
#[command(name = "forward-proxy", version)]
struct Args {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration before logging so the configured level applies.
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    observability::logging::init(&config.observability.log_level);

    tracing::info!("forward-proxy v0.1.0 starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        idle_timeout_secs = config.timeouts.idle_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;

    // Reloads arrive from the file watcher; the channel stays silent (but
    // open) when no config file was given.
    let mut watcher_handle = None;
    let mut idle_updates_tx = None;
    let config_updates = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            watcher_handle = Some(watcher.run()?);
            updates
        }
        None => {
            let (tx, updates) = mpsc::unbounded_channel();
            idle_updates_tx = Some(tx);
            updates
        }
    };

    let shutdown = Arc::new(Shutdown::new());
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            lifecycle::signals::watch_signals(&shutdown).await;
        });
    }

    let server = ProxyServer::new(config)?;
    server
        .run(listener, config_updates, shutdown.subscribe())
        .await?;

    drop(watcher_handle);
    drop(idle_updates_tx);
    tracing::info!("Shutdown complete");
    Ok(())
}
