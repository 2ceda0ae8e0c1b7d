//! Forward HTTP/HTTPS Proxy Library

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod policy;
pub mod relay;

pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use net::Listener;
pub use relay::ProxyServer;
