//! Network module - TCP transport for the word-message protocol
//!
//! Provides:
//! - Server for accepting incoming connections and answering requests
//! - Client for connecting to servers and driving exchanges
//! - Connection framing shared by both sides

mod server;
mod client;
mod connection;

pub use server::*;
pub use client::*;
pub use connection::*;

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;

/// Configuration for network operations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Port to listen on or connect to
    pub port: u16,
    /// Interface to bind to (default: all)
    pub bind_address: Option<String>,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Per-frame read timeout in milliseconds, 0 waits forever
    pub read_timeout_ms: u64,
    /// Maximum inbound payload size in bytes
    pub max_payload_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: crate::protocol::DEFAULT_PORT,
            bind_address: None,
            connect_timeout_ms: 5000,
            read_timeout_ms: 0,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl NetworkConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn with_read_timeout(mut self, timeout_ms: u64) -> Self {
        self.read_timeout_ms = timeout_ms;
        self
    }

    /// The address the server listens on
    pub fn bind_addr(&self) -> String {
        format!(
            "{}:{}",
            self.bind_address.as_deref().unwrap_or("0.0.0.0"),
            self.port
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Frame read deadline; `None` when reads should wait forever.
    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }
}

/// Resolve a hostname to a socket address
pub async fn resolve_host(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    use tokio::net::lookup_host;

    let addr_string = format!("{}:{}", host, port);
    let mut addrs = lookup_host(&addr_string).await?;

    addrs.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Could not resolve host: {}", host),
        )
    })
}
