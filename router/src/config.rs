//! Router runtime configuration
//!
//! The router takes its whole configuration from the command line; there is
//! no configuration file and nothing persists across restarts.

use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Validated runtime settings assembled from the CLI arguments
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Bind host; `*` binds all interfaces
    pub host: String,
    pub port: u16,
    pub heartbeat_timeout_seconds: u64,
}

impl RouterConfig {
    /// Resolves the configured host and port into a socket address.
    /// `*` maps to the unspecified IPv4 address; anything else may be an IP
    /// literal or a resolvable hostname.
    pub fn listen_address(&self) -> Result<SocketAddr> {
        if self.host == "*" {
            return Ok(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                self.port,
            ));
        }

        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("Invalid listen host '{}'", self.host))?
            .next()
            .with_context(|| format!("Listen host '{}' resolved to no address", self.host))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }
}
