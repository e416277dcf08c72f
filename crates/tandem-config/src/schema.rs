//! Configuration schema for the relay server.
//!
//! All fields use `serde(default)` so partial configs work correctly.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::origins::OriginPolicy;

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Interface to bind.
    pub host: IpAddr,
    /// TCP port for both the HTTP routes and the signaling WebSocket.
    pub port: u16,
    /// Origins allowed to open the signaling socket. `"*"` allows any.
    pub allowed_origins: Vec<String>,
    /// Verbose logging.
    pub debug: bool,
    /// Outbound queue length per connection.
    pub channel_capacity: usize,
    /// Close connections that stay silent this long. 0 disables.
    pub idle_timeout_secs: u64,
    /// Largest inbound WebSocket message accepted.
    pub max_message_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8000,
            allowed_origins: vec!["*".into()],
            debug: false,
            channel_capacity: 256,
            idle_timeout_secs: 0,
            max_message_bytes: 64 * 1024,
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn origin_policy(&self) -> OriginPolicy {
        OriginPolicy::from_list(&self.allowed_origins)
    }
}
