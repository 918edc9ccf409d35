//! Server-to-server link configuration.

use ipnet::IpNet;
use serde::Deserialize;
use std::net::IpAddr;

use super::defaults::default_true;

/// Which side opens the TCP connection for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    /// The peer dials us; we accept and authenticate it.
    Inbound,
    /// We dial the peer at `hostname:port`.
    Outbound,
}

/// Link block configuration for server-to-server connections.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkBlock {
    /// Remote server name (e.g., "hub.straylight.net").
    pub name: String,
    /// Expected remote SID (optional, enforced during handshake when set).
    #[serde(default)]
    pub sid: Option<String>,
    /// Remote server IP/hostname to connect to.
    pub hostname: String,
    /// Remote server port.
    pub port: u16,
    /// Password for authentication (must match remote's password).
    pub password: String,
    /// Whether this block describes a link we accept or a link we dial.
    pub direction: LinkDirection,
    /// Replicate users, channels and messages over this link.
    /// When false the link only carries the server tree.
    #[serde(default = "default_true")]
    pub user_sync: bool,
    /// Source networks an inbound peer may connect from. Empty allows any.
    #[serde(default)]
    pub allowed_ips: Vec<IpNet>,
}

impl LinkBlock {
    /// Whether an inbound connection from `addr` may use this block.
    ///
    /// A missing address (e.g. an in-process session) only passes when no
    /// allow-list is configured.
    pub fn permits(&self, addr: Option<IpAddr>) -> bool {
        if self.allowed_ips.is_empty() {
            return true;
        }
        addr.is_some_and(|ip| self.allowed_ips.iter().any(|net| net.contains(&ip)))
    }

    /// `hostname:port`, as dialed for outbound links.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}
