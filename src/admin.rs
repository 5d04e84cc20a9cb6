//! Control-plane snapshot types
//!
//! What the console (and any other admin surface) sees of a connection.

use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;

/// Point-in-time view of one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Client endpoint on the shared socket
    pub client: SocketAddr,
    /// Local endpoint of the upstream socket, as the upstream sees the client
    pub proxy: Option<SocketAddr>,
    /// Currently applied upstream
    pub upstream: Option<SocketAddr>,
    /// Requested but not yet applied upstream
    pub next_upstream: Option<SocketAddr>,
}

/// Render an optional endpoint, `-` when absent
pub fn endpoint_or_dash(addr: Option<SocketAddr>) -> String {
    addr.map(|a| a.to_string()).unwrap_or_else(|| "-".to_string())
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Client: {} Proxy: {} Upstream: {} Next: {}",
            self.client,
            endpoint_or_dash(self.proxy),
            endpoint_or_dash(self.upstream),
            endpoint_or_dash(self.next_upstream)
        )
    }
}
