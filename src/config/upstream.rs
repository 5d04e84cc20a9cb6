//! Upstream configuration types
//!
//! Defines the named backend servers and their resolved registry.

use crate::error::MuxError;
use crate::transport::resolve_endpoint;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// A named backend game server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Name used by the console and admin operations
    pub name: String,

    /// Server address (e.g., "10.0.0.2:27015")
    pub address: String,

    /// Bind new clients to this upstream
    #[serde(default)]
    pub default: bool,
}

impl UpstreamConfig {
    /// Validate the upstream entry
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("upstream name must not be empty".to_string());
        }
        if self.name.contains(char::is_whitespace) {
            return Err(format!("upstream name must not contain spaces: {}", self.name));
        }
        if self.address.trim().is_empty() {
            return Err(format!("upstream {} has no address", self.name));
        }
        Ok(())
    }
}

/// Resolved upstreams, keyed by name in declaration order
#[derive(Debug, Clone, Default)]
pub struct UpstreamRegistry {
    entries: Vec<(String, SocketAddr)>,
    default_index: usize,
}

impl UpstreamRegistry {
    /// Resolve every configured upstream.
    ///
    /// Fails with `AddressResolution` on the first address that cannot be
    /// resolved, or when the list is empty.
    pub async fn resolve(upstreams: &[UpstreamConfig]) -> Result<Self, MuxError> {
        if upstreams.is_empty() {
            return Err(MuxError::AddressResolution(
                "cannot find valid upstreams".to_string(),
            ));
        }

        let mut entries = Vec::with_capacity(upstreams.len());
        for upstream in upstreams {
            let addr = resolve_endpoint(&upstream.address).await?;
            entries.push((upstream.name.clone(), addr));
        }

        let default_index = upstreams.iter().position(|u| u.default).unwrap_or(0);

        Ok(UpstreamRegistry {
            entries,
            default_index,
        })
    }

    /// Build a registry from already resolved entries; the first is default
    pub fn from_entries(entries: Vec<(String, SocketAddr)>) -> Self {
        UpstreamRegistry {
            entries,
            default_index: 0,
        }
    }

    /// Look up an upstream by name
    pub fn get(&self, name: &str) -> Option<SocketAddr> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, addr)| *addr)
    }

    /// Find the name of an upstream address
    pub fn name_of(&self, addr: SocketAddr) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, a)| *a == addr)
            .map(|(n, _)| n.as_str())
    }

    /// The default upstream, if any upstream is registered
    pub fn default_upstream(&self) -> Option<SocketAddr> {
        self.entries.get(self.default_index).map(|(_, addr)| *addr)
    }

    /// Resolve a name, or failing that a literal endpoint
    pub async fn lookup(&self, name_or_addr: &str) -> Result<SocketAddr, MuxError> {
        match self.get(name_or_addr) {
            Some(addr) => Ok(addr),
            None => resolve_endpoint(name_or_addr).await,
        }
    }

    /// Iterate over (name, address) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, SocketAddr)> {
        self.entries.iter().map(|(n, a)| (n.as_str(), *a))
    }

    /// Number of registered upstreams
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
