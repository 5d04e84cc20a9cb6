//! Endpoint resolution
//!
//! Turns `host:port` strings into socket addresses. Only IPv4 traffic is
//! relayed, so IPv4 results are preferred when a name resolves to both
//! families.

use crate::error::MuxError;
use std::net::{SocketAddr, ToSocketAddrs};

/// Resolve an endpoint string.
///
/// Literal `ip:port` strings are parsed directly; anything else goes through
/// the system resolver on a blocking thread.
pub async fn resolve_endpoint(addr: &str) -> Result<SocketAddr, MuxError> {
    let addr = addr.trim();
    if let Ok(parsed) = addr.parse::<SocketAddr>() {
        return Ok(parsed);
    }

    // Use blocking task for DNS resolution since ToSocketAddrs is blocking
    let owned = addr.to_string();
    let candidates = tokio::task::spawn_blocking(move || {
        owned
            .to_socket_addrs()
            .map(|iter| iter.collect::<Vec<_>>())
    })
    .await
    .map_err(|e| MuxError::AddressResolution(format!("resolver task failed: {}", e)))?
    .map_err(|e| MuxError::AddressResolution(format!("cannot resolve \"{}\": {}", addr, e)))?;

    candidates
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| MuxError::AddressResolution(format!("no addresses found for \"{}\"", addr)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_resolve_literal() {
        let resolved = resolve_endpoint("127.0.0.1:27015").await.unwrap();
        assert_eq!(resolved.ip(), IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(resolved.port(), 27015);
    }

    #[tokio::test]
    async fn test_resolve_trims_whitespace() {
        let resolved = resolve_endpoint(" 10.0.0.1:80 \n").await.unwrap();
        assert_eq!(resolved, "10.0.0.1:80".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_localhost_prefers_ipv4() {
        let resolved = resolve_endpoint("localhost:8080").await.unwrap();
        assert!(resolved.is_ipv4());
        assert_eq!(resolved.port(), 8080);
    }

    #[tokio::test]
    async fn test_resolve_malformed() {
        assert!(matches!(
            resolve_endpoint("no-port-here").await,
            Err(MuxError::AddressResolution(_))
        ));
        assert!(matches!(
            resolve_endpoint("127.0.0.1:notaport").await,
            Err(MuxError::AddressResolution(_))
        ));
    }
}
