//! Connection table keys
//!
//! A client is identified by its IPv4 endpoint, packed into a `u64`:
//!
//! ```text
//! +----------------+----------------+----------------+
//! | IPv4 (4 bytes) | port (2 bytes) |  zero (2 bytes) |
//! +----------------+----------------+----------------+
//!   bits 63..32      bits 31..16      bits 15..0
//! ```

use crate::error::{MuxError, Result};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Packed client endpoint used as the connection table key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(u64);

impl ClientKey {
    /// Pack an IPv4 endpoint
    pub fn from_v4(addr: SocketAddrV4) -> Self {
        let ip = u32::from(*addr.ip()) as u64;
        let port = addr.port() as u64;
        ClientKey(ip << 32 | port << 16)
    }

    /// Pack a client endpoint.
    ///
    /// IPv4-mapped IPv6 addresses are packed as their IPv4 form; any other
    /// IPv6 endpoint is rejected.
    pub fn new(addr: SocketAddr) -> Result<Self> {
        match addr {
            SocketAddr::V4(v4) => Ok(Self::from_v4(v4)),
            SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
                Some(ip) => Ok(Self::from_v4(SocketAddrV4::new(ip, v6.port()))),
                None => Err(MuxError::UnsupportedAddress(addr)),
            },
        }
    }

    /// The packed value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Unpack the endpoint this key was built from
    pub fn endpoint(&self) -> SocketAddrV4 {
        let ip = Ipv4Addr::from((self.0 >> 32) as u32);
        let port = (self.0 >> 16) as u16;
        SocketAddrV4::new(ip, port)
    }
}

impl TryFrom<SocketAddr> for ClientKey {
    type Error = MuxError;

    fn try_from(addr: SocketAddr) -> Result<Self> {
        ClientKey::new(addr)
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}
