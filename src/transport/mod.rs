//! Transport module for Relaymux
//!
//! This module owns the socket plumbing: endpoint resolution, the shared
//! client-facing socket and the per-connection upstream sockets.

mod addr;

pub use addr::resolve_endpoint;

use crate::config::MuxConfig;
use crate::error::MuxError;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

/// Socket options for the shared client-facing socket
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable SO_REUSEADDR
    pub reuse_address: bool,
    /// SO_RCVBUF size in bytes
    pub recv_buffer_size: Option<usize>,
    /// SO_SNDBUF size in bytes
    pub send_buffer_size: Option<usize>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            reuse_address: true,
            recv_buffer_size: None,
            send_buffer_size: None,
        }
    }
}

impl SocketOpts {
    /// Create socket options from the relay config
    pub fn from_mux_config(config: &MuxConfig) -> Self {
        SocketOpts {
            reuse_address: true,
            recv_buffer_size: config.recv_buffer_size,
            send_buffer_size: config.send_buffer_size,
        }
    }

    /// Apply socket options to an unbound socket
    pub fn apply(&self, socket: &Socket) -> std::io::Result<()> {
        socket.set_reuse_address(self.reuse_address)?;

        if let Some(size) = self.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = self.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }

        Ok(())
    }
}

/// Bind the shared client-facing socket
pub fn bind_client_socket(addr: SocketAddr, opts: &SocketOpts) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    opts.apply(&socket)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let socket = UdpSocket::from_std(socket.into())?;
    tracing::debug!("Client-facing socket bound to {}", socket.local_addr()?);
    Ok(socket)
}

/// Open an upstream socket connected to `target`.
///
/// The local side is an ephemeral IPv4 port; that endpoint is what the
/// upstream server sees as the client.
pub async fn dial_upstream(target: SocketAddr) -> Result<UdpSocket, MuxError> {
    let dial_err = |source: std::io::Error| MuxError::Dial { target, source };

    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))
        .await
        .map_err(dial_err)?;
    socket.connect(target).await.map_err(dial_err)?;

    tracing::debug!(
        "Upstream socket {} connected to {}",
        socket.local_addr().map_err(dial_err)?,
        target
    );

    Ok(socket)
}
