//! Per-client virtual connection
//!
//! A [`Connection`] binds one client endpoint to one upstream socket at a
//! time and owns the forwarder loop relaying upstream traffic back to the
//! client.
//!
//! # Migration Handshake
//!
//! The active upstream socket is published behind the connection's lock as
//! a single `Arc`. Closing it cancels the socket's close signal, which wakes
//! a forwarder blocked on `recv`. The forwarder then re-reads the published
//! state: a newer socket is picked up directly, a pending target is dialed,
//! and with neither the forwarder ends.

use crate::admin::{endpoint_or_dash, ConnectionInfo};
use crate::error::{MuxError, Result};
use crate::protocol::MAX_DATAGRAM_SIZE;
use crate::transport::dial_upstream;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An upstream socket together with its close signal
#[derive(Debug)]
struct UpstreamLink {
    socket: UdpSocket,
    local: SocketAddr,
    remote: SocketAddr,
    closed: CancellationToken,
}

impl UpstreamLink {
    async fn dial(target: SocketAddr) -> Result<Self> {
        let socket = dial_upstream(target).await?;
        let local = socket
            .local_addr()
            .map_err(|source| MuxError::Dial { target, source })?;

        Ok(UpstreamLink {
            socket,
            local,
            remote: target,
            closed: CancellationToken::new(),
        })
    }

    fn close(&self) {
        self.closed.cancel();
    }

    async fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        tokio::select! {
            _ = self.closed.cancelled() => Err(MuxError::Closed),
            result = tokio::time::timeout(timeout, self.socket.recv(buf)) => match result {
                Ok(Ok(n)) => Ok(n),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(MuxError::Timeout(timeout)),
            },
        }
    }

    async fn send(&self, data: &[u8], timeout: Duration) -> Result<()> {
        tokio::select! {
            _ = self.closed.cancelled() => Err(MuxError::Closed),
            result = tokio::time::timeout(timeout, self.socket.send(data)) => match result {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(MuxError::Timeout(timeout)),
            },
        }
    }
}

#[derive(Debug, Default)]
struct ConnState {
    upstream: Option<Arc<UpstreamLink>>,
    next_upstream: Option<SocketAddr>,
}

/// One client's session with the relay
#[derive(Debug)]
pub struct Connection {
    client: SocketAddr,
    timeout: Duration,
    state: RwLock<ConnState>,
}

impl Connection {
    /// Create a connection with `next_upstream` pending and no socket yet
    pub fn new(client: SocketAddr, timeout: Duration, next_upstream: SocketAddr) -> Self {
        Connection {
            client,
            timeout,
            state: RwLock::new(ConnState {
                upstream: None,
                next_upstream: Some(next_upstream),
            }),
        }
    }

    /// Client endpoint; never changes
    pub fn client(&self) -> SocketAddr {
        self.client
    }

    /// Deadline applied to every read and write
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn link(&self) -> Option<Arc<UpstreamLink>> {
        self.state.read().await.upstream.clone()
    }

    /// Active socket and whether a target is pending, under one read lock
    async fn snapshot(&self) -> (Option<Arc<UpstreamLink>>, bool) {
        let state = self.state.read().await;
        (state.upstream.clone(), state.next_upstream.is_some())
    }

    /// Remote endpoint of the active upstream socket
    pub async fn upstream(&self) -> Option<SocketAddr> {
        self.state.read().await.upstream.as_ref().map(|l| l.remote)
    }

    /// Local endpoint of the active upstream socket
    pub async fn proxy(&self) -> Option<SocketAddr> {
        self.state.read().await.upstream.as_ref().map(|l| l.local)
    }

    /// Pending migration target
    pub async fn next_upstream(&self) -> Option<SocketAddr> {
        self.state.read().await.next_upstream
    }

    /// Record a migration target; the active socket is left alone
    pub async fn set_next_upstream(&self, upstream: SocketAddr) {
        self.state.write().await.next_upstream = Some(upstream);
        debug!("Client {} next upstream set to {}", self.client, upstream);
    }

    /// True when a pending target is set and differs from the active upstream
    pub async fn should_migrate(&self) -> bool {
        let state = self.state.read().await;
        match (state.next_upstream, state.upstream.as_ref()) {
            (Some(next), Some(link)) => next != link.remote,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Snapshot for the admin surface, taken under a single read lock
    pub async fn info(&self) -> ConnectionInfo {
        let state = self.state.read().await;
        ConnectionInfo {
            client: self.client,
            proxy: state.upstream.as_ref().map(|l| l.local),
            upstream: state.upstream.as_ref().map(|l| l.remote),
            next_upstream: state.next_upstream,
        }
    }

    /// Switch to the pending upstream.
    ///
    /// Closes the current socket, dials the pending target and publishes the
    /// new socket, all under the write lock. The pending target is cleared
    /// even when the dial fails; the connection is then left without an
    /// upstream until a later migration succeeds. Nothing pending is a no-op.
    pub async fn apply_next_upstream(&self) -> Result<()> {
        let mut state = self.state.write().await;

        let Some(target) = state.next_upstream.take() else {
            return Ok(());
        };

        let previous = state.upstream.take();
        if let Some(old) = &previous {
            old.close();
        }

        info!(
            "Client {} changing upstream from {} to {}",
            self.client,
            endpoint_or_dash(previous.as_ref().map(|l| l.remote)),
            target
        );

        match UpstreamLink::dial(target).await {
            Ok(link) => {
                state.upstream = Some(Arc::new(link));
                Ok(())
            }
            Err(e) => {
                warn!("Client {} failed to reach upstream: {}", self.client, e);
                Err(e)
            }
        }
    }

    /// Close and clear the active upstream socket, if any
    pub async fn stop(&self) {
        if let Some(link) = self.state.write().await.upstream.take() {
            link.close();
            debug!("Client {} upstream {} closed", self.client, link.remote);
        }
    }

    /// Close `link` only if it is still the published socket
    async fn stop_link(&self, link: &Arc<UpstreamLink>) {
        let mut state = self.state.write().await;
        if state
            .upstream
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, link))
        {
            state.upstream = None;
        }
        link.close();
    }

    /// Receive one datagram from the active upstream
    pub async fn read_from_upstream(&self, buf: &mut [u8]) -> Result<usize> {
        let link = self.link().await.ok_or(MuxError::NotEstablished)?;
        link.recv(buf, self.timeout).await
    }

    /// Send one datagram to the active upstream
    pub async fn write_to_upstream(&self, data: &[u8]) -> Result<()> {
        let link = self.link().await.ok_or(MuxError::NotEstablished)?;
        link.send(data, self.timeout).await
    }

    /// Send one datagram to the client through the shared socket
    pub async fn send_to_client(&self, client_socket: &UdpSocket, data: &[u8]) -> Result<()> {
        match tokio::time::timeout(self.timeout, client_socket.send_to(data, self.client)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(MuxError::Timeout(self.timeout)),
        }
    }

    /// Relay upstream traffic to the client until the connection dies.
    ///
    /// Returns `Ok` when `shutdown` fires. Returns an error once the upstream
    /// socket is gone with nothing pending to migrate to, or when a migration
    /// fails to dial; the caller then drops the connection.
    pub async fn run_forward(
        &self,
        client_socket: &UdpSocket,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            if shutdown.is_cancelled() {
                self.stop().await;
                return Ok(());
            }

            let link = match self.snapshot().await {
                (Some(link), _) => link,
                (None, true) => {
                    self.apply_next_upstream().await?;
                    continue;
                }
                (None, false) => return Err(MuxError::NotEstablished),
            };

            let result = tokio::select! {
                _ = shutdown.cancelled() => {
                    self.stop().await;
                    return Ok(());
                }
                result = link.recv(&mut buf, self.timeout) => result,
            };

            match result {
                Ok(n) => {
                    if let Err(e) = self.send_to_client(client_socket, &buf[..n]).await {
                        warn!("Client {} write from upstream failed: {}", self.client, e);
                    }
                }
                Err(e) => {
                    debug!(
                        "Client {} read from upstream {} ended: {}",
                        self.client, link.remote, e
                    );
                    self.stop_link(&link).await;
                }
            }
        }
    }
}
