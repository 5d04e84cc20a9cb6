//! The multiplexer
//!
//! Owns the shared client-facing socket, the connection table and the
//! worker pool. Each worker loops over [`Multiplexer::process`]: receive one
//! datagram, classify it, find or create the client's [`Connection`], apply
//! a due migration and forward the bytes verbatim upstream.
//!
//! Several workers read the same socket, so datagrams are not guaranteed to
//! be handled in arrival order, not even for a single client.

use super::{ChallengeHandler, ClientKey, Connection};
use crate::admin::ConnectionInfo;
use crate::config::default_worker_count;
use crate::error::Result;
use crate::protocol::{Packet, MAX_DATAGRAM_SIZE};
use crate::transport::{bind_client_socket, resolve_endpoint, SocketOpts};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

/// Default per-I/O deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// UDP relay that binds each client to one upstream at a time
pub struct Multiplexer {
    /// Upstream for clients without a connection
    default_upstream: RwLock<SocketAddr>,
    /// Per-I/O deadline in milliseconds, copied into new connections
    timeout_ms: AtomicU64,
    /// Number of worker tasks started by `run`
    workers: AtomicUsize,
    /// Options for the shared socket bound by `run`
    socket_opts: RwLock<SocketOpts>,
    /// Active connections keyed by client endpoint
    connections: RwLock<HashMap<ClientKey, Arc<Connection>>>,
    /// `getchallenge` hooks in registration order
    challenge_handlers: RwLock<Vec<Arc<dyn ChallengeHandler>>>,
    /// Shutdown broadcast for workers and forwarders
    shutdown: CancellationToken,
    /// Forwarder tasks
    forwarders: TaskTracker,
}

impl Multiplexer {
    /// Create a multiplexer sending new clients to `default_upstream`
    pub fn new(default_upstream: SocketAddr) -> Self {
        Multiplexer {
            default_upstream: RwLock::new(default_upstream),
            timeout_ms: AtomicU64::new(DEFAULT_TIMEOUT.as_millis() as u64),
            workers: AtomicUsize::new(default_worker_count()),
            socket_opts: RwLock::new(SocketOpts::default()),
            connections: RwLock::new(HashMap::new()),
            challenge_handlers: RwLock::new(Vec::new()),
            shutdown: CancellationToken::new(),
            forwarders: TaskTracker::new(),
        }
    }

    /// Set the number of workers; takes effect on the next `run`
    pub fn set_workers(&self, n: usize) {
        self.workers.store(n.max(1), Ordering::Relaxed);
    }

    /// Number of workers `run` starts
    pub fn workers(&self) -> usize {
        self.workers.load(Ordering::Relaxed)
    }

    /// Set the per-I/O deadline for connections created from now on
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Per-I/O deadline for new connections
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Change the upstream for clients seen from now on
    pub async fn set_default_upstream(&self, upstream: SocketAddr) {
        *self.default_upstream.write().await = upstream;
        info!("Default upstream set to {}", upstream);
    }

    /// Upstream for clients seen from now on
    pub async fn default_upstream(&self) -> SocketAddr {
        *self.default_upstream.read().await
    }

    /// Set options for the shared socket bound by `run`
    pub async fn set_socket_opts(&self, opts: SocketOpts) {
        *self.socket_opts.write().await = opts;
    }

    /// Register `getchallenge` hooks, appended after those already present
    pub async fn on_get_challenge<I>(&self, handlers: I)
    where
        I: IntoIterator<Item = Arc<dyn ChallengeHandler>>,
    {
        self.challenge_handlers.write().await.extend(handlers);
    }

    /// Register a single `getchallenge` hook
    pub async fn add_challenge_handler<H: ChallengeHandler + 'static>(&self, handler: H) {
        self.challenge_handlers.write().await.push(Arc::new(handler));
    }

    /// Look up the connection of a client
    pub async fn find_connection_by_client(&self, client: SocketAddr) -> Option<Arc<Connection>> {
        let key = ClientKey::new(client).ok()?;
        self.connections.read().await.get(&key).cloned()
    }

    /// Look up the connection whose upstream socket is bound to `proxy`
    pub async fn find_connection_by_proxy(&self, proxy: SocketAddr) -> Option<Arc<Connection>> {
        for conn in self.connection_handles().await {
            if conn.proxy().await == Some(proxy) {
                return Some(conn);
            }
        }
        None
    }

    /// Request a migration for the connection bound to `proxy`.
    ///
    /// Returns `false` when no connection uses that proxy endpoint.
    pub async fn set_upstream_by_proxy(&self, proxy: SocketAddr, upstream: SocketAddr) -> bool {
        match self.find_connection_by_proxy(proxy).await {
            Some(conn) => {
                info!(
                    "Set client {} next upstream to {}",
                    conn.client(),
                    upstream
                );
                conn.set_next_upstream(upstream).await;
                true
            }
            None => false,
        }
    }

    async fn connection_handles(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Snapshot of every connection, in no particular order
    pub async fn list_connections(&self) -> Vec<ConnectionInfo> {
        let mut infos = Vec::new();
        for conn in self.connection_handles().await {
            infos.push(conn.info().await);
        }
        infos
    }

    /// Number of live connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Return the client's connection, creating it on first contact.
    ///
    /// A new connection is dialed to the default upstream and its forwarder
    /// started while the table's write lock is held, so racing workers see
    /// either nothing or a fully established connection. A failed first dial
    /// registers nothing.
    pub async fn lookup_or_create(
        self: &Arc<Self>,
        client: SocketAddr,
        client_socket: &Arc<UdpSocket>,
    ) -> Result<Arc<Connection>> {
        let key = ClientKey::new(client)?;

        if let Some(conn) = self.connections.read().await.get(&key) {
            return Ok(conn.clone());
        }

        let mut table = self.connections.write().await;
        if let Some(conn) = table.get(&key) {
            return Ok(conn.clone());
        }

        let upstream = self.default_upstream().await;
        let conn = Arc::new(Connection::new(client, self.timeout(), upstream));
        conn.apply_next_upstream().await?;

        table.insert(key, conn.clone());
        self.spawn_forwarder(conn.clone(), client_socket.clone());

        info!("New client {} bound to upstream {}", client, upstream);
        Ok(conn)
    }

    fn spawn_forwarder(self: &Arc<Self>, conn: Arc<Connection>, client_socket: Arc<UdpSocket>) {
        let mux = Arc::clone(self);
        let shutdown = self.shutdown.clone();

        self.forwarders.spawn(async move {
            match conn.run_forward(&client_socket, &shutdown).await {
                Ok(()) => debug!("Forwarder for {} stopped", conn.client()),
                Err(e) => {
                    debug!("Forwarder for {} terminated: {}", conn.client(), e);
                    mux.remove(&conn).await;
                }
            }
        });
    }

    /// Drop `conn` from the table unless it was already replaced
    async fn remove(&self, conn: &Arc<Connection>) {
        let Ok(key) = ClientKey::new(conn.client()) else {
            return;
        };

        let mut table = self.connections.write().await;
        if table
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, conn))
        {
            table.remove(&key);
            info!("Deleted client {}'s connection", conn.client());
        }
    }

    async fn run_challenge_handlers(&self, conn: &Connection) {
        let handlers = self.challenge_handlers.read().await.clone();
        for handler in handlers {
            handler.on_get_challenge(conn).await;
        }
    }

    /// Receive one datagram from the shared socket and relay it.
    ///
    /// `buf` is scratch space owned by the calling worker.
    pub async fn process(
        self: &Arc<Self>,
        client_socket: &Arc<UdpSocket>,
        buf: &mut [u8],
    ) -> Result<()> {
        let (n, client) = client_socket.recv_from(buf).await?;
        self.handle_datagram(client_socket, client, &buf[..n]).await
    }

    /// Classify and relay one datagram received from `client`
    pub async fn handle_datagram(
        self: &Arc<Self>,
        client_socket: &Arc<UdpSocket>,
        client: SocketAddr,
        data: &[u8],
    ) -> Result<()> {
        let packet = Packet::parse(data)?;
        let conn = self.lookup_or_create(client, client_socket).await?;

        match &packet {
            Packet::Connectionless(cmd) => {
                debug!(
                    "Client {} connectionless command to {:?}: {}",
                    client,
                    conn.upstream().await,
                    cmd
                );

                if cmd.is_get_challenge() {
                    self.run_challenge_handlers(&conn).await;
                }

                if conn.should_migrate().await {
                    conn.stop().await;
                    if let Err(e) = conn.apply_next_upstream().await {
                        warn!("Client {} migration failed: {}", client, e);
                    }
                }
            }
            Packet::Sequenced(header) => {
                trace!(
                    seq = header.sequence(),
                    ack = header.acknowledged(),
                    seq_reliable = header.seq_reliable(),
                    ack_reliable = header.ack_reliable(),
                    fragmented = header.fragmented(),
                    "Sequenced datagram from {}",
                    client
                );
            }
        }

        if let Err(e) = conn.write_to_upstream(data).await {
            conn.stop().await;
            return Err(e);
        }

        Ok(())
    }

    async fn run_worker(self: Arc<Self>, id: usize, client_socket: Arc<UdpSocket>) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Worker {} stopping", id);
                    break;
                }
                result = self.process(&client_socket, &mut buf) => {
                    if let Err(e) = result {
                        debug!("Worker {} process error: {}", id, e);
                    }
                }
            }
        }
    }

    /// Bind the client-facing socket and relay until stopped
    pub async fn run(self: &Arc<Self>, bind: &str) -> Result<()> {
        let addr = resolve_endpoint(bind).await?;
        let opts = self.socket_opts.read().await.clone();
        let socket = bind_client_socket(addr, &opts)?;
        self.run_on(socket).await
    }

    /// Relay on an already bound socket until stopped.
    ///
    /// Returns once every worker has exited, every connection is closed and
    /// every forwarder has finished.
    pub async fn run_on(self: &Arc<Self>, socket: UdpSocket) -> Result<()> {
        let socket = Arc::new(socket);
        let workers = self.workers();
        info!(
            "Relay listening on {} with {} workers, default upstream {}",
            socket.local_addr()?,
            workers,
            self.default_upstream().await
        );

        let mut tasks = JoinSet::new();
        for id in 0..workers {
            tasks.spawn(Arc::clone(self).run_worker(id, socket.clone()));
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Worker task failed: {}", e);
            }
        }

        self.shutdown.cancel();
        self.close_all().await;
        self.forwarders.close();
        self.forwarders.wait().await;

        info!("Relay stopped");
        Ok(())
    }

    async fn close_all(&self) {
        let drained: Vec<_> = self.connections.write().await.drain().collect();
        for (_, conn) in drained {
            conn.stop().await;
        }
    }

    /// Broadcast shutdown to every worker and forwarder
    pub fn request_stop(&self) {
        info!("Stop requested");
        self.shutdown.cancel();
    }

    /// Check whether shutdown was requested
    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("timeout", &self.timeout())
            .field("workers", &self.workers())
            .field("stopping", &self.is_stopping())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MuxError;

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    async fn upstream_server() -> (UdpSocket, SocketAddr) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        (socket, addr)
    }

    async fn shared_socket() -> Arc<UdpSocket> {
        Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap())
    }

    fn getchallenge() -> Vec<u8> {
        let mut data = vec![0xFF, 0xFF, 0xFF, 0xFF];
        data.extend_from_slice(b"getchallenge\n");
        data
    }

    #[tokio::test]
    async fn test_settings() {
        let mux = Multiplexer::new("127.0.0.1:27015".parse().unwrap());
        assert_eq!(mux.timeout(), DEFAULT_TIMEOUT);
        assert!(mux.workers() >= 1);

        mux.set_timeout(Duration::from_millis(1500));
        mux.set_workers(3);
        mux.set_default_upstream("127.0.0.1:27016".parse().unwrap())
            .await;

        assert_eq!(mux.timeout(), Duration::from_millis(1500));
        assert_eq!(mux.workers(), 3);
        assert_eq!(
            mux.default_upstream().await,
            "127.0.0.1:27016".parse().unwrap()
        );

        mux.set_workers(0);
        assert_eq!(mux.workers(), 1);
    }

    #[tokio::test]
    async fn test_lookup_or_create_registers_once() {
        let (_server, addr) = upstream_server().await;
        let mux = Arc::new(Multiplexer::new(addr));
        let socket = shared_socket().await;
        let client: SocketAddr = "127.0.0.1:50000".parse().unwrap();

        let first = mux.lookup_or_create(client, &socket).await.unwrap();
        let second = mux.lookup_or_create(client, &socket).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(mux.connection_count().await, 1);
        assert_eq!(first.upstream().await, Some(addr));
        assert!(first.next_upstream().await.is_none());

        mux.request_stop();
    }

    #[tokio::test]
    async fn test_concurrent_first_datagrams_create_one_connection() {
        let (_server, addr) = upstream_server().await;
        let mux = Arc::new(Multiplexer::new(addr));
        let socket = shared_socket().await;
        let client: SocketAddr = "127.0.0.1:50001".parse().unwrap();

        let mut tasks = JoinSet::new();
        for _ in 0..16 {
            let mux = mux.clone();
            let socket = socket.clone();
            tasks.spawn(async move { mux.lookup_or_create(client, &socket).await.unwrap() });
        }

        let mut conns = Vec::new();
        while let Some(conn) = tasks.join_next().await {
            conns.push(conn.unwrap());
        }

        assert_eq!(mux.connection_count().await, 1);
        assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));

        mux.request_stop();
    }

    #[tokio::test]
    async fn test_failed_first_dial_registers_nothing() {
        let mux = Arc::new(Multiplexer::new("[::1]:27015".parse().unwrap()));
        let socket = shared_socket().await;

        let result = mux
            .lookup_or_create("127.0.0.1:50002".parse().unwrap(), &socket)
            .await;
        assert!(matches!(result, Err(MuxError::Dial { .. })));
        assert_eq!(mux.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_handle_datagram_forwards_verbatim() {
        let (server, addr) = upstream_server().await;
        let mux = Arc::new(Multiplexer::new(addr));
        let socket = shared_socket().await;
        let client: SocketAddr = "127.0.0.1:50003".parse().unwrap();

        let mut datagram = vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        datagram.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        mux.handle_datagram(&socket, client, &datagram).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(TEST_TIMEOUT, server.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], &datagram[..]);

        mux.request_stop();
    }

    #[tokio::test]
    async fn test_short_datagram_dropped() {
        let (_server, addr) = upstream_server().await;
        let mux = Arc::new(Multiplexer::new(addr));
        let socket = shared_socket().await;

        let result = mux
            .handle_datagram(&socket, "127.0.0.1:50004".parse().unwrap(), &[0x01, 0x02])
            .await;
        assert!(matches!(result, Err(MuxError::ShortBuffer { .. })));
        assert_eq!(mux.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_challenge_handlers_run_in_order() {
        let (_server, addr) = upstream_server().await;
        let mux = Arc::new(Multiplexer::new(addr));
        let socket = shared_socket().await;

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first = {
            let order = order.clone();
            move |_: &Connection| order.lock().unwrap().push(1)
        };
        let second = {
            let order = order.clone();
            move |_: &Connection| order.lock().unwrap().push(2)
        };
        mux.on_get_challenge([
            Arc::new(first) as Arc<dyn ChallengeHandler>,
            Arc::new(second) as Arc<dyn ChallengeHandler>,
        ])
        .await;

        let client: SocketAddr = "127.0.0.1:50005".parse().unwrap();
        mux.handle_datagram(&socket, client, &getchallenge())
            .await
            .unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);

        // Other commands pass through without hooks
        let mut other = vec![0xFF, 0xFF, 0xFF, 0xFF];
        other.extend_from_slice(b"connect 48\n");
        mux.handle_datagram(&socket, client, &other).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);

        mux.request_stop();
    }

    #[tokio::test]
    async fn test_handler_migration_applies_before_forwarding() {
        struct RouteTo(SocketAddr);

        #[async_trait::async_trait]
        impl ChallengeHandler for RouteTo {
            async fn on_get_challenge(&self, conn: &Connection) {
                conn.set_next_upstream(self.0).await;
            }
        }

        let (old_server, old_addr) = upstream_server().await;
        let (new_server, new_addr) = upstream_server().await;
        let mux = Arc::new(Multiplexer::new(old_addr));
        let socket = shared_socket().await;
        let client: SocketAddr = "127.0.0.1:50006".parse().unwrap();

        // First contact goes to the default upstream
        let mut hello = vec![0xFF, 0xFF, 0xFF, 0xFF];
        hello.extend_from_slice(b"info\n");
        mux.handle_datagram(&socket, client, &hello).await.unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = old_server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &hello[..]);

        mux.add_challenge_handler(RouteTo(new_addr)).await;
        mux.handle_datagram(&socket, client, &getchallenge())
            .await
            .unwrap();

        let (n, _) = tokio::time::timeout(TEST_TIMEOUT, new_server.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], &getchallenge()[..]);

        let conn = mux.find_connection_by_client(client).await.unwrap();
        assert_eq!(conn.upstream().await, Some(new_addr));
        assert!(conn.next_upstream().await.is_none());

        mux.request_stop();
    }

    #[tokio::test]
    async fn test_set_upstream_by_proxy() {
        let (_server, addr) = upstream_server().await;
        let mux = Arc::new(Multiplexer::new(addr));
        let socket = shared_socket().await;
        let client: SocketAddr = "127.0.0.1:50007".parse().unwrap();

        let conn = mux.lookup_or_create(client, &socket).await.unwrap();
        let proxy = conn.proxy().await.unwrap();
        let target: SocketAddr = "127.0.0.1:27099".parse().unwrap();

        assert!(mux.set_upstream_by_proxy(proxy, target).await);
        assert_eq!(conn.next_upstream().await, Some(target));
        assert!(
            !mux.set_upstream_by_proxy("127.0.0.1:1".parse().unwrap(), target)
                .await
        );

        let infos = mux.list_connections().await;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].client, client);
        assert_eq!(infos[0].proxy, Some(proxy));
        assert_eq!(infos[0].next_upstream, Some(target));

        mux.request_stop();
    }

    #[tokio::test]
    async fn test_dead_forwarder_removes_connection() {
        let (_server, addr) = upstream_server().await;
        let mux = Arc::new(Multiplexer::new(addr));
        mux.set_timeout(Duration::from_millis(100));
        let socket = shared_socket().await;
        let client: SocketAddr = "127.0.0.1:50008".parse().unwrap();

        mux.lookup_or_create(client, &socket).await.unwrap();
        assert_eq!(mux.connection_count().await, 1);

        // The upstream never answers; the read deadline ends the forwarder
        for _ in 0..50 {
            if mux.connection_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(mux.find_connection_by_client(client).await.is_none());
        assert!(mux.list_connections().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_on_stops_on_request() {
        let (_server, addr) = upstream_server().await;
        let mux = Arc::new(Multiplexer::new(addr));
        mux.set_workers(2);

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let bound = socket.local_addr().unwrap();
        let runner = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.run_on(socket).await })
        };

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&getchallenge(), bound).await.unwrap();

        for _ in 0..100 {
            if mux.connection_count().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(mux.connection_count().await, 1);

        mux.request_stop();
        let result = tokio::time::timeout(TEST_TIMEOUT, runner)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(mux.connection_count().await, 0);
        assert!(mux.is_stopping());
    }
}
