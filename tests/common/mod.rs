//! Test utilities for Relaymux
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Deadline for any single receive in tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Bind a UDP socket on an available loopback port
pub async fn bind_local() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

/// Start an upstream that answers every datagram with `tag` + the datagram
pub async fn spawn_tagged_echo(tag: &'static [u8]) -> (JoinHandle<()>, SocketAddr) {
    let (socket, addr) = bind_local().await;
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let mut reply = tag.to_vec();
            reply.extend_from_slice(&buf[..n]);
            if socket.send_to(&reply, from).await.is_err() {
                break;
            }
        }
    });
    (handle, addr)
}

/// Receive one datagram or panic after `TEST_TIMEOUT`
pub async fn recv_datagram(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 65535];
    let (n, _) = tokio::time::timeout(TEST_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for datagram")
        .unwrap();
    buf.truncate(n);
    buf
}

/// Build a connectionless datagram carrying `command`
pub fn connectionless(command: &str) -> Vec<u8> {
    let mut data = vec![0xFF, 0xFF, 0xFF, 0xFF];
    data.extend_from_slice(command.as_bytes());
    data.push(b'\n');
    data
}

/// Build a sequenced datagram with the given header and payload
pub fn sequenced(seq: u32, ack: u32, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + payload.len());
    data.extend_from_slice(&seq.to_le_bytes());
    data.extend_from_slice(&ack.to_le_bytes());
    data.extend_from_slice(payload);
    data
}

/// Test configuration builder
pub struct TestConfigBuilder {
    bind: String,
    timeout: u64,
    workers: Option<usize>,
    upstreams: Vec<(String, String, bool)>,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        TestConfigBuilder {
            bind: "127.0.0.1:0".to_string(),
            timeout: 30,
            workers: Some(2),
            upstreams: Vec::new(),
        }
    }
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bind address
    pub fn bind(mut self, bind: &str) -> Self {
        self.bind = bind.to_string();
        self
    }

    /// Set timeout in seconds
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout = secs;
        self
    }

    /// Set worker count
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Add an upstream
    pub fn upstream(mut self, name: &str, address: SocketAddr, default: bool) -> Self {
        self.upstreams
            .push((name.to_string(), address.to_string(), default));
        self
    }

    /// Build the configuration
    pub fn build(self) -> relaymux::config::Config {
        relaymux::config::Config {
            mux: relaymux::config::MuxConfig {
                bind: self.bind,
                timeout: self.timeout,
                workers: self.workers,
                recv_buffer_size: None,
                send_buffer_size: None,
            },
            upstreams: self
                .upstreams
                .into_iter()
                .map(|(name, address, default)| relaymux::config::UpstreamConfig {
                    name,
                    address,
                    default,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datagram_builders() {
        assert_eq!(
            connectionless("getchallenge"),
            b"\xFF\xFF\xFF\xFFgetchallenge\n".to_vec()
        );
        assert_eq!(
            sequenced(1, 2, b"ab"),
            vec![1, 0, 0, 0, 2, 0, 0, 0, b'a', b'b']
        );
    }

    #[test]
    fn test_config_builder() {
        let config = TestConfigBuilder::new()
            .timeout(5)
            .workers(4)
            .upstream("lobby", "127.0.0.1:27015".parse().unwrap(), false)
            .upstream("arena", "127.0.0.1:27016".parse().unwrap(), true)
            .build();

        assert_eq!(config.mux.timeout, 5);
        assert_eq!(config.mux.workers, Some(4));
        assert_eq!(config.upstreams.len(), 2);
        assert_eq!(config.default_upstream().unwrap().name, "arena");
        assert!(config.validate().is_ok());
    }
}
