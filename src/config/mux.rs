//! Relay configuration types
//!
//! Defines the root configuration and the client-facing socket settings.

use super::UpstreamConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default per-I/O timeout in seconds
fn default_timeout() -> u64 {
    30
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Client-facing socket configuration
    pub mux: MuxConfig,

    /// Backend game servers, in declaration order
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
}

/// Client-facing socket configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MuxConfig {
    /// Address to bind the shared client-facing socket (e.g., "0.0.0.0:27015")
    pub bind: String,

    /// Per-I/O deadline in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Number of worker tasks reading the shared socket
    #[serde(default)]
    pub workers: Option<usize>,

    /// SO_RCVBUF for the shared socket
    #[serde(default)]
    pub recv_buffer_size: Option<usize>,

    /// SO_SNDBUF for the shared socket
    #[serde(default)]
    pub send_buffer_size: Option<usize>,
}

impl MuxConfig {
    /// Per-I/O deadline as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Configured worker count, falling back to available parallelism
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_worker_count)
    }
}

/// One worker per available CPU
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Config {
    /// The upstream new clients are bound to.
    ///
    /// The first upstream flagged `default` wins; without one the first
    /// listed upstream is used.
    pub fn default_upstream(&self) -> Option<&UpstreamConfig> {
        self.upstreams
            .iter()
            .find(|u| u.default)
            .or_else(|| self.upstreams.first())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.mux.bind.trim().is_empty() {
            return Err("bind address must not be empty".to_string());
        }
        if self.mux.timeout == 0 {
            return Err("timeout must be greater than 0".to_string());
        }
        if self.mux.workers == Some(0) {
            return Err("workers must be greater than 0".to_string());
        }
        if self.upstreams.is_empty() {
            return Err("cannot find valid upstreams".to_string());
        }

        let mut names = HashSet::new();
        for upstream in &self.upstreams {
            upstream.validate()?;
            if !names.insert(upstream.name.as_str()) {
                return Err(format!("duplicate upstream name: {}", upstream.name));
            }
        }

        Ok(())
    }
}
