//! # Relaymux - UDP Multiplexing Relay for Game Servers
//!
//! Relaymux sits between game clients and a pool of upstream game servers.
//! Every client talks to one stable endpoint; behind it, the relay binds the
//! client's traffic to one upstream at a time and can move it to another
//! upstream without the client noticing.
//!
//! ## Features
//!
//! - **Transparent Relay**: Datagrams are forwarded byte-for-byte in both directions
//! - **Live Migration**: A client's upstream can be switched while it is connected
//! - **Challenge Hooks**: Custom handlers run on every `getchallenge` request
//! - **Worker Pool**: Several tasks share the client-facing socket
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relaymux::config::{load_config, UpstreamRegistry};
//! use relaymux::mux::Multiplexer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("config.toml")?;
//!     let registry = UpstreamRegistry::resolve(&config.upstreams).await?;
//!     let default = registry.default_upstream().expect("at least one upstream");
//!
//!     let mux = Arc::new(Multiplexer::new(default));
//!     mux.set_timeout(config.mux.timeout());
//!     mux.run(&config.mux.bind).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Client <-> shared socket <-> Multiplexer <-> Connection <-> Upstream
//!                                 (workers)     (forwarder)
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod admin;
pub mod config;
pub mod console;
pub mod error;
pub mod mux;
pub mod protocol;
pub mod transport;

// Re-export commonly used items
pub use admin::ConnectionInfo;
pub use config::{load_config, Config, UpstreamRegistry};
pub use error::{MuxError, Result};
pub use mux::{ChallengeHandler, Connection, Multiplexer};

/// Version of the Relaymux library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
