//! Multiplexer module for Relaymux
//!
//! This module implements the relay engine: the per-client [`Connection`],
//! the connection table and worker pool in [`Multiplexer`], and the
//! `getchallenge` extension hooks.

mod connection;
mod handler;
mod key;
mod multiplexer;

pub use connection::Connection;
pub use handler::{ChallengeHandler, LogChallenge};
pub use key::ClientKey;
pub use multiplexer::{Multiplexer, DEFAULT_TIMEOUT};
