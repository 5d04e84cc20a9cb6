//! Extension hooks for connectionless commands
//!
//! Handlers registered with
//! [`Multiplexer::on_get_challenge`](super::Multiplexer::on_get_challenge)
//! run on every `getchallenge` request, in registration order and all of
//! them, before the datagram is forwarded. A typical handler picks an
//! upstream for the client with [`Connection::set_next_upstream`]; the
//! migration is applied right after the chain completes.

use super::Connection;
use async_trait::async_trait;

/// Hook invoked for each `getchallenge` command
#[async_trait]
pub trait ChallengeHandler: Send + Sync {
    /// Called with the connection the command arrived on
    async fn on_get_challenge(&self, conn: &Connection);
}

/// Plain closures are handlers too
#[async_trait]
impl<F> ChallengeHandler for F
where
    F: Fn(&Connection) + Send + Sync,
{
    async fn on_get_challenge(&self, conn: &Connection) {
        self(conn)
    }
}

/// Handler that logs every challenge at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChallenge;

#[async_trait]
impl ChallengeHandler for LogChallenge {
    async fn on_get_challenge(&self, conn: &Connection) {
        tracing::debug!(
            "getchallenge from {} (upstream {:?})",
            conn.client(),
            conn.upstream().await
        );
    }
}
