//! Error types for Relaymux
//!
//! This module defines the error taxonomy shared by the packet reader,
//! connections and the multiplexer.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum MuxError {
    /// Malformed or unresolvable endpoint string
    #[error("Address resolution failed: {0}")]
    AddressResolution(String),

    /// Datagram too small for the field being decoded
    #[error("Short buffer: needed {needed} bytes, {remaining} remaining")]
    ShortBuffer {
        /// Bytes the decoder asked for
        needed: usize,
        /// Bytes left in the datagram
        remaining: usize,
    },

    /// I/O attempted on a connection without an active upstream socket
    #[error("Connection is not established")]
    NotEstablished,

    /// A new upstream socket could not be established
    #[error("Failed to dial upstream {target}: {source}")]
    Dial {
        /// Upstream that was being dialed
        target: SocketAddr,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// A read or write exceeded its deadline
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The upstream socket was closed while a call was blocked on it
    #[error("Upstream socket closed")]
    Closed,

    /// Client endpoint outside the supported address family
    #[error("Unsupported address family: {0}")]
    UnsupportedAddress(SocketAddr),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl MuxError {
    /// Whether the error is local to one datagram or one connection.
    ///
    /// Retryable errors are logged and the worker loop moves on to the next
    /// datagram; the rest are fatal at startup.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, MuxError::AddressResolution(_))
    }

    /// Whether the error came from an expired deadline
    pub fn is_timeout(&self) -> bool {
        match self {
            MuxError::Timeout(_) => true,
            MuxError::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

/// Result alias for relay operations
pub type Result<T> = std::result::Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mux_error_display() {
        let err = MuxError::AddressResolution("bad:addr".to_string());
        assert_eq!(format!("{}", err), "Address resolution failed: bad:addr");

        let err = MuxError::ShortBuffer {
            needed: 4,
            remaining: 2,
        };
        assert_eq!(
            format!("{}", err),
            "Short buffer: needed 4 bytes, 2 remaining"
        );

        let err = MuxError::NotEstablished;
        assert_eq!(format!("{}", err), "Connection is not established");

        let err = MuxError::Closed;
        assert_eq!(format!("{}", err), "Upstream socket closed");

        let err = MuxError::Timeout(Duration::from_secs(3));
        assert_eq!(format!("{}", err), "Timeout after 3s");
    }

    #[test]
    fn test_dial_error_display() {
        let err = MuxError::Dial {
            target: "127.0.0.1:27015".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::AddrNotAvailable, "no route"),
        };
        assert_eq!(
            format!("{}", err),
            "Failed to dial upstream 127.0.0.1:27015: no route"
        );
    }

    #[test]
    fn test_mux_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::Other, "io error");
        let err: MuxError = io_err.into();
        assert!(matches!(err, MuxError::Io(_)));
    }

    #[test]
    fn test_is_retryable() {
        assert!(!MuxError::AddressResolution("x".to_string()).is_retryable());
        assert!(MuxError::NotEstablished.is_retryable());
        assert!(MuxError::Closed.is_retryable());
        assert!(MuxError::ShortBuffer {
            needed: 4,
            remaining: 0
        }
        .is_retryable());
    }

    #[test]
    fn test_is_timeout() {
        assert!(MuxError::Timeout(Duration::from_millis(10)).is_timeout());
        assert!(MuxError::Io(io::Error::new(io::ErrorKind::TimedOut, "t")).is_timeout());
        assert!(!MuxError::NotEstablished.is_timeout());
    }
}
