//! Datagram classification
//!
//! # Wire Format
//!
//! ```text
//! bytes[0..4)  little-endian u32 marker
//!   == 0xFFFFFFFF -> connectionless: text command, newline-terminated
//!   != 0xFFFFFFFF -> sequenced:
//!        bytes[0..4) seq (bit31 = reliable, bit30 = fragmented)
//!        bytes[4..8) ack (bit31 = reliable)
//!        bytes[8..)  opaque payload
//! ```
//!
//! Classification never modifies the datagram; the relay forwards the
//! original bytes whatever the header says.

use super::reader::{tokenize, PacketReader};
use crate::error::Result;
use std::fmt;

/// Marker that opens every connectionless datagram
pub const CONNECTIONLESS_MARKER: u32 = 0xFFFF_FFFF;

/// Connectionless command that begins a game session
pub const GET_CHALLENGE: &str = "getchallenge";

/// Size of the sequenced header (seq + ack)
pub const SEQUENCED_HEADER_LEN: usize = 8;

const RELIABLE_BIT: u32 = 1 << 31;
const FRAGMENTED_BIT: u32 = 1 << 30;

/// A classified datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Out-of-band text command
    Connectionless(ConnectionlessCommand),
    /// In-band game traffic
    Sequenced(SequencedHeader),
}

impl Packet {
    /// Classify a datagram by its leading marker.
    ///
    /// Fails with `ShortBuffer` when the datagram is shorter than the marker,
    /// or shorter than the sequenced header for non-connectionless traffic.
    pub fn parse(data: &[u8]) -> Result<Packet> {
        let mut reader = PacketReader::new(data);

        if reader.peek_u32_le()? == CONNECTIONLESS_MARKER {
            reader.read_u32_le()?;

            let line = match reader.read_line() {
                Ok(line) => line.into_owned(),
                // Some commands carry no terminator; take the rest as-is
                Err(_) => String::from_utf8_lossy(reader.read_rest()).into_owned(),
            };

            return Ok(Packet::Connectionless(ConnectionlessCommand::from_line(
                &line,
            )));
        }

        let seq = reader.read_u32_le()?;
        let ack = reader.read_u32_le()?;
        Ok(Packet::Sequenced(SequencedHeader { seq, ack }))
    }

    /// Check whether this is a connectionless datagram
    pub fn is_connectionless(&self) -> bool {
        matches!(self, Packet::Connectionless(_))
    }

    /// Get the connectionless command, if any
    pub fn command(&self) -> Option<&ConnectionlessCommand> {
        match self {
            Packet::Connectionless(cmd) => Some(cmd),
            Packet::Sequenced(_) => None,
        }
    }
}

/// Tokenized connectionless command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionlessCommand {
    tokens: Vec<String>,
}

impl ConnectionlessCommand {
    /// Tokenize a command line
    pub fn from_line(line: &str) -> Self {
        ConnectionlessCommand {
            tokens: tokenize(line).into_iter().map(str::to_string).collect(),
        }
    }

    /// Token 0, the command name
    pub fn name(&self) -> &str {
        self.tokens.first().map(String::as_str).unwrap_or_default()
    }

    /// Tokens after the command name
    pub fn args(&self) -> &[String] {
        self.tokens.get(1..).unwrap_or_default()
    }

    /// All tokens, including the command name
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Check whether this is a `getchallenge` request
    pub fn is_get_challenge(&self) -> bool {
        self.name() == GET_CHALLENGE
    }
}

impl fmt::Display for ConnectionlessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(" "))
    }
}

/// Sequence and acknowledgement words of in-band traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencedHeader {
    /// Raw sequence word, flags included
    pub seq: u32,
    /// Raw acknowledgement word, flags included
    pub ack: u32,
}

impl SequencedHeader {
    /// Sequence number without the flag bits
    pub fn sequence(&self) -> u32 {
        self.seq & !(RELIABLE_BIT | FRAGMENTED_BIT)
    }

    /// Acknowledged sequence number without the flag bit
    pub fn acknowledged(&self) -> u32 {
        self.ack & !RELIABLE_BIT
    }

    /// Bit 31 of seq
    pub fn seq_reliable(&self) -> bool {
        self.seq & RELIABLE_BIT != 0
    }

    /// Bit 31 of ack
    pub fn ack_reliable(&self) -> bool {
        self.ack & RELIABLE_BIT != 0
    }

    /// Bit 30 of seq
    pub fn fragmented(&self) -> bool {
        self.seq & FRAGMENTED_BIT != 0
    }
}
