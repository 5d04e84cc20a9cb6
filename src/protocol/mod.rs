//! Protocol module for Relaymux
//!
//! This module implements the small part of the game networking protocol the
//! relay needs: a bounded datagram reader, datagram classification and the
//! reliable-payload scrambler.

mod munge;
mod packet;
mod reader;

pub use munge::{descramble, scramble};
pub use packet::{
    ConnectionlessCommand, Packet, SequencedHeader, CONNECTIONLESS_MARKER, GET_CHALLENGE,
    SEQUENCED_HEADER_LEN,
};
pub use reader::{tokenize, PacketReader};

/// Largest datagram the relay reads or forwards
pub const MAX_DATAGRAM_SIZE: usize = 65535;
