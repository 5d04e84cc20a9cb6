//! Bounded binary cursor over one received datagram
//!
//! All integers on the wire are little-endian. Every read consumes from a
//! fixed cursor and fails with [`MuxError::ShortBuffer`] instead of reading
//! past the end of the datagram.

use crate::error::{MuxError, Result};
use bytes::Buf;
use std::borrow::Cow;

/// Line terminator for connectionless text commands
const NEWLINE: u8 = b'\n';

/// Cursor over the unread bytes of a datagram
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
}

impl<'a> PacketReader<'a> {
    /// Create a reader over the given datagram
    pub fn new(data: &'a [u8]) -> Self {
        PacketReader { buf: data }
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// Check whether every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.len() < needed {
            return Err(MuxError::ShortBuffer {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    /// Peek a little-endian u32 without consuming it
    pub fn peek_u32_le(&self) -> Result<u32> {
        self.ensure(4)?;
        let mut head = &self.buf[..4];
        Ok(head.get_u32_le())
    }

    /// Read a little-endian u32
    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    /// Read a little-endian u16
    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read exactly `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Consume a newline-terminated line.
    ///
    /// The returned text excludes the terminator. If no newline occurs before
    /// the end of the datagram nothing is consumed and `ShortBuffer` is
    /// returned.
    pub fn read_line(&mut self) -> Result<Cow<'a, str>> {
        let Some(pos) = self.buf.iter().position(|&b| b == NEWLINE) else {
            return Err(MuxError::ShortBuffer {
                needed: self.buf.len() + 1,
                remaining: self.buf.len(),
            });
        };

        let line = &self.buf[..pos];
        self.buf = &self.buf[pos + 1..];
        Ok(String::from_utf8_lossy(line))
    }

    /// Consume and return every unread byte
    pub fn read_rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }
}

/// Split a line on single spaces.
///
/// Repeated spaces are not collapsed, so empty tokens are preserved. The
/// result always holds at least one token.
pub fn tokenize(line: &str) -> Vec<&str> {
    line.split(' ').collect()
}
