//! Reliable-payload scrambling
//!
//! The engine obfuscates reliable payloads with a keyed XOR over 4-byte
//! blocks. The transform is its own inverse, so the same routine scrambles
//! and descrambles. The relay forwards payloads verbatim and never calls it
//! on the hot path.

use bytes::{Buf, BufMut};

/// Per-block mask table, indexed by block number modulo 16
const MUNGE_TABLE: [u32; 16] = [
    0xffffe7a5, 0xbfefffe5, 0xffbfefff, 0xbfefbfed, 0xbfafefbf, 0xffbfafef, 0xffefbfad, 0xffffefbf,
    0xffeff7ef, 0xbfefe7f5, 0xbfbfe7e5, 0xffafb7e7, 0xbfffafb5, 0xbfafffaf, 0xffafa7ff, 0xffefa7a5,
];

/// Derive the keystream base for a sequence number
fn munge_key(seq: u32) -> u32 {
    (!seq).swap_bytes() ^ seq
}

/// Apply the block transform in place.
///
/// Only whole 4-byte blocks are touched; trailing bytes are left as they are.
pub fn descramble(seq: u32, buffer: &mut [u8]) {
    let key = munge_key(seq);

    for (i, block) in buffer.chunks_exact_mut(4).enumerate() {
        let word = (&block[..]).get_u32_le() ^ key ^ MUNGE_TABLE[i % MUNGE_TABLE.len()];
        (&mut block[..]).put_u32_le(word);
    }
}

/// Scrambling is the same operation as descrambling
pub fn scramble(seq: u32, buffer: &mut [u8]) {
    descramble(seq, buffer)
}
