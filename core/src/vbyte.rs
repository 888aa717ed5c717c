//! Variable-byte integer codec.
//!
//! Integers are written as big-endian base-128 digits. Every byte but the last
//! has the high bit set; the final byte of a number has it clear, so `0`
//! encodes as the single byte `0x00` and `128` as `[0x81, 0x00]`.

use std::io::{self, Read};
use thiserror::Error;

const CONTINUATION: u8 = 0x80;
const PAYLOAD: u8 = 0x7F;

/// Longest encoding of a `u64` (ceil(64 / 7)).
pub const MAX_ENCODED_LEN: usize = 10;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("vbyte sequence runs past the end of input")]
    Unterminated,
    #[error("vbyte value overflows 64 bits")]
    Overflow,
}

/// Number of bytes `encode` emits for `n`.
pub fn encoded_len(n: u64) -> usize {
    let bits = 64 - n.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Append the encoding of `n` to `out`.
pub fn encode(n: u64, out: &mut Vec<u8>) {
    let len = encoded_len(n);
    for i in (1..len).rev() {
        out.push(((n >> (7 * i)) as u8 & PAYLOAD) | CONTINUATION);
    }
    out.push(n as u8 & PAYLOAD);
}

pub fn encode_to_vec(n: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(n));
    encode(n, &mut out);
    out
}

/// Decode every integer in `buf`. A trailing byte with the continuation bit
/// set is an error, not a silently dropped value.
pub fn decode_all(buf: &[u8]) -> Result<Vec<u64>, DecodeError> {
    Decoder::new(buf).collect()
}

/// Iterator over the integers of an in-memory vbyte buffer.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Byte offset of the next undecoded integer.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

impl Iterator for Decoder<'_> {
    type Item = Result<u64, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_empty() {
            return None;
        }
        let mut value: u64 = 0;
        while let Some(&byte) = self.buf.get(self.pos) {
            self.pos += 1;
            if value > (u64::MAX >> 7) {
                self.pos = self.buf.len();
                return Some(Err(DecodeError::Overflow));
            }
            value = (value << 7) | u64::from(byte & PAYLOAD);
            if byte & CONTINUATION == 0 {
                return Some(Ok(value));
            }
        }
        Some(Err(DecodeError::Unterminated))
    }
}

/// Outcome of pulling one integer off a byte stream.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamValue {
    /// A complete integer and the number of bytes it occupied.
    Value(u64, usize),
    /// The stream was already at end-of-file before the first byte.
    Eof,
}

/// Read one integer from `reader`, one byte at a time.
///
/// Clean end-of-file before the first byte yields `StreamValue::Eof`; running
/// out mid-integer is reported as `UnexpectedEof`.
pub fn read_one<R: Read>(reader: &mut R) -> io::Result<StreamValue> {
    let mut value: u64 = 0;
    let mut consumed = 0usize;
    let mut byte = [0u8; 1];
    loop {
        if reader.read(&mut byte)? == 0 {
            if consumed == 0 {
                return Ok(StreamValue::Eof);
            }
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, DecodeError::Unterminated));
        }
        consumed += 1;
        if value > (u64::MAX >> 7) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, DecodeError::Overflow));
        }
        value = (value << 7) | u64::from(byte[0] & PAYLOAD);
        if byte[0] & CONTINUATION == 0 {
            return Ok(StreamValue::Value(value, consumed));
        }
    }
}
