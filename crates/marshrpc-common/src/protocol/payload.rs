//! Byte buffer exchanged in one direction of one call.
//!
//! A [`Payload`] has an append-only write side and an independent read
//! cursor. Every read is bounds-checked against the written length, so a
//! corrupted or hostile buffer produces a [`RpcError`] instead of an
//! out-of-bounds access.

use crate::protocol::error::{Result, RpcError};

/// Width of every length and count prefix on the wire.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// An owned request or response buffer.
///
/// # Ownership
///
/// A payload is built once by the sender, moved into a transport and then
/// consumed once by the receiver. Transports take it by value, so a payload
/// cannot be mutated after it has been handed off.
///
/// # Example
///
/// ```
/// use marshrpc_common::protocol::Payload;
///
/// let mut payload = Payload::new();
/// payload.write_raw(&[1, 2]);
/// payload.write_length_prefixed(b"abc").unwrap();
///
/// let mut received = Payload::from_bytes(payload.into_bytes());
/// assert_eq!(received.read_raw(2).unwrap(), &[1, 2]);
/// assert_eq!(received.read_length_prefixed().unwrap(), b"abc");
/// assert_eq!(received.remaining(), 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    buf: Vec<u8>,
    read_pos: usize,
}

impl Payload {
    /// Creates an empty payload ready for writing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty payload with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            read_pos: 0,
        }
    }

    /// Wraps received bytes; the read cursor starts at the beginning.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buf: bytes,
            read_pos: 0,
        }
    }

    /// Consumes the payload and returns every written byte.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Number of written bytes (the write cursor).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Current read cursor.
    pub fn position(&self) -> usize {
        self.read_pos
    }

    /// Bytes between the read cursor and the write cursor.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.read_pos
    }

    /// Rewinds the read cursor so the payload can be decoded again.
    pub fn reset_read_cursor(&mut self) {
        self.read_pos = 0;
    }

    /// Appends bytes verbatim.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Appends a u32 length (big-endian) followed by the bytes.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPayload` if `bytes` is longer than `u32::MAX`.
    pub fn write_length_prefixed(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_len(bytes.len())?;
        self.write_raw(bytes);
        Ok(())
    }

    /// Appends a u32 length or element count (big-endian).
    pub fn write_len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| {
            RpcError::MalformedPayload(format!("length {} does not fit in a u32 prefix", len))
        })?;
        self.write_raw(&len.to_be_bytes());
        Ok(())
    }

    /// Reads exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns `TruncatedPayload` if fewer than `n` bytes remain. The cursor
    /// does not move on failure.
    pub fn read_raw(&mut self, n: usize) -> Result<&[u8]> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(RpcError::TruncatedPayload { needed: n, remaining });
        }
        let start = self.read_pos;
        self.read_pos += n;
        Ok(&self.buf[start..start + n])
    }

    /// Reads exactly `N` bytes into a fixed array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_raw(N)?);
        Ok(out)
    }

    /// Reads a u32 length or element count (big-endian).
    pub fn read_len(&mut self) -> Result<usize> {
        let len = u32::from_be_bytes(self.read_array::<LENGTH_PREFIX_SIZE>()?);
        Ok(len as usize)
    }

    /// Reads a u32 length followed by that many bytes.
    ///
    /// # Errors
    ///
    /// - `TruncatedPayload` if the length field itself is cut short
    /// - `MalformedPayload` if the declared length exceeds [`remaining`](Self::remaining)
    ///
    /// On a malformed length the cursor is left where it was before the call.
    pub fn read_length_prefixed(&mut self) -> Result<&[u8]> {
        let start = self.read_pos;
        let len = self.read_len()?;
        if len > self.remaining() {
            let remaining = self.remaining();
            self.read_pos = start;
            return Err(RpcError::MalformedPayload(format!(
                "length prefix {} exceeds {} remaining bytes",
                len, remaining
            )));
        }
        self.read_raw(len)
    }

    /// Checks that every written byte has been consumed.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPayload` if unread bytes remain.
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(RpcError::MalformedPayload(format!("{} trailing bytes after last field", n))),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}
