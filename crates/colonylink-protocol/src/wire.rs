//! Fixed-layout binary primitives used by every packet body.
//!
//! All numbers are little-endian and fixed width. Variable-length fields
//! (strings, byte blobs, lists) carry a 4-byte little-endian count in front
//! of their payload. There is no self-description on the wire: encoder and
//! decoder must agree on field order, which each packet type fixes.
//!
//! [`WireReader`] never panics on short input. Every getter checks the
//! remaining length first and returns [`ProtocolError::Truncated`], and
//! declared lengths are validated against what is actually left in the
//! buffer before anything is allocated.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{PeerId, ProtocolError};

/// Size of the length prefix in front of every variable-length field.
pub const LENGTH_PREFIX: usize = 4;

// ---------------------------------------------------------------------------
// WireWriter
// ---------------------------------------------------------------------------

/// Append-only encoder for packet bodies.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32_le(v);
    }

    pub fn put_peer(&mut self, peer: PeerId) {
        self.put_u64(peer.0);
    }

    /// Writes a 4-byte count. Lengths beyond `u32::MAX` cannot be framed and
    /// are a programming error upstream; they saturate here and the peer
    /// rejects the message as truncated.
    pub fn put_len(&mut self, len: usize) {
        self.put_u32(u32::try_from(len).unwrap_or(u32::MAX));
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_len(s.len());
        self.buf.put_slice(s.as_bytes());
    }

    pub fn put_bytes(&mut self, b: &[u8]) {
        self.put_len(b.len());
        self.buf.put_slice(b);
    }

    pub fn put_str_list(&mut self, items: &[String]) {
        self.put_len(items.len());
        for item in items {
            self.put_str(item);
        }
    }

    pub fn put_u64_list(&mut self, items: &[u64]) {
        self.put_len(items.len());
        for item in items {
            self.put_u64(*item);
        }
    }

    /// Writes a count followed by each item's own encoding.
    pub fn put_list<T: WireItem>(&mut self, items: &[T]) {
        self.put_len(items.len());
        for item in items {
            item.write_to(self);
        }
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Freezes the buffer into an immutable, cheaply clonable [`Bytes`].
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

// ---------------------------------------------------------------------------
// WireReader
// ---------------------------------------------------------------------------

/// Bounds-checked decoder over a borrowed buffer.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, needed: usize) -> Result<(), ProtocolError> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(ProtocolError::Truncated { needed, remaining });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn get_bool(&mut self, field: &'static str) -> Result<bool, ProtocolError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::malformed(field, format!("bool byte {other}"))),
        }
    }

    pub fn get_u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn get_i32(&mut self) -> Result<i32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn get_u64(&mut self) -> Result<u64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn get_f32(&mut self) -> Result<f32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn get_peer(&mut self) -> Result<PeerId, ProtocolError> {
        Ok(PeerId(self.get_u64()?))
    }

    /// Reads a count and checks that `count * min_item_size` bytes could
    /// still follow, so a corrupt count cannot trigger a huge allocation.
    pub fn get_len(&mut self, min_item_size: usize) -> Result<usize, ProtocolError> {
        let count = self.get_u32()? as usize;
        self.need(count.saturating_mul(min_item_size))?;
        Ok(count)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn get_str(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let len = self.get_len(1)?;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|e| ProtocolError::malformed(field, e.to_string()))
    }

    pub fn get_bytes(&mut self) -> Result<Bytes, ProtocolError> {
        let len = self.get_len(1)?;
        Ok(Bytes::copy_from_slice(self.take(len)?))
    }

    pub fn get_str_list(&mut self, field: &'static str) -> Result<Vec<String>, ProtocolError> {
        let count = self.get_len(LENGTH_PREFIX)?;
        (0..count).map(|_| self.get_str(field)).collect()
    }

    pub fn get_u64_list(&mut self) -> Result<Vec<u64>, ProtocolError> {
        let count = self.get_len(8)?;
        (0..count).map(|_| self.get_u64()).collect()
    }

    pub fn get_list<T: WireItem>(&mut self) -> Result<Vec<T>, ProtocolError> {
        let count = self.get_len(T::MIN_WIRE_SIZE)?;
        (0..count).map(|_| T::read_from(self)).collect()
    }

    /// Succeeds only when the whole buffer was consumed.
    pub fn finish(self) -> Result<(), ProtocolError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}

// ---------------------------------------------------------------------------
// WireItem
// ---------------------------------------------------------------------------

/// A value that appears inside packet bodies, typically as a list element.
pub trait WireItem: Sized {
    /// Smallest possible encoding, used to bound list counts on decode.
    const MIN_WIRE_SIZE: usize;

    fn write_to(&self, w: &mut WireWriter);

    fn read_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError>;

    /// Exact encoded size of this value.
    fn wire_len(&self) -> usize {
        let mut w = WireWriter::new();
        self.write_to(&mut w);
        w.len()
    }
}
