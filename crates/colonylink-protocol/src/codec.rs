//! Message framing: `[type: u8][body...]`.
//!
//! Encoding needs nothing but the packet itself. Decoding needs the
//! [`PacketRegistry`](crate::PacketRegistry) to find the body shape for a
//! tag, so it lives there as [`PacketRegistry::decode`](crate::PacketRegistry::decode).

use bytes::Bytes;

use crate::wire::WireWriter;
use crate::{Packet, PacketType, ProtocolError};

/// Bytes taken by the type tag.
pub const HEADER_LEN: usize = 1;

/// Frames `packet` into wire bytes.
pub fn encode(packet: &dyn Packet) -> Bytes {
    let mut w = WireWriter::with_capacity(64);
    w.put_u8(packet.packet_type().0);
    packet.write_body(&mut w);
    w.finish()
}

/// Reads the type tag without decoding the body.
pub fn peek_type(bytes: &[u8]) -> Result<PacketType, ProtocolError> {
    bytes
        .first()
        .map(|tag| PacketType(*tag))
        .ok_or(ProtocolError::Truncated {
            needed: HEADER_LEN,
            remaining: 0,
        })
}
