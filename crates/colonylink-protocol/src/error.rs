//! Error types for the protocol layer.
//!
//! Every variant describes a problem with a *single* message. The dispatch
//! loop logs it and drops that message; none of them are fatal.

use crate::PacketType;

/// Errors that can occur while encoding, decoding or registering packets.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The type tag has no registered packet.
    #[error("unknown packet type {0}")]
    UnknownType(PacketType),

    /// A Rust type was used as a packet without being registered.
    #[error("packet `{0}` is not registered")]
    NotRegistered(&'static str),

    /// Registering would make the id ↔ type mapping ambiguous.
    #[error("registry conflict: {0}")]
    RegistryConflict(String),

    /// The buffer ended before a field could be read.
    #[error("truncated message: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A field was read but holds a value the packet cannot accept.
    #[error("malformed field `{field}`: {reason}")]
    Malformed { field: &'static str, reason: String },

    /// The body decoded but bytes were left over.
    #[error("{0} trailing bytes after packet body")]
    TrailingBytes(usize),
}

impl ProtocolError {
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            field,
            reason: reason.into(),
        }
    }
}
