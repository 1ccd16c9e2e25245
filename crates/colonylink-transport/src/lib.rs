//! Transport abstraction layer for colonylink.
//!
//! The replication layer runs inside a single cooperative tick loop, so the
//! [`Transport`] trait is *polled*: each tick the owner drains a bounded
//! batch of [`TransportEvent`]s and pushes outgoing bytes with
//! [`Transport::send`]. Backends that are asynchronous underneath (the
//! WebSocket backend) bridge into this model with channels.
//!
//! # Backends
//!
//! - [`LoopbackNetwork`]: in-process endpoints joined by queues. Used by
//!   tests and local simulations.
//! - `WebSocketTransport` (feature `websocket`, default): TCP WebSocket
//!   links via `tokio-tungstenite`.

mod error;
mod loopback;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use loopback::{LoopbackNetwork, LoopbackTransport};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

use std::fmt;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Reliability classes
// ---------------------------------------------------------------------------

/// Delivery class requested for a single send.
///
/// State transitions (builds, handshakes, save chunks) go `Reliable`.
/// High-frequency deltas that the next update supersedes go `Unreliable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Reliability {
    /// Ordered, retried by the transport.
    #[default]
    Reliable,
    /// May be dropped or reordered. Must stay small.
    Unreliable,
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reliable => f.write_str("reliable"),
            Self::Unreliable => f.write_str("unreliable"),
        }
    }
}

/// Something that happened on the transport since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A new connection is usable.
    Connected(ConnectionId),
    /// Raw bytes arrived on a connection.
    Message {
        connection: ConnectionId,
        data: Vec<u8>,
    },
    /// The connection is gone. No further events will carry this id.
    Disconnected(ConnectionId),
}

/// A message transport polled from the tick loop.
///
/// `send` takes `&self` so that reactions holding shared borrows of the
/// runtime can still transmit; implementations use interior mutability.
pub trait Transport: Send + 'static {
    /// Queues `data` for delivery on `connection`.
    ///
    /// Returns [`TransportError::WouldBlock`] when the outbound buffer is
    /// full and [`TransportError::ConnectionClosed`] for an unknown or dead
    /// connection.
    fn send(
        &self,
        connection: ConnectionId,
        data: &[u8],
        reliability: Reliability,
    ) -> Result<(), TransportError>;

    /// Drains at most `max_events` pending events in arrival order.
    fn poll(&mut self, max_events: usize) -> Vec<TransportEvent>;

    /// Closes a connection. The remote side observes a disconnect.
    fn close(&mut self, connection: ConnectionId) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_new_and_into_inner() {
        let id = ConnectionId::new(42);
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
    }

    #[test]
    fn test_reliability_default_is_reliable() {
        assert_eq!(Reliability::default(), Reliability::Reliable);
        assert_eq!(Reliability::Unreliable.to_string(), "unreliable");
    }

    #[test]
    fn test_connection_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new(1), "host");
        map.insert(ConnectionId::new(2), "client");
        assert_eq!(map[&ConnectionId::new(1)], "host");
    }
}
