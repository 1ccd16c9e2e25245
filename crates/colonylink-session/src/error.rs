//! Error types for the session layer.

use colonylink_protocol::PeerId;
use colonylink_transport::ConnectionId;

/// Errors that can occur while tracking peers and admitting them.
///
/// None of these tear the session down. Callers log them and carry on.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No peer with this identity is known.
    #[error("peer {0} not found")]
    NotFound(PeerId),

    /// The peer already has a live connection.
    /// A second connection claiming the same identity is refused.
    #[error("peer {0} already has an active connection")]
    AlreadyConnected(PeerId),

    /// The connection is already bound to a different peer.
    #[error("{connection} already belongs to {owner}")]
    ConnectionInUse {
        connection: ConnectionId,
        owner: PeerId,
    },

    /// An admission verdict arrived for a peer that is not waiting for one.
    #[error("peer {0} is not awaiting admission")]
    NotAwaitingAdmission(PeerId),
}
