//! Unified error type for the colonylink runtime.

use colonylink_protocol::ProtocolError;
use colonylink_session::SessionError;
use colonylink_transfer::{ChunkError, TransferError};
use colonylink_transport::TransportError;

use crate::config::ConfigError;
use crate::hooks::HookError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `colonylink` crate you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]` attribute
/// on each variant lets `?` convert sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum ColonylinkError {
    /// Connection level (closed, full buffer, dial failure).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encode, decode or registry problem with a single message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Peer table or admission bookkeeping.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Setting up an outbound transfer.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// A received chunk that cannot be placed.
    #[error(transparent)]
    Chunk(#[from] ChunkError),

    /// Reading or writing the configuration file.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The engine behind [`EngineHooks`](crate::EngineHooks) failed.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// The operation needs a role the node does not have.
    #[error("operation requires the {0} role")]
    WrongRole(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use colonylink_protocol::PacketType;
    use colonylink_transport::ConnectionId;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed(ConnectionId::new(4));
        let wrapped: ColonylinkError = err.into();
        assert!(matches!(wrapped, ColonylinkError::Transport(_)));
        assert!(wrapped.to_string().contains("conn-4"));
    }

    #[test]
    fn test_from_protocol_error() {
        let wrapped: ColonylinkError = ProtocolError::UnknownType(PacketType(200)).into();
        assert!(matches!(wrapped, ColonylinkError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::NotFound(colonylink_protocol::PeerId(9));
        let wrapped: ColonylinkError = err.into();
        assert!(matches!(wrapped, ColonylinkError::Session(_)));
    }

    #[test]
    fn test_from_chunk_error_keeps_message() {
        let wrapped: ColonylinkError = ChunkError::EmptyChunk.into();
        assert_eq!(wrapped.to_string(), ChunkError::EmptyChunk.to_string());
    }

    #[test]
    fn test_from_hook_error() {
        let wrapped: ColonylinkError = HookError::new("no world loaded").into();
        assert!(matches!(wrapped, ColonylinkError::Hook(_)));
        assert!(wrapped.to_string().contains("no world loaded"));
    }
}
