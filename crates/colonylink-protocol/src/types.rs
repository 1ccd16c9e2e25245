//! Identity types shared by every layer above the wire.

use serde::{Deserialize, Serialize};

use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Stable identity of a remote endpoint (the platform account id).
///
/// Unlike a [`ConnectionId`](colonylink_transport::ConnectionId), a
/// `PeerId` survives disconnects: a peer that drops and rejoins keeps it.
/// `PeerId(0)` is the "nobody" value used by default-constructed packets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(pub u64);

impl PeerId {
    /// Whether this id names an actual peer.
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// The one-byte tag that opens every message on the wire.
///
/// Ids are assigned once and never reused, even after a packet is retired,
/// so that mismatched builds fail loudly instead of misreading a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketType(pub u8);

impl PacketType {
    pub const CHAT_MESSAGE: Self = Self(1);
    pub const ENTITY_POSITION: Self = Self(2);
    pub const WORLD_DATA: Self = Self(4);
    pub const WORLD_UPDATE_BATCH: Self = Self(6);
    pub const INSTANTIATION_BATCH: Self = Self(7);
    pub const SAVE_FILE_REQUEST: Self = Self(9);
    pub const SAVE_FILE_CHUNK: Self = Self(10);
    pub const BUILD: Self = Self(14);
    pub const DECONSTRUCT: Self = Self(19);
    pub const CLIENT_READY_STATUS: Self = Self(28);
    pub const ALL_CLIENTS_READY: Self = Self(29);
    pub const READY_STATUS_UPDATE: Self = Self(30);
    pub const HARD_SYNC: Self = Self(32);
    pub const HARD_SYNC_COMPLETE: Self = Self(33);
    pub const SPEED_CHANGE: Self = Self(35);
    pub const MANIFEST_REQUEST: Self = Self(64);
    pub const MANIFEST_OFFER: Self = Self(65);
    pub const ADMISSION_VERDICT: Self = Self(66);
    pub const SYNC_PROGRESS: Self = Self(67);
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
