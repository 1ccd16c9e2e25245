//! The peer table: every remote endpoint this process knows about.
//!
//! A peer has two identities. [`PeerId`] is the stable platform identity and
//! survives disconnects. [`ConnectionId`] is the transport handle and only
//! exists while the link is up. The table keeps both directions indexed so
//! that incoming bytes (which only carry a connection) can be attributed to
//! a peer in O(1).
//!
//! ## Lifecycle
//!
//! ```text
//! add() ──→ [Connected] ──detach()──→ [Detached] ──attach()──→ [Connected]
//!                │                        │
//!                └─────────remove()───────┴──→ gone
//! ```
//!
//! # Concurrency note
//!
//! `PeerTable` itself is a plain `HashMap` pair. [`Session`](crate::Session)
//! wraps it in a `Mutex` because engine callbacks may touch it off the tick
//! thread.

use std::collections::HashMap;

use colonylink_protocol::{PeerId, ReadyState};
use colonylink_transport::ConnectionId;

use crate::SessionError;

/// Longest display name kept verbatim.
pub const MAX_NAME_CHARS: usize = 24;

/// One remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    /// Display name, already truncated for overlays.
    pub name: String,
    /// Live transport handle, `None` while disconnected.
    pub connection: Option<ConnectionId>,
    pub ready: ReadyState,
}

impl Peer {
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

/// Shortens long display names to `MAX_NAME_CHARS` characters plus `...`.
pub fn display_name(name: &str) -> String {
    if name.chars().count() <= MAX_NAME_CHARS {
        return name.to_string();
    }
    let mut short: String = name.chars().take(MAX_NAME_CHARS).collect();
    short.push_str("...");
    short
}

/// All known peers, indexed by identity and by live connection.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<PeerId, Peer>,
    /// Kept in sync with `peers[..].connection`.
    by_connection: HashMap<ConnectionId, PeerId>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a peer on first contact, or re-attaches a known one.
    ///
    /// # Errors
    /// - [`SessionError::AlreadyConnected`]: the identity already has a
    ///   different live connection.
    /// - [`SessionError::ConnectionInUse`]: the connection belongs to another
    ///   peer.
    pub fn add(
        &mut self,
        id: PeerId,
        name: &str,
        connection: Option<ConnectionId>,
    ) -> Result<&Peer, SessionError> {
        if let Some(conn) = connection {
            self.check_connection_free(id, conn)?;
        }
        if let Some(existing) = self.peers.get(&id) {
            if let (Some(old), Some(new)) = (existing.connection, connection) {
                if old != new {
                    return Err(SessionError::AlreadyConnected(id));
                }
            }
        }

        let peer = self.peers.entry(id).or_insert_with(|| Peer {
            id,
            name: String::new(),
            connection: None,
            ready: ReadyState::Unready,
        });
        peer.name = display_name(name);
        if let Some(conn) = connection {
            peer.connection = Some(conn);
            self.by_connection.insert(conn, id);
        }
        tracing::info!(peer = %id, name = %peer.name, "peer added");
        Ok(peer)
    }

    fn check_connection_free(&self, id: PeerId, conn: ConnectionId) -> Result<(), SessionError> {
        match self.by_connection.get(&conn) {
            Some(owner) if *owner != id => Err(SessionError::ConnectionInUse {
                connection: conn,
                owner: *owner,
            }),
            _ => Ok(()),
        }
    }

    /// Gives a known, disconnected peer a new connection.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the peer was never seen or was removed.
    pub fn attach(&mut self, id: PeerId, conn: ConnectionId) -> Result<(), SessionError> {
        self.check_connection_free(id, conn)?;
        let peer = self.peers.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        if let Some(old) = peer.connection {
            if old != conn {
                return Err(SessionError::AlreadyConnected(id));
            }
        }
        peer.connection = Some(conn);
        self.by_connection.insert(conn, id);
        tracing::info!(peer = %id, %conn, "peer reattached");
        Ok(())
    }

    /// Clears the connection handle but keeps the identity for reconnection.
    ///
    /// Returns the peer that owned the connection, if any.
    pub fn detach(&mut self, conn: ConnectionId) -> Option<PeerId> {
        let id = self.by_connection.remove(&conn)?;
        if let Some(peer) = self.peers.get_mut(&id) {
            peer.connection = None;
            peer.ready = ReadyState::Unready;
        }
        tracing::info!(peer = %id, %conn, "peer detached");
        Some(id)
    }

    /// Forgets a peer entirely.
    pub fn remove(&mut self, id: PeerId) -> Option<Peer> {
        let peer = self.peers.remove(&id)?;
        if let Some(conn) = peer.connection {
            self.by_connection.remove(&conn);
        }
        tracing::info!(peer = %id, "peer removed");
        Some(peer)
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    /// The peer a connection belongs to.
    pub fn peer_for(&self, conn: ConnectionId) -> Option<PeerId> {
        self.by_connection.get(&conn).copied()
    }

    /// The live connection of a peer.
    pub fn connection_of(&self, id: PeerId) -> Option<ConnectionId> {
        self.peers.get(&id).and_then(|p| p.connection)
    }

    /// Peers with a live connection, sorted by id so that fan-out order is
    /// stable.
    pub fn connected(&self) -> Vec<(PeerId, ConnectionId)> {
        let mut out: Vec<_> = self
            .peers
            .values()
            .filter_map(|p| p.connection.map(|c| (p.id, c)))
            .collect();
        out.sort_unstable();
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.by_connection.clear();
    }
}

// =========================================================================
// Tests
// =========================================================================
