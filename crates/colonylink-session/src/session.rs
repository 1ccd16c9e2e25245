//! The session context: who we are, who hosts, and who else is here.
//!
//! One `Session` exists per running node. It is built when a lobby is
//! hosted or joined and cleared when the node leaves. Everything that used
//! to be ambient global state (role, local identity, the peer table, the
//! "ready to process packets" flag) lives here and is passed explicitly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use colonylink_protocol::{PeerId, ReadyState};
use colonylink_transport::ConnectionId;

use crate::{PeerTable, SessionError};

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// What this process is doing in the current lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
    /// Not in a lobby.
    None,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Client => "client",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ReadySummary
// ---------------------------------------------------------------------------

/// Who in the lobby has loaded the world. The host always counts as ready.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadySummary {
    /// `(display name, state)`, host first, then connected clients by id.
    pub players: Vec<(String, ReadyState)>,
}

impl ReadySummary {
    pub fn ready(&self) -> usize {
        self.players
            .iter()
            .filter(|(_, state)| *state == ReadyState::Ready)
            .count()
    }

    pub fn total(&self) -> usize {
        self.players.len()
    }

    pub fn everyone_ready(&self) -> bool {
        self.ready() == self.total()
    }

    /// Overlay text: a header line, then one `name: Ready|Loading` line per
    /// player.
    pub fn message(&self) -> String {
        let mut text = format!(
            "Waiting for players ({}/{} ready)...",
            self.ready(),
            self.total()
        );
        for (name, state) in &self.players {
            let label = match state {
                ReadyState::Ready => "Ready",
                ReadyState::Unready => "Loading",
            };
            text.push('\n');
            text.push_str(name);
            text.push_str(": ");
            text.push_str(label);
        }
        text
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Explicit session context owned by the node.
#[derive(Debug)]
pub struct Session {
    role: Role,
    local: PeerId,
    local_name: String,
    host: Option<PeerId>,
    peers: Mutex<PeerTable>,
    /// Incoming packets are ignored while this is false.
    ready: AtomicBool,
}

impl Session {
    /// An idle session: no lobby, nothing dispatched.
    pub fn none() -> Self {
        Self::build(Role::None, PeerId::default(), String::new(), None, false)
    }

    /// A hosting session. The host is ready to process packets immediately.
    pub fn host(local: PeerId, name: impl Into<String>) -> Self {
        Self::build(Role::Host, local, name.into(), Some(local), true)
    }

    /// A joining session. The gate opens once the transport reports the
    /// connection to the host.
    pub fn client(local: PeerId, host: PeerId) -> Self {
        Self::build(Role::Client, local, String::new(), Some(host), false)
    }

    fn build(
        role: Role,
        local: PeerId,
        local_name: String,
        host: Option<PeerId>,
        ready: bool,
    ) -> Self {
        Self {
            role,
            local,
            local_name,
            host,
            peers: Mutex::new(PeerTable::new()),
            ready: AtomicBool::new(ready),
        }
    }

    /// Sets the display name a client reports in progress packets.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.local_name = name.into();
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    pub fn is_client(&self) -> bool {
        self.role == Role::Client
    }

    pub fn is_in_session(&self) -> bool {
        self.role != Role::None
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn host_id(&self) -> Option<PeerId> {
        self.host
    }

    // -- ready gate ---------------------------------------------------------

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn set_ready(&self, ready: bool) {
        let was = self.ready.swap(ready, Ordering::AcqRel);
        if was != ready {
            tracing::debug!(ready, role = %self.role, "packet processing gate changed");
        }
    }

    // -- peer table ---------------------------------------------------------

    /// Locks the peer table.
    ///
    /// A poisoned lock only means another thread panicked mid-update; the
    /// table itself is still consistent enough to read, so we keep going.
    pub fn peers(&self) -> MutexGuard<'_, PeerTable> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_peer(
        &self,
        id: PeerId,
        connection: Option<ConnectionId>,
        name: &str,
    ) -> Result<(), SessionError> {
        self.peers().add(id, name, connection).map(|_| ())
    }

    pub fn attach_connection(&self, id: PeerId, conn: ConnectionId) -> Result<(), SessionError> {
        self.peers().attach(id, conn)
    }

    /// Clears a peer's connection handle and keeps its identity.
    pub fn detach_connection(&self, id: PeerId) -> Option<ConnectionId> {
        let mut peers = self.peers();
        let conn = peers.connection_of(id)?;
        peers.detach(conn);
        Some(conn)
    }

    pub fn remove_peer(&self, id: PeerId) -> bool {
        self.peers().remove(id).is_some()
    }

    pub fn peer_for_connection(&self, conn: ConnectionId) -> Option<PeerId> {
        self.peers().peer_for(conn)
    }

    pub fn connection_of(&self, id: PeerId) -> Option<ConnectionId> {
        self.peers().connection_of(id)
    }

    pub fn connected_peers(&self) -> Vec<(PeerId, ConnectionId)> {
        self.peers().connected()
    }

    /// Records a peer's ready state.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if the peer is unknown.
    pub fn set_ready_state(&self, id: PeerId, state: ReadyState) -> Result<(), SessionError> {
        let mut peers = self.peers();
        let peer = peers.get_mut(id).ok_or(SessionError::NotFound(id))?;
        peer.ready = state;
        Ok(())
    }

    /// True when at least one client is connected and every connected
    /// client (the host excluded) reports [`ReadyState::Ready`].
    pub fn all_clients_ready(&self) -> bool {
        let peers = self.peers();
        let mut clients = peers
            .iter()
            .filter(|p| p.is_connected() && Some(p.id) != self.host)
            .peekable();
        if clients.peek().is_none() {
            return false;
        }
        clients.all(|p| p.ready == ReadyState::Ready)
    }

    /// Ready states of the local host and every connected client.
    pub fn ready_summary(&self) -> ReadySummary {
        let peers = self.peers();
        let mut clients: Vec<_> = peers
            .iter()
            .filter(|p| p.is_connected() && Some(p.id) != self.host)
            .collect();
        clients.sort_by_key(|p| p.id);

        let mut players = vec![(self.local_name.clone(), ReadyState::Ready)];
        players.extend(clients.into_iter().map(|p| (p.name.clone(), p.ready)));
        ReadySummary { players }
    }

    /// Forgets every peer and closes the gate. Called when leaving.
    pub fn clear(&self) {
        self.peers().clear();
        self.set_ready(false);
        tracing::info!(role = %self.role, "session cleared");
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::none()
    }
}

// =========================================================================
// Tests
// =========================================================================
