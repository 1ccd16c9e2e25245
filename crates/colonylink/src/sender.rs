//! Addressed sends on top of a [`Transport`].
//!
//! Every send goes through the registry (unregistered packets are refused)
//! and is checked against the ceiling of its reliability class before it
//! reaches the transport. Failures are logged and reported as `false`, a
//! lower delivered count or a [`SendOutcome`]; nothing here returns an
//! error, because a failed send never stops the tick loop.

use std::collections::HashSet;

use bytes::Bytes;
use colonylink_protocol::{Packet, PacketRegistry, PeerId, Reliability};
use colonylink_session::Session;
use colonylink_transport::{ConnectionId, Transport, TransportError};

use crate::config::SizeLimits;

/// Finer-grained result of a single addressed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The transport buffer is full. The same packet may go through later.
    Busy,
    /// The packet will never go through as it is: it does not encode,
    /// exceeds its ceiling, or the peer has no live connection.
    Refused,
}

/// Borrowed view of everything needed to address a packet.
pub struct Sender<'a, T: Transport> {
    transport: &'a T,
    session: &'a Session,
    registry: &'a PacketRegistry,
    limits: SizeLimits,
}

impl<'a, T: Transport> Sender<'a, T> {
    pub fn new(
        transport: &'a T,
        session: &'a Session,
        registry: &'a PacketRegistry,
        limits: SizeLimits,
    ) -> Self {
        Self {
            transport,
            session,
            registry,
            limits,
        }
    }

    pub fn ceiling(&self, reliability: Reliability) -> usize {
        match reliability {
            Reliability::Reliable => self.limits.reliable_max_bytes,
            Reliability::Unreliable => self.limits.unreliable_max_bytes,
        }
    }

    /// Encodes `packet` and checks it against the class ceiling.
    fn frame(&self, packet: &dyn Packet, reliability: Reliability) -> Option<Bytes> {
        let bytes = match self.registry.encode(packet) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(packet = packet.name(), error = %e, "cannot encode packet");
                return None;
            }
        };
        let ceiling = self.ceiling(reliability);
        if bytes.len() > ceiling {
            tracing::error!(
                packet = packet.name(),
                size = bytes.len(),
                ceiling,
                %reliability,
                "packet exceeds size ceiling, not sent"
            );
            return None;
        }
        Some(bytes)
    }

    fn deliver(
        &self,
        connection: ConnectionId,
        bytes: &[u8],
        reliability: Reliability,
        name: &'static str,
    ) -> SendOutcome {
        match self.transport.send(connection, bytes, reliability) {
            Ok(()) => {
                tracing::trace!(packet = name, %connection, size = bytes.len(), "sent");
                SendOutcome::Sent
            }
            Err(TransportError::WouldBlock(_)) => {
                tracing::debug!(packet = name, %connection, "send buffer full");
                SendOutcome::Busy
            }
            Err(e) => {
                tracing::warn!(packet = name, %connection, error = %e, "send failed");
                SendOutcome::Refused
            }
        }
    }

    fn transmit(
        &self,
        connection: ConnectionId,
        bytes: &[u8],
        reliability: Reliability,
        name: &'static str,
    ) -> bool {
        self.deliver(connection, bytes, reliability, name) == SendOutcome::Sent
    }

    /// Sends on a raw connection that may not belong to a known peer yet.
    /// Used to answer a handshake before the peer is in the table.
    pub fn send_to_connection(
        &self,
        connection: ConnectionId,
        packet: &dyn Packet,
        reliability: Reliability,
    ) -> bool {
        self.frame(packet, reliability)
            .is_some_and(|bytes| self.transmit(connection, &bytes, reliability, packet.name()))
    }

    pub fn send_to_peer(&self, peer: PeerId, packet: &dyn Packet, reliability: Reliability) -> bool {
        let Some(connection) = self.session.connection_of(peer) else {
            tracing::warn!(%peer, packet = packet.name(), "no live connection to peer");
            return false;
        };
        self.send_to_connection(connection, packet, reliability)
    }

    /// Like [`send_to_peer`](Self::send_to_peer), but tells a full buffer
    /// apart from a send that can never succeed.
    pub fn offer_to_peer(
        &self,
        peer: PeerId,
        packet: &dyn Packet,
        reliability: Reliability,
    ) -> SendOutcome {
        let Some(connection) = self.session.connection_of(peer) else {
            tracing::warn!(%peer, packet = packet.name(), "no live connection to peer");
            return SendOutcome::Refused;
        };
        match self.frame(packet, reliability) {
            Some(bytes) => self.deliver(connection, &bytes, reliability, packet.name()),
            None => SendOutcome::Refused,
        }
    }

    pub fn send_to_host(&self, packet: &dyn Packet, reliability: Reliability) -> bool {
        if self.session.is_host() {
            tracing::warn!(packet = packet.name(), "host cannot send to itself");
            return false;
        }
        let Some(host) = self.session.host_id() else {
            tracing::warn!(packet = packet.name(), "no host known");
            return false;
        };
        self.send_to_peer(host, packet, reliability)
    }

    /// Sends to every connected peer outside `exclude`. Never sends to the
    /// local node. Returns how many sends the transport accepted.
    pub fn send_to_all(
        &self,
        packet: &dyn Packet,
        exclude: &HashSet<PeerId>,
        reliability: Reliability,
    ) -> usize {
        let Some(bytes) = self.frame(packet, reliability) else {
            return 0;
        };
        let local = self.session.local_id();
        self.session
            .connected_peers()
            .into_iter()
            .filter(|(peer, _)| *peer != local && !exclude.contains(peer))
            .filter(|(_, conn)| self.transmit(*conn, &bytes, reliability, packet.name()))
            .count()
    }

    /// Host only: sends to every connected client.
    pub fn send_to_all_clients(&self, packet: &dyn Packet, reliability: Reliability) -> usize {
        if !self.session.is_host() {
            tracing::warn!(packet = packet.name(), "only the host broadcasts to clients");
            return 0;
        }
        self.send_to_all(packet, &HashSet::new(), reliability)
    }

    pub fn send_to_all_except(
        &self,
        packet: &dyn Packet,
        peer: PeerId,
        reliability: Reliability,
    ) -> usize {
        self.send_to_all(packet, &HashSet::from([peer]), reliability)
    }
}
