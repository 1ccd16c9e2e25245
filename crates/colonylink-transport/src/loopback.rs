//! In-process transport: endpoints exchange bytes through shared queues.
//!
//! Every endpoint created from the same [`LoopbackNetwork`] can dial every
//! other one. Delivery is FIFO per connection, mirroring the per-peer
//! ordering the replication layer assumes from a real transport.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{ConnectionId, Reliability, Transport, TransportError, TransportEvent};

#[derive(Debug, Clone, Copy)]
struct Link {
    /// Endpoint that receives what is sent on this connection.
    remote: u64,
    /// The id the remote endpoint uses for the same link.
    remote_connection: ConnectionId,
}

#[derive(Debug, Default)]
struct Hub {
    next_endpoint: u64,
    next_connection: u64,
    inboxes: HashMap<u64, VecDeque<TransportEvent>>,
    links: HashMap<ConnectionId, Link>,
    congested: HashSet<u64>,
    drop_unreliable: bool,
}

impl Hub {
    fn allocate_connection(&mut self) -> ConnectionId {
        self.next_connection += 1;
        ConnectionId::new(self.next_connection)
    }

    fn push(&mut self, endpoint: u64, event: TransportEvent) {
        self.inboxes.entry(endpoint).or_default().push_back(event);
    }
}

/// A set of in-process endpoints that can connect to each other.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new endpoint attached to this network.
    pub fn endpoint(&self) -> LoopbackTransport {
        let mut hub = lock(&self.hub);
        hub.next_endpoint += 1;
        let id = hub.next_endpoint;
        hub.inboxes.insert(id, VecDeque::new());
        LoopbackTransport {
            id,
            hub: Arc::clone(&self.hub),
        }
    }

    /// When set, every unreliable send is silently lost.
    pub fn set_drop_unreliable(&self, drop: bool) {
        lock(&self.hub).drop_unreliable = drop;
    }
}

/// One endpoint of a [`LoopbackNetwork`].
#[derive(Debug)]
pub struct LoopbackTransport {
    id: u64,
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackTransport {
    /// Opens a connection to `remote`.
    ///
    /// Both sides receive [`TransportEvent::Connected`] on their next poll.
    /// Returns the id this endpoint uses for the new connection.
    pub fn connect(&self, remote: &LoopbackTransport) -> ConnectionId {
        let mut hub = lock(&self.hub);
        let local_conn = hub.allocate_connection();
        let remote_conn = hub.allocate_connection();
        hub.links.insert(
            local_conn,
            Link {
                remote: remote.id,
                remote_connection: remote_conn,
            },
        );
        hub.links.insert(
            remote_conn,
            Link {
                remote: self.id,
                remote_connection: local_conn,
            },
        );
        hub.push(self.id, TransportEvent::Connected(local_conn));
        hub.push(remote.id, TransportEvent::Connected(remote_conn));
        tracing::debug!(%local_conn, %remote_conn, "loopback link opened");
        local_conn
    }

    /// Simulates a full send buffer: while congested every send from this
    /// endpoint fails with [`TransportError::WouldBlock`].
    pub fn set_congested(&self, congested: bool) {
        let mut hub = lock(&self.hub);
        if congested {
            hub.congested.insert(self.id);
        } else {
            hub.congested.remove(&self.id);
        }
    }

    /// Number of events waiting for this endpoint.
    pub fn pending(&self) -> usize {
        lock(&self.hub).inboxes.get(&self.id).map_or(0, VecDeque::len)
    }
}

impl Transport for LoopbackTransport {
    fn send(
        &self,
        connection: ConnectionId,
        data: &[u8],
        reliability: Reliability,
    ) -> Result<(), TransportError> {
        let mut hub = lock(&self.hub);
        let link = *hub
            .links
            .get(&connection)
            .ok_or(TransportError::ConnectionClosed(connection))?;
        if hub.congested.contains(&self.id) {
            return Err(TransportError::WouldBlock(connection));
        }
        if reliability == Reliability::Unreliable && hub.drop_unreliable {
            tracing::trace!(%connection, len = data.len(), "unreliable send dropped");
            return Ok(());
        }
        hub.push(
            link.remote,
            TransportEvent::Message {
                connection: link.remote_connection,
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    fn poll(&mut self, max_events: usize) -> Vec<TransportEvent> {
        let mut hub = lock(&self.hub);
        let Some(inbox) = hub.inboxes.get_mut(&self.id) else {
            return Vec::new();
        };
        let take = max_events.min(inbox.len());
        inbox.drain(..take).collect()
    }

    fn close(&mut self, connection: ConnectionId) -> Result<(), TransportError> {
        let mut hub = lock(&self.hub);
        let link = hub
            .links
            .remove(&connection)
            .ok_or(TransportError::ConnectionClosed(connection))?;
        hub.links.remove(&link.remote_connection);
        hub.push(
            link.remote,
            TransportEvent::Disconnected(link.remote_connection),
        );
        tracing::debug!(%connection, "loopback link closed");
        Ok(())
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        let mut hub = lock(&self.hub);
        let owned: Vec<(ConnectionId, Link)> = hub
            .links
            .iter()
            .filter(|(_, link)| {
                // A connection belongs to us when its peer link points back here.
                link.remote != self.id
            })
            .map(|(conn, link)| (*conn, *link))
            .collect();
        for (conn, link) in owned {
            let ours = hub
                .links
                .get(&link.remote_connection)
                .is_some_and(|back| back.remote == self.id && back.remote_connection == conn);
            if !ours {
                continue;
            }
            hub.links.remove(&conn);
            hub.links.remove(&link.remote_connection);
            hub.push(
                link.remote,
                TransportEvent::Disconnected(link.remote_connection),
            );
        }
        hub.inboxes.remove(&self.id);
        hub.congested.remove(&self.id);
    }
}

fn lock(hub: &Mutex<Hub>) -> MutexGuard<'_, Hub> {
    hub.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(connection: ConnectionId, data: &[u8]) -> TransportEvent {
        TransportEvent::Message {
            connection,
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_connect_both_sides_see_connected() {
        let net = LoopbackNetwork::new();
        let mut host = net.endpoint();
        let mut client = net.endpoint();

        let conn = client.connect(&host);

        let client_events = client.poll(16);
        assert_eq!(client_events, vec![TransportEvent::Connected(conn)]);
        let host_events = host.poll(16);
        assert_eq!(host_events.len(), 1);
        assert!(matches!(host_events[0], TransportEvent::Connected(_)));
    }

    #[test]
    fn test_send_delivers_in_fifo_order() {
        let net = LoopbackNetwork::new();
        let mut host = net.endpoint();
        let client = net.endpoint();
        let conn = client.connect(&host);
        let TransportEvent::Connected(host_conn) = host.poll(1)[0] else {
            panic!("expected connect event");
        };

        client.send(conn, b"one", Reliability::Reliable).unwrap();
        client.send(conn, b"two", Reliability::Reliable).unwrap();

        let events = host.poll(16);
        assert_eq!(events, vec![message(host_conn, b"one"), message(host_conn, b"two")]);
    }

    #[test]
    fn test_poll_respects_max_events() {
        let net = LoopbackNetwork::new();
        let mut host = net.endpoint();
        let client = net.endpoint();
        let conn = client.connect(&host);
        for i in 0..5u8 {
            client.send(conn, &[i], Reliability::Reliable).unwrap();
        }

        // One connect event plus five messages.
        assert_eq!(host.poll(4).len(), 4);
        assert_eq!(host.poll(4).len(), 2);
        assert!(host.poll(4).is_empty());
    }

    #[test]
    fn test_send_on_unknown_connection_returns_closed() {
        let net = LoopbackNetwork::new();
        let client = net.endpoint();
        let result = client.send(ConnectionId::new(99), b"x", Reliability::Reliable);
        assert!(matches!(result, Err(TransportError::ConnectionClosed(_))));
    }

    #[test]
    fn test_congested_endpoint_returns_would_block() {
        let net = LoopbackNetwork::new();
        let host = net.endpoint();
        let client = net.endpoint();
        let conn = client.connect(&host);

        client.set_congested(true);
        let result = client.send(conn, b"x", Reliability::Reliable);
        assert!(matches!(result, Err(TransportError::WouldBlock(c)) if c == conn));

        client.set_congested(false);
        assert!(client.send(conn, b"x", Reliability::Reliable).is_ok());
    }

    #[test]
    fn test_drop_unreliable_loses_only_unreliable_sends() {
        let net = LoopbackNetwork::new();
        let mut host = net.endpoint();
        let client = net.endpoint();
        let conn = client.connect(&host);
        host.poll(16);
        net.set_drop_unreliable(true);

        client.send(conn, b"lost", Reliability::Unreliable).unwrap();
        client.send(conn, b"kept", Reliability::Reliable).unwrap();

        let events = host.poll(16);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], TransportEvent::Message { data, .. } if data == b"kept"));
    }

    #[test]
    fn test_close_notifies_remote_and_invalidates_both_ids() {
        let net = LoopbackNetwork::new();
        let mut host = net.endpoint();
        let mut client = net.endpoint();
        let conn = client.connect(&host);
        let TransportEvent::Connected(host_conn) = host.poll(1)[0] else {
            panic!("expected connect event");
        };

        client.close(conn).unwrap();

        assert_eq!(host.poll(16), vec![TransportEvent::Disconnected(host_conn)]);
        assert!(host.send(host_conn, b"x", Reliability::Reliable).is_err());
        assert!(client.close(conn).is_err());
    }

    #[test]
    fn test_drop_endpoint_disconnects_peers() {
        let net = LoopbackNetwork::new();
        let mut host = net.endpoint();
        let client = net.endpoint();
        client.connect(&host);
        let TransportEvent::Connected(host_conn) = host.poll(1)[0] else {
            panic!("expected connect event");
        };

        drop(client);

        assert_eq!(host.poll(16), vec![TransportEvent::Disconnected(host_conn)]);
    }
}
