//! Packet dispatch: a table from [`PacketType`] to a reaction.
//!
//! Each packet type carries its own behavior through [`Reaction`]. The
//! [`Dispatcher`] registers the type with the wire registry and records a
//! monomorphized handler for it, so incoming bytes go
//! `decode → table lookup → P::react` with no central match.
//!
//! ```text
//! bytes ─→ PacketRegistry::decode ─→ Box<dyn Packet>
//!                                         │ routes[packet_type]
//!                                         ▼
//!                        handler::<P>: downcast::<P>() ─→ P::react(ctx)
//! ```

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use colonylink_protocol::{Packet, PacketBody, PacketRegistry, PacketType, PeerId, ProtocolError};
use colonylink_session::Session;
use colonylink_transport::{ConnectionId, Transport};

use crate::batch::Batches;
use crate::config::NodeConfig;
use crate::hooks::EngineHooks;
use crate::node::{Continuation, NodeEvent, NodeState};
use crate::sender::Sender;

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

/// What a node does when a packet of this type arrives.
pub trait Reaction: PacketBody {
    /// Whether the packet is accepted from a peer that has not been
    /// admitted yet. Only the handshake itself should say yes.
    const BEFORE_ADMISSION: bool = false;

    fn react<T: Transport>(self, ctx: &mut Context<'_, T>);
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything a reaction may read or change while handling one packet.
pub struct Context<'a, T: Transport> {
    pub sender: Sender<'a, T>,
    pub session: &'a Session,
    pub hooks: &'a mut dyn EngineHooks,
    pub state: &'a mut NodeState,
    pub batches: &'a Batches,
    pub config: &'a NodeConfig,
    /// Peer the packet came from, if its connection is mapped to one.
    pub source: Option<PeerId>,
    /// Connection the packet came in on. `None` outside packet handling.
    pub connection: Option<ConnectionId>,
    pub tick: u64,
    pub now: Instant,
}

impl<T: Transport> Context<'_, T> {
    pub fn is_host(&self) -> bool {
        self.session.is_host()
    }

    pub fn local_id(&self) -> PeerId {
        self.session.local_id()
    }

    pub fn emit(&mut self, event: NodeEvent) {
        self.state.events.push(event);
    }

    /// Host only: forwards a packet to every client except its source.
    /// Returns how many clients it reached.
    pub fn relay(&self, packet: &dyn Packet) -> usize {
        if !self.is_host() {
            return 0;
        }
        let Some(source) = self.source else {
            return 0;
        };
        let exclude = HashSet::from([source, self.local_id()]);
        let sent = self
            .sender
            .send_to_all(packet, &exclude, packet.default_reliability());
        tracing::trace!(packet = packet.name(), %source, sent, "relayed");
        sent
    }

    /// Closes `connection` once the current dispatch finishes.
    pub fn disconnect(&mut self, connection: ConnectionId) {
        self.state.closing.push(connection);
    }

    /// Runs `item` `ticks` ticks from now.
    pub fn schedule(&mut self, ticks: u64, item: Continuation) {
        self.state.continuations.schedule_after(self.tick, ticks, item);
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

type Handler<T> = for<'a, 'b> fn(Box<dyn Packet>, &'b mut Context<'a, T>);

pub(crate) struct Route<T: Transport> {
    pub(crate) handler: Handler<T>,
    pub(crate) before_admission: bool,
}

fn handle<P: Reaction, T: Transport>(packet: Box<dyn Packet>, ctx: &mut Context<'_, T>) {
    match packet.downcast::<P>() {
        Some(packet) => packet.react(ctx),
        None => tracing::error!(packet = P::NAME, "routed packet has the wrong type"),
    }
}

/// The registry plus one handler per installed packet type.
pub struct Dispatcher<T: Transport> {
    registry: PacketRegistry,
    routes: HashMap<PacketType, Route<T>>,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new() -> Self {
        Self {
            registry: PacketRegistry::new(),
            routes: HashMap::new(),
        }
    }

    /// A dispatcher with every built-in packet and its reaction.
    pub fn with_defaults() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.install_defaults();
        dispatcher
    }

    /// Registers `P` on the wire and routes it to `P::react`.
    ///
    /// # Errors
    /// [`ProtocolError::RegistryConflict`] when the tag belongs to another
    /// type. Installing the same type twice is a no-op.
    pub fn install<P: Reaction>(&mut self) -> Result<(), ProtocolError> {
        self.registry.register::<P>()?;
        self.routes.insert(
            P::TYPE,
            Route {
                handler: handle::<P, T>,
                before_admission: P::BEFORE_ADMISSION,
            },
        );
        tracing::trace!(packet = P::NAME, ty = %P::TYPE, "reaction installed");
        Ok(())
    }

    /// Installs the built-in catalogue. A failing entry is logged and
    /// skipped; the rest still install.
    pub fn install_defaults(&mut self) {
        crate::reactions::install_all(self);
    }

    pub fn registry(&self) -> &PacketRegistry {
        &self.registry
    }

    pub fn has_reaction(&self, ty: PacketType) -> bool {
        self.routes.contains_key(&ty)
    }

    pub(crate) fn route(&self, ty: PacketType) -> Option<&Route<T>> {
        self.routes.get(&ty)
    }
}

impl<T: Transport> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.routes.keys().map(|t| t.0).collect();
        types.sort_unstable();
        f.debug_struct("Dispatcher").field("routes", &types).finish()
    }
}
