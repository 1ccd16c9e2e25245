//! The node runtime: one host or client driven by [`Node::tick`].
//!
//! A tick is the only place work happens:
//!
//! 1. poll the transport (bounded) and handle events in arrival order;
//! 2. pump outbound save streams (host);
//! 3. sweep for stalled downloads (client);
//! 4. flush due batches (host);
//! 5. run continuations that came due;
//! 6. close connections that reactions asked to drop.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use colonylink_protocol::{
    ClientReadyStatus, HardSync, ManifestRequest, Packet, PeerId, ReadyState, Reliability,
    SaveFileRequest,
};
use colonylink_session::{Admission, AdmissionState, Manifest, Session};
use colonylink_tick::Continuations;
use colonylink_transfer::{Assembler, ChunkSend, Outbox, StallAction, SyncBoard};
use colonylink_transport::{ConnectionId, Transport, TransportEvent};

use crate::batch::{Batchable, Batcher, Batches};
use crate::config::NodeConfig;
use crate::dispatch::{Context, Dispatcher};
use crate::error::ColonylinkError;
use crate::hooks::EngineHooks;
use crate::reactions::ready_states_changed;
use crate::sender::{SendOutcome, Sender};

/// Ticks a client waits after a hard sync before asking for the save again.
pub const HARD_SYNC_DELAY_TICKS: u64 = 2;

// ---------------------------------------------------------------------------
// Events and continuations
// ---------------------------------------------------------------------------

/// Something the embedding application may want to show or act on.
///
/// User-facing text (`message`, `bar`) is separate from the log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// Host: a client was admitted. Client: the link to the host is up.
    PeerJoined { peer: PeerId },
    PeerLeft { peer: PeerId },
    /// Host: a client's offer was refused.
    PeerRejected { peer: PeerId, reason: String },
    /// Client: the host approved our manifest.
    Admitted,
    /// Client: the host refused our manifest. The session is over.
    Rejected { message: String },
    TransferProgress {
        file_id: String,
        percent: u8,
        bar: String,
    },
    TransferCompleted { file_id: String },
    /// Client: the engine accepted the downloaded world.
    WorldLoaded { file_id: String },
    /// Client: a stalled download was dropped and requested again.
    ResendRequested { file_id: String },
    /// Host: a client reported download progress.
    SyncProgress { client: PeerId, percent: u8 },
    /// Host: a save stream was cancelled because the link refused a chunk.
    TransferFailed { peer: PeerId },
    AllClientsSynced,
    /// How many players have loaded. `message` is ready for an overlay.
    ReadyStatus {
        ready: u32,
        total: u32,
        message: String,
    },
    AllClientsReady,
    HardSyncStarted,
    /// Every client reloaded after a hard sync and play resumed.
    HardSyncCompleted,
}

/// A workflow stage deferred to a later tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Reopen the gate and ask the host for a fresh save.
    RequestSave,
    /// Hand a finished download to the engine.
    BeginLoad { name: String, payload: Bytes },
}

impl Continuation {
    fn run<T: Transport>(self, ctx: &mut Context<'_, T>) {
        match self {
            Self::RequestSave => {
                ctx.session.set_ready(true);
                let request = SaveFileRequest {
                    requester: ctx.local_id(),
                };
                if ctx.sender.send_to_host(&request, Reliability::Reliable) {
                    tracing::info!("requested full save from host");
                }
            }
            Self::BeginLoad { name, payload } => {
                tracing::info!(file_id = %name, bytes = payload.len(), "loading world");
                if let Err(e) = ctx.hooks.begin_load(&name, payload) {
                    tracing::error!(file_id = %name, error = %e, "world load failed");
                    return;
                }
                let ready = ClientReadyStatus {
                    sender: ctx.local_id(),
                    state: ReadyState::Ready,
                };
                ctx.sender.send_to_host(&ready, Reliability::Reliable);
                ctx.emit(NodeEvent::WorldLoaded { file_id: name });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// NodeState
// ---------------------------------------------------------------------------

/// Mutable per-session state reactions work on.
#[derive(Debug)]
pub struct NodeState {
    pub admission: Admission,
    /// Client: downloads in progress.
    pub assembler: Assembler,
    /// Host: uploads in progress, one per client.
    pub outbox: Outbox,
    /// Host: last reported progress per client.
    pub board: SyncBoard,
    pub continuations: Continuations<Continuation>,
    pub events: Vec<NodeEvent>,
    pub closing: Vec<ConnectionId>,
    /// Host: `AllClientsReady` went out and no client became unready since.
    pub all_ready_announced: bool,
    /// Host: a hard sync is waiting for every client to reload.
    pub hard_sync_pending: bool,
}

impl NodeState {
    fn new(config: &NodeConfig) -> Self {
        Self {
            admission: Admission::new(),
            assembler: Assembler::new(config.transfer.stall_policy()),
            outbox: Outbox::new(),
            board: SyncBoard::new(),
            continuations: Continuations::new(),
            events: Vec::new(),
            closing: Vec::new(),
            all_ready_announced: false,
            hard_sync_pending: false,
        }
    }

    fn reset(&mut self) {
        self.admission.clear();
        self.assembler.abandon_all();
        self.outbox.clear();
        self.board.clear();
        self.continuations.clear();
        self.closing.clear();
        self.all_ready_announced = false;
        self.hard_sync_pending = false;
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

pub struct Node<T: Transport> {
    transport: T,
    dispatcher: Dispatcher<T>,
    config: NodeConfig,
    session: Session,
    hooks: Box<dyn EngineHooks>,
    state: NodeState,
    batches: Arc<Batches>,
    tick: u64,
    last_stall_sweep: Option<Instant>,
}

impl<T: Transport> Node<T> {
    /// Starts hosting. Clients connect through `transport`.
    pub fn host(
        transport: T,
        config: NodeConfig,
        hooks: Box<dyn EngineHooks>,
        local: PeerId,
        name: &str,
    ) -> Self {
        let session = Session::host(local, name);
        tracing::info!(peer = %local, "hosting session");
        Self::build(transport, config, hooks, session)
    }

    /// Joins `host`. The handshake starts when the transport reports the
    /// connection.
    pub fn join(
        transport: T,
        config: NodeConfig,
        hooks: Box<dyn EngineHooks>,
        local: PeerId,
        host: PeerId,
        name: &str,
    ) -> Self {
        let session = Session::client(local, host).with_name(name);
        tracing::info!(peer = %local, %host, "joining session");
        Self::build(transport, config, hooks, session)
    }

    fn build(
        transport: T,
        config: NodeConfig,
        hooks: Box<dyn EngineHooks>,
        session: Session,
    ) -> Self {
        let config = config.validated();
        let batches = Arc::new(Batches::new(
            &config.batching,
            &config.limits,
            session.is_host(),
        ));
        Self {
            transport,
            dispatcher: Dispatcher::with_defaults(),
            state: NodeState::new(&config),
            config,
            session,
            hooks,
            batches,
            tick: 0,
            last_stall_sweep: None,
        }
    }

    // -- accessors ------------------------------------------------------------

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Install custom reactions here before the first tick.
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<T> {
        &mut self.dispatcher
    }

    /// Shared handle for the engine to queue batched deltas from any thread.
    pub fn batches(&self) -> Arc<Batches> {
        Arc::clone(&self.batches)
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn admission_state(&self, peer: PeerId) -> Option<&AdmissionState> {
        self.state.admission.state(peer)
    }

    /// Host: one line per client download.
    pub fn sync_board(&self) -> Vec<String> {
        self.state.board.render()
    }

    pub fn is_sending_to(&self, peer: PeerId) -> bool {
        self.state.outbox.is_sending_to(peer)
    }

    pub fn downloads_in_flight(&self) -> Vec<String> {
        self.state.assembler.in_flight()
    }

    pub fn drain_events(&mut self) -> Vec<NodeEvent> {
        std::mem::take(&mut self.state.events)
    }

    fn sender(&self) -> Sender<'_, T> {
        Sender::new(
            &self.transport,
            &self.session,
            self.dispatcher.registry(),
            self.config.limits,
        )
    }

    fn with_context<R>(
        &mut self,
        source: Option<PeerId>,
        connection: Option<ConnectionId>,
        now: Instant,
        f: impl FnOnce(&mut Context<'_, T>) -> R,
    ) -> R {
        let Self {
            transport,
            dispatcher,
            config,
            session,
            hooks,
            state,
            batches,
            tick,
            ..
        } = self;
        let session = &*session;
        let config = &*config;
        let mut ctx = Context {
            sender: Sender::new(&*transport, session, dispatcher.registry(), config.limits),
            session,
            hooks: &mut **hooks,
            state,
            batches: &**batches,
            config,
            source,
            connection,
            tick: *tick,
            now,
        };
        f(&mut ctx)
    }

    // -- tick -----------------------------------------------------------------

    /// Runs one step of the loop. Returns how many transport events were
    /// handled.
    pub fn tick(&mut self, now: Instant) -> usize {
        self.tick += 1;

        let budget = if self.session.is_host() {
            self.config.host.max_messages_per_poll
        } else {
            self.config.client.max_messages_per_poll
        };
        let events = self.transport.poll(budget);
        let handled = events.len();
        for event in events {
            match event {
                TransportEvent::Connected(conn) => self.on_connected(conn),
                TransportEvent::Message { connection, data } => {
                    self.handle_incoming(connection, &data, now);
                }
                TransportEvent::Disconnected(conn) => self.on_disconnected(conn, now),
            }
        }

        if self.session.is_host() {
            self.pump_transfers();
            self.flush_batches(now);
        } else if self.session.is_client() {
            self.sweep_stalls(now);
        }

        for item in self.state.continuations.due(self.tick) {
            self.with_context(None, None, now, |ctx| item.run(ctx));
        }
        self.close_pending();
        handled
    }

    /// Decodes and dispatches one message.
    ///
    /// Ignored while the session gate is closed. A message that fails to
    /// decode, has no reaction or comes from a peer that was not admitted
    /// is logged and dropped.
    pub fn handle_incoming(&mut self, connection: ConnectionId, bytes: &[u8], now: Instant) {
        if !self.session.is_ready() {
            tracing::trace!(%connection, len = bytes.len(), "session not ready, message ignored");
            return;
        }
        let packet = match self.dispatcher.registry().decode(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(%connection, error = %e, "dropping undecodable message");
                return;
            }
        };
        let ty = packet.packet_type();
        let Some(route) = self.dispatcher.route(ty) else {
            tracing::warn!(%connection, packet = packet.name(), "no reaction installed, dropped");
            return;
        };
        let handler = route.handler;
        let before_admission = route.before_admission;

        let source = self.session.peer_for_connection(connection);
        if !before_admission && !self.is_admitted(source) {
            tracing::debug!(
                %connection,
                source = ?source,
                packet = packet.name(),
                "message from unadmitted peer dropped"
            );
            return;
        }
        tracing::trace!(%connection, source = ?source, packet = packet.name(), "dispatching");
        self.with_context(source, Some(connection), now, |ctx| handler(packet, ctx));
    }

    fn is_admitted(&self, source: Option<PeerId>) -> bool {
        let Some(peer) = source else {
            return false;
        };
        if self.session.is_host() {
            self.state.admission.is_approved(peer)
        } else {
            self.session.host_id() == Some(peer)
        }
    }

    fn on_connected(&mut self, conn: ConnectionId) {
        if self.session.is_host() {
            tracing::debug!(%conn, "connection awaiting manifest offer");
            return;
        }
        let Some(host) = self.session.host_id() else {
            return;
        };
        if self.session.connection_of(host).is_some() {
            tracing::warn!(%conn, "unexpected second connection on client, closing");
            self.state.closing.push(conn);
            return;
        }
        if let Err(e) = self.session.add_peer(host, Some(conn), "host") {
            tracing::error!(%conn, error = %e, "cannot record host connection");
            return;
        }
        self.session.set_ready(true);
        self.state.admission.begin(host);
        self.state.events.push(NodeEvent::PeerJoined { peer: host });

        let manifest = self.hooks.local_manifest().unwrap_or_else(|e| {
            tracing::error!(error = %e, "cannot collect local manifest, offering empty one");
            Manifest::default()
        });
        let offer = manifest.to_offer(self.session.local_id());
        if self.sender().send_to_host(&offer, Reliability::Reliable) {
            tracing::info!(%host, entries = offer.entries.len(), "manifest offered");
        }
    }

    fn on_disconnected(&mut self, conn: ConnectionId, now: Instant) {
        let Some(peer) = self.session.peer_for_connection(conn) else {
            tracing::debug!(%conn, "unmapped connection closed");
            return;
        };
        self.session.detach_connection(peer);
        self.state.events.push(NodeEvent::PeerLeft { peer });

        if self.session.is_host() {
            self.state.outbox.cancel(peer);
            self.state.board.remove(peer);
            self.state.admission.forget(peer);
            tracing::info!(%peer, "client left");
            // The leaver may have been the last one loading.
            self.with_context(None, None, now, |ctx| ready_states_changed(ctx));
        } else {
            tracing::warn!(host = %peer, "lost connection to host");
            self.state.reset();
            self.session.clear();
        }
    }

    fn pump_transfers(&mut self) {
        let sender = Sender::new(
            &self.transport,
            &self.session,
            self.dispatcher.registry(),
            self.config.limits,
        );
        let pumped = self.state.outbox.pump_all(|peer, chunk| {
            match sender.offer_to_peer(peer, &chunk, Reliability::Reliable) {
                SendOutcome::Sent => ChunkSend::Accepted,
                SendOutcome::Busy => ChunkSend::Busy,
                SendOutcome::Refused => ChunkSend::Refused,
            }
        });
        for peer in pumped.failed {
            self.state.board.remove(peer);
            self.state.events.push(NodeEvent::TransferFailed { peer });
        }
    }

    fn sweep_stalls(&mut self, now: Instant) {
        let interval = self.config.transfer.stall_check_interval();
        let due = self
            .last_stall_sweep
            .is_none_or(|last| now.duration_since(last) >= interval);
        if !due {
            return;
        }
        self.last_stall_sweep = Some(now);

        for action in self.state.assembler.check_stalls(now) {
            let StallAction::RequestFullResend { file_id } = action;
            let request = SaveFileRequest {
                requester: self.session.local_id(),
            };
            self.sender().send_to_host(&request, Reliability::Reliable);
            self.state.events.push(NodeEvent::ResendRequested { file_id });
        }
    }

    fn flush_batches(&mut self, now: Instant) {
        let sender = self.sender();
        flush(&sender, &self.batches.world, now);
        flush(&sender, &self.batches.instantiations, now);
    }

    fn close_pending(&mut self) {
        for conn in std::mem::take(&mut self.state.closing) {
            if let Err(e) = self.transport.close(conn) {
                tracing::debug!(%conn, error = %e, "close failed");
            }
        }
    }

    // -- local actions --------------------------------------------------------

    /// Sends a locally originated packet: host to every client, client to
    /// the host (which relays it). Returns how many sends went out.
    pub fn publish(&self, packet: &dyn Packet) -> usize {
        let sender = self.sender();
        let reliability = packet.default_reliability();
        if self.session.is_host() {
            sender.send_to_all_clients(packet, reliability)
        } else {
            usize::from(sender.send_to_host(packet, reliability))
        }
    }

    /// Host: tells every client to drop its world and download it again.
    pub fn hard_sync(&mut self) -> Result<usize, ColonylinkError> {
        if !self.session.is_host() {
            return Err(ColonylinkError::WrongRole("host"));
        }
        for (peer, _) in self.session.connected_peers() {
            self.session.set_ready_state(peer, ReadyState::Unready)?;
        }
        self.state.all_ready_announced = false;
        self.state.hard_sync_pending = true;
        self.state.board.clear();
        self.hooks.set_paused(true);
        let sent = self
            .sender()
            .send_to_all_clients(&HardSync, Reliability::Reliable);
        tracing::info!(clients = sent, "hard sync started");
        self.state.events.push(NodeEvent::HardSyncStarted);
        self.with_context(None, None, Instant::now(), |ctx| ready_states_changed(ctx));
        Ok(sent)
    }

    /// Host: asks a client to offer its manifest again.
    pub fn request_manifest(&self, target: PeerId) -> Result<bool, ColonylinkError> {
        if !self.session.is_host() {
            return Err(ColonylinkError::WrongRole("host"));
        }
        let request = ManifestRequest {
            requester: self.session.local_id(),
            target,
        };
        Ok(self.sender().send_to_peer(target, &request, Reliability::Reliable))
    }

    /// Client: reports a ready state change to the host.
    pub fn report_ready(&self, state: ReadyState) -> Result<bool, ColonylinkError> {
        if !self.session.is_client() {
            return Err(ColonylinkError::WrongRole("client"));
        }
        let status = ClientReadyStatus {
            sender: self.session.local_id(),
            state,
        };
        Ok(self.sender().send_to_host(&status, Reliability::Reliable))
    }

    /// Ends the session: closes every connection and forgets all state.
    pub fn leave(&mut self) {
        let connections: HashSet<ConnectionId> = self
            .session
            .connected_peers()
            .into_iter()
            .map(|(_, conn)| conn)
            .collect();
        for conn in connections {
            if let Err(e) = self.transport.close(conn) {
                tracing::debug!(%conn, error = %e, "close failed");
            }
        }
        self.state.reset();
        self.batches.world.clear();
        self.batches.instantiations.clear();
        self.session.clear();
        tracing::info!("left session");
    }
}

fn flush<T: Transport, B: Batchable>(sender: &Sender<'_, T>, batcher: &Batcher<B>, now: Instant) {
    for packet in batcher.flush_due(now) {
        sender.send_to_all_clients(&packet, batcher.reliability());
    }
}

impl<T: Transport> std::fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("role", &self.session.role())
            .field("local", &self.session.local_id())
            .field("tick", &self.tick)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
