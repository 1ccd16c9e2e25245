//! Built-in reactions, one per catalogue packet.
//!
//! Host and client share the table; each reaction checks the local role
//! and ignores packets that only make sense on the other side.

use colonylink_protocol::{
    AdmissionVerdict, AllClientsReady, Build, ChatMessage, ClientReadyStatus, Deconstruct,
    EntityPosition, HardSync, HardSyncComplete, InstantiationBatch, ManifestOffer,
    ManifestRequest, PacketBody, ReadyState, ReadyStatusUpdate, Reliability, SaveFileChunk,
    SaveFileRequest, SpeedChange, SyncProgress, WorldData, WorldUpdateBatch,
};
use colonylink_session::{Verdict, validate_offer};
use colonylink_transfer::{
    BOARD_BAR_WIDTH, ChunkOutcome, ChunkStream, TransferProgress, progress_bar,
};
use colonylink_transport::Transport;

use crate::dispatch::{Context, Dispatcher, Reaction};
use crate::node::{Continuation, HARD_SYNC_DELAY_TICKS, NodeEvent};

pub(crate) fn install_all<T: Transport>(dispatcher: &mut Dispatcher<T>) {
    let results = [
        dispatcher.install::<ChatMessage>(),
        dispatcher.install::<EntityPosition>(),
        dispatcher.install::<WorldData>(),
        dispatcher.install::<WorldUpdateBatch>(),
        dispatcher.install::<InstantiationBatch>(),
        dispatcher.install::<SaveFileRequest>(),
        dispatcher.install::<SaveFileChunk>(),
        dispatcher.install::<Build>(),
        dispatcher.install::<Deconstruct>(),
        dispatcher.install::<ClientReadyStatus>(),
        dispatcher.install::<AllClientsReady>(),
        dispatcher.install::<ReadyStatusUpdate>(),
        dispatcher.install::<HardSync>(),
        dispatcher.install::<HardSyncComplete>(),
        dispatcher.install::<SpeedChange>(),
        dispatcher.install::<ManifestRequest>(),
        dispatcher.install::<ManifestOffer>(),
        dispatcher.install::<AdmissionVerdict>(),
        dispatcher.install::<SyncProgress>(),
    ];
    for result in results {
        if let Err(e) = result {
            tracing::error!(error = %e, "failed to install built-in reaction");
        }
    }
}

fn host_only<T: Transport>(ctx: &Context<'_, T>, name: &'static str) -> bool {
    if !ctx.is_host() {
        tracing::debug!(packet = name, "host-only packet ignored on client");
        return false;
    }
    true
}

fn client_only<T: Transport>(ctx: &Context<'_, T>, name: &'static str) -> bool {
    if ctx.is_host() {
        tracing::debug!(packet = name, "client-only packet ignored on host");
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// Relayed actions
// ---------------------------------------------------------------------------

impl Reaction for ChatMessage {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        ctx.relay(&self);
        ctx.hooks.on_chat(&self);
    }
}

impl Reaction for EntityPosition {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        ctx.relay(&self);
        ctx.hooks.on_entity_position(&self);
    }
}

impl Reaction for Build {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        tracing::debug!(sender = %self.sender, cell = self.cell, prefab = %self.prefab, "build");
        ctx.relay(&self);
        ctx.hooks.on_build(&self);
    }
}

impl Reaction for Deconstruct {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        tracing::debug!(sender = %self.sender, cell = self.cell, "deconstruct");
        ctx.relay(&self);
        ctx.hooks.on_deconstruct(&self);
    }
}

impl Reaction for SpeedChange {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        ctx.relay(&self);
        ctx.hooks.set_paused(self.speed == 0);
        ctx.hooks.on_speed_change(self.speed);
    }
}

// ---------------------------------------------------------------------------
// World state (host → client)
// ---------------------------------------------------------------------------

impl Reaction for WorldData {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if !client_only(ctx, Self::NAME) {
            return;
        }
        for region in &self.regions {
            if let Err(e) = ctx.hooks.apply_region(region) {
                tracing::error!(x = region.x, y = region.y, error = %e, "failed to apply region");
            }
        }
    }
}

impl Reaction for WorldUpdateBatch {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if client_only(ctx, Self::NAME) {
            ctx.hooks.on_cell_updates(&self.updates);
        }
    }
}

impl Reaction for InstantiationBatch {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if client_only(ctx, Self::NAME) {
            ctx.hooks.on_instantiations(&self.items);
        }
    }
}

// ---------------------------------------------------------------------------
// Save transfer
// ---------------------------------------------------------------------------

impl Reaction for SaveFileRequest {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if !host_only(ctx, Self::NAME) {
            return;
        }
        let Some(peer) = ctx.source else {
            return;
        };
        if peer != self.requester {
            tracing::debug!(
                %peer,
                requester = %self.requester,
                "requester differs from source, using source"
            );
        }

        let snapshot = match ctx.hooks.world_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(%peer, error = %e, "cannot snapshot world for transfer");
                return;
            }
        };
        // Every chunk, header included, has to fit one reliable message.
        let room = ctx
            .sender
            .ceiling(Reliability::Reliable)
            .saturating_sub(SaveFileChunk::overhead(snapshot.name.len()));
        let chunk_size = ctx.config.transfer.chunk_size().min(room);
        if chunk_size < ctx.config.transfer.chunk_size() {
            tracing::debug!(%peer, chunk_size, "chunk size reduced to fit reliable ceiling");
        }
        let stream = match ChunkStream::new(
            snapshot.name,
            snapshot.bytes,
            chunk_size,
            ctx.config.transfer.chunks_per_tick,
        ) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(%peer, error = %e, "cannot start transfer");
                return;
            }
        };

        // The joining client has to load before play continues.
        if let Err(e) = ctx.session.set_ready_state(peer, ReadyState::Unready) {
            tracing::warn!(%peer, error = %e, "cannot reset ready state");
        }
        ctx.state.all_ready_announced = false;
        ctx.hooks.set_paused(true);
        ctx.state.outbox.start(peer, stream);
        ready_states_changed(ctx);
    }
}

impl Reaction for SaveFileChunk {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if !client_only(ctx, Self::NAME) {
            return;
        }
        match ctx.state.assembler.receive(&self, ctx.now) {
            ChunkOutcome::Started(progress) | ChunkOutcome::Progress(progress) => {
                report_progress(ctx, &progress);
            }
            ChunkOutcome::Duplicate(progress) => {
                tracing::debug!(
                    file_id = %progress.file_id,
                    offset = self.offset,
                    "duplicate chunk"
                );
            }
            ChunkOutcome::Completed(done) => {
                let progress = TransferProgress {
                    file_id: done.file_id.clone(),
                    received_chunks: done.total_chunks,
                    total_chunks: done.total_chunks,
                    percent: 100,
                    report: Some(100),
                };
                report_progress(ctx, &progress);
                ctx.emit(NodeEvent::TransferCompleted {
                    file_id: done.file_id.clone(),
                });
                let delay = ctx.config.transfer.load_delay_ticks;
                ctx.schedule(
                    delay,
                    Continuation::BeginLoad {
                        name: done.file_id,
                        payload: done.payload,
                    },
                );
            }
            ChunkOutcome::Rejected(e) => {
                tracing::warn!(
                    file_id = %self.file_id,
                    offset = self.offset,
                    error = %e,
                    "chunk dropped"
                );
            }
        }
    }
}

fn report_progress<T: Transport>(ctx: &mut Context<'_, T>, progress: &TransferProgress) {
    let Some(percent) = progress.report else {
        return;
    };
    let packet = SyncProgress {
        client: ctx.local_id(),
        client_name: ctx.session.local_name().to_string(),
        file_id: progress.file_id.clone(),
        received_chunks: i32::try_from(progress.received_chunks).unwrap_or(i32::MAX),
        total_chunks: i32::try_from(progress.total_chunks).unwrap_or(i32::MAX),
        percent,
    };
    ctx.sender.send_to_host(&packet, Reliability::Reliable);
    ctx.emit(NodeEvent::TransferProgress {
        file_id: progress.file_id.clone(),
        percent,
        bar: progress_bar(percent, BOARD_BAR_WIDTH),
    });
}

impl Reaction for SyncProgress {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if !host_only(ctx, Self::NAME) {
            return;
        }
        let all_synced = ctx.state.board.update(&self);
        ctx.emit(NodeEvent::SyncProgress {
            client: self.client,
            percent: self.percent,
        });
        if all_synced {
            ctx.emit(NodeEvent::AllClientsSynced);
        }
    }
}

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

impl Reaction for ClientReadyStatus {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if !host_only(ctx, Self::NAME) {
            return;
        }
        let Some(peer) = ctx.source else {
            return;
        };
        if let Err(e) = ctx.session.set_ready_state(peer, self.state) {
            tracing::warn!(%peer, error = %e, "ready state for unknown peer");
            return;
        }
        tracing::info!(%peer, state = ?self.state, "client ready state");

        if self.state == ReadyState::Unready {
            ctx.state.all_ready_announced = false;
        }
        ready_states_changed(ctx);
    }
}

/// Host: tells clients who is still loading, then resumes play if nobody
/// is. Runs whenever a ready state changes or a client leaves.
pub(crate) fn ready_states_changed<T: Transport>(ctx: &mut Context<'_, T>) {
    if !ctx.is_host() {
        return;
    }
    let summary = ctx.session.ready_summary();
    let update = ReadyStatusUpdate {
        ready: u32::try_from(summary.ready()).unwrap_or(u32::MAX),
        total: u32::try_from(summary.total()).unwrap_or(u32::MAX),
        message: summary.message(),
    };
    ctx.sender.send_to_all_clients(&update, Reliability::Reliable);
    ctx.emit(NodeEvent::ReadyStatus {
        ready: update.ready,
        total: update.total,
        message: update.message,
    });

    if ctx.state.all_ready_announced || !summary.everyone_ready() {
        return;
    }
    ctx.state.all_ready_announced = true;
    let sent = ctx
        .sender
        .send_to_all_clients(&AllClientsReady, Reliability::Reliable);
    tracing::info!(clients = sent, "all clients ready, resuming");
    if ctx.state.hard_sync_pending {
        ctx.state.hard_sync_pending = false;
        ctx.sender.send_to_all_clients(&HardSyncComplete, Reliability::Reliable);
        tracing::info!("hard sync complete");
        ctx.emit(NodeEvent::HardSyncCompleted);
    }
    ctx.hooks.set_paused(false);
    ctx.emit(NodeEvent::AllClientsReady);
}

impl Reaction for AllClientsReady {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if client_only(ctx, Self::NAME) {
            ctx.hooks.set_paused(false);
            ctx.emit(NodeEvent::AllClientsReady);
        }
    }
}

impl Reaction for ReadyStatusUpdate {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if !client_only(ctx, Self::NAME) {
            return;
        }
        // The download progress overlay has the screen until the load.
        if ctx.state.assembler.is_receiving() {
            tracing::trace!(
                ready = self.ready,
                total = self.total,
                "status hidden during download"
            );
            return;
        }
        ctx.emit(NodeEvent::ReadyStatus {
            ready: self.ready,
            total: self.total,
            message: self.message,
        });
    }
}

impl Reaction for HardSyncComplete {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if !client_only(ctx, Self::NAME) {
            return;
        }
        tracing::info!("hard sync complete");
        ctx.hooks.set_paused(false);
        ctx.emit(NodeEvent::HardSyncCompleted);
    }
}

impl Reaction for HardSync {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if !client_only(ctx, Self::NAME) {
            return;
        }
        tracing::info!("hard sync requested by host");
        ctx.session.set_ready(false);
        ctx.state.assembler.abandon_all();
        ctx.hooks.set_paused(true);
        ctx.schedule(HARD_SYNC_DELAY_TICKS, Continuation::RequestSave);
        ctx.emit(NodeEvent::HardSyncStarted);
    }
}

// ---------------------------------------------------------------------------
// Admission handshake
// ---------------------------------------------------------------------------

impl Reaction for ManifestRequest {
    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if ctx.is_host() {
            if self.target == ctx.local_id() {
                tracing::debug!(requester = %self.requester, "manifest request for host ignored");
                return;
            }
            ctx.sender.send_to_peer(self.target, &self, Reliability::Reliable);
            return;
        }
        match ctx.hooks.local_manifest() {
            Ok(manifest) => {
                let offer = manifest.to_offer(ctx.local_id());
                ctx.sender.send_to_host(&offer, Reliability::Reliable);
            }
            Err(e) => tracing::error!(error = %e, "cannot collect manifest for host"),
        }
    }
}

impl Reaction for ManifestOffer {
    const BEFORE_ADMISSION: bool = true;

    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if !host_only(ctx, Self::NAME) {
            return;
        }
        let Some(connection) = ctx.connection else {
            return;
        };
        let client = self.client;

        if let Some(verdict) = refuse_offer(ctx, &self) {
            tracing::warn!(%client, %connection, reason = %verdict.reason, "offer refused");
            ctx.sender
                .send_to_connection(connection, &verdict.to_packet(client), Reliability::Reliable);
            ctx.disconnect(connection);
            return;
        }
        if let Err(e) = ctx
            .session
            .add_peer(client, Some(connection), &client.to_string())
        {
            let verdict = Verdict::error(e);
            ctx.sender
                .send_to_connection(connection, &verdict.to_packet(client), Reliability::Reliable);
            ctx.disconnect(connection);
            return;
        }

        ctx.state.admission.begin(client);
        let verdict = if ctx.config.admission.verification_enabled {
            match ctx.hooks.local_manifest() {
                Ok(host) => validate_offer(&host, &self, ctx.config.admission.policy()),
                Err(e) => Verdict::error(e),
            }
        } else {
            Verdict::unchecked()
        };
        for warning in &verdict.warnings {
            tracing::info!(%client, %warning, "compatibility warning");
        }
        if let Err(e) = ctx.state.admission.resolve(client, &verdict) {
            tracing::warn!(%client, error = %e, "admission not resolved");
            return;
        }

        ctx.sender
            .send_to_peer(client, &verdict.to_packet(client), Reliability::Reliable);
        if verdict.approved {
            ctx.emit(NodeEvent::PeerJoined { peer: client });
        } else {
            ctx.session.remove_peer(client);
            ctx.emit(NodeEvent::PeerRejected {
                peer: client,
                reason: verdict.reason,
            });
        }
    }
}

/// Rejections decided before the manifest is looked at.
fn refuse_offer<T: Transport>(ctx: &Context<'_, T>, offer: &ManifestOffer) -> Option<Verdict> {
    if !offer.client.is_valid() || offer.client == ctx.local_id() {
        return Some(Verdict::error(format!("invalid client id {}", offer.client)));
    }
    let known = ctx.session.connection_of(offer.client).is_some();
    let max = ctx.config.host.max_lobby_size;
    // The host occupies one seat.
    let seated = ctx.session.connected_peers().len() + 1;
    if !known && seated >= max {
        return Some(Verdict {
            approved: false,
            reason: format!("Lobby is full ({seated}/{max})"),
            ..Verdict::default()
        });
    }
    None
}

impl Reaction for AdmissionVerdict {
    const BEFORE_ADMISSION: bool = true;

    fn react<T: Transport>(self, ctx: &mut Context<'_, T>) {
        if !client_only(ctx, Self::NAME) {
            return;
        }
        let Some(host) = ctx.session.host_id() else {
            return;
        };
        if ctx.source != Some(host) {
            tracing::warn!(source = ?ctx.source, "verdict from a peer other than the host ignored");
            return;
        }
        let verdict = Verdict::from_packet(&self);
        if ctx.state.admission.resolve(host, &verdict).is_err() {
            return;
        }

        if verdict.approved {
            tracing::info!(%host, reason = %verdict.reason, "admitted by host");
            ctx.emit(NodeEvent::Admitted);
            let request = SaveFileRequest {
                requester: ctx.local_id(),
            };
            ctx.sender.send_to_host(&request, Reliability::Reliable);
            return;
        }

        tracing::warn!(
            %host,
            reason = %verdict.reason,
            missing = verdict.missing.len(),
            extra = verdict.extra.len(),
            mismatched = verdict.mismatched.len(),
            "rejected by host"
        );
        if let Some(connection) = ctx.connection {
            ctx.disconnect(connection);
        }
        ctx.session.clear();
        ctx.emit(NodeEvent::Rejected {
            message: verdict.user_message(),
        });
    }
}
