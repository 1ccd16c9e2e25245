//! Host ↔ client sessions over the loopback transport.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use colonylink::prelude::*;
use colonylink::protocol::{Build, CellRegion, ChatMessage, HardSync, encode};
use colonylink::session::AdmissionState;
use colonylink::transport::{ConnectionId, LoopbackTransport};

const HOST: PeerId = PeerId(1);
const ALICE: PeerId = PeerId(2);
const BOB: PeerId = PeerId(3);

// =========================================================================
// Helpers
// =========================================================================

#[derive(Debug, Default)]
struct EngineLog {
    loaded: Vec<(String, Bytes)>,
    paused: Vec<bool>,
    chats: Vec<ChatMessage>,
    builds: Vec<Build>,
}

/// Engine stand-in that records everything the node tells it.
struct TestEngine {
    manifest: Manifest,
    world: Option<WorldSnapshot>,
    log: Arc<Mutex<EngineLog>>,
}

impl TestEngine {
    fn new(manifest: Manifest) -> (Self, Arc<Mutex<EngineLog>>) {
        let log = Arc::new(Mutex::new(EngineLog::default()));
        let engine = Self {
            manifest,
            world: None,
            log: Arc::clone(&log),
        };
        (engine, log)
    }

    fn with_world(mut self, bytes: Bytes) -> Self {
        self.world = Some(WorldSnapshot {
            name: "colony.sav".into(),
            bytes,
        });
        self
    }
}

impl EngineHooks for TestEngine {
    fn world_snapshot(&mut self) -> Result<WorldSnapshot, HookError> {
        self.world.clone().ok_or_else(|| HookError::new("no world"))
    }

    fn apply_region(&mut self, _region: &CellRegion) -> Result<(), HookError> {
        Ok(())
    }

    fn begin_load(&mut self, name: &str, bytes: Bytes) -> Result<(), HookError> {
        self.log.lock().unwrap().loaded.push((name.to_string(), bytes));
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        self.log.lock().unwrap().paused.push(paused);
    }

    fn local_manifest(&self) -> Result<Manifest, HookError> {
        Ok(self.manifest.clone())
    }

    fn on_chat(&mut self, message: &ChatMessage) {
        self.log.lock().unwrap().chats.push(message.clone());
    }

    fn on_build(&mut self, build: &Build) {
        self.log.lock().unwrap().builds.push(build.clone());
    }
}

fn modded() -> Manifest {
    Manifest::new("U52-600112")
        .with_entry(ManifestEntry::new("pipes.plus", "1.2"))
        .with_entry(ManifestEntry::new("better.lights", "0.9"))
}

fn world(len: usize) -> Bytes {
    (0..len).map(|i| (i % 253) as u8).collect::<Vec<_>>().into()
}

fn config() -> NodeConfig {
    NodeConfig::default()
}

struct Lobby {
    net: LoopbackNetwork,
    host: Node<LoopbackTransport>,
    host_log: Arc<Mutex<EngineLog>>,
    clients: Vec<(Node<LoopbackTransport>, Arc<Mutex<EngineLog>>)>,
}

impl Lobby {
    fn new(world_bytes: Bytes, config: NodeConfig, clients: &[(PeerId, Manifest)]) -> Self {
        let net = LoopbackNetwork::new();
        let host_transport = net.endpoint();
        let (engine, host_log) = TestEngine::new(modded());
        let mut nodes = Vec::new();
        for (id, manifest) in clients {
            let transport = net.endpoint();
            transport.connect(&host_transport);
            let (engine, log) = TestEngine::new(manifest.clone());
            let node = Node::join(
                transport,
                config.clone(),
                Box::new(engine),
                *id,
                HOST,
                &format!("player-{}", id.0),
            );
            nodes.push((node, log));
        }
        let host = Node::host(
            host_transport,
            config,
            Box::new(engine.with_world(world_bytes)),
            HOST,
            "host",
        );
        Self {
            net,
            host,
            host_log,
            clients: nodes,
        }
    }

    /// Connects another client to the running host.
    fn add_client(&mut self, id: PeerId, manifest: Manifest, config: NodeConfig) {
        let transport = self.net.endpoint();
        transport.connect(self.host.transport());
        let (engine, log) = TestEngine::new(manifest);
        let node = Node::join(
            transport,
            config,
            Box::new(engine),
            id,
            HOST,
            &format!("player-{}", id.0),
        );
        self.clients.push((node, log));
    }

    fn run(&mut self, rounds: usize, now: Instant) {
        for _ in 0..rounds {
            self.host.tick(now);
            for (client, _) in &mut self.clients {
                client.tick(now);
            }
        }
    }

    fn host_events(&mut self) -> Vec<NodeEvent> {
        self.host.drain_events()
    }

    fn client_events(&mut self, i: usize) -> Vec<NodeEvent> {
        self.clients[i].0.drain_events()
    }
}

fn count(events: &[NodeEvent], pred: impl Fn(&NodeEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}

fn ready_counts(events: &[NodeEvent]) -> Vec<(u32, u32)> {
    events
        .iter()
        .filter_map(|e| match e {
            NodeEvent::ReadyStatus { ready, total, .. } => Some((*ready, *total)),
            _ => None,
        })
        .collect()
}

// =========================================================================
// Join and download
// =========================================================================

#[test]
fn test_join_approve_download_and_load() {
    let payload = world(300_000);
    let mut lobby = Lobby::new(payload.clone(), config(), &[(ALICE, modded())]);

    lobby.run(20, Instant::now());

    let client = lobby.client_events(0);
    assert_eq!(count(&client, |e| *e == NodeEvent::Admitted), 1);
    assert_eq!(
        count(&client, |e| matches!(e, NodeEvent::TransferCompleted { .. })),
        1
    );
    assert_eq!(count(&client, |e| *e == NodeEvent::AllClientsReady), 1);

    let percents: Vec<u8> = client
        .iter()
        .filter_map(|e| match e {
            NodeEvent::TransferProgress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect();
    assert!(percents.len() >= 2);
    assert!(percents[0] < 100);
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));

    let log = lobby.clients[0].1.lock().unwrap();
    let loaded = &log.loaded;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].0, "colony.sav");
    assert_eq!(loaded[0].1, payload);

    drop(log);

    let host = lobby.host_events();
    assert!(host.contains(&NodeEvent::PeerJoined { peer: ALICE }));
    assert!(host.contains(&NodeEvent::AllClientsSynced));
    assert!(host.contains(&NodeEvent::AllClientsReady));
    assert_eq!(lobby.host.admission_state(ALICE), Some(&AdmissionState::Approved));
    assert_eq!(lobby.host.sync_board().len(), 1);
    assert!(lobby.host_log.lock().unwrap().paused.ends_with(&[false]));
}

#[tokio::test(start_paused = true)]
async fn test_join_paced_by_tick_scheduler_completes() {
    let payload = world(200_000);
    let mut lobby = Lobby::new(payload.clone(), config(), &[(ALICE, modded())]);
    let mut scheduler = TickScheduler::new(TickConfig {
        initial_jitter_us: 0,
        ..TickConfig::with_rate(lobby.host.config().tick.rate_hz)
    });

    for _ in 0..30 {
        scheduler.wait_for_tick().await;
        lobby.run(1, tokio::time::Instant::now().into_std());
        scheduler.record_tick_end();
    }

    assert_eq!(scheduler.tick_count(), 30);
    assert_eq!(lobby.clients[0].1.lock().unwrap().loaded[0].1, payload);
}

// =========================================================================
// Admission
// =========================================================================

#[test]
fn test_rejected_client_gets_itemized_message_and_others_unaffected() {
    let outdated = Manifest::new("U52-600112")
        .with_entry(ManifestEntry::new("pipes.plus", "1.1"))
        .with_entry(ManifestEntry::new("better.lights", "0.9"));
    let mut lobby = Lobby::new(world(70_000), config(), &[(ALICE, modded()), (BOB, outdated)]);

    lobby.run(10, Instant::now());

    let bob = lobby.client_events(1);
    let message = bob
        .iter()
        .find_map(|e| match e {
            NodeEvent::Rejected { message } => Some(message.clone()),
            _ => None,
        })
        .expect("bob rejected");
    assert!(message.contains("Version mismatches (update these):"));
    assert!(message.contains("pipes.plus"));
    assert!(!bob.contains(&NodeEvent::Admitted));
    assert!(!lobby.clients[1].0.session().is_ready());
    assert!(lobby.clients[1].1.lock().unwrap().loaded.is_empty());

    let alice = lobby.client_events(0);
    assert!(alice.contains(&NodeEvent::Admitted));
    assert_eq!(count(&alice, |e| matches!(e, NodeEvent::Rejected { .. })), 0);

    let host = lobby.host_events();
    assert_eq!(
        count(&host, |e| matches!(e, NodeEvent::PeerRejected { peer, .. } if *peer == BOB)),
        1
    );
    assert!(lobby.host.session().connection_of(BOB).is_none());
    assert!(matches!(
        lobby.host.admission_state(BOB),
        Some(AdmissionState::Rejected { .. })
    ));
}

#[test]
fn test_verification_disabled_admits_any_manifest() {
    let mut cfg = config();
    cfg.admission.verification_enabled = false;
    let mut lobby = Lobby::new(world(1_000), cfg, &[(ALICE, Manifest::new("other-build"))]);

    lobby.run(8, Instant::now());

    assert!(lobby.client_events(0).contains(&NodeEvent::Admitted));
}

#[test]
fn test_lobby_full_rejects_extra_client() {
    let mut cfg = config();
    cfg.host.max_lobby_size = 2;
    let mut lobby = Lobby::new(world(1_000), cfg, &[(ALICE, modded()), (BOB, modded())]);

    lobby.run(8, Instant::now());

    assert!(lobby.client_events(0).contains(&NodeEvent::Admitted));
    let bob = lobby.client_events(1);
    assert!(bob.iter().any(|e| matches!(
        e,
        NodeEvent::Rejected { message } if message.contains("Lobby is full")
    )));
}

#[test]
fn test_unadmitted_connection_cannot_build() {
    let net = LoopbackNetwork::new();
    let host_transport = net.endpoint();
    let mut intruder = net.endpoint();
    let conn = intruder.connect(&host_transport);
    let (engine, host_log) = TestEngine::new(modded());
    let mut host = Node::host(host_transport, config(), Box::new(engine), HOST, "host");

    let build = Build {
        sender: PeerId(66),
        cell: 120,
        prefab: "Ladder".into(),
        orientation: 0,
    };
    intruder.poll(8);
    intruder
        .send(conn, &encode(&build), Reliability::Reliable)
        .unwrap();
    host.tick(Instant::now());
    host.tick(Instant::now());

    assert!(host_log.lock().unwrap().builds.is_empty());
}

// =========================================================================
// Gate and decoding
// =========================================================================

#[test]
fn test_closed_gate_suppresses_dispatch() {
    let net = LoopbackNetwork::new();
    let (engine, log) = TestEngine::new(modded());
    let mut client = Node::join(net.endpoint(), config(), Box::new(engine), ALICE, HOST, "alice");

    client.handle_incoming(ConnectionId::new(9), &encode(&HardSync), Instant::now());

    assert!(client.drain_events().is_empty());
    assert!(log.lock().unwrap().paused.is_empty());
}

#[test]
fn test_garbage_message_is_dropped_and_session_continues() {
    let payload = world(1_000);
    let mut lobby = Lobby::new(payload.clone(), config(), &[(ALICE, modded())]);
    lobby.run(3, Instant::now());

    let conn = lobby.host.session().connection_of(ALICE).unwrap();
    lobby.host.handle_incoming(conn, &[200, 1, 2, 3], Instant::now());
    lobby.host.handle_incoming(conn, &[], Instant::now());

    lobby.run(10, Instant::now());
    assert_eq!(lobby.clients[0].1.lock().unwrap().loaded[0].1, payload);
}

// =========================================================================
// Relay
// =========================================================================

#[test]
fn test_chat_relayed_to_others_but_not_back_to_sender() {
    let mut lobby = Lobby::new(world(1_000), config(), &[(ALICE, modded()), (BOB, modded())]);
    let now = Instant::now();
    lobby.run(12, now);

    let hello = ChatMessage {
        sender: ALICE,
        text: "dig here".into(),
    };
    assert_eq!(lobby.clients[0].0.publish(&hello), 1);
    lobby.run(3, now);

    assert_eq!(lobby.host_log.lock().unwrap().chats, vec![hello.clone()]);
    assert_eq!(lobby.clients[1].1.lock().unwrap().chats, vec![hello]);
    assert!(lobby.clients[0].1.lock().unwrap().chats.is_empty());
}

#[test]
fn test_host_build_reaches_every_client() {
    let mut lobby = Lobby::new(world(1_000), config(), &[(ALICE, modded()), (BOB, modded())]);
    let now = Instant::now();
    lobby.run(12, now);

    let build = Build {
        sender: HOST,
        cell: 4_410,
        prefab: "GasPump".into(),
        orientation: 2,
    };
    assert_eq!(lobby.host.publish(&build), 2);
    lobby.run(2, now);

    for (_, log) in &lobby.clients {
        assert_eq!(log.lock().unwrap().builds, vec![build.clone()]);
    }
    assert!(lobby.host_log.lock().unwrap().builds.is_empty());
}

// =========================================================================
// Hard sync and stalls
// =========================================================================

#[test]
fn test_hard_sync_makes_client_download_again() {
    let payload = world(150_000);
    let mut lobby = Lobby::new(payload.clone(), config(), &[(ALICE, modded())]);
    let now = Instant::now();
    lobby.run(15, now);
    assert_eq!(lobby.clients[0].1.lock().unwrap().loaded.len(), 1);
    lobby.client_events(0);

    assert_eq!(lobby.host.hard_sync().unwrap(), 1);
    lobby.run(1, now);
    assert!(lobby.client_events(0).contains(&NodeEvent::HardSyncStarted));
    assert!(!lobby.clients[0].0.session().is_ready());

    lobby.run(15, now);

    let log = lobby.clients[0].1.lock().unwrap();
    let loaded = &log.loaded;
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[1].1, payload);
    assert!(lobby.host.drain_events().contains(&NodeEvent::AllClientsReady));
}

#[test]
fn test_hard_sync_completes_and_unpauses_everyone() {
    let mut lobby = Lobby::new(world(100_000), config(), &[(ALICE, modded()), (BOB, modded())]);
    let now = Instant::now();
    lobby.run(15, now);
    lobby.host_events();
    lobby.client_events(0);

    assert_eq!(lobby.host.hard_sync().unwrap(), 2);
    assert_eq!(lobby.host_log.lock().unwrap().paused.last(), Some(&true));
    lobby.run(20, now);

    let host = lobby.host_events();
    assert_eq!(count(&host, |e| *e == NodeEvent::HardSyncCompleted), 1);
    assert_eq!(ready_counts(&host).last(), Some(&(3, 3)));
    assert_eq!(lobby.host_log.lock().unwrap().paused.last(), Some(&false));

    let alice = lobby.client_events(0);
    assert!(alice.contains(&NodeEvent::HardSyncCompleted));
    assert_eq!(lobby.clients[0].1.lock().unwrap().paused.last(), Some(&false));
}

#[test]
fn test_hard_sync_with_no_clients_resumes_at_once() {
    let net = LoopbackNetwork::new();
    let (engine, log) = TestEngine::new(modded());
    let mut host = Node::host(net.endpoint(), config(), Box::new(engine), HOST, "host");

    assert_eq!(host.hard_sync().unwrap(), 0);

    let events = host.drain_events();
    assert!(events.contains(&NodeEvent::HardSyncCompleted));
    assert_eq!(log.lock().unwrap().paused, vec![true, false]);
}

#[test]
fn test_hard_sync_on_client_is_wrong_role() {
    let net = LoopbackNetwork::new();
    let mut client = Node::join(net.endpoint(), config(), Box::new(NullHooks), ALICE, HOST, "a");
    assert!(matches!(
        client.hard_sync(),
        Err(ColonylinkError::WrongRole("host"))
    ));
}

#[test]
fn test_stalled_download_is_requested_again_in_full() {
    // 14 chunks of 64 KiB; 2 go out per tick.
    let chunk = 64 * 1024;
    let payload = world(14 * chunk - 100);
    let mut cfg = config();
    cfg.transfer.chunk_size_kb = 64;
    let mut lobby = Lobby::new(payload.clone(), cfg, &[(ALICE, modded())]);
    let start = Instant::now();

    // Handshake (2 rounds), request (1 round), then 3 rounds of chunks.
    lobby.run(5, start);
    lobby.host.transport().set_congested(true);
    lobby.run(1, start);

    let mut resent = false;
    for step in 1..=20u64 {
        lobby.run(1, start + Duration::from_secs(5 * step));
        if lobby
            .client_events(0)
            .iter()
            .any(|e| matches!(e, NodeEvent::ResendRequested { .. }))
        {
            resent = true;
            break;
        }
    }
    assert!(resent, "no resend after stall");
    assert!(lobby.clients[0].0.downloads_in_flight().is_empty());

    lobby.host.transport().set_congested(false);
    let later = start + Duration::from_secs(200);
    lobby.run(20, later);

    let log = lobby.clients[0].1.lock().unwrap();
    let loaded = &log.loaded;
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].1, payload);
}

// =========================================================================
// Batching
// =========================================================================

#[test]
fn test_batched_cell_updates_flush_on_interval() {
    use colonylink::protocol::CellUpdate;

    let mut lobby = Lobby::new(world(1_000), config(), &[(ALICE, modded())]);
    let start = Instant::now();
    lobby.run(12, start);

    let batches = lobby.host.batches();
    batches.world.extend((0..200).map(|cell| CellUpdate {
        cell,
        element: 3,
        temperature: 293.0,
        mass: 10.0,
    }));
    lobby.run(1, start + Duration::from_secs(1));
    assert_eq!(batches.world.len(), 200);

    lobby.run(1, start + Duration::from_secs(11));
    assert!(batches.world.is_empty());
}

#[test]
fn test_client_cannot_queue_batches() {
    let mut lobby = Lobby::new(world(1_000), config(), &[(ALICE, modded())]);
    lobby.run(2, Instant::now());
    let batches = lobby.clients[0].0.batches();
    assert!(!batches.instantiations.push(colonylink::protocol::Instantiation {
        prefab: "Dupe".into(),
        cell: 1,
        net_id: 7,
    }));
}

// =========================================================================
// Ready status
// =========================================================================

#[test]
fn test_ready_status_counts_host_and_clients() {
    let mut lobby = Lobby::new(world(1_000), config(), &[(ALICE, modded()), (BOB, modded())]);
    lobby.run(12, Instant::now());

    let host = lobby.host_events();
    let counts = ready_counts(&host);
    assert!(counts.contains(&(1, 3)), "{counts:?}");
    assert_eq!(counts.last(), Some(&(3, 3)));
    let last = host
        .iter()
        .rev()
        .find_map(|e| match e {
            NodeEvent::ReadyStatus { message, .. } => Some(message.clone()),
            _ => None,
        })
        .unwrap();
    assert!(last.starts_with("Waiting for players (3/3 ready)..."));
    assert!(last.contains("host: Ready"));

    let alice = lobby.client_events(0);
    assert!(alice.iter().any(|e| matches!(
        e,
        NodeEvent::ReadyStatus { message, .. } if message.contains("Loading")
    )));
}

// =========================================================================
// Transfer limits and departures
// =========================================================================

#[test]
fn test_chunk_size_at_reliable_ceiling_still_delivers_world() {
    let payload = world(1_200_000);
    let mut cfg = config();
    cfg.transfer.chunk_size_kb = 512;
    cfg.limits.reliable_max_bytes = 512 * 1024;
    let mut lobby = Lobby::new(payload.clone(), cfg, &[(ALICE, modded())]);

    lobby.run(20, Instant::now());

    let host = lobby.host_events();
    assert_eq!(count(&host, |e| matches!(e, NodeEvent::TransferFailed { .. })), 0);
    assert!(host.contains(&NodeEvent::AllClientsReady));
    let log = lobby.clients[0].1.lock().unwrap();
    assert_eq!(log.loaded.len(), 1);
    assert_eq!(log.loaded[0].1, payload);
}

#[test]
fn test_chunk_size_varied_against_ceiling_always_completes() {
    let payload = world(700_000);
    for (chunk_size_kb, reliable_max_bytes) in [(64, 1_200), (300, 256 * 1024), (1024, 600_000)] {
        let mut cfg = config();
        cfg.transfer.chunk_size_kb = chunk_size_kb;
        cfg.limits.reliable_max_bytes = reliable_max_bytes;
        let mut lobby = Lobby::new(payload.clone(), cfg, &[(ALICE, modded())]);

        lobby.run(30, Instant::now());

        let log = lobby.clients[0].1.lock().unwrap();
        assert_eq!(
            log.loaded.len(),
            1,
            "chunk {chunk_size_kb} KiB, ceiling {reliable_max_bytes}"
        );
        assert_eq!(log.loaded[0].1, payload);
    }
}

#[test]
fn test_client_leaving_mid_download_lets_host_resume() {
    // 31 chunks of 64 KiB, one per tick.
    let mut cfg = config();
    cfg.transfer.chunk_size_kb = 64;
    cfg.transfer.chunks_per_tick = 1;
    let mut lobby = Lobby::new(world(2_000_000), cfg.clone(), &[(ALICE, modded())]);
    let now = Instant::now();

    lobby.run(45, now);
    assert_eq!(lobby.clients[0].1.lock().unwrap().loaded.len(), 1);
    assert_eq!(lobby.host_log.lock().unwrap().paused.last(), Some(&false));

    lobby.add_client(BOB, modded(), cfg);
    lobby.run(6, now);
    assert!(lobby.host.is_sending_to(BOB));
    assert!(!lobby.clients[1].0.downloads_in_flight().is_empty());
    assert_eq!(lobby.host_log.lock().unwrap().paused.last(), Some(&true));
    lobby.host_events();
    lobby.client_events(0);

    lobby.clients[1].0.leave();
    lobby.run(2, now);

    let host = lobby.host_events();
    assert!(host.contains(&NodeEvent::PeerLeft { peer: BOB }));
    assert!(host.contains(&NodeEvent::AllClientsReady));
    assert!(!lobby.host.is_sending_to(BOB));
    assert_eq!(lobby.host_log.lock().unwrap().paused.last(), Some(&false));

    let alice = lobby.client_events(0);
    assert!(alice.contains(&NodeEvent::AllClientsReady));
    assert_eq!(ready_counts(&alice).last(), Some(&(2, 2)));
}
