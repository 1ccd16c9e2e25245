//! A two-process LAN session over WebSocket.
//!
//! ```text
//! lan-session host [bind-addr]
//! lan-session join <host-addr> <peer-id> [name]
//! ```

use std::time::Instant;

use bytes::Bytes;
use colonylink::prelude::*;
use colonylink::protocol::{CellRegion, ChatMessage};
use colonylink::{CONFIG_FILE_NAME, logging};
use colonylink_transport::WebSocketTransport;

const HOST_ID: PeerId = PeerId(1);
const BUILD: &str = "lan-demo-1";
const WORLD_SIZE: usize = 256 * 1024;

// ---------------------------------------------------------------------------
// Demo world
// ---------------------------------------------------------------------------

/// A world that is just a byte pattern, enough to exercise a download.
struct DemoWorld {
    name: String,
    bytes: Bytes,
    paused: bool,
}

impl DemoWorld {
    fn generated(name: &str) -> Self {
        let bytes: Vec<u8> = (0..WORLD_SIZE).map(|i| (i % 251) as u8).collect();
        Self {
            name: name.to_string(),
            bytes: Bytes::from(bytes),
            paused: false,
        }
    }

    fn empty() -> Self {
        Self {
            name: String::new(),
            bytes: Bytes::new(),
            paused: false,
        }
    }
}

impl EngineHooks for DemoWorld {
    fn world_snapshot(&mut self) -> Result<WorldSnapshot, HookError> {
        if self.bytes.is_empty() {
            return Err(HookError::new("no world loaded"));
        }
        Ok(WorldSnapshot {
            name: self.name.clone(),
            bytes: self.bytes.clone(),
        })
    }

    fn apply_region(&mut self, region: &CellRegion) -> Result<(), HookError> {
        tracing::debug!(cells = region.cells.len(), "region applied");
        Ok(())
    }

    fn begin_load(&mut self, name: &str, bytes: Bytes) -> Result<(), HookError> {
        tracing::info!(name, len = bytes.len(), "world loaded");
        self.name = name.to_string();
        self.bytes = bytes;
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            tracing::info!(paused, "simulation speed changed");
        }
        self.paused = paused;
    }

    fn local_manifest(&self) -> Result<Manifest, HookError> {
        Ok(Manifest::new(BUILD)
            .with_entry(ManifestEntry::new("lan.demo", "1.0.0").titled("LAN Demo")))
    }

    fn on_chat(&mut self, message: &ChatMessage) {
        println!("[{}] {}", message.sender, message.text);
    }
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

/// Ticks `node` at the configured rate until Ctrl-C.
async fn run<T: Transport>(mut node: Node<T>) {
    let mut ticks = TickScheduler::new(node.config().tick.scheduler_config());
    let mut greeted = node.session().is_host();

    loop {
        tokio::select! {
            _ = ticks.wait_for_tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        node.tick(Instant::now());
        for event in node.drain_events() {
            match &event {
                NodeEvent::ReadyStatus { message, .. } => println!("{message}"),
                _ => println!("{event:?}"),
            }
            if matches!(event, NodeEvent::WorldLoaded { .. }) && !greeted {
                greeted = true;
                let hello = ChatMessage {
                    sender: node.session().local_id(),
                    text: format!("{} is in", node.session().local_name()),
                };
                node.publish(&hello);
            }
        }

        if node.session().is_host() && ticks.tick_count() % 30 == 0 {
            for line in node.sync_board() {
                println!("  {line}");
            }
        }
        ticks.record_tick_end();
    }

    node.leave();
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init("info,colonylink=debug");
    let config = NodeConfig::load_or_create(CONFIG_FILE_NAME)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("host") => {
            let addr = args.get(1).map_or("0.0.0.0:7777", String::as_str);
            let transport = WebSocketTransport::bind(addr).await?;
            eprintln!("hosting on {addr}");
            let node = Node::host(
                transport,
                config,
                Box::new(DemoWorld::generated("colony")),
                HOST_ID,
                "host",
            );
            run(node).await;
        }
        Some("join") => {
            let (Some(addr), Some(id)) = (args.get(1), args.get(2)) else {
                return Err("usage: lan-session join <host-addr> <peer-id> [name]".into());
            };
            let local = PeerId(id.parse()?);
            let name = args.get(3).cloned().unwrap_or_else(|| local.to_string());
            let mut transport = WebSocketTransport::new();
            transport.connect(addr).await?;
            eprintln!("joining {addr} as {local}");
            let node = Node::join(
                transport,
                config,
                Box::new(DemoWorld::empty()),
                local,
                HOST_ID,
                &name,
            );
            run(node).await;
        }
        _ => {
            return Err(
                "usage: lan-session host [bind-addr] | join <host-addr> <peer-id> [name]".into(),
            );
        }
    }
    Ok(())
}
