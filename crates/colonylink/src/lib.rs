//! # colonylink
//!
//! Host-authoritative replication for a simulation shared by a handful of
//! players. One host owns the world; clients download it, stay in step
//! through relayed actions and batched deltas, and are admitted only when
//! their installation matches the host's.
//!
//! The engine itself is reached through [`EngineHooks`]. Everything else,
//! from the admission handshake to chunked save transfer, runs inside
//! [`Node::tick`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use colonylink::prelude::*;
//!
//! let net = LoopbackNetwork::new();
//! let mut host = Node::host(
//!     net.endpoint(),
//!     NodeConfig::default(),
//!     Box::new(NullHooks),
//!     PeerId(1),
//!     "host",
//! );
//! // loop { host.tick(std::time::Instant::now()); }
//! # let _ = host.drain_events();
//! ```

mod batch;
mod config;
mod dispatch;
mod error;
mod hooks;
pub mod logging;
mod node;
mod reactions;
mod sender;

pub use batch::{
    Batchable, Batcher, Batches, InstantiationBatcher, WorldUpdateBatcher, max_items_for,
};
pub use config::{
    AdmissionConfig, BatchConfig, CONFIG_FILE_NAME, ClientSettings, ConfigError, HostSettings,
    NodeConfig, SizeLimits, TickSettings,
};
pub use dispatch::{Context, Dispatcher, Reaction};
pub use error::ColonylinkError;
pub use hooks::{EngineHooks, HookError, NullHooks, WorldSnapshot};
pub use node::{Continuation, HARD_SYNC_DELAY_TICKS, Node, NodeEvent, NodeState};
pub use sender::{SendOutcome, Sender};

pub use colonylink_protocol as protocol;
pub use colonylink_session as session;
pub use colonylink_tick as tick;
pub use colonylink_transfer as transfer;
pub use colonylink_transport as transport;

pub mod prelude {
    pub use crate::{
        ColonylinkError, EngineHooks, HookError, Node, NodeConfig, NodeEvent, NullHooks, Reaction,
        WorldSnapshot,
    };
    pub use colonylink_protocol::{PacketBody, PeerId, ReadyState, Reliability};
    pub use colonylink_session::{Manifest, ManifestEntry};
    pub use colonylink_tick::{TickConfig, TickScheduler};
    pub use colonylink_transport::{LoopbackNetwork, Transport, TransportEvent};
}
