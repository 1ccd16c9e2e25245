//! Wire protocol for colonylink.
//!
//! This crate defines the "language" host and clients speak:
//!
//! - **Wire primitives** ([`WireWriter`], [`WireReader`]): little-endian
//!   fixed-width numbers and length-prefixed strings, blobs and lists.
//! - **Packets** ([`PacketBody`], [`Packet`]): a one-byte [`PacketType`]
//!   tag followed by a body in fixed field order.
//! - **Registry** ([`PacketRegistry`]): tag ↔ type bijection used to
//!   decode incoming bytes and to validate outgoing packets.
//! - **Catalogue**: the built-in packet set, grouped by concern.
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → Protocol (Box<dyn Packet>) → Dispatcher (reactions)
//! ```
//!
//! Nothing in here knows about sessions or connections. It only turns
//! packets into bytes and back.

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod admission;
mod codec;
mod control;
mod error;
mod packet;
mod registry;
mod transfer;
mod types;
pub mod wire;
mod world;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use admission::{AdmissionVerdict, ManifestOffer, ManifestRequest, OfferedEntry};
pub use codec::{HEADER_LEN, encode, peek_type};
pub use control::{
    AllClientsReady, ClientReadyStatus, HardSync, HardSyncComplete, ReadyState, ReadyStatusUpdate,
};
pub use error::ProtocolError;
pub use packet::{Packet, PacketBody};
pub use registry::PacketRegistry;
pub use transfer::{SaveFileChunk, SaveFileRequest, SyncProgress};
pub use types::{PacketType, PeerId};
pub use wire::{WireItem, WireReader, WireWriter};
pub use world::{
    Build, Cell, CellRegion, CellUpdate, ChatMessage, Deconstruct, EntityPosition, Instantiation,
    InstantiationBatch, SpeedChange, WorldData, WorldUpdateBatch,
};

// Packets carry a default class; callers pick per send.
pub use colonylink_transport::Reliability;
