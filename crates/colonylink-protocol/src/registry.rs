//! The packet registry: a bijection between wire tags and Rust types.
//!
//! The registry answers two questions:
//!
//! - *"What is tag 10?"*: used when bytes arrive ([`PacketRegistry::decode`],
//!   [`PacketRegistry::create`]).
//! - *"What tag does `SaveFileChunk` use?"*: used before bytes leave
//!   ([`PacketRegistry::encode`], [`PacketRegistry::packet_type_of`]).
//!
//! The catalogue is open: code outside this crate implements
//! [`PacketBody`] for its own types and calls [`PacketRegistry::register`]
//! on the same registry.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;

use crate::wire::WireReader;
use crate::{Packet, PacketBody, PacketType, ProtocolError, codec};

type CreateFn = fn() -> Box<dyn Packet>;
type DecodeFn = fn(&mut WireReader<'_>) -> Result<Box<dyn Packet>, ProtocolError>;

struct Entry {
    name: &'static str,
    type_id: TypeId,
    create: CreateFn,
    decode: DecodeFn,
}

fn create_packet<P: PacketBody>() -> Box<dyn Packet> {
    Box::new(P::default())
}

fn decode_packet<P: PacketBody>(r: &mut WireReader<'_>) -> Result<Box<dyn Packet>, ProtocolError> {
    Ok(Box::new(P::read(r)?))
}

/// Maps packet tags to factories and back.
#[derive(Default)]
pub struct PacketRegistry {
    // BTreeMap keeps iteration sorted by tag, which keeps logs stable.
    entries: BTreeMap<PacketType, Entry>,
    by_type: HashMap<TypeId, PacketType>,
}

impl PacketRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the full built-in catalogue.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_defaults();
        registry
    }

    /// Installs `P` under `P::TYPE`.
    ///
    /// Registering the same type again is a no-op. Registering a different
    /// type under an occupied tag, or `P` under a second tag, is rejected so
    /// the mapping never becomes ambiguous.
    pub fn register<P: PacketBody>(&mut self) -> Result<(), ProtocolError> {
        let type_id = TypeId::of::<P>();

        if let Some(existing) = self.entries.get(&P::TYPE) {
            if existing.type_id == type_id {
                return Ok(());
            }
            return Err(ProtocolError::RegistryConflict(format!(
                "tag {} already belongs to `{}`, cannot register `{}`",
                P::TYPE,
                existing.name,
                P::NAME
            )));
        }
        if let Some(other) = self.by_type.get(&type_id) {
            return Err(ProtocolError::RegistryConflict(format!(
                "`{}` is already registered under tag {other}",
                P::NAME
            )));
        }

        self.entries.insert(
            P::TYPE,
            Entry {
                name: P::NAME,
                type_id,
                create: create_packet::<P>,
                decode: decode_packet::<P>,
            },
        );
        self.by_type.insert(type_id, P::TYPE);
        tracing::trace!(packet = P::NAME, tag = %P::TYPE, "packet registered");
        Ok(())
    }

    /// Returns a default-constructed instance of the packet behind `ty`.
    pub fn create(&self, ty: PacketType) -> Result<Box<dyn Packet>, ProtocolError> {
        self.entries
            .get(&ty)
            .map(|entry| (entry.create)())
            .ok_or(ProtocolError::UnknownType(ty))
    }

    /// The tag `P` was registered under.
    pub fn packet_type_of<P: PacketBody>(&self) -> Result<PacketType, ProtocolError> {
        self.by_type
            .get(&TypeId::of::<P>())
            .copied()
            .ok_or(ProtocolError::NotRegistered(P::NAME))
    }

    /// The tag a boxed packet's concrete type was registered under.
    pub fn type_of(&self, packet: &dyn Packet) -> Result<PacketType, ProtocolError> {
        self.by_type
            .get(&packet.concrete_type_id())
            .copied()
            .ok_or(ProtocolError::NotRegistered(packet.name()))
    }

    /// Frames a packet after checking that its type is registered and its
    /// fields can be written as declared.
    pub fn encode(&self, packet: &dyn Packet) -> Result<Bytes, ProtocolError> {
        self.type_of(packet)?;
        packet.check_body()?;
        Ok(codec::encode(packet))
    }

    /// Decodes one whole message. The body must consume every byte after
    /// the tag.
    pub fn decode(&self, bytes: &[u8]) -> Result<Box<dyn Packet>, ProtocolError> {
        let mut r = WireReader::new(bytes);
        let ty = PacketType(r.get_u8()?);
        let entry = self.entries.get(&ty).ok_or(ProtocolError::UnknownType(ty))?;
        let packet = (entry.decode)(&mut r)?;
        r.finish()?;
        Ok(packet)
    }

    pub fn name_of(&self, ty: PacketType) -> Option<&'static str> {
        self.entries.get(&ty).map(|entry| entry.name)
    }

    pub fn contains(&self, ty: PacketType) -> bool {
        self.entries.contains_key(&ty)
    }

    /// Registered tags in ascending order.
    pub fn types(&self) -> impl Iterator<Item = PacketType> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Installs the built-in catalogue.
    ///
    /// A failing entry is logged and skipped; startup carries on with the
    /// rest of the catalogue.
    pub fn register_defaults(&mut self) {
        use crate::*;

        let results = [
            self.register::<ChatMessage>(),
            self.register::<EntityPosition>(),
            self.register::<WorldData>(),
            self.register::<WorldUpdateBatch>(),
            self.register::<InstantiationBatch>(),
            self.register::<SaveFileRequest>(),
            self.register::<SaveFileChunk>(),
            self.register::<Build>(),
            self.register::<Deconstruct>(),
            self.register::<ClientReadyStatus>(),
            self.register::<AllClientsReady>(),
            self.register::<ReadyStatusUpdate>(),
            self.register::<HardSync>(),
            self.register::<HardSyncComplete>(),
            self.register::<SpeedChange>(),
            self.register::<ManifestRequest>(),
            self.register::<ManifestOffer>(),
            self.register::<AdmissionVerdict>(),
            self.register::<SyncProgress>(),
        ];
        for result in results {
            if let Err(e) = result {
                tracing::error!(error = %e, "failed to register built-in packet");
            }
        }
        tracing::debug!(count = self.len(), "packet catalogue registered");
    }
}

impl std::fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(ty, e)| (ty, e.name)))
            .finish()
    }
}
