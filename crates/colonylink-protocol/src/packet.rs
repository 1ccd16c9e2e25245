//! The packet abstraction.
//!
//! Packet types implement [`PacketBody`]: a stable tag, a name for logs,
//! a default reliability class and the field order of the body. Everything
//! else goes through the object-safe [`Packet`] trait, which a blanket impl
//! provides for every `PacketBody`, so that heterogeneous packets can travel
//! as `Box<dyn Packet>` between the registry and the dispatcher.

use std::any::{Any, TypeId};
use std::fmt;

use colonylink_transport::Reliability;

use crate::wire::{WireReader, WireWriter};
use crate::{PacketType, ProtocolError};

/// A concrete, statically known packet type.
///
/// `Default` is the zero-argument factory the registry uses for
/// [`PacketRegistry::create`](crate::PacketRegistry::create).
pub trait PacketBody: Default + fmt::Debug + Send + 'static {
    /// Wire tag. Unique across the catalogue.
    const TYPE: PacketType;

    /// Human-readable name used in logs.
    const NAME: &'static str;

    /// Class used when a caller does not choose one explicitly.
    const RELIABILITY: Reliability = Reliability::Reliable;

    /// Writes the body fields in their fixed order.
    fn write(&self, w: &mut WireWriter);

    /// Reads the body fields in the same order as [`write`](Self::write).
    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError>;

    /// Rejects field values [`write`](Self::write) cannot frame faithfully.
    /// Runs before every registry encode.
    fn check(&self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Object-safe view of any packet.
pub trait Packet: fmt::Debug + Send + 'static {
    fn packet_type(&self) -> PacketType;

    fn name(&self) -> &'static str;

    fn default_reliability(&self) -> Reliability;

    fn write_body(&self, w: &mut WireWriter);

    fn check_body(&self) -> Result<(), ProtocolError>;

    /// `TypeId` of the concrete type, for the registry's inverse map.
    fn concrete_type_id(&self) -> TypeId;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<P: PacketBody> Packet for P {
    fn packet_type(&self) -> PacketType {
        P::TYPE
    }

    fn name(&self) -> &'static str {
        P::NAME
    }

    fn default_reliability(&self) -> Reliability {
        P::RELIABILITY
    }

    fn write_body(&self, w: &mut WireWriter) {
        self.write(w);
    }

    fn check_body(&self) -> Result<(), ProtocolError> {
        PacketBody::check(self)
    }

    fn concrete_type_id(&self) -> TypeId {
        TypeId::of::<P>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

impl dyn Packet {
    /// Borrows the packet as `P` when that is its concrete type.
    pub fn downcast_ref<P: PacketBody>(&self) -> Option<&P> {
        self.as_any().downcast_ref::<P>()
    }

    /// Takes the packet as `P`, or `None` when it is some other type.
    pub fn downcast<P: PacketBody>(self: Box<Self>) -> Option<P> {
        self.into_any().downcast::<P>().ok().map(|p| *p)
    }
}
