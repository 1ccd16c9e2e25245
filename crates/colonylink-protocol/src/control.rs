//! Session control packets: readiness and forced resynchronization.

use crate::wire::{WireReader, WireWriter};
use crate::{PacketBody, PacketType, PeerId, ProtocolError};

/// Whether a client has finished loading the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyState {
    #[default]
    Unready,
    Ready,
}

impl ReadyState {
    fn to_wire(self) -> u8 {
        match self {
            Self::Unready => 0,
            Self::Ready => 1,
        }
    }

    fn from_wire(v: u8) -> Result<Self, ProtocolError> {
        match v {
            0 => Ok(Self::Unready),
            1 => Ok(Self::Ready),
            other => Err(ProtocolError::malformed("state", format!("unknown ready state {other}"))),
        }
    }
}

/// Client → host: my ready state changed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientReadyStatus {
    pub sender: PeerId,
    pub state: ReadyState,
}

impl PacketBody for ClientReadyStatus {
    const TYPE: PacketType = PacketType::CLIENT_READY_STATUS;
    const NAME: &'static str = "ClientReadyStatus";

    fn write(&self, w: &mut WireWriter) {
        w.put_peer(self.sender);
        w.put_u8(self.state.to_wire());
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            sender: r.get_peer()?,
            state: ReadyState::from_wire(r.get_u8()?)?,
        })
    }
}

/// Host → clients: everyone has loaded; the clock may run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllClientsReady;

impl PacketBody for AllClientsReady {
    const TYPE: PacketType = PacketType::ALL_CLIENTS_READY;
    const NAME: &'static str = "AllClientsReady";

    fn write(&self, _: &mut WireWriter) {}

    fn read(_: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}

/// Host → clients: how many players have loaded, with a printable
/// per-player summary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadyStatusUpdate {
    pub ready: u32,
    pub total: u32,
    pub message: String,
}

impl PacketBody for ReadyStatusUpdate {
    const TYPE: PacketType = PacketType::READY_STATUS_UPDATE;
    const NAME: &'static str = "ReadyStatusUpdate";

    fn write(&self, w: &mut WireWriter) {
        w.put_u32(self.ready);
        w.put_u32(self.total);
        w.put_str(&self.message);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let update = Self {
            ready: r.get_u32()?,
            total: r.get_u32()?,
            message: r.get_str("message")?,
        };
        if update.ready > update.total {
            return Err(ProtocolError::malformed(
                "ready",
                format!("{} ready out of {}", update.ready, update.total),
            ));
        }
        Ok(update)
    }
}

/// Host → clients: drop local state and download the world again.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HardSync;

impl PacketBody for HardSync {
    const TYPE: PacketType = PacketType::HARD_SYNC;
    const NAME: &'static str = "HardSync";

    fn write(&self, _: &mut WireWriter) {}

    fn read(_: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}

/// Host → clients: every client reloaded after a hard sync.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HardSyncComplete;

impl PacketBody for HardSyncComplete {
    const TYPE: PacketType = PacketType::HARD_SYNC_COMPLETE;
    const NAME: &'static str = "HardSyncComplete";

    fn write(&self, _: &mut WireWriter) {}

    fn read(_: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self)
    }
}
