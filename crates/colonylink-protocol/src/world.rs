//! World-state packets: cell data, entity deltas and player actions.
//!
//! Bodies here are engine payloads. The protocol layer only frames them;
//! what a cell or a prefab means is up to the engine behind the hooks.

use colonylink_transport::Reliability;

use crate::wire::{LENGTH_PREFIX, WireItem, WireReader, WireWriter};
use crate::{PacketBody, PacketType, PeerId, ProtocolError};

// ---------------------------------------------------------------------------
// Player actions (host-relayed)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatMessage {
    pub sender: PeerId,
    pub text: String,
}

impl PacketBody for ChatMessage {
    const TYPE: PacketType = PacketType::CHAT_MESSAGE;
    const NAME: &'static str = "ChatMessage";

    fn write(&self, w: &mut WireWriter) {
        w.put_peer(self.sender);
        w.put_str(&self.text);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            sender: r.get_peer()?,
            text: r.get_str("text")?,
        })
    }
}

/// A building placed by `sender`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Build {
    pub sender: PeerId,
    pub cell: i32,
    pub prefab: String,
    pub orientation: u8,
}

impl PacketBody for Build {
    const TYPE: PacketType = PacketType::BUILD;
    const NAME: &'static str = "Build";

    fn write(&self, w: &mut WireWriter) {
        w.put_peer(self.sender);
        w.put_i32(self.cell);
        w.put_str(&self.prefab);
        w.put_u8(self.orientation);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            sender: r.get_peer()?,
            cell: r.get_i32()?,
            prefab: r.get_str("prefab")?,
            orientation: r.get_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Deconstruct {
    pub sender: PeerId,
    pub cell: i32,
}

impl PacketBody for Deconstruct {
    const TYPE: PacketType = PacketType::DECONSTRUCT;
    const NAME: &'static str = "Deconstruct";

    fn write(&self, w: &mut WireWriter) {
        w.put_peer(self.sender);
        w.put_i32(self.cell);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            sender: r.get_peer()?,
            cell: r.get_i32()?,
        })
    }
}

/// Simulation speed. `0` pauses the clock.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpeedChange {
    pub speed: u8,
}

impl SpeedChange {
    pub const PAUSED: u8 = 0;

    pub fn is_paused(&self) -> bool {
        self.speed == Self::PAUSED
    }
}

impl PacketBody for SpeedChange {
    const TYPE: PacketType = PacketType::SPEED_CHANGE;
    const NAME: &'static str = "SpeedChange";

    fn write(&self, w: &mut WireWriter) {
        w.put_u8(self.speed);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self { speed: r.get_u8()? })
    }
}

// ---------------------------------------------------------------------------
// High-frequency deltas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityPosition {
    pub net_id: i32,
    pub x: f32,
    pub y: f32,
    pub facing_left: bool,
}

impl PacketBody for EntityPosition {
    const TYPE: PacketType = PacketType::ENTITY_POSITION;
    const NAME: &'static str = "EntityPosition";
    const RELIABILITY: Reliability = Reliability::Unreliable;

    fn write(&self, w: &mut WireWriter) {
        w.put_i32(self.net_id);
        w.put_f32(self.x);
        w.put_f32(self.y);
        w.put_bool(self.facing_left);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            net_id: r.get_i32()?,
            x: r.get_f32()?,
            y: r.get_f32()?,
            facing_left: r.get_bool("facing_left")?,
        })
    }
}

/// A single cell's new contents.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellUpdate {
    pub cell: i32,
    pub element: u16,
    pub temperature: f32,
    pub mass: f32,
}

impl CellUpdate {
    pub const WIRE_SIZE: usize = 4 + 2 + 4 + 4;
}

impl WireItem for CellUpdate {
    const MIN_WIRE_SIZE: usize = Self::WIRE_SIZE;

    fn write_to(&self, w: &mut WireWriter) {
        w.put_i32(self.cell);
        w.put_u16(self.element);
        w.put_f32(self.temperature);
        w.put_f32(self.mass);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            cell: r.get_i32()?,
            element: r.get_u16()?,
            temperature: r.get_f32()?,
            mass: r.get_f32()?,
        })
    }

    fn wire_len(&self) -> usize {
        Self::WIRE_SIZE
    }
}

/// Coalesced cell changes, flushed by the host's world-update batcher.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldUpdateBatch {
    pub updates: Vec<CellUpdate>,
}

impl PacketBody for WorldUpdateBatch {
    const TYPE: PacketType = PacketType::WORLD_UPDATE_BATCH;
    const NAME: &'static str = "WorldUpdateBatch";
    const RELIABILITY: Reliability = Reliability::Unreliable;

    fn write(&self, w: &mut WireWriter) {
        w.put_list(&self.updates);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            updates: r.get_list()?,
        })
    }
}

/// A prefab spawned at a cell.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Instantiation {
    pub prefab: String,
    pub cell: i32,
    pub net_id: i32,
}

impl WireItem for Instantiation {
    const MIN_WIRE_SIZE: usize = LENGTH_PREFIX + 8;

    fn write_to(&self, w: &mut WireWriter) {
        w.put_str(&self.prefab);
        w.put_i32(self.cell);
        w.put_i32(self.net_id);
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            prefab: r.get_str("prefab")?,
            cell: r.get_i32()?,
            net_id: r.get_i32()?,
        })
    }

    fn wire_len(&self) -> usize {
        LENGTH_PREFIX + self.prefab.len() + 8
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstantiationBatch {
    pub items: Vec<Instantiation>,
}

impl PacketBody for InstantiationBatch {
    const TYPE: PacketType = PacketType::INSTANTIATION_BATCH;
    const NAME: &'static str = "InstantiationBatch";

    fn write(&self, w: &mut WireWriter) {
        w.put_list(&self.items);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            items: r.get_list()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Rectangular cell regions
// ---------------------------------------------------------------------------

/// Full contents of one cell inside a [`CellRegion`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    pub element: u16,
    pub temperature: f32,
    pub mass: f32,
    pub disease: u8,
    pub disease_count: i32,
}

impl Cell {
    pub const WIRE_SIZE: usize = 2 + 4 + 4 + 1 + 4;
}

/// A `width × height` rectangle of cells, row-major from `(x, y)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CellRegion {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub cells: Vec<Cell>,
}

impl CellRegion {
    /// Largest accepted side length.
    pub const MAX_SIDE: i32 = 4096;

    /// A region whose `cells` match its dimensions.
    ///
    /// # Errors
    /// [`ProtocolError::Malformed`] for a side outside `0..=MAX_SIDE` or a
    /// cell count other than `width * height`.
    pub fn new(
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        cells: Vec<Cell>,
    ) -> Result<Self, ProtocolError> {
        let region = Self {
            x,
            y,
            width,
            height,
            cells,
        };
        region.check()?;
        Ok(region)
    }

    /// Checks the dimensions and that `cells` holds exactly
    /// `width * height` entries.
    pub fn check(&self) -> Result<(), ProtocolError> {
        let expected = Self::side("width", self.width)? * Self::side("height", self.height)?;
        if self.cells.len() != expected {
            return Err(ProtocolError::malformed(
                "cells",
                format!(
                    "{} cells for a {}x{} region",
                    self.cells.len(),
                    self.width,
                    self.height
                ),
            ));
        }
        Ok(())
    }

    fn side(field: &'static str, value: i32) -> Result<usize, ProtocolError> {
        if !(0..=Self::MAX_SIDE).contains(&value) {
            return Err(ProtocolError::malformed(
                field,
                format!("{value} outside 0..={}", Self::MAX_SIDE),
            ));
        }
        Ok(value as usize)
    }
}

impl WireItem for CellRegion {
    const MIN_WIRE_SIZE: usize = 16;

    /// Writes `cells` as they are. Encoding through the registry runs
    /// [`CellRegion::check`] first.
    fn write_to(&self, w: &mut WireWriter) {
        w.put_i32(self.x);
        w.put_i32(self.y);
        w.put_i32(self.width);
        w.put_i32(self.height);
        for cell in &self.cells {
            w.put_u16(cell.element);
            w.put_f32(cell.temperature);
            w.put_f32(cell.mass);
            w.put_u8(cell.disease);
            w.put_i32(cell.disease_count);
        }
    }

    fn read_from(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        let x = r.get_i32()?;
        let y = r.get_i32()?;
        let width = r.get_i32()?;
        let height = r.get_i32()?;
        let count = Self::side("width", width)? * Self::side("height", height)?;

        let needed = count * Cell::WIRE_SIZE;
        if r.remaining() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                remaining: r.remaining(),
            });
        }
        let mut cells = Vec::with_capacity(count);
        for _ in 0..count {
            cells.push(Cell {
                element: r.get_u16()?,
                temperature: r.get_f32()?,
                mass: r.get_f32()?,
                disease: r.get_u8()?,
                disease_count: r.get_i32()?,
            });
        }
        Ok(Self {
            x,
            y,
            width,
            height,
            cells,
        })
    }
}

/// Host → client: authoritative contents of one or more regions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldData {
    pub regions: Vec<CellRegion>,
}

impl PacketBody for WorldData {
    const TYPE: PacketType = PacketType::WORLD_DATA;
    const NAME: &'static str = "WorldData";

    fn write(&self, w: &mut WireWriter) {
        w.put_list(&self.regions);
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            regions: r.get_list()?,
        })
    }

    fn check(&self) -> Result<(), ProtocolError> {
        self.regions.iter().try_for_each(CellRegion::check)
    }
}
