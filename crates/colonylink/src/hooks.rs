//! The seam between the replication layer and the simulation engine.
//!
//! The runtime never touches world state directly. Everything it needs from
//! the engine, and everything it tells the engine, goes through
//! [`EngineHooks`]. Observers have no-op defaults so an embedder only
//! implements what it cares about.

use bytes::Bytes;
use colonylink_protocol::{
    Build, CellRegion, CellUpdate, ChatMessage, Deconstruct, EntityPosition, Instantiation,
};
use colonylink_session::Manifest;

/// Failure reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("engine hook failed: {message}")]
pub struct HookError {
    pub message: String,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A serialized world, ready to stream to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldSnapshot {
    /// Used as the transfer's `file_id`.
    pub name: String,
    pub bytes: Bytes,
}

pub trait EngineHooks: Send {
    /// Host: serializes the current world for a joining client.
    fn world_snapshot(&mut self) -> Result<WorldSnapshot, HookError>;

    /// Client: writes one rectangle of cells into the local world.
    fn apply_region(&mut self, region: &CellRegion) -> Result<(), HookError>;

    /// Client: loads a downloaded world. Runs on a tick after the download
    /// completed, never inside packet handling.
    fn begin_load(&mut self, name: &str, bytes: Bytes) -> Result<(), HookError>;

    fn set_paused(&mut self, paused: bool);

    /// What this installation offers (client) or requires (host).
    fn local_manifest(&self) -> Result<Manifest, HookError>;

    fn on_chat(&mut self, _message: &ChatMessage) {}

    fn on_build(&mut self, _build: &Build) {}

    fn on_deconstruct(&mut self, _deconstruct: &Deconstruct) {}

    fn on_entity_position(&mut self, _position: &EntityPosition) {}

    fn on_cell_updates(&mut self, _updates: &[CellUpdate]) {}

    fn on_instantiations(&mut self, _items: &[Instantiation]) {}

    fn on_speed_change(&mut self, _speed: u8) {}
}

/// Hooks that do nothing: empty world, empty manifest.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHooks;

impl EngineHooks for NullHooks {
    fn world_snapshot(&mut self) -> Result<WorldSnapshot, HookError> {
        Err(HookError::new("no world loaded"))
    }

    fn apply_region(&mut self, _region: &CellRegion) -> Result<(), HookError> {
        Ok(())
    }

    fn begin_load(&mut self, _name: &str, _bytes: Bytes) -> Result<(), HookError> {
        Ok(())
    }

    fn set_paused(&mut self, _paused: bool) {}

    fn local_manifest(&self) -> Result<Manifest, HookError> {
        Ok(Manifest::default())
    }
}
