//! Interfaces to collaborators outside the world state: the visibility
//! broadcaster and the tile loader.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use wayfarer_index::entity::{BlockId, Entity, EntityKind};
use wayfarer_index::map::{MapName, TileData};

// ---------------------------------------------------------------------------
// Broadcast
// ---------------------------------------------------------------------------

/// Why an entity left the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// Floor item whose lifetime ran out.
    Expired,
    PickedUp,
    /// Player logged out.
    Quit,
    Deleted,
    Shutdown,
}

/// Receives visibility changes so clients in range can be told.
pub trait Broadcast {
    fn notify_spawned(&mut self, entity: &Entity);
    fn notify_removed(&mut self, entity: &Entity, reason: RemovalReason);
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBroadcast;

impl Broadcast for NullBroadcast {
    fn notify_spawned(&mut self, _entity: &Entity) {}
    fn notify_removed(&mut self, _entity: &Entity, _reason: RemovalReason) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastEvent {
    Spawned { id: BlockId, kind: EntityKind, x: i32, y: i32 },
    Removed { id: BlockId, kind: EntityKind, reason: RemovalReason },
}

/// Records notifications. Clones share one log, so a clone kept outside
/// the world sees what the world reported.
#[derive(Debug, Default, Clone)]
pub struct BroadcastLog {
    events: Rc<RefCell<Vec<BroadcastEvent>>>,
}

impl BroadcastLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BroadcastEvent> {
        self.events.borrow().clone()
    }

    pub fn take(&self) -> Vec<BroadcastEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

impl Broadcast for BroadcastLog {
    fn notify_spawned(&mut self, entity: &Entity) {
        self.events.borrow_mut().push(BroadcastEvent::Spawned {
            id: entity.id(),
            kind: entity.kind(),
            x: entity.x(),
            y: entity.y(),
        });
    }

    fn notify_removed(&mut self, entity: &Entity, reason: RemovalReason) {
        self.events.borrow_mut().push(BroadcastEvent::Removed {
            id: entity.id(),
            kind: entity.kind(),
            reason,
        });
    }
}

// ---------------------------------------------------------------------------
// TileLoader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TileLoadError {
    #[error("no tile data for map '{0}'")]
    NotFound(MapName),

    #[error("tile data for map '{map}' is unusable: {reason}")]
    Corrupt { map: MapName, reason: String },
}

/// Produces decoded passability data for a map.
pub trait TileLoader {
    fn load(&mut self, name: &MapName) -> Result<TileData, TileLoadError>;
}

/// Tile data held in memory, for tests and tools.
#[derive(Debug, Default, Clone)]
pub struct MemoryTiles {
    maps: HashMap<MapName, TileData>,
}

impl MemoryTiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: MapName, tiles: TileData) {
        self.maps.insert(name, tiles);
    }
}

impl TileLoader for MemoryTiles {
    fn load(&mut self, name: &MapName) -> Result<TileData, TileLoadError> {
        self.maps
            .get(name)
            .cloned()
            .ok_or_else(|| TileLoadError::NotFound(name.clone()))
    }
}
