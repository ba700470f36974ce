//! World state of a tile-based map server.
//!
//! [`WorldState`](world::WorldState) owns the
//! [`SpatialIndex`](wayfarer_index::index::SpatialIndex) for the server's
//! lifetime together with the collaborators that drive it: a timer
//! [`Scheduler`](timer::Scheduler), a [`Broadcast`](collab::Broadcast) sink
//! for visibility updates, the session table and a seeded RNG. On top of
//! that it implements player, NPC, mob and spell registration, the
//! floor-item lifecycle, timer dispatch and shutdown.
//!
//! # Quick Start
//!
//! ```
//! use wayfarer_world::prelude::*;
//!
//! let mut tiles = MemoryTiles::new();
//! tiles.insert(MapName::from("prontera"), TileData::filled(32, 32, MapCell::WALKABLE));
//!
//! let mut world = WorldState::new(WorldConfig::default()).unwrap();
//! world.load_maps(&mut tiles, &[MapName::from("prontera")]).unwrap();
//!
//! let stack = ItemStack { name_id: 501, amount: 3 };
//! let id = world
//!     .add_floor_item(stack, &MapName::from("prontera"), 10, 10, [None; 3])
//!     .unwrap();
//! assert!(world.index().lookup(id).is_some());
//!
//! // The item expires once its lifetime has passed.
//! world.run_timers(Tick(60_000));
//! assert!(world.index().lookup(id).is_none());
//! ```

#![deny(unsafe_code)]

pub mod collab;
pub mod config;
pub mod floor_item;
pub mod session;
pub mod timer;
pub mod world;

use wayfarer_index::entity::BlockId;
use wayfarer_index::map::MapName;
use wayfarer_index::IndexError;

use crate::collab::TileLoadError;

/// Re-export the index crate for convenience.
pub use wayfarer_index;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("no passable cell within {radius} tiles of ({x}, {y}) on '{map}'")]
    NoFreeCell { map: MapName, x: i32, y: i32, radius: i32 },

    #[error("{} map(s) failed to load", .failures.len())]
    MapLoad { failures: Vec<TileLoadError> },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("id {id} is already registered")]
    AlreadyRegistered { id: BlockId },

    #[error("no {expected} with id {id}")]
    NotFound { id: BlockId, expected: &'static str },

    #[error("player {player} may not pick up item {item} yet")]
    PickUpDenied { item: BlockId, player: BlockId },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common world usage.
pub mod prelude {
    pub use wayfarer_index::prelude::*;

    pub use crate::collab::{
        Broadcast, BroadcastEvent, BroadcastLog, MemoryTiles, NullBroadcast, RemovalReason,
        TileLoadError, TileLoader,
    };
    pub use crate::config::WorldConfig;
    pub use crate::floor_item::FloorDrop;
    pub use crate::session::{SessionId, SessionTable};
    pub use crate::timer::{Scheduler, TickScheduler, TimerEvent};
    pub use crate::world::WorldState;
    pub use crate::WorldError;
}
