//! Spatial entity index for a tile-based world server.
//!
//! Tracks every live entity by map and tile, answers area, cell and
//! movement-delta queries, and keeps the id registries that resolve the
//! game-visible ids handed to clients.
//!
//! # Architecture
//!
//! - [`EntityArena`](entity::EntityArena) owns entities and hands out
//!   generational [`EntityKey`](entity::EntityKey)s.
//! - [`BlockGrid`](grid::BlockGrid) threads per-block bucket lists through
//!   the arena.
//! - [`QueryLock`](guard::QueryLock) defers frees while a query visitor runs.
//! - [`query`] implements the snapshot-then-visit query protocol.
//! - [`IdRegistry`](ids::IdRegistry) resolves [`BlockId`](entity::BlockId)s.
//! - [`MapRegistry`](map::MapRegistry) separates local and remote maps.
//! - [`SpatialIndex`](index::SpatialIndex) bundles all of the above.
//!
//! Corrupted linkage or registry state is never reported as an error: it is
//! logged and the process panics.

#![deny(unsafe_code)]

/// Log an invariant violation with full context, then panic.
///
/// Callers outside this crate need `tracing` as a dependency.
#[macro_export]
macro_rules! invariant_violation {
    ($($arg:tt)+) => {{
        let message = format!($($arg)+);
        tracing::error!(%message, "index invariant violated");
        panic!("index invariant violated: {message}")
    }};
}

pub mod dir;
pub mod entity;
pub mod grid;
pub mod guard;
pub mod ids;
pub mod index;
pub mod map;
pub mod query;
pub mod time;

use std::net::SocketAddrV4;

use entity::{BlockId, CharId, CharName, EntityKey};
use map::MapName;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors reported to callers of the index. None of these leave partial
/// mutations behind.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("({x}, {y}) is outside map '{map}'")]
    OutOfBounds { map: MapName, x: i32, y: i32 },

    #[error("entity {key} is already linked into a block")]
    AlreadyLinked { key: EntityKey },

    #[error("entity {key} does not exist")]
    StaleEntity { key: EntityKey },

    #[error("map '{name}' is not known")]
    UnknownMap { name: MapName },

    #[error("map '{name}' is hosted by {addr}, not here")]
    RemoteMap { name: MapName, addr: SocketAddrV4 },

    #[error("map '{name}' is already hosted here")]
    DuplicateMap { name: MapName },

    #[error("map '{name}' is hosted here; peer announced it at {announced}")]
    MapConflict { name: MapName, announced: SocketAddrV4 },

    #[error("map '{name}' still has {linked} linked entities")]
    MapInUse { name: MapName, linked: usize },

    #[error("map '{map}' already holds {limit} NPCs")]
    TooManyNpcs { map: MapName, limit: usize },

    #[error("tile data of {width}x{height} cannot hold {cells} cells")]
    TileSizeMismatch { width: i32, height: i32, cells: usize },

    #[error("ephemeral id range of capacity {capacity} is exhausted")]
    Exhausted { capacity: usize },

    #[error("id {id} lies inside the ephemeral range (capacity {capacity})")]
    ReservedId { id: BlockId, capacity: usize },

    #[error("a player named '{name}' is already online")]
    NameTaken { name: CharName },

    #[error("character {} is already online", .char_id.0)]
    CharOnline { char_id: CharId },

    #[error("movement delta must not be zero on both axes")]
    NoMovement,

    #[error("movement delta ({dx}, {dy}) is more than one tile per axis")]
    StepTooLong { dx: i32, dy: i32 },
}

/// Convenience re-exports.
pub mod prelude {
    pub use crate::dir::{calc_dir, check_dir, Dir};
    pub use crate::entity::{
        BlockId, CharId, CharName, Entity, EntityArena, EntityData, EntityKey, EntityKind,
        FloorItemData, ItemOwner, ItemStack, Links, MobData, NpcData, PlayerData, SpellData,
    };
    pub use crate::grid::{BlockGrid, BucketList, DEFAULT_BLOCK_SIZE};
    pub use crate::guard::{QueryHost, QueryLock};
    pub use crate::ids::{IdRegistry, Presence, RESERVED_OBJECT_IDS};
    pub use crate::index::{IndexSettings, SpatialIndex};
    pub use crate::map::{
        LocalMap, MapCell, MapEntry, MapFlags, MapLookup, MapName, MapRegistry, RemoteMap, TileData,
    };
    pub use crate::query::{
        foreach_object, query_cell, query_movement_delta, query_rect, snapshot_movement_delta,
        snapshot_rect, Rect,
    };
    pub use crate::time::{Interval, Tick, TimerHandle};
    pub use crate::IndexError;
}
