//! Map directory: maps hosted here versus maps hosted by a peer.
//!
//! A [`LocalMap`] owns decoded tile passability and the [`BlockGrid`] sized
//! from it. A [`RemoteMap`] is routing information only and must never be
//! treated as spatially queryable.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddrV4;

use crate::entity::{EntityArena, EntityKey};
use crate::grid::{BlockGrid, BucketList};
use crate::IndexError;

// ---------------------------------------------------------------------------
// MapName
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapName(String);

impl MapName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MapName {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl Borrow<str> for MapName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MapName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Tiles
// ---------------------------------------------------------------------------

/// Passability of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapCell(pub u8);

impl MapCell {
    pub const WALKABLE: MapCell = MapCell(0);
    pub const UNWALKABLE: MapCell = MapCell(1);

    #[inline]
    pub fn is_walkable(self) -> bool {
        self.0 & Self::UNWALKABLE.0 == 0
    }
}

/// Decoded tile data handed over by the map loader.
#[derive(Debug, Clone, PartialEq)]
pub struct TileData {
    width: i32,
    height: i32,
    cells: Vec<MapCell>,
}

impl TileData {
    /// Row-major cells, `width * height` of them.
    pub fn new(width: i32, height: i32, cells: Vec<MapCell>) -> Result<Self, IndexError> {
        let expected = (width.max(0) as usize) * (height.max(0) as usize);
        if width < 0 || height < 0 || cells.len() != expected {
            return Err(IndexError::TileSizeMismatch {
                width,
                height,
                cells: cells.len(),
            });
        }
        Ok(Self { width, height, cells })
    }

    pub fn filled(width: i32, height: i32, cell: MapCell) -> Self {
        let count = (width.max(0) as usize) * (height.max(0) as usize);
        Self {
            width: width.max(0),
            height: height.max(0),
            cells: vec![cell; count],
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }
}

// ---------------------------------------------------------------------------
// LocalMap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapFlags {
    pub pvp: bool,
}

/// A map hosted by this server.
#[derive(Debug)]
pub struct LocalMap {
    name: MapName,
    tiles: TileData,
    grid: BlockGrid,
    flags: MapFlags,
    npcs: Vec<Option<EntityKey>>,
    npc_limit: usize,
}

impl LocalMap {
    pub fn new(name: MapName, tiles: TileData, flags: MapFlags, block_size: i32, npc_limit: usize) -> Self {
        let grid = BlockGrid::new(tiles.width, tiles.height, block_size);
        Self {
            name,
            tiles,
            grid,
            flags,
            npcs: Vec::new(),
            npc_limit,
        }
    }

    pub fn name(&self) -> &MapName {
        &self.name
    }

    pub fn width(&self) -> i32 {
        self.tiles.width
    }

    pub fn height(&self) -> i32 {
        self.tiles.height
    }

    pub fn grid(&self) -> &BlockGrid {
        &self.grid
    }

    pub(crate) fn grid_mut(&mut self) -> &mut BlockGrid {
        &mut self.grid
    }

    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut MapFlags {
        &mut self.flags
    }

    /// Players currently on this map.
    pub fn players(&self) -> usize {
        self.grid.players()
    }

    /// Tile passability. Anything outside the map reads as unwalkable.
    pub fn cell(&self, x: i32, y: i32) -> MapCell {
        if !self.grid.contains(x, y) {
            return MapCell::UNWALKABLE;
        }
        self.tiles.cells[(x + y * self.tiles.width) as usize]
    }

    /// Overwrite one tile. Writes outside the map are ignored.
    pub fn set_cell(&mut self, x: i32, y: i32, cell: MapCell) {
        if !self.grid.contains(x, y) {
            return;
        }
        self.tiles.cells[(x + y * self.tiles.width) as usize] = cell;
    }

    /// Put an NPC in the first free slot of this map's NPC table.
    pub(crate) fn add_npc(&mut self, key: EntityKey) -> Result<usize, IndexError> {
        if let Some(slot) = self.npcs.iter().position(Option::is_none) {
            self.npcs[slot] = Some(key);
            return Ok(slot);
        }
        if self.npcs.len() >= self.npc_limit {
            tracing::warn!(map = %self.name, limit = self.npc_limit, "too many NPCs in one map");
            return Err(IndexError::TooManyNpcs {
                map: self.name.clone(),
                limit: self.npc_limit,
            });
        }
        self.npcs.push(Some(key));
        Ok(self.npcs.len() - 1)
    }

    pub(crate) fn remove_npc(&mut self, slot: usize) -> Option<EntityKey> {
        self.npcs.get_mut(slot).and_then(Option::take)
    }

    pub fn npcs(&self) -> impl Iterator<Item = (usize, EntityKey)> + '_ {
        self.npcs
            .iter()
            .enumerate()
            .filter_map(|(slot, key)| key.map(|k| (slot, k)))
    }

    /// Hash of every linked entity's id, kind and tile, in block and list
    /// order. Equal digests mean equal occupancy, including list order.
    pub fn occupancy_digest(&self, arena: &EntityArena) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        let (blocks_x, blocks_y) = self.grid.blocks();
        for by in 0..blocks_y {
            for bx in 0..blocks_x {
                for list in [BucketList::Others, BucketList::Creatures] {
                    for key in self.grid.bucket(arena, bx, by, list) {
                        let Some(entity) = arena.get(key) else { continue };
                        hasher.update(&entity.id().0.to_le_bytes());
                        hasher.update(entity.kind().name().as_bytes());
                        hasher.update(&entity.x().to_le_bytes());
                        hasher.update(&entity.y().to_le_bytes());
                    }
                }
            }
        }
        hasher.finalize()
    }
}

// ---------------------------------------------------------------------------
// RemoteMap
// ---------------------------------------------------------------------------

/// A map hosted by a peer map server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMap {
    pub name: MapName,
    pub addr: SocketAddrV4,
}

// ---------------------------------------------------------------------------
// MapRegistry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum MapEntry {
    Local(LocalMap),
    Remote(RemoteMap),
}

/// Result of [`MapRegistry::resolve`].
#[derive(Debug, Clone, Copy)]
pub enum MapLookup<'a> {
    Local(&'a LocalMap),
    Remote(&'a RemoteMap),
    Unknown,
}

/// Name to map directory.
#[derive(Debug)]
pub struct MapRegistry {
    maps: HashMap<MapName, MapEntry>,
    block_size: i32,
    npc_limit: usize,
    self_addr: SocketAddrV4,
}

impl MapRegistry {
    pub fn new(block_size: i32, npc_limit: usize, self_addr: SocketAddrV4) -> Self {
        Self {
            maps: HashMap::new(),
            block_size,
            npc_limit,
            self_addr,
        }
    }

    pub fn resolve(&self, name: &MapName) -> MapLookup<'_> {
        match self.maps.get(name) {
            Some(MapEntry::Local(map)) => MapLookup::Local(map),
            Some(MapEntry::Remote(map)) => MapLookup::Remote(map),
            None => MapLookup::Unknown,
        }
    }

    /// The local map called `name`, or the reason it cannot be used
    /// spatially.
    pub fn local(&self, name: &MapName) -> Result<&LocalMap, IndexError> {
        match self.maps.get(name) {
            Some(MapEntry::Local(map)) => Ok(map),
            Some(MapEntry::Remote(remote)) => Err(IndexError::RemoteMap {
                name: name.clone(),
                addr: remote.addr,
            }),
            None => Err(IndexError::UnknownMap { name: name.clone() }),
        }
    }

    pub fn local_mut(&mut self, name: &MapName) -> Result<&mut LocalMap, IndexError> {
        match self.maps.get_mut(name) {
            Some(MapEntry::Local(map)) => Ok(map),
            Some(MapEntry::Remote(remote)) => Err(IndexError::RemoteMap {
                name: name.clone(),
                addr: remote.addr,
            }),
            None => Err(IndexError::UnknownMap { name: name.clone() }),
        }
    }

    /// Host `name` here with the given tiles. Replaces a remote entry of the
    /// same name; a second local registration is refused.
    pub fn register_local(&mut self, name: MapName, tiles: TileData, flags: MapFlags) -> Result<&mut LocalMap, IndexError> {
        if let Some(MapEntry::Local(_)) = self.maps.get(&name) {
            return Err(IndexError::DuplicateMap { name });
        }
        tracing::debug!(map = %name, width = tiles.width, height = tiles.height, "local map registered");
        let map = LocalMap::new(name.clone(), tiles, flags, self.block_size, self.npc_limit);
        self.maps.insert(name.clone(), MapEntry::Local(map));
        self.local_mut(&name)
    }

    /// Record that a peer hosts `name` at `addr`.
    ///
    /// Existing remote entries are updated in place. A map hosted here may
    /// only be announced with our own address.
    pub fn register_remote(&mut self, name: MapName, addr: SocketAddrV4) -> Result<(), IndexError> {
        match self.maps.get_mut(&name) {
            None => {
                tracing::debug!(map = %name, %addr, "remote map registered");
                self.maps.insert(name.clone(), MapEntry::Remote(RemoteMap { name, addr }));
                Ok(())
            }
            Some(MapEntry::Remote(remote)) => {
                remote.addr = addr;
                Ok(())
            }
            Some(MapEntry::Local(_)) => {
                if addr == self.self_addr {
                    Ok(())
                } else {
                    tracing::warn!(map = %name, %addr, ours = %self.self_addr, "peer announced a map hosted here");
                    Err(IndexError::MapConflict { name, announced: addr })
                }
            }
        }
    }

    pub(crate) fn remove(&mut self, name: &MapName) -> Option<MapEntry> {
        self.maps.remove(name)
    }

    pub(crate) fn clear(&mut self) {
        self.maps.clear();
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn self_addr(&self) -> SocketAddrV4 {
        self.self_addr
    }

    pub fn local_maps(&self) -> impl Iterator<Item = &LocalMap> + '_ {
        self.maps.values().filter_map(|entry| match entry {
            MapEntry::Local(map) => Some(map),
            MapEntry::Remote(_) => None,
        })
    }

    /// Names of every local map, sorted.
    pub fn local_names(&self) -> Vec<MapName> {
        let mut names: Vec<MapName> = self.local_maps().map(|m| m.name.clone()).collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
