//! World configuration.

use std::net::{Ipv4Addr, SocketAddrV4};

use serde::{Deserialize, Serialize};
use wayfarer_index::grid::DEFAULT_BLOCK_SIZE;
use wayfarer_index::ids::RESERVED_OBJECT_IDS;
use wayfarer_index::index::IndexSettings;
use wayfarer_index::time::Interval;

use crate::WorldError;

/// Tunables of the world state. Every field has a default, so a JSON
/// document only needs the fields it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Tile side length of one grid block.
    pub block_size: i32,
    /// Capacity of the ephemeral id range used by floor items and spells.
    pub max_floor_items: usize,
    pub max_npc_per_map: usize,
    /// Exclusive pick-up window of the first owner, in ms.
    pub item_first_get_time: u64,
    /// Added on top of the first window for the second owner, in ms.
    pub item_second_get_time: u64,
    /// Added on top of the second window for the third owner, in ms.
    pub item_third_get_time: u64,
    /// How long a floor item lies around before it expires, in ms.
    pub flooritem_lifetime: u64,
    /// Search radius for a free cell around the drop point.
    pub flooritem_dispersal: i32,
    /// Flag every loaded map as PvP.
    pub pk_mode: bool,
    pub rng_seed: u64,
    /// Address advertised for maps hosted here.
    pub map_addr: SocketAddrV4,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_floor_items: 500_000,
            max_npc_per_map: 512,
            item_first_get_time: 3000,
            item_second_get_time: 1000,
            item_third_get_time: 1000,
            flooritem_lifetime: 60_000,
            flooritem_dispersal: 1,
            pk_mode: false,
            rng_seed: 0x5eed,
            map_addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5121),
        }
    }
}

impl WorldConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(text: &str) -> Result<Self, WorldError> {
        let config: WorldConfig =
            serde_json::from_str(text).map_err(|e| WorldError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the index cannot run with.
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.block_size <= 0 {
            return Err(WorldError::Config(format!(
                "block_size must be positive, got {}",
                self.block_size
            )));
        }
        if self.max_floor_items <= RESERVED_OBJECT_IDS {
            return Err(WorldError::Config(format!(
                "max_floor_items must exceed {RESERVED_OBJECT_IDS}, got {}",
                self.max_floor_items
            )));
        }
        if self.flooritem_dispersal < 0 {
            return Err(WorldError::Config(format!(
                "flooritem_dispersal must not be negative, got {}",
                self.flooritem_dispersal
            )));
        }
        Ok(())
    }

    pub fn index_settings(&self) -> IndexSettings {
        IndexSettings {
            block_size: self.block_size,
            max_objects: self.max_floor_items,
            max_npc_per_map: self.max_npc_per_map,
            self_addr: self.map_addr,
        }
    }

    /// Per-owner protection windows, in owner order.
    pub fn owner_windows(&self) -> [Interval; 3] {
        [
            Interval::from_millis(self.item_first_get_time),
            Interval::from_millis(self.item_second_get_time),
            Interval::from_millis(self.item_third_get_time),
        ]
    }

    pub fn flooritem_lifetime(&self) -> Interval {
        Interval::from_millis(self.flooritem_lifetime)
    }
}
