//! The spatial index: entity arena, map directory and id registries as one
//! value with one owner.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::entity::{BlockId, Entity, EntityArena, EntityData, EntityKey, EntityKind};
use crate::grid::{BucketList, DEFAULT_BLOCK_SIZE};
use crate::ids::IdRegistry;
use crate::map::{LocalMap, MapEntry, MapFlags, MapLookup, MapName, MapRegistry, TileData};
use crate::IndexError;

// ---------------------------------------------------------------------------
// IndexSettings
// ---------------------------------------------------------------------------

/// Construction parameters for a [`SpatialIndex`].
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Tile side length of one grid block.
    pub block_size: i32,
    /// Capacity of the ephemeral id range, reserved slots included.
    pub max_objects: usize,
    pub max_npc_per_map: usize,
    /// Address this server advertises for the maps it hosts.
    pub self_addr: SocketAddrV4,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_objects: 500_000,
            max_npc_per_map: 512,
            self_addr: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5121),
        }
    }
}

// ---------------------------------------------------------------------------
// SpatialIndex
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SpatialIndex {
    entities: EntityArena,
    maps: MapRegistry,
    ids: IdRegistry,
}

impl SpatialIndex {
    pub fn new(settings: IndexSettings) -> Self {
        Self {
            entities: EntityArena::new(),
            maps: MapRegistry::new(settings.block_size, settings.max_npc_per_map, settings.self_addr),
            ids: IdRegistry::new(settings.max_objects),
        }
    }

    pub fn entities(&self) -> &EntityArena {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut EntityArena {
        &mut self.entities
    }

    pub fn maps(&self) -> &MapRegistry {
        &self.maps
    }

    pub fn ids(&self) -> &IdRegistry {
        &self.ids
    }

    pub fn ids_mut(&mut self) -> &mut IdRegistry {
        &mut self.ids
    }

    /// The entity behind `key`. Stale keys, including ones freed inside a
    /// running query, resolve to `None`.
    pub fn get(&self, key: EntityKey) -> Option<&Entity> {
        self.entities.get(key)
    }

    /// Resolve a game-visible id to its entity.
    pub fn lookup(&self, id: BlockId) -> Option<EntityKey> {
        self.ids.lookup(id)
    }

    /// [`lookup`](Self::lookup) followed by [`get`](Self::get).
    pub fn lookup_entity(&self, id: BlockId) -> Option<&Entity> {
        self.lookup(id).and_then(|key| self.entities.get(key))
    }

    // -- maps -----------------------------------------------------------------

    pub fn resolve_map(&self, name: &MapName) -> MapLookup<'_> {
        self.maps.resolve(name)
    }

    /// A map hosted here. Remote and unknown names are errors.
    pub fn local_map(&self, name: &MapName) -> Result<&LocalMap, IndexError> {
        self.maps.local(name)
    }

    pub fn local_map_mut(&mut self, name: &MapName) -> Result<&mut LocalMap, IndexError> {
        self.maps.local_mut(name)
    }

    /// Host a map on this server. A remote entry of the same name is
    /// replaced; a second local one is refused with `DuplicateMap`.
    pub fn register_local_map(&mut self, name: MapName, tiles: TileData, flags: MapFlags) -> Result<&mut LocalMap, IndexError> {
        self.maps.register_local(name, tiles, flags)
    }

    /// Record a map announced by a peer server.
    pub fn register_remote_map(&mut self, name: MapName, addr: SocketAddrV4) -> Result<(), IndexError> {
        self.maps.register_remote(name, addr)
    }

    /// Drop a map entry. A local map must be empty first.
    pub fn unregister_map(&mut self, name: &MapName) -> Result<MapEntry, IndexError> {
        match self.maps.resolve(name) {
            MapLookup::Local(map) if !map.grid().is_empty() => {
                return Err(IndexError::MapInUse {
                    name: name.clone(),
                    linked: map.grid().len(),
                });
            }
            MapLookup::Unknown => return Err(IndexError::UnknownMap { name: name.clone() }),
            MapLookup::Local(_) | MapLookup::Remote(_) => {}
        }
        tracing::debug!(map = %name, "map unregistered");
        self.maps
            .remove(name)
            .ok_or_else(|| IndexError::UnknownMap { name: name.clone() })
    }

    /// Forget every map. Entities must have been disposed of already.
    pub fn clear_maps(&mut self) {
        self.maps.clear();
    }

    // -- linkage --------------------------------------------------------------

    /// Link an entity into the grid of the map it stands on.
    pub fn link(&mut self, key: EntityKey) -> Result<(), IndexError> {
        let map = self
            .entities
            .get(key)
            .ok_or(IndexError::StaleEntity { key })?
            .map()
            .clone();
        self.maps.local_mut(&map)?.grid_mut().link(&mut self.entities, key)
    }

    /// Unlink an entity from its grid. Returns `false` if it was not linked.
    pub fn unlink(&mut self, key: EntityKey) -> bool {
        if !self.entities.is_linked(key) {
            return false;
        }
        let Some(entity) = self.entities.get(key) else {
            return false;
        };
        let map = entity.map().clone();
        match self.maps.local_mut(&map) {
            Ok(local) => local.grid_mut().unlink(&mut self.entities, key),
            Err(err) => invariant_violation!("{key:?} is linked but its map is unusable: {err}"),
        }
    }

    /// Move an entity to `(x, y)` on `map`, relinking it if it was linked.
    ///
    /// The destination is validated before anything changes.
    pub fn move_entity(&mut self, key: EntityKey, map: &MapName, x: i32, y: i32) -> Result<(), IndexError> {
        if !self.entities.contains(key) {
            return Err(IndexError::StaleEntity { key });
        }
        let target = self.maps.local(map)?;
        if !target.grid().contains(x, y) {
            return Err(IndexError::OutOfBounds { map: map.clone(), x, y });
        }
        let was_linked = self.unlink(key);
        self.entities.relocate(key, map.clone(), x, y)?;
        if was_linked {
            self.link(key)?;
        }
        Ok(())
    }

    /// Players and mobs standing on `(x, y)`, never less than one.
    pub fn count_on_cell(&self, map: &MapName, x: i32, y: i32) -> Result<usize, IndexError> {
        let local = self.maps.local(map)?;
        let grid = local.grid();
        if !grid.contains(x, y) {
            return Ok(1);
        }
        let (bx, by) = grid.block_of(x, y);
        let on_cell = |key: &EntityKey| {
            self.entities
                .get(*key)
                .is_some_and(|e| e.x() == x && e.y() == y)
        };
        let players = grid
            .bucket(&self.entities, bx, by, BucketList::Others)
            .filter(|key| self.entities.get(*key).is_some_and(|e| e.kind() == EntityKind::Player))
            .filter(on_cell)
            .count();
        let mobs = grid
            .bucket(&self.entities, bx, by, BucketList::Creatures)
            .filter(on_cell)
            .count();
        Ok((players + mobs).max(1))
    }

    // -- ephemeral objects ----------------------------------------------------

    /// Create an unlinked entity with a fresh ephemeral id.
    ///
    /// On exhaustion the entity is discarded and nothing is registered.
    pub fn add_object(&mut self, map: MapName, x: i32, y: i32, data: EntityData) -> Result<(BlockId, EntityKey), IndexError> {
        let kind = data.kind();
        let key = self.entities.insert(Entity::new(BlockId(0), map, x, y, data));
        match self.ids.allocate_ephemeral(key) {
            Ok(id) => {
                self.entities.set_id(key, id);
                tracing::trace!(id = %id, key = ?key, kind = %kind, "ephemeral object added");
                Ok((id, key))
            }
            Err(err) => {
                self.entities.free(key);
                Err(err)
            }
        }
    }

    /// Take an ephemeral object out of the grid and both id tiers without
    /// freeing it. Returns `None` if the slot is empty.
    ///
    /// # Panics
    ///
    /// Panics if the occupant is not of the `expected` kind; the registries
    /// no longer describe reality at that point.
    pub fn release_ephemeral(&mut self, id: BlockId, expected: EntityKind) -> Option<EntityKey> {
        if !self.ids.is_ephemeral(id) {
            return None;
        }
        let key = self.ids.lookup(id)?;
        match self.entities.get(key) {
            Some(entity) if entity.kind() == expected => {}
            Some(entity) => invariant_violation!(
                "ephemeral slot {id} holds a {} where a {expected} was being released",
                entity.kind()
            ),
            None => invariant_violation!("ephemeral slot {id} points at dead entity {key:?}"),
        }
        self.unlink(key);
        self.ids.clear_slot(id);
        Some(key)
    }

    /// Release an ephemeral object and free it.
    pub fn delete_object(&mut self, id: BlockId, expected: EntityKind) -> bool {
        match self.release_ephemeral(id, expected) {
            Some(key) => self.entities.free(key),
            None => false,
        }
    }

    // -- durable entities -----------------------------------------------------

    /// Store a non-player entity under its own durable id. Not linked.
    pub fn add_durable(&mut self, entity: Entity) -> Result<EntityKey, IndexError> {
        let id = entity.id();
        let key = self.entities.insert(entity);
        if let Err(err) = self.ids.register_durable(id, key) {
            self.entities.free(key);
            return Err(err);
        }
        Ok(key)
    }

    /// Unlink a durable entity and mark its id removed. Not freed.
    pub fn remove_durable(&mut self, id: BlockId) -> Option<EntityKey> {
        let key = self.ids.lookup(id)?;
        self.unlink(key);
        self.ids.deregister_durable(id);
        Some(key)
    }

    /// Give an NPC a slot in its map's NPC table.
    pub fn add_npc(&mut self, key: EntityKey) -> Result<usize, IndexError> {
        let entity = self.entities.get(key).ok_or(IndexError::StaleEntity { key })?;
        let map = entity.map().clone();
        let slot = self.maps.local_mut(&map)?.add_npc(key)?;
        if let Some(EntityData::Npc(npc)) = self.entities.data_mut(key) {
            npc.slot = Some(slot);
        }
        Ok(slot)
    }

    /// Vacate an NPC's map slot, if it has one.
    pub fn remove_npc(&mut self, key: EntityKey) -> Option<usize> {
        let map = self.entities.get(key)?.map().clone();
        let slot = match self.entities.data_mut(key) {
            Some(EntityData::Npc(npc)) => npc.slot.take()?,
            _ => return None,
        };
        if let Ok(local) = self.maps.local_mut(&map) {
            local.remove_npc(slot);
        }
        Some(slot)
    }

    /// Free an unlinked entity, deferring while a query runs.
    pub fn free(&mut self, key: EntityKey) -> bool {
        self.entities.free(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{FloorItemData, ItemOwner, ItemStack, MobData, NpcData};
    use crate::map::MapCell;

    fn index() -> SpatialIndex {
        let mut index = SpatialIndex::new(IndexSettings {
            max_objects: 16,
            max_npc_per_map: 2,
            ..IndexSettings::default()
        });
        index
            .register_local_map(MapName::from("prontera"), TileData::filled(16, 16, MapCell::WALKABLE), MapFlags::default())
            .unwrap();
        index
    }

    fn item() -> EntityData {
        EntityData::Item(FloorItemData {
            item: ItemStack { name_id: 501, amount: 1 },
            owners: [ItemOwner::default(); 3],
            sub_x: 3,
            sub_y: 3,
            clear_timer: None,
        })
    }

    fn mob(id: u32, x: i32, y: i32) -> Entity {
        Entity::new(BlockId(id), MapName::from("prontera"), x, y, EntityData::Mob(MobData { class: 1002 }))
    }

    #[test]
    fn add_object_assigns_slot_id_to_entity() {
        let mut index = index();
        let (id, key) = index.add_object(MapName::from("prontera"), 2, 2, item()).unwrap();
        assert_eq!(id, BlockId(2));
        assert_eq!(index.get(key).unwrap().id(), id);
        assert_eq!(index.lookup(id), Some(key));
        assert!(!index.entities().is_linked(key));
    }

    #[test]
    fn exhausted_object_is_discarded() {
        let mut index = SpatialIndex::new(IndexSettings {
            max_objects: 3,
            ..IndexSettings::default()
        });
        index.add_object(MapName::from("x"), 0, 0, item()).unwrap();
        let before = index.entities().len();
        assert!(matches!(
            index.add_object(MapName::from("x"), 0, 0, item()),
            Err(IndexError::Exhausted { .. })
        ));
        assert_eq!(index.entities().len(), before);
    }

    #[test]
    fn delete_object_unlinks_clears_and_frees() {
        let mut index = index();
        let (id, key) = index.add_object(MapName::from("prontera"), 2, 2, item()).unwrap();
        index.link(key).unwrap();
        assert!(index.delete_object(id, EntityKind::Item));
        assert!(index.get(key).is_none());
        assert_eq!(index.lookup(id), None);
        assert!(index.local_map(&MapName::from("prontera")).unwrap().grid().is_empty());
        assert!(!index.delete_object(id, EntityKind::Item));
    }

    #[test]
    #[should_panic(expected = "where a spell was being released")]
    fn releasing_wrong_kind_is_fatal() {
        let mut index = index();
        let (id, _) = index.add_object(MapName::from("prontera"), 2, 2, item()).unwrap();
        index.release_ephemeral(id, EntityKind::Spell);
    }

    #[test]
    fn link_against_remote_map_fails_fast() {
        let mut index = index();
        index
            .register_remote_map(MapName::from("geffen"), SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 5121))
            .unwrap();
        let key = index.entities_mut().insert(Entity::new(
            BlockId(110_000_000),
            MapName::from("geffen"),
            1,
            1,
            EntityData::Mob(MobData { class: 1002 }),
        ));
        assert!(matches!(index.link(key), Err(IndexError::RemoteMap { .. })));
        assert!(!index.entities().is_linked(key));
    }

    #[test]
    fn move_entity_relinks_into_new_block() {
        let mut index = index();
        let key = index.add_durable(mob(110_000_000, 1, 1)).unwrap();
        index.link(key).unwrap();
        let prontera = MapName::from("prontera");
        index.move_entity(key, &prontera, 12, 12).unwrap();

        let grid = index.local_map(&prontera).unwrap().grid();
        assert_eq!(grid.bucket(index.entities(), 0, 0, BucketList::Creatures).count(), 0);
        assert_eq!(grid.bucket(index.entities(), 1, 1, BucketList::Creatures).collect::<Vec<_>>(), vec![key]);
    }

    #[test]
    fn move_entity_out_of_bounds_changes_nothing() {
        let mut index = index();
        let key = index.add_durable(mob(110_000_000, 1, 1)).unwrap();
        index.link(key).unwrap();
        let prontera = MapName::from("prontera");
        assert!(matches!(
            index.move_entity(key, &prontera, 16, 1),
            Err(IndexError::OutOfBounds { .. })
        ));
        assert!(index.entities().is_linked(key));
        assert_eq!(index.get(key).unwrap().x(), 1);
    }

    #[test]
    fn count_on_cell_has_floor_of_one() {
        let mut index = index();
        let prontera = MapName::from("prontera");
        assert_eq!(index.count_on_cell(&prontera, 3, 3).unwrap(), 1);
        for id in 0..3 {
            let key = index.add_durable(mob(110_000_000 + id, 3, 3)).unwrap();
            index.link(key).unwrap();
        }
        let (_, item) = index.add_object(prontera.clone(), 3, 3, item()).unwrap();
        index.link(item).unwrap();
        assert_eq!(index.count_on_cell(&prontera, 3, 3).unwrap(), 3);
        assert_eq!(index.count_on_cell(&prontera, -1, 3).unwrap(), 1);
    }

    #[test]
    fn unregister_refuses_occupied_map() {
        let mut index = index();
        let prontera = MapName::from("prontera");
        let key = index.add_durable(mob(110_000_000, 1, 1)).unwrap();
        index.link(key).unwrap();
        assert!(matches!(index.unregister_map(&prontera), Err(IndexError::MapInUse { linked: 1, .. })));
        index.unlink(key);
        assert!(matches!(index.unregister_map(&prontera), Ok(MapEntry::Local(_))));
        assert!(matches!(index.unregister_map(&prontera), Err(IndexError::UnknownMap { .. })));
    }

    #[test]
    fn npc_slot_is_recorded_on_entity() {
        let mut index = index();
        let npc = Entity::new(
            BlockId(110_000_001),
            MapName::from("prontera"),
            4,
            4,
            EntityData::Npc(NpcData { name: "Kafra".into(), slot: None }),
        );
        let key = index.add_durable(npc).unwrap();
        assert_eq!(index.add_npc(key).unwrap(), 0);
        assert!(matches!(&index.get(key).unwrap().data, EntityData::Npc(n) if n.slot == Some(0)));
        assert_eq!(index.remove_npc(key), Some(0));
        assert_eq!(index.remove_npc(key), None);
    }
}
