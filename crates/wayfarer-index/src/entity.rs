//! Entities, their identifiers, and the arena that owns them.
//!
//! Every tracked object lives in an [`EntityArena`] slot and is addressed by
//! an [`EntityKey`], a generational handle that packs a *generation* counter
//! in the high 32 bits and a slot *index* in the low 32 bits. The block grid
//! threads its bucket lists through the arena by storing keys in each node's
//! [`Links`], so unlinking is an index rewrite rather than pointer surgery.
//!
//! [`BlockId`] is the separate, game-visible id that the identifier
//! registries hand out and resolve.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

use crate::guard::{DeferredFree, PendingFree};
use crate::map::MapName;
use crate::time::{Tick, TimerHandle};
use crate::IndexError;

// ---------------------------------------------------------------------------
// Game-visible identifiers
// ---------------------------------------------------------------------------

/// Game-visible id of a tracked object. Ids below the ephemeral capacity are
/// slot indices of the ephemeral range; everything above is durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Character id assigned by the character server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharId(pub u32);

/// A character's display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharName(String);

impl CharName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CharName {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl fmt::Display for CharName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

/// Type tag of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Player,
    Npc,
    Mob,
    Item,
    Spell,
}

impl EntityKind {
    /// Mobs are kept in their own bucket list so AI scans skip everything else.
    #[inline]
    pub fn is_creature(self) -> bool {
        match self {
            EntityKind::Mob => true,
            EntityKind::Player | EntityKind::Npc | EntityKind::Item | EntityKind::Spell => false,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntityKind::Player => "player",
            EntityKind::Npc => "npc",
            EntityKind::Mob => "mob",
            EntityKind::Item => "item",
            EntityKind::Spell => "spell",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Per-kind payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerData {
    pub name: CharName,
    pub char_id: CharId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NpcData {
    pub name: String,
    /// Slot in the owning map's NPC table, once registered there.
    pub slot: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MobData {
    pub class: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpellData {
    pub name: String,
    pub caster: Option<BlockId>,
}

/// An item definition id and stack size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemStack {
    pub name_id: u32,
    pub amount: u32,
}

/// One exclusive pick-up right on a floor item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemOwner {
    pub id: Option<BlockId>,
    /// The right lapses at this tick.
    pub until: Tick,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloorItemData {
    pub item: ItemStack,
    /// First, second and third owners in priority order.
    pub owners: [ItemOwner; 3],
    /// Visual offset inside the tile; always one of 3, 6, 9 or 12.
    pub sub_x: u8,
    pub sub_y: u8,
    /// Pending expiry timer. `None` once the timer has fired.
    pub clear_timer: Option<TimerHandle>,
}

impl FloorItemData {
    /// Whether `player` may take this item at `now`.
    ///
    /// Each owner's window must have lapsed before anyone ranked below them
    /// may pick the item up; an owner always may.
    pub fn can_pick_up(&self, player: BlockId, now: Tick) -> bool {
        for owner in &self.owners {
            match owner.id {
                Some(id) if id != player => {
                    if now < owner.until {
                        return false;
                    }
                }
                _ => return true,
            }
        }
        true
    }
}

/// Kind-specific state of an entity. Matching on it is exhaustive by
/// construction, so adding a kind forces every use site to handle it.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    Player(PlayerData),
    Npc(NpcData),
    Mob(MobData),
    Item(FloorItemData),
    Spell(SpellData),
}

impl EntityData {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityData::Player(_) => EntityKind::Player,
            EntityData::Npc(_) => EntityKind::Npc,
            EntityData::Mob(_) => EntityKind::Mob,
            EntityData::Item(_) => EntityKind::Item,
            EntityData::Spell(_) => EntityKind::Spell,
        }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A tracked object: id, placement, and kind-specific data.
///
/// Placement is read-only from outside the crate. Moving an entity goes
/// through [`EntityArena::relocate`], which refuses while the entity is
/// linked into a bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: BlockId,
    map: MapName,
    x: i32,
    y: i32,
    pub data: EntityData,
}

impl Entity {
    pub fn new(id: BlockId, map: MapName, x: i32, y: i32, data: EntityData) -> Self {
        Self { id, map, x, y, data }
    }

    #[inline]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[inline]
    pub fn map(&self) -> &MapName {
        &self.map
    }

    #[inline]
    pub fn x(&self) -> i32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> i32 {
        self.y
    }

    #[inline]
    pub fn kind(&self) -> EntityKind {
        self.data.kind()
    }

    pub fn as_player(&self) -> Option<&PlayerData> {
        match &self.data {
            EntityData::Player(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_item(&self) -> Option<&FloorItemData> {
        match &self.data {
            EntityData::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn as_item_mut(&mut self) -> Option<&mut FloorItemData> {
        match &mut self.data {
            EntityData::Item(item) => Some(item),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EntityKey
// ---------------------------------------------------------------------------

/// A generational arena handle.
///
/// Layout: `[generation: u32 | index: u32]`
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey(u64);

impl EntityKey {
    /// Reserved key standing in as the predecessor of every list head. It
    /// never addresses a real slot.
    pub const LIST_HEAD: EntityKey = EntityKey(u64::MAX);

    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self((generation as u64) << 32 | index as u64)
    }

    #[inline]
    pub fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::LIST_HEAD {
            return f.write_str("EntityKey(HEAD)");
        }
        write!(f, "EntityKey({}v{})", self.index(), self.generation())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Bucket-list links of one entity.
///
/// `prev` is `Some` exactly while the entity is in a bucket list; a list head
/// has `prev == Some(EntityKey::LIST_HEAD)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Links {
    pub prev: Option<EntityKey>,
    pub next: Option<EntityKey>,
}

impl Links {
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.prev.is_some()
    }
}

#[derive(Debug)]
struct Node {
    entity: Entity,
    links: Links,
}

// ---------------------------------------------------------------------------
// EntityArena
// ---------------------------------------------------------------------------

/// Owns every tracked entity.
///
/// Slots are recycled through a FIFO free list with a generation bump, so a
/// key outlives its entity only as a stale handle. Frees requested while a
/// query is running are parked in the deferred-free queue: the entity stops
/// being reachable at once, but its storage and slot index are only released
/// when the outermost query ends.
#[derive(Debug, Default)]
pub struct EntityArena {
    slots: Vec<Option<Node>>,
    generations: Vec<u32>,
    free_indices: VecDeque<u32>,
    deferred: DeferredFree,
    live: usize,
    released: u64,
}

impl EntityArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an entity. It starts unlinked.
    pub fn insert(&mut self, entity: Entity) -> EntityKey {
        let node = Node {
            entity,
            links: Links::default(),
        };
        self.live += 1;
        if let Some(index) = self.free_indices.pop_front() {
            let idx = index as usize;
            self.slots[idx] = Some(node);
            EntityKey::new(index, self.generations[idx])
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Some(node));
            self.generations.push(0);
            EntityKey::new(index, 0)
        }
    }

    fn node(&self, key: EntityKey) -> Option<&Node> {
        let idx = key.index() as usize;
        if self.generations.get(idx).copied() != Some(key.generation()) {
            return None;
        }
        self.slots.get(idx).and_then(|slot| slot.as_ref())
    }

    fn node_mut(&mut self, key: EntityKey) -> Option<&mut Node> {
        let idx = key.index() as usize;
        if self.generations.get(idx).copied() != Some(key.generation()) {
            return None;
        }
        self.slots.get_mut(idx).and_then(|slot| slot.as_mut())
    }

    pub fn get(&self, key: EntityKey) -> Option<&Entity> {
        self.node(key).map(|n| &n.entity)
    }

    /// Mutable access to the kind-specific data. Placement is changed only
    /// through [`relocate`](Self::relocate).
    pub fn data_mut(&mut self, key: EntityKey) -> Option<&mut EntityData> {
        self.node_mut(key).map(|n| &mut n.entity.data)
    }

    /// Whether `key` still names a live entity.
    pub fn contains(&self, key: EntityKey) -> bool {
        self.node(key).is_some()
    }

    pub fn links(&self, key: EntityKey) -> Option<Links> {
        self.node(key).map(|n| n.links)
    }

    /// Whether the entity is alive and currently in a bucket list.
    pub fn is_linked(&self, key: EntityKey) -> bool {
        self.node(key).is_some_and(|n| n.links.is_linked())
    }

    pub(crate) fn links_mut(&mut self, key: EntityKey) -> Option<&mut Links> {
        self.node_mut(key).map(|n| &mut n.links)
    }

    pub(crate) fn set_id(&mut self, key: EntityKey, id: BlockId) {
        if let Some(node) = self.node_mut(key) {
            node.entity.id = id;
        }
    }

    /// Change an unlinked entity's map and coordinates.
    pub fn relocate(&mut self, key: EntityKey, map: MapName, x: i32, y: i32) -> Result<(), IndexError> {
        let node = self
            .node_mut(key)
            .ok_or(IndexError::StaleEntity { key })?;
        if node.links.is_linked() {
            return Err(IndexError::AlreadyLinked { key });
        }
        node.entity.map = map;
        node.entity.x = x;
        node.entity.y = y;
        Ok(())
    }

    /// Request deallocation of an unlinked entity.
    ///
    /// With no query running the entity is dropped immediately; otherwise it
    /// becomes unreachable now and is dropped when the outermost query ends.
    /// Returns `false` if the key was already dead.
    pub fn free(&mut self, key: EntityKey) -> bool {
        let idx = key.index() as usize;
        let Some(node) = self.node(key) else {
            return false;
        };
        if node.links.is_linked() {
            invariant_violation!(
                "free of {key:?} ({} {} on '{}') while it is still linked",
                node.entity.kind(),
                node.entity.id(),
                node.entity.map()
            );
        }
        let Some(node) = self.slots[idx].take() else {
            return false;
        };
        self.generations[idx] = self.generations[idx].wrapping_add(1);
        self.live -= 1;
        if self.deferred.is_active() {
            tracing::trace!(key = ?key, id = %node.entity.id(), "free deferred until query ends");
            self.deferred.defer(PendingFree {
                index: key.index(),
                entity: node.entity,
            });
        } else {
            self.free_indices.push_back(key.index());
            self.released += 1;
        }
        true
    }

    pub(crate) fn enter_query(&mut self) {
        self.deferred.enter();
    }

    pub(crate) fn exit_query(&mut self) {
        let pending = self.deferred.exit();
        if pending.is_empty() {
            return;
        }
        tracing::trace!(count = pending.len(), "releasing deferred frees");
        for PendingFree { index, entity } in pending {
            drop(entity);
            self.free_indices.push_back(index);
            self.released += 1;
        }
    }

    /// Nesting depth of running queries.
    pub fn query_depth(&self) -> usize {
        self.deferred.depth()
    }

    /// Entities freed during the running query and not yet released.
    pub fn pending_free(&self) -> usize {
        self.deferred.pending()
    }

    /// Total entities whose storage has actually been released.
    pub fn released_total(&self) -> u64 {
        self.released
    }

    /// Number of reachable entities.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityKey, &Entity)> + '_ {
        self.slots.iter().enumerate().filter_map(move |(idx, slot)| {
            slot.as_ref()
                .map(|n| (EntityKey::new(idx as u32, self.generations[idx]), &n.entity))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn mob(x: i32, y: i32) -> Entity {
        Entity::new(
            BlockId(110_000_000),
            MapName::from("prontera"),
            x,
            y,
            EntityData::Mob(MobData { class: 1002 }),
        )
    }

    #[test]
    fn insert_returns_unique_keys() {
        let mut arena = EntityArena::new();
        let keys: Vec<EntityKey> = (0..100).map(|i| arena.insert(mob(i, 0))).collect();
        let mut indices: Vec<u32> = keys.iter().map(|k| k.index()).collect();
        indices.sort();
        indices.dedup();
        assert_eq!(indices.len(), 100);
        assert_eq!(arena.len(), 100);
    }

    #[test]
    fn free_bumps_generation_and_stales_key() {
        let mut arena = EntityArena::new();
        let k0 = arena.insert(mob(1, 1));
        assert!(arena.free(k0));
        assert!(arena.get(k0).is_none());
        let k1 = arena.insert(mob(2, 2));
        assert_eq!(k1.index(), k0.index());
        assert_eq!(k1.generation(), 1);
        assert!(arena.get(k0).is_none(), "stale key must not see the new occupant");
        assert_eq!(arena.get(k1).unwrap().x(), 2);
    }

    #[test]
    fn double_free_is_soft() {
        let mut arena = EntityArena::new();
        let k = arena.insert(mob(1, 1));
        assert!(arena.free(k));
        assert!(!arena.free(k));
        assert_eq!(arena.released_total(), 1);
    }

    #[test]
    fn free_inside_query_is_deferred() {
        let mut arena = EntityArena::new();
        let k = arena.insert(mob(1, 1));
        arena.enter_query();
        assert!(arena.free(k));
        assert!(arena.get(k).is_none());
        assert_eq!(arena.pending_free(), 1);
        assert_eq!(arena.released_total(), 0);

        // The index stays reserved while the query runs.
        let other = arena.insert(mob(3, 3));
        assert_ne!(other.index(), k.index());

        arena.exit_query();
        assert_eq!(arena.pending_free(), 0);
        assert_eq!(arena.released_total(), 1);
    }

    #[test]
    fn relocate_updates_placement() {
        let mut arena = EntityArena::new();
        let k = arena.insert(mob(1, 1));
        arena.relocate(k, MapName::from("geffen"), 7, 9).unwrap();
        let e = arena.get(k).unwrap();
        assert_eq!((e.map().as_str(), e.x(), e.y()), ("geffen", 7, 9));
    }

    #[test]
    fn pick_up_rights_follow_owner_windows() {
        let first = BlockId(2_000_001);
        let second = BlockId(2_000_002);
        let stranger = BlockId(2_000_003);
        let item = FloorItemData {
            item: ItemStack { name_id: 501, amount: 1 },
            owners: [
                ItemOwner { id: Some(first), until: Tick(3000) },
                ItemOwner { id: Some(second), until: Tick(4000) },
                ItemOwner { id: None, until: Tick(5000) },
            ],
            sub_x: 3,
            sub_y: 3,
            clear_timer: None,
        };

        assert!(item.can_pick_up(first, Tick(0)));
        assert!(!item.can_pick_up(second, Tick(2999)));
        assert!(item.can_pick_up(second, Tick(3000)));
        assert!(!item.can_pick_up(stranger, Tick(3500)));
        assert!(item.can_pick_up(stranger, Tick(4000)));
    }

    #[test]
    fn list_head_key_debug() {
        assert_eq!(format!("{:?}", EntityKey::LIST_HEAD), "EntityKey(HEAD)");
        assert_eq!(format!("{:?}", EntityKey::new(4, 2)), "EntityKey(4v2)");
    }
}
