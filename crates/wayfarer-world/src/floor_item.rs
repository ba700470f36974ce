//! Floor-item lifecycle: timed, ownership-protected item drops.
//!
//! A drop lands on a random passable cell near the requested spot, takes an
//! ephemeral id, records up to three owners with staggered pick-up windows,
//! and schedules its own expiry. It leaves the world either when that timer
//! fires or when it is removed for another reason, in which case the timer
//! is cancelled first.

use rand::seq::SliceRandom;
use rand::Rng;
use wayfarer_index::entity::{BlockId, EntityData, EntityKind, FloorItemData, ItemOwner, ItemStack};
use wayfarer_index::map::MapName;
use wayfarer_index::time::{Interval, Tick, TimerHandle};

use crate::collab::RemovalReason;
use crate::timer::TimerEvent;
use crate::world::WorldState;
use crate::WorldError;

/// Everything needed to put one item on the floor.
#[derive(Debug, Clone, PartialEq)]
pub struct FloorDrop {
    pub item: ItemStack,
    pub map: MapName,
    pub x: i32,
    pub y: i32,
    /// Players with pick-up priority, first to third.
    pub owners: [Option<BlockId>; 3],
    /// Length of each owner's exclusive window. Windows run back to back:
    /// the second owner's starts when the first owner's ends.
    pub protection: [Interval; 3],
    pub lifetime: Interval,
    /// Cells searched form a square of side `2 * search_radius + 1`,
    /// clipped to the map. A negative radius finds nothing.
    pub search_radius: i32,
}

impl WorldState {
    /// Pick a random passable cell in the square around `(x, y)`.
    ///
    /// The square is cut down to the map before candidates are drawn, so
    /// the work is bounded by the map size whatever the radius.
    fn random_free_cell(&mut self, map: &MapName, x: i32, y: i32, radius: i32) -> Result<Option<(i32, i32)>, WorldError> {
        let local = self.index.local_map(map)?;
        if radius < 0 {
            return Ok(None);
        }
        let (x, y, r) = (i64::from(x), i64::from(y), i64::from(radius));
        let (x0, x1) = ((x - r).max(0), (x + r).min(i64::from(local.width()) - 1));
        let (y0, y1) = ((y - r).max(0), (y + r).min(i64::from(local.height()) - 1));
        if x0 > x1 || y0 > y1 {
            return Ok(None);
        }
        let columns = x1 - x0 + 1;
        let mut order: Vec<i64> = (0..columns * (y1 - y0 + 1)).collect();
        order.shuffle(&mut self.rng);
        Ok(order
            .into_iter()
            .filter_map(|i| {
                let cx = i32::try_from(x0 + i % columns).ok()?;
                let cy = i32::try_from(y0 + i / columns).ok()?;
                Some((cx, cy))
            })
            .find(|&(cx, cy)| local.cell(cx, cy).is_walkable()))
    }

    /// Put an item on the floor. Returns its ephemeral id.
    ///
    /// Fails with `NoFreeCell` when no passable cell is in range and with
    /// `Exhausted` when the ephemeral range is full; neither leaves anything
    /// behind.
    pub fn spawn_floor_item(&mut self, drop: FloorDrop) -> Result<BlockId, WorldError> {
        let FloorDrop {
            item,
            map,
            x,
            y,
            owners,
            protection,
            lifetime,
            search_radius,
        } = drop;

        let Some((cx, cy)) = self.random_free_cell(&map, x, y, search_radius)? else {
            tracing::warn!(map = %map, x, y, radius = search_radius, "no free cell for floor item");
            return Err(WorldError::NoFreeCell {
                map,
                x,
                y,
                radius: search_radius,
            });
        };

        let now = self.scheduler.now();
        let mut until = now;
        let owners = std::array::from_fn(|i| {
            until = until + protection[i];
            ItemOwner { id: owners[i], until }
        });
        let data = FloorItemData {
            item,
            owners,
            sub_x: self.rng.gen_range(1..=4) * 3,
            sub_y: self.rng.gen_range(1..=4) * 3,
            clear_timer: None,
        };

        let (id, key) = self.index.add_object(map.clone(), cx, cy, EntityData::Item(data))?;
        let timer = self
            .scheduler
            .schedule(now + lifetime, TimerEvent::ClearFloorItem(id));
        if let Some(EntityData::Item(item)) = self.index.entities_mut().data_mut(key) {
            item.clear_timer = Some(timer);
        }
        if let Err(err) = self.index.link(key) {
            self.scheduler.cancel(timer);
            self.index.delete_object(id, EntityKind::Item);
            return Err(err.into());
        }

        if let Some(entity) = self.index.get(key) {
            self.broadcast.notify_spawned(entity);
        }
        tracing::debug!(id = %id, map = %map, x = cx, y = cy, name_id = item.name_id, amount = item.amount, "floor item dropped");
        Ok(id)
    }

    /// Drop an item using the configured protection windows, lifetime and
    /// dispersal.
    pub fn add_floor_item(
        &mut self,
        item: ItemStack,
        map: &MapName,
        x: i32,
        y: i32,
        owners: [Option<BlockId>; 3],
    ) -> Result<BlockId, WorldError> {
        let drop = FloorDrop {
            item,
            map: map.clone(),
            x,
            y,
            owners,
            protection: self.config.owner_windows(),
            lifetime: self.config.flooritem_lifetime(),
            search_radius: self.config.flooritem_dispersal,
        };
        self.spawn_floor_item(drop)
    }

    /// Remove a floor item for any reason other than its timer firing.
    /// The pending expiry timer is cancelled. Returns `false`, with no
    /// notification sent, if no floor item holds `id`.
    pub fn despawn_floor_item(&mut self, id: BlockId, reason: RemovalReason) -> bool {
        let Some(key) = self.index.lookup(id) else {
            return false;
        };
        let timer = match self.index.entities_mut().data_mut(key) {
            Some(EntityData::Item(item)) => item.clear_timer.take(),
            _ => return false,
        };
        if let Some(timer) = timer {
            self.scheduler.cancel(timer);
        }
        if let Some(entity) = self.index.get(key) {
            self.broadcast.notify_removed(entity, reason);
        }
        let removed = self.index.delete_object(id, EntityKind::Item);
        if removed {
            tracing::debug!(id = %id, ?reason, "floor item removed");
        }
        removed
    }

    /// Expiry timer callback. The timer has already fired, so the item's
    /// handle is dropped rather than cancelled.
    pub(crate) fn expire_floor_item(&mut self, id: BlockId, handle: TimerHandle) {
        let owned = match self.index.lookup(id).and_then(|key| self.index.entities_mut().data_mut(key)) {
            Some(EntityData::Item(item)) if item.clear_timer == Some(handle) => {
                item.clear_timer = None;
                true
            }
            _ => false,
        };
        if !owned {
            wayfarer_index::invariant_violation!("expiry timer {handle:?} fired for {id}, which is not its floor item");
        }
        self.despawn_floor_item(id, RemovalReason::Expired);
    }

    /// Whether `player` may pick up floor item `item` right now.
    pub fn can_pick_up(&self, player: BlockId, item: BlockId) -> bool {
        self.index
            .lookup_entity(item)
            .and_then(|e| e.as_item())
            .is_some_and(|data| data.can_pick_up(player, self.scheduler.now()))
    }

    /// Take a floor item off the ground on behalf of `player`.
    pub fn pick_up(&mut self, player: BlockId, item: BlockId) -> Result<ItemStack, WorldError> {
        let now: Tick = self.scheduler.now();
        let data = self
            .index
            .lookup_entity(item)
            .and_then(|e| e.as_item())
            .ok_or(WorldError::NotFound { id: item, expected: "floor item" })?;
        if !data.can_pick_up(player, now) {
            return Err(WorldError::PickUpDenied { item, player });
        }
        let stack = data.item;
        self.despawn_floor_item(item, RemovalReason::PickedUp);
        Ok(stack)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
