//! Area, cell and movement-delta queries.
//!
//! Every query runs in two phases. The first walks bucket lists and records
//! matching keys into a snapshot without calling out. The second acquires a
//! [`QueryLock`] and hands each snapshot entry to the visitor, skipping
//! entries that an earlier visitor call unlinked. Entities linked while the
//! visitor runs are never part of the snapshot.
//!
//! Visitors get the host back as `&mut H`, so they may link, unlink, free
//! and query again.

use crate::entity::{Entity, EntityArena, EntityKey, EntityKind};
use crate::grid::BucketList;
use crate::guard::{QueryHost, QueryLock};
use crate::map::{LocalMap, MapName};
use crate::IndexError;

// ---------------------------------------------------------------------------
// Rect
// ---------------------------------------------------------------------------

/// Inclusive tile rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl Rect {
    /// Inclusive rectangle from `(x0, y0)` to `(x1, y1)`. Corners are taken
    /// as given; a rectangle with `x0 > x1` or `y0 > y1` is empty.
    ///
    /// ```
    /// use wayfarer_index::query::Rect;
    ///
    /// let view = Rect::new(2, 2, 4, 3);
    /// assert!(view.contains(4, 3) && !view.contains(5, 3));
    /// assert!(Rect::new(4, 0, 2, 0).is_empty());
    /// ```
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Square of side `2 * range + 1` centred on `(x, y)`.
    pub fn around(x: i32, y: i32, range: i32) -> Self {
        Self::new(x - range, y - range, x + range, y + range)
    }

    /// The single tile `(x, y)`.
    pub fn cell(x: i32, y: i32) -> Self {
        Self::new(x, y, x, y)
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x0 && x <= self.x1 && y >= self.y0 && y <= self.y1
    }

    /// Shift both corners by `(dx, dy)`.
    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x0 + dx, self.y0 + dy, self.x1 + dx, self.y1 + dy)
    }

    pub fn is_empty(&self) -> bool {
        self.x0 > self.x1 || self.y0 > self.y1
    }

    /// Intersect with a `width x height` map.
    pub fn clamp(&self, width: i32, height: i32) -> Self {
        Self::new(self.x0.max(0), self.y0.max(0), self.x1.min(width - 1), self.y1.min(height - 1))
    }
}

// ---------------------------------------------------------------------------
// Snapshot phase
// ---------------------------------------------------------------------------

#[inline]
fn kind_matches(filter: Option<EntityKind>, kind: EntityKind) -> bool {
    filter.map_or(true, |wanted| wanted == kind)
}

/// Append every entity of `map` inside the (already clamped) `area` that
/// passes `filter` and `keep` to `out`. Non-creature lists are walked
/// before creature lists.
fn collect_area<P>(
    map: &LocalMap,
    arena: &EntityArena,
    area: Rect,
    filter: Option<EntityKind>,
    keep: P,
    out: &mut Vec<EntityKey>,
) where
    P: Fn(&Entity) -> bool,
{
    if area.is_empty() {
        return;
    }
    let grid = map.grid();
    let (bx0, by0) = grid.block_of(area.x0, area.y0);
    let (bx1, by1) = grid.block_of(area.x1, area.y1);

    let mut lists = Vec::with_capacity(2);
    if filter.map_or(true, |k| !k.is_creature()) {
        lists.push(BucketList::Others);
    }
    if filter.map_or(true, |k| k.is_creature()) {
        lists.push(BucketList::Creatures);
    }

    for list in lists {
        for by in by0..=by1 {
            for bx in bx0..=bx1 {
                for key in grid.bucket(arena, bx, by, list) {
                    let Some(entity) = arena.get(key) else { continue };
                    if kind_matches(filter, entity.kind())
                        && area.contains(entity.x(), entity.y())
                        && keep(entity)
                    {
                        out.push(key);
                    }
                }
            }
        }
    }
}

/// Keys of every entity inside `rect` on `map`, in visiting order.
pub fn snapshot_rect<H: QueryHost + ?Sized>(
    host: &H,
    map: &MapName,
    rect: Rect,
    filter: Option<EntityKind>,
) -> Result<Vec<EntityKey>, IndexError> {
    let index = host.index();
    let local = index.maps().local(map)?;
    let area = rect.clamp(local.width(), local.height());
    let mut keys = Vec::new();
    collect_area(local, index.entities(), area, filter, |_| true, &mut keys);
    Ok(keys)
}

fn snapshot_cell<H: QueryHost + ?Sized>(
    host: &H,
    map: &MapName,
    x: i32,
    y: i32,
    filter: Option<EntityKind>,
) -> Result<Vec<EntityKey>, IndexError> {
    let index = host.index();
    let local = index.maps().local(map)?;
    let grid = local.grid();
    let mut keys = Vec::new();
    if !grid.contains(x, y) {
        return Ok(keys);
    }
    let (bx, by) = grid.block_of(x, y);
    let arena = index.entities();
    for list in [BucketList::Others, BucketList::Creatures] {
        for key in grid.bucket(arena, bx, by, list) {
            let Some(entity) = arena.get(key) else { continue };
            if kind_matches(filter, entity.kind()) && entity.x() == x && entity.y() == y {
                keys.push(key);
            }
        }
    }
    Ok(keys)
}

/// Keys of entities that leave `rect` when it shifts by `(dx, dy)`.
///
/// Each delta must be -1, 0 or 1 and at least one must be non-zero.
pub fn snapshot_movement_delta<H: QueryHost + ?Sized>(
    host: &H,
    map: &MapName,
    rect: Rect,
    dx: i32,
    dy: i32,
    filter: Option<EntityKind>,
) -> Result<Vec<EntityKey>, IndexError> {
    if dx == 0 && dy == 0 {
        return Err(IndexError::NoMovement);
    }
    if dx.abs() > 1 || dy.abs() > 1 {
        return Err(IndexError::StepTooLong { dx, dy });
    }
    let index = host.index();
    let local = index.maps().local(map)?;
    let (width, height) = (local.width(), local.height());
    let mut keys = Vec::new();

    if dx == 0 || dy == 0 {
        // Straight move: the trailing strip is itself a rectangle.
        let mut strip = rect;
        if dx == 0 {
            if dy < 0 {
                strip.y0 = rect.y1 + dy + 1;
            } else {
                strip.y1 = rect.y0 + dy - 1;
            }
        } else if dx < 0 {
            strip.x0 = rect.x1 + dx + 1;
        } else {
            strip.x1 = rect.x0 + dx - 1;
        }
        let area = strip.clamp(width, height);
        collect_area(local, index.entities(), area, filter, |_| true, &mut keys);
    } else {
        // Diagonal move: an L of two strips. The trailing-edge test runs
        // against the clamped rectangle.
        let area = rect.clamp(width, height);
        let trailing = |e: &Entity| {
            let (x, y) = (e.x(), e.y());
            (dx > 0 && x < area.x0 + dx)
                || (dx < 0 && x > area.x1 + dx)
                || (dy > 0 && y < area.y0 + dy)
                || (dy < 0 && y > area.y1 + dy)
        };
        collect_area(local, index.entities(), area, filter, trailing, &mut keys);
    }
    Ok(keys)
}

// ---------------------------------------------------------------------------
// Visit phase
// ---------------------------------------------------------------------------

fn visit<H, F>(host: &mut H, snapshot: Vec<EntityKey>, mut visitor: F) -> usize
where
    H: QueryHost + ?Sized,
    F: FnMut(&mut H, EntityKey),
{
    let mut lock = QueryLock::acquire(host);
    let mut visited = 0;
    for key in snapshot {
        if !lock.index().entities().is_linked(key) {
            continue;
        }
        visitor(&mut *lock, key);
        visited += 1;
    }
    visited
}

/// Visit every entity inside `rect` (clamped to the map) that passes
/// `filter`. Returns the number of visitor calls.
pub fn query_rect<H, F>(
    host: &mut H,
    map: &MapName,
    rect: Rect,
    filter: Option<EntityKind>,
    visitor: F,
) -> Result<usize, IndexError>
where
    H: QueryHost + ?Sized,
    F: FnMut(&mut H, EntityKey),
{
    let snapshot = snapshot_rect(&*host, map, rect, filter)?;
    tracing::trace!(map = %map, ?rect, matches = snapshot.len(), "rect query");
    Ok(visit(host, snapshot, visitor))
}

/// Visit every entity standing exactly on `(x, y)`.
pub fn query_cell<H, F>(
    host: &mut H,
    map: &MapName,
    x: i32,
    y: i32,
    filter: Option<EntityKind>,
    visitor: F,
) -> Result<usize, IndexError>
where
    H: QueryHost + ?Sized,
    F: FnMut(&mut H, EntityKey),
{
    let snapshot = snapshot_cell(&*host, map, x, y, filter)?;
    tracing::trace!(map = %map, x, y, matches = snapshot.len(), "cell query");
    Ok(visit(host, snapshot, visitor))
}

/// Visit the entities that `rect` loses when it moves by `(dx, dy)`.
///
/// With both deltas non-zero the trailing strips are tested against the
/// rectangle after clamping, so a rectangle hanging off the map's low edge
/// reports the first in-bounds row or column as vacated.
pub fn query_movement_delta<H, F>(
    host: &mut H,
    map: &MapName,
    rect: Rect,
    dx: i32,
    dy: i32,
    filter: Option<EntityKind>,
    visitor: F,
) -> Result<usize, IndexError>
where
    H: QueryHost + ?Sized,
    F: FnMut(&mut H, EntityKey),
{
    let snapshot = snapshot_movement_delta(&*host, map, rect, dx, dy, filter)?;
    tracing::trace!(map = %map, ?rect, dx, dy, matches = snapshot.len(), "movement delta query");
    Ok(visit(host, snapshot, visitor))
}

/// Visit every occupant of the ephemeral id range, in id order.
pub fn foreach_object<H, F>(host: &mut H, filter: Option<EntityKind>, visitor: F) -> usize
where
    H: QueryHost + ?Sized,
    F: FnMut(&mut H, EntityKey),
{
    let snapshot: Vec<EntityKey> = {
        let index = host.index();
        index
            .ids()
            .objects()
            .filter(|(_, key)| {
                index
                    .entities()
                    .get(*key)
                    .is_some_and(|e| kind_matches(filter, e.kind()))
            })
            .map(|(_, key)| key)
            .collect()
    };
    visit(host, snapshot, visitor)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
