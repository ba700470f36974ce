//! Per-map block grid.
//!
//! The map is partitioned into `block_size x block_size` tile blocks. Each
//! block holds two independent singly-headed, doubly-linked lists threaded
//! through the [`EntityArena`]: one for mobs and one for everything else.
//! An entity sits in the block `(x / block_size, y / block_size)` of its
//! current coordinates, in exactly one list, or in none.
//!
//! Lists are ordered most-recently-linked first.

use crate::entity::{EntityArena, EntityKey, EntityKind};
use crate::IndexError;

/// Default tile side length of one block.
pub const DEFAULT_BLOCK_SIZE: i32 = 8;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    creatures: Option<EntityKey>,
    others: Option<EntityKey>,
}

impl Bucket {
    fn head_mut(&mut self, kind: EntityKind) -> &mut Option<EntityKey> {
        if kind.is_creature() {
            &mut self.creatures
        } else {
            &mut self.others
        }
    }
}

/// Which of a block's two lists to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketList {
    /// Mobs only.
    Creatures,
    /// Everything that is not a mob.
    Others,
}

#[derive(Debug)]
pub struct BlockGrid {
    width: i32,
    height: i32,
    block_size: i32,
    blocks_x: i32,
    blocks_y: i32,
    buckets: Vec<Bucket>,
    players: usize,
    linked: usize,
}

impl BlockGrid {
    /// Allocate an empty grid covering a `width x height` tile map.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is not positive or a dimension is negative.
    pub fn new(width: i32, height: i32, block_size: i32) -> Self {
        assert!(block_size > 0, "block_size must be positive, got {block_size}");
        assert!(
            width >= 0 && height >= 0,
            "map dimensions must be non-negative, got {width}x{height}"
        );
        let blocks_x = (width + block_size - 1) / block_size;
        let blocks_y = (height + block_size - 1) / block_size;
        Self {
            width,
            height,
            block_size,
            blocks_x,
            blocks_y,
            buckets: vec![Bucket::default(); (blocks_x * blocks_y) as usize],
            players: 0,
            linked: 0,
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn block_size(&self) -> i32 {
        self.block_size
    }

    /// Number of blocks along each axis.
    pub fn blocks(&self) -> (i32, i32) {
        (self.blocks_x, self.blocks_y)
    }

    /// Players currently linked into this grid.
    pub fn players(&self) -> usize {
        self.players
    }

    /// Entities of any kind currently linked into this grid.
    pub fn len(&self) -> usize {
        self.linked
    }

    pub fn is_empty(&self) -> bool {
        self.linked == 0
    }

    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && x < self.width && y >= 0 && y < self.height
    }

    /// Block coordinates of tile `(x, y)`. The tile must be in bounds.
    #[inline]
    pub fn block_of(&self, x: i32, y: i32) -> (i32, i32) {
        (x / self.block_size, y / self.block_size)
    }

    fn bucket_index(&self, bx: i32, by: i32) -> usize {
        debug_assert!(bx >= 0 && bx < self.blocks_x && by >= 0 && by < self.blocks_y);
        (bx + by * self.blocks_x) as usize
    }

    /// Walk one list of block `(bx, by)` from its head.
    pub fn bucket<'a>(&self, arena: &'a EntityArena, bx: i32, by: i32, list: BucketList) -> BucketIter<'a> {
        let bucket = &self.buckets[self.bucket_index(bx, by)];
        let head = match list {
            BucketList::Creatures => bucket.creatures,
            BucketList::Others => bucket.others,
        };
        BucketIter { arena, next: head }
    }

    /// Prepend an unlinked, in-bounds entity to its block's list.
    pub(crate) fn link(&mut self, arena: &mut EntityArena, key: EntityKey) -> Result<(), IndexError> {
        let entity = arena.get(key).ok_or(IndexError::StaleEntity { key })?;
        let (kind, x, y) = (entity.kind(), entity.x(), entity.y());

        if arena.is_linked(key) {
            tracing::error!(key = ?key, id = %entity.id(), kind = %kind, "link refused: entity is already in a block list");
            return Err(IndexError::AlreadyLinked { key });
        }
        if !self.contains(x, y) {
            tracing::warn!(key = ?key, id = %entity.id(), x, y, width = self.width, height = self.height, "link refused: coordinates out of bounds");
            return Err(IndexError::OutOfBounds {
                map: entity.map().clone(),
                x,
                y,
            });
        }

        let (bx, by) = self.block_of(x, y);
        let idx = self.bucket_index(bx, by);
        let head = self.buckets[idx].head_mut(kind);
        let old_head = *head;
        *head = Some(key);

        if let Some(links) = arena.links_mut(key) {
            links.prev = Some(EntityKey::LIST_HEAD);
            links.next = old_head;
        }
        if let Some(old) = old_head {
            match arena.links_mut(old) {
                Some(links) => links.prev = Some(key),
                None => invariant_violation!(
                    "head {old:?} of block ({bx}, {by}) is not a live entity while linking {key:?}"
                ),
            }
        }

        if kind == EntityKind::Player {
            self.players += 1;
        }
        self.linked += 1;
        tracing::trace!(key = ?key, kind = %kind, x, y, bx, by, "linked");
        Ok(())
    }

    /// Splice an entity out of its list. Returns `false` if it was not
    /// linked.
    pub(crate) fn unlink(&mut self, arena: &mut EntityArena, key: EntityKey) -> bool {
        let Some(entity) = arena.get(key) else {
            return false;
        };
        let (kind, x, y) = (entity.kind(), entity.x(), entity.y());
        let Some(links) = arena.links(key) else {
            return false;
        };
        let Some(prev) = links.prev else {
            if let Some(next) = links.next {
                invariant_violation!("{key:?} is unlinked but still points at {next:?}");
            }
            return false;
        };

        if kind == EntityKind::Player {
            self.players = match self.players.checked_sub(1) {
                Some(n) => n,
                None => invariant_violation!("player count underflow unlinking {key:?}"),
            };
        }

        if let Some(next) = links.next {
            match arena.links_mut(next) {
                Some(next_links) => next_links.prev = Some(prev),
                None => invariant_violation!("successor {next:?} of {key:?} is not a live entity"),
            }
        }

        if prev == EntityKey::LIST_HEAD {
            if !self.contains(x, y) {
                invariant_violation!("linked {key:?} sits outside its map at ({x}, {y})");
            }
            let (bx, by) = self.block_of(x, y);
            let idx = self.bucket_index(bx, by);
            let head = self.buckets[idx].head_mut(kind);
            if *head != Some(key) {
                invariant_violation!(
                    "{key:?} claims to head block ({bx}, {by}) but the head is {:?}",
                    *head
                );
            }
            *head = links.next;
        } else {
            match arena.links_mut(prev) {
                Some(prev_links) => prev_links.next = links.next,
                None => invariant_violation!("predecessor {prev:?} of {key:?} is not a live entity"),
            }
        }

        if let Some(own) = arena.links_mut(key) {
            own.prev = None;
            own.next = None;
        }
        self.linked -= 1;
        tracing::trace!(key = ?key, kind = %kind, x, y, "unlinked");
        true
    }
}

/// Iterator over one bucket list.
pub struct BucketIter<'a> {
    arena: &'a EntityArena,
    next: Option<EntityKey>,
}

impl Iterator for BucketIter<'_> {
    type Item = EntityKey;

    fn next(&mut self) -> Option<EntityKey> {
        let current = self.next?;
        self.next = self.arena.links(current).and_then(|links| links.next);
        Some(current)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
