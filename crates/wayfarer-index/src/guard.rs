//! Deferred-free guard for reentrant queries.
//!
//! A query visitor may destroy entities, including the one it is visiting
//! or ones later in the same snapshot. While any query is running, frees are
//! parked here instead of releasing storage; the outermost [`QueryLock`]
//! to drop releases them all.
//!
//! The lock is an RAII value that borrows the query host mutably and derefs
//! to it, so visitors get full access to the host through the lock and the
//! release runs on every exit path, unwinding included.

use std::ops::{Deref, DerefMut};

use crate::entity::Entity;
use crate::index::SpatialIndex;

// ---------------------------------------------------------------------------
// DeferredFree
// ---------------------------------------------------------------------------

/// An entity removed during a query, awaiting release.
#[derive(Debug)]
pub(crate) struct PendingFree {
    pub index: u32,
    pub entity: Entity,
}

/// Nesting counter plus the queue of frees requested while it is non-zero.
#[derive(Debug, Default)]
pub(crate) struct DeferredFree {
    depth: usize,
    pending: Vec<PendingFree>,
}

impl DeferredFree {
    pub fn enter(&mut self) {
        self.depth += 1;
    }

    /// Leave one query level. Returns the frees to release once the
    /// outermost level has been left, and nothing otherwise.
    pub fn exit(&mut self) -> Vec<PendingFree> {
        if self.depth == 0 {
            invariant_violation!("query lock released more times than acquired");
        }
        self.depth -= 1;
        if self.depth == 0 {
            std::mem::take(&mut self.pending)
        } else {
            Vec::new()
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.depth > 0
    }

    pub fn defer(&mut self, free: PendingFree) {
        self.pending.push(free);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// QueryHost
// ---------------------------------------------------------------------------

/// Anything that owns a [`SpatialIndex`] and can be handed to query
/// visitors.
///
/// Visitors receive the host, not just the index, so game logic reached
/// from a query can touch whatever else the host owns.
pub trait QueryHost {
    fn index(&self) -> &SpatialIndex;
    fn index_mut(&mut self) -> &mut SpatialIndex;
}

impl QueryHost for SpatialIndex {
    fn index(&self) -> &SpatialIndex {
        self
    }

    fn index_mut(&mut self) -> &mut SpatialIndex {
        self
    }
}

// ---------------------------------------------------------------------------
// QueryLock
// ---------------------------------------------------------------------------

/// Scoped acquisition of the deferred-free guard.
///
/// ```
/// use wayfarer_index::prelude::*;
///
/// let mut index = SpatialIndex::new(IndexSettings::default());
/// {
///     let lock = QueryLock::acquire(&mut index);
///     assert_eq!(lock.index().entities().query_depth(), 1);
/// }
/// assert_eq!(index.entities().query_depth(), 0);
/// ```
pub struct QueryLock<'a, H: QueryHost + ?Sized> {
    host: &'a mut H,
}

impl<'a, H: QueryHost + ?Sized> QueryLock<'a, H> {
    pub fn acquire(host: &'a mut H) -> Self {
        host.index_mut().entities_mut().enter_query();
        Self { host }
    }
}

impl<H: QueryHost + ?Sized> Deref for QueryLock<'_, H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.host
    }
}

impl<H: QueryHost + ?Sized> DerefMut for QueryLock<'_, H> {
    fn deref_mut(&mut self) -> &mut H {
        self.host
    }
}

impl<H: QueryHost + ?Sized> Drop for QueryLock<'_, H> {
    fn drop(&mut self) {
        self.host.index_mut().entities_mut().exit_query();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
