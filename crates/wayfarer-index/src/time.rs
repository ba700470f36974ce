//! Tick and timer-handle value types shared with the scheduler.
//!
//! The index never reads a clock. Callers pass the current [`Tick`] in and
//! store [`TimerHandle`]s they receive from whatever scheduler drives them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

/// A point in server time, in milliseconds since the scheduler started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tick(pub u64);

impl Tick {
    /// The scheduler's epoch.
    pub const ZERO: Tick = Tick(0);

    /// Milliseconds since the epoch.
    #[inline]
    pub fn millis(self) -> u64 {
        self.0
    }
}

impl Add<Interval> for Tick {
    type Output = Tick;

    fn add(self, rhs: Interval) -> Tick {
        Tick(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t+{}ms", self.0)
    }
}

// ---------------------------------------------------------------------------
// Interval
// ---------------------------------------------------------------------------

/// A span of server time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Interval(pub u64);

impl Interval {
    pub const ZERO: Interval = Interval(0);

    #[inline]
    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    #[inline]
    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }
}

impl Add for Interval {
    type Output = Interval;

    fn add(self, rhs: Interval) -> Interval {
        Interval(self.0.saturating_add(rhs.0))
    }
}

// ---------------------------------------------------------------------------
// TimerHandle
// ---------------------------------------------------------------------------

/// Opaque, cancellable handle to a scheduled callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerHandle(u64);

impl TimerHandle {
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }
}
