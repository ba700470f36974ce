//! Timer scheduling.
//!
//! The world consumes a [`Scheduler`]: "call me back at tick T, give me a
//! handle I can cancel" plus "what time is it". [`TickScheduler`] is a
//! deterministic implementation driven purely by [`Scheduler::advance`];
//! production servers can plug in a timer wheel behind the same trait.

use std::collections::{BTreeMap, HashMap};

use wayfarer_index::entity::BlockId;
use wayfarer_index::time::{Tick, TimerHandle};

/// What to do when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Expire the floor item with this ephemeral id.
    ClearFloorItem(BlockId),
}

pub trait Scheduler {
    /// Current server time.
    fn now(&self) -> Tick;

    /// Arrange for `event` to fire at `at`. Times in the past fire on the
    /// next [`advance`](Self::advance).
    fn schedule(&mut self, at: Tick, event: TimerEvent) -> TimerHandle;

    /// Cancel a pending timer. Returns `false` if it already fired or was
    /// cancelled.
    fn cancel(&mut self, handle: TimerHandle) -> bool;

    /// Move the clock to `now` and hand back every event due by then, in
    /// firing order. A fired timer is no longer cancellable.
    fn advance(&mut self, now: Tick) -> Vec<(TimerHandle, TimerEvent)>;

    /// Number of timers still waiting to fire.
    fn pending(&self) -> usize;
}

// ---------------------------------------------------------------------------
// TickScheduler
// ---------------------------------------------------------------------------

/// Ordered-map scheduler. Timers due at the same tick fire in the order
/// they were scheduled.
#[derive(Debug, Default)]
pub struct TickScheduler {
    now: Tick,
    next_handle: u64,
    queue: BTreeMap<(Tick, u64), TimerEvent>,
    due: HashMap<u64, Tick>,
}

impl TickScheduler {
    /// A scheduler starting at tick zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheduler whose clock starts at `now`.
    pub fn starting_at(now: Tick) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }
}

impl Scheduler for TickScheduler {
    fn now(&self) -> Tick {
        self.now
    }

    fn schedule(&mut self, at: Tick, event: TimerEvent) -> TimerHandle {
        self.next_handle += 1;
        let raw = self.next_handle;
        self.queue.insert((at, raw), event);
        self.due.insert(raw, at);
        TimerHandle::from_raw(raw)
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        let raw = handle.to_raw();
        match self.due.remove(&raw) {
            Some(at) => self.queue.remove(&(at, raw)).is_some(),
            None => false,
        }
    }

    fn advance(&mut self, now: Tick) -> Vec<(TimerHandle, TimerEvent)> {
        if now > self.now {
            self.now = now;
        }
        let mut fired = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            let (at, raw) = *entry.key();
            if at > self.now {
                break;
            }
            let event = entry.remove();
            self.due.remove(&raw);
            fired.push((TimerHandle::from_raw(raw), event));
        }
        if !fired.is_empty() {
            tracing::trace!(now = %self.now, fired = fired.len(), "timers fired");
        }
        fired
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }
}
