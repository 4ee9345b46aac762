//! Hashed wheel timer for idle and deadline timeouts.
//!
//! The reactor arms one entry per parked connection; insert and cancel are
//! O(1). Entries are identified by `(id, generation)` handles so a handle
//! left over from a previous arming can never cancel or fire a reused slot.

use std::time::{Duration, Instant};

/// Wheel slot count. With the default 250ms tick the wheel spans 128
/// seconds before an entry needs a second rotation.
const DEFAULT_SLOTS: usize = 512;

/// Default tick granularity.
pub const DEFAULT_TICK: Duration = Duration::from_millis(250);

/// Cancellation handle returned by [`TimerWheel::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    id: u32,
    generation: u32,
}

#[derive(Debug)]
struct TimerEntry<T> {
    deadline: u64,
    generation: u32,
    armed: bool,
    value: Option<T>,
}

/// O(1) insert/cancel timer wheel with coarse ticks.
pub struct TimerWheel<T> {
    slots: Vec<Vec<(u32, u32)>>,
    entries: Vec<TimerEntry<T>>,
    free: Vec<u32>,
    tick: Duration,
    current: u64,
    epoch: Instant,
    armed_count: usize,
}

impl<T: Copy> TimerWheel<T> {
    pub fn new(tick: Duration) -> Self {
        Self::with_slots(tick, DEFAULT_SLOTS)
    }

    pub fn with_slots(tick: Duration, slots: usize) -> Self {
        Self {
            slots: (0..slots).map(|_| Vec::new()).collect(),
            entries: Vec::new(),
            free: Vec::new(),
            tick,
            current: 0,
            epoch: Instant::now(),
            armed_count: 0,
        }
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick
    }

    pub fn armed(&self) -> usize {
        self.armed_count
    }

    /// Arms a timer `after` from now. Rounds up to the next tick; a zero
    /// duration still waits one full tick.
    pub fn insert(&mut self, after: Duration, value: T) -> TimerHandle {
        let ticks = after.as_nanos().div_ceil(self.tick.as_nanos().max(1)).max(1) as u64;
        let deadline = self.current + ticks;

        let id = match self.free.pop() {
            Some(id) => {
                let entry = &mut self.entries[id as usize];
                entry.generation = entry.generation.wrapping_add(1);
                entry.deadline = deadline;
                entry.armed = true;
                entry.value = Some(value);
                id
            }
            None => {
                let id = self.entries.len() as u32;
                self.entries.push(TimerEntry { deadline, generation: 0, armed: true, value: Some(value) });
                id
            }
        };

        let generation = self.entries[id as usize].generation;
        let slot = (deadline % self.slots.len() as u64) as usize;
        self.slots[slot].push((id, generation));
        self.armed_count += 1;

        TimerHandle { id, generation }
    }

    /// Disarms the entry behind `handle`. A handle from a previous arming of
    /// the same slot is ignored.
    pub fn cancel(&mut self, handle: TimerHandle) {
        if let Some(entry) = self.entries.get_mut(handle.id as usize) {
            if entry.armed && entry.generation == handle.generation {
                entry.armed = false;
                entry.value = None;
                self.armed_count -= 1;
                // The slot reference is dropped lazily when its tick drains.
            }
        }
    }

    /// Advances the wheel to `now`, pushing every fired payload into
    /// `fired` in tick order.
    pub fn advance(&mut self, now: Instant, fired: &mut Vec<T>) {
        let target = (now.duration_since(self.epoch).as_nanos() / self.tick.as_nanos().max(1)) as u64;
        while self.current < target {
            self.current += 1;
            let slot = (self.current % self.slots.len() as u64) as usize;
            let mut pending = std::mem::take(&mut self.slots[slot]);
            pending.retain(|&(id, generation)| {
                let entry = &mut self.entries[id as usize];
                if !entry.armed || entry.generation != generation {
                    // Cancelled or re-armed. Only the reference from the
                    // entry's latest arming recycles the id, so an id is
                    // freed exactly once.
                    if entry.generation == generation && !entry.armed {
                        self.free.push(id);
                    }
                    return false;
                }
                if entry.deadline > self.current {
                    // Needs another rotation through the same slot.
                    return true;
                }
                entry.armed = false;
                self.armed_count -= 1;
                fired.push(entry.value.take().expect("armed entry has a value"));
                self.free.push(id);
                false
            });
            self.slots[slot] = pending;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wheel() -> TimerWheel<u32> {
        TimerWheel::with_slots(Duration::from_millis(10), 8)
    }

    #[test]
    fn fires_after_deadline() {
        let mut w = wheel();
        let epoch = w.epoch;
        w.insert(Duration::from_millis(30), 7);

        let mut fired = Vec::new();
        w.advance(epoch + Duration::from_millis(20), &mut fired);
        assert!(fired.is_empty());

        w.advance(epoch + Duration::from_millis(40), &mut fired);
        assert_eq!(fired, vec![7]);
        assert_eq!(w.armed(), 0);
    }

    #[test]
    fn cancel_prevents_fire() {
        let mut w = wheel();
        let epoch = w.epoch;
        let handle = w.insert(Duration::from_millis(20), 1);
        w.cancel(handle);

        let mut fired = Vec::new();
        w.advance(epoch + Duration::from_millis(100), &mut fired);
        assert!(fired.is_empty());
    }

    #[test]
    fn stale_handle_does_not_cancel_rearm() {
        let mut w = wheel();
        let epoch = w.epoch;
        let old = w.insert(Duration::from_millis(20), 1);
        w.cancel(old);

        // Drain the stale slot reference so the id is recycled.
        let mut fired = Vec::new();
        w.advance(epoch + Duration::from_millis(40), &mut fired);

        let _new = w.insert(Duration::from_millis(40), 2);
        w.cancel(old); // stale generation, must be a no-op

        w.advance(epoch + Duration::from_millis(120), &mut fired);
        assert_eq!(fired, vec![2]);
    }

    #[test]
    fn survives_full_rotation() {
        let mut w = wheel(); // 8 slots x 10ms = 80ms per rotation
        let epoch = w.epoch;
        w.insert(Duration::from_millis(150), 9);

        let mut fired = Vec::new();
        w.advance(epoch + Duration::from_millis(100), &mut fired);
        assert!(fired.is_empty(), "must not fire on the first rotation");

        w.advance(epoch + Duration::from_millis(200), &mut fired);
        assert_eq!(fired, vec![9]);
    }
}
