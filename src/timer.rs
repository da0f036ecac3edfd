//! One-shot timers delivered between task runs.
//!
//! Timers live in a slab owned by the router; a [`TimerId`] is the handle
//! an element keeps. Expirations are ordered by a min-heap of
//! `(expiry, sequence)` so that simultaneous timers fire in scheduling
//! order. Periodic behavior is built from one-shot timers: the element's
//! `run_timer` reschedules the timer it was handed.

use crate::timestamp::Timestamp;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Identifier of a timer within its router's timer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub(crate) usize);

#[derive(Debug)]
struct TimerState {
    element: usize,
    expiry: Timestamp,
    scheduled: bool,
    /// Guards against stale heap entries after unschedule/reschedule.
    generation: u64,
}

/// The slab of timers plus the expiry heap.
#[derive(Default)]
pub(crate) struct TimerSet {
    timers: Vec<TimerState>,
    heap: BinaryHeap<Reverse<(Timestamp, u64, usize, u64)>>,
    next_seq: u64,
}

impl TimerSet {
    pub fn create(&mut self, element: usize) -> TimerId {
        let id = TimerId(self.timers.len());
        self.timers.push(TimerState {
            element,
            expiry: Timestamp::ZERO,
            scheduled: false,
            generation: 0,
        });
        id
    }

    pub fn schedule_at(&mut self, id: TimerId, when: Timestamp) {
        let Some(t) = self.timers.get_mut(id.0) else { return };
        t.scheduled = true;
        t.generation += 1;
        t.expiry = when;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((when, seq, id.0, t.generation)));
    }

    pub fn schedule_after(&mut self, id: TimerId, now: Timestamp, delta: Timestamp) {
        self.schedule_at(id, now + delta);
    }

    pub fn schedule_after_msec(&mut self, id: TimerId, now: Timestamp, ms: i64) {
        self.schedule_at(id, now + Timestamp::from_msec(ms));
    }

    /// Schedules the timer to fire on the next expiry scan.
    pub fn schedule_now(&mut self, id: TimerId, now: Timestamp) {
        self.schedule_at(id, now);
    }

    pub fn unschedule(&mut self, id: TimerId) {
        if let Some(t) = self.timers.get_mut(id.0) {
            t.scheduled = false;
            t.generation += 1;
        }
    }

    pub fn scheduled(&self, id: TimerId) -> bool {
        self.timers.get(id.0).is_some_and(|t| t.scheduled)
    }

    /// The earliest scheduled expiry, if any.
    pub fn next_expiry(&mut self) -> Option<Timestamp> {
        while let Some(Reverse((when, _, idx, generation))) = self.heap.peek().copied() {
            let live = self
                .timers
                .get(idx)
                .is_some_and(|t| t.scheduled && t.generation == generation);
            if live {
                return Some(when);
            }
            self.heap.pop();
        }
        None
    }

    /// Removes and returns the next timer expired at `now`, as
    /// `(timer, element, expiry)`. The timer is left unscheduled; the
    /// element may reschedule it from `run_timer`.
    pub fn pop_expired(&mut self, now: Timestamp) -> Option<(TimerId, usize, Timestamp)> {
        loop {
            let Reverse((when, _, idx, generation)) = self.heap.peek().copied()?;
            let live = self
                .timers
                .get(idx)
                .is_some_and(|t| t.scheduled && t.generation == generation);
            if !live {
                self.heap.pop();
                continue;
            }
            if when > now {
                return None;
            }
            self.heap.pop();
            let t = &mut self.timers[idx];
            t.scheduled = false;
            t.generation += 1;
            return Some((TimerId(idx), t.element, when));
        }
    }

    #[cfg(test)]
    pub fn any_scheduled(&mut self) -> bool {
        self.next_expiry().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drop_expiry(popped: (TimerId, usize, Timestamp)) -> (TimerId, usize) {
        (popped.0, popped.1)
    }

    #[test]
    fn fires_in_expiry_order() {
        let mut set = TimerSet::default();
        let now = Timestamp::from_sec(100);
        let a = set.create(0);
        let b = set.create(1);
        let c = set.create(2);
        set.schedule_after_msec(a, now, 300);
        set.schedule_after_msec(b, now, 100);
        set.schedule_after_msec(c, now, 200);
        let later = now + Timestamp::from_msec(500);
        assert_eq!(set.pop_expired(later).map(drop_expiry), Some((b, 1)));
        assert_eq!(set.pop_expired(later).map(drop_expiry), Some((c, 2)));
        assert_eq!(set.pop_expired(later).map(drop_expiry), Some((a, 0)));
        assert_eq!(set.pop_expired(later).map(drop_expiry), None);
    }

    #[test]
    fn unexpired_timers_stay() {
        let mut set = TimerSet::default();
        let now = Timestamp::from_sec(5);
        let a = set.create(0);
        set.schedule_after_msec(a, now, 1000);
        assert_eq!(set.pop_expired(now).map(drop_expiry), None);
        assert!(set.scheduled(a));
        assert_eq!(set.next_expiry(), Some(now + Timestamp::from_msec(1000)));
    }

    #[test]
    fn unschedule_cancels_pending_fire() {
        let mut set = TimerSet::default();
        let now = Timestamp::ZERO;
        let a = set.create(0);
        set.schedule_after_msec(a, now, 10);
        set.unschedule(a);
        assert_eq!(set.pop_expired(now + Timestamp::from_sec(1)).map(drop_expiry), None);
        assert!(!set.any_scheduled());
    }

    #[test]
    fn reschedule_supersedes_old_entry() {
        let mut set = TimerSet::default();
        let now = Timestamp::ZERO;
        let a = set.create(0);
        set.schedule_after_msec(a, now, 10);
        set.schedule_after_msec(a, now, 5000);
        // The 10 ms entry is stale; only the 5000 ms one may fire.
        assert_eq!(set.pop_expired(now + Timestamp::from_msec(100)).map(drop_expiry), None);
        assert_eq!(set.pop_expired(now + Timestamp::from_msec(5000)).map(drop_expiry), Some((a, 0)));
    }

    #[test]
    fn simultaneous_expiries_fire_in_schedule_order() {
        let mut set = TimerSet::default();
        let now = Timestamp::ZERO;
        let a = set.create(0);
        let b = set.create(1);
        set.schedule_at(b, now);
        set.schedule_at(a, now);
        assert_eq!(set.pop_expired(now).map(drop_expiry), Some((b, 1)));
        assert_eq!(set.pop_expired(now).map(drop_expiry), Some((a, 0)));
    }
}
