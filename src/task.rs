//! Tasks: the stride-scheduled units of cooperative work.
//!
//! A task belongs to one element. Its run callback
//! ([`Element::run_task`](crate::element::Element::run_task)) does a
//! bounded amount of work and returns whether it did any; a task that
//! wants to run again must reschedule itself before returning. Relative
//! shares come from stride scheduling: each task holds `tickets`, its
//! stride is `STRIDE1 / tickets`, and the ready queue always runs the task
//! with the minimum accumulated `pass`, adding the stride after each run.

use nutype::nutype;

/// Stride numerator; a task with `t` tickets advances `STRIDE1 / t` pass
/// units per run.
pub const STRIDE1: u32 = 1 << 16;

/// Largest permitted ticket count.
pub const MAX_TICKETS: u32 = 1 << 15;

/// Ticket count a fresh task starts with.
pub const DEFAULT_TICKETS: u32 = 1 << 10;

/// A validated ticket count in `1..=MAX_TICKETS`.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 32768),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct Tickets(u32);

impl Tickets {
    /// Clamps an arbitrary count into the valid range. Zero becomes one;
    /// unscheduling on zero tickets is the caller's business.
    pub fn clamped(n: u32) -> Tickets {
        match Tickets::try_new(n.clamp(1, MAX_TICKETS)) {
            Ok(t) => t,
            Err(_) => unreachable!("clamped ticket count is always valid"),
        }
    }
}

impl Default for Tickets {
    fn default() -> Tickets {
        Tickets::clamped(DEFAULT_TICKETS)
    }
}

/// Identifier of a task within its router's task set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) usize);

/// One task's scheduling state.
#[derive(Debug)]
pub(crate) struct TaskState {
    pub element: usize,
    pub tickets: Tickets,
    pub pass: u64,
    pub scheduled: bool,
    /// FIFO tie-break among equal passes: lower sequence ran less recently.
    pub seq: u64,
}

impl TaskState {
    pub fn stride(&self) -> u64 {
        (STRIDE1 / u32::from(self.tickets)) as u64
    }
}

/// The slab of tasks plus the ready list.
#[derive(Default)]
pub(crate) struct TaskSet {
    tasks: Vec<TaskState>,
    next_seq: u64,
}

impl TaskSet {
    pub fn create(&mut self, element: usize) -> TaskId {
        let id = TaskId(self.tasks.len());
        self.tasks.push(TaskState {
            element,
            tickets: Tickets::default(),
            pass: 0,
            scheduled: false,
            seq: 0,
        });
        id
    }

    #[cfg(test)]
    pub fn get(&self, id: TaskId) -> Option<&TaskState> {
        self.tasks.get(id.0)
    }

    pub fn schedule(&mut self, id: TaskId) {
        if self.tasks.get(id.0).is_none_or(|t| t.scheduled) {
            return;
        }
        // A long-sleeping task must not cash in the lag of its stale
        // pass; catch it up to the minimum of the already-ready tasks.
        let min_pass = self
            .tasks
            .iter()
            .filter(|t| t.scheduled)
            .map(|t| t.pass)
            .min()
            .unwrap_or(0);
        let t = &mut self.tasks[id.0];
        t.scheduled = true;
        t.seq = self.next_seq;
        self.next_seq += 1;
        t.pass = t.pass.max(min_pass);
    }

    pub fn unschedule(&mut self, id: TaskId) {
        if let Some(t) = self.tasks.get_mut(id.0) {
            t.scheduled = false;
        }
    }

    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.tasks.get(id.0).is_some_and(|t| t.scheduled)
    }

    /// Sets the ticket count; zero unschedules the task.
    pub fn set_tickets(&mut self, id: TaskId, n: u32) {
        if n == 0 {
            self.unschedule(id);
            return;
        }
        if let Some(t) = self.tasks.get_mut(id.0) {
            t.tickets = Tickets::clamped(n);
        }
    }

    pub fn tickets(&self, id: TaskId) -> u32 {
        self.tasks.get(id.0).map_or(0, |t| u32::from(t.tickets))
    }

    pub fn any_scheduled(&self) -> bool {
        self.tasks.iter().any(|t| t.scheduled)
    }

    /// Picks the scheduled task with minimum pass (FIFO among ties),
    /// marks it unscheduled for the duration of its run, and returns it
    /// with its element. The caller charges the stride afterwards via
    /// [`TaskSet::charge`].
    pub fn take_next(&mut self) -> Option<(TaskId, usize)> {
        let id = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.scheduled)
            .min_by_key(|(_, t)| (t.pass, t.seq))
            .map(|(i, _)| TaskId(i))?;
        self.tasks[id.0].scheduled = false;
        Some((id, self.tasks[id.0].element))
    }

    pub fn charge(&mut self, id: TaskId) {
        if let Some(t) = self.tasks.get_mut(id.0) {
            t.pass = t.pass.wrapping_add(t.stride());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickets_clamp_into_range() {
        assert_eq!(u32::from(Tickets::clamped(0)), 1);
        assert_eq!(u32::from(Tickets::clamped(1 << 20)), MAX_TICKETS);
        assert_eq!(u32::from(Tickets::default()), DEFAULT_TICKETS);
    }

    #[test]
    fn stride_is_inverse_of_tickets() {
        let mut set = TaskSet::default();
        let a = set.create(0);
        set.set_tickets(a, 64);
        assert_eq!(set.get(a).unwrap().stride(), (STRIDE1 / 64) as u64);
    }

    #[test]
    fn more_tickets_run_more_often() {
        let mut set = TaskSet::default();
        let fast = set.create(0);
        let slow = set.create(1);
        set.set_tickets(fast, 200);
        set.set_tickets(slow, 100);
        let mut runs = [0usize; 2];
        for _ in 0..300 {
            set.schedule(fast);
            set.schedule(slow);
            let (id, elem) = set.take_next().unwrap();
            runs[elem] += 1;
            set.charge(id);
        }
        // 2:1 ticket ratio converges on a 2:1 run ratio.
        assert!(runs[0] > runs[1] * 3 / 2, "runs: {runs:?}");
    }

    #[test]
    fn zero_tickets_unschedules() {
        let mut set = TaskSet::default();
        let a = set.create(0);
        set.schedule(a);
        set.set_tickets(a, 0);
        assert!(!set.is_scheduled(a));
        assert!(set.take_next().is_none());
    }

    #[test]
    fn equal_passes_run_fifo() {
        let mut set = TaskSet::default();
        let a = set.create(0);
        let b = set.create(1);
        set.schedule(a);
        set.schedule(b);
        let (first, elem) = set.take_next().unwrap();
        assert_eq!(elem, 0);
        set.charge(first);
        let (_, elem) = set.take_next().unwrap();
        assert_eq!(elem, 1);
    }
}
