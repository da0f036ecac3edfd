//! The driver: the cooperative scheduler loop that runs a live router.
//!
//! One [`RouterThread`] owns the run loop for one router. Each iteration
//! fires expired timers in expiry order, runs the ready task with the
//! minimum stride pass, and — when idle — waits for the next timer
//! expiry or for readiness on file descriptors registered through
//! `add_select`. Push and pull chains started by a task or timer run to
//! completion before the loop continues; cancellation (a runcount at or
//! below zero) is observed only between quanta, never mid-chain.
//!
//! When a stop is requested the driver first offers every element the
//! chance to re-arm the runcount (the driver-manager protocol); with no
//! resumer it drains the work in flight and returns.

use crate::router::Router;
use crate::timestamp::Timestamp;
use std::time::Duration;
use tracing::{debug, info};

/// Mask bit: interest in readability.
pub const SELECT_READ: u8 = 1;
/// Mask bit: interest in writability.
pub const SELECT_WRITE: u8 = 2;

/// Longest single sleep; bounds how stale a freshly registered selector
/// or cross-thread runcount change can go unnoticed.
const MAX_WAIT_MS: i64 = 1000;

/// A scheduler thread bound to one router.
pub struct RouterThread<'a> {
    router: &'a Router,
}

impl<'a> RouterThread<'a> {
    pub fn new(router: &'a Router) -> RouterThread<'a> {
        RouterThread { router }
    }

    /// Runs one scheduling iteration without sleeping: expired timers,
    /// then at most one task. Returns whether any work was done.
    pub fn driver_once(&self) -> bool {
        let fired = self.router.run_timers();
        let ran = self.router.run_one_task();
        fired > 0 || ran
    }

    /// Runs until no timer is expired and no task is scheduled, up to
    /// `limit` iterations. Never sleeps; the workhorse for tests driving
    /// a manual clock.
    pub fn process_pending(&self, limit: usize) -> usize {
        let mut done = 0;
        while done < limit && self.driver_once() {
            done += 1;
        }
        done
    }

    /// The main loop: runs until the runcount requests a stop that no
    /// element resumes, or until the router is entirely idle (no tasks,
    /// no timers, no selectors).
    pub fn driver(&self) {
        loop {
            if self.router.stop_requested() {
                if !self.router.handle_stop_request() {
                    debug!("runcount requested stop; driver draining");
                    break;
                }
            }
            if self.driver_once() {
                continue;
            }
            if self.router.any_task_scheduled() {
                // A task is ready but could not run (its element was
                // busy); yield briefly rather than spin.
                std::thread::yield_now();
                continue;
            }
            let now = self.router.clock().now();
            match self.router.next_timer_expiry() {
                Some(expiry) => {
                    let wait = (expiry - now).msecval().clamp(0, MAX_WAIT_MS);
                    self.wait(wait);
                }
                None => {
                    if self.router.selectors_snapshot().is_empty() {
                        info!("router idle with no pending work; driver exiting");
                        break;
                    }
                    self.wait(MAX_WAIT_MS);
                }
            }
        }
    }

    /// Runs the driver for at most `duration`, wall-clock.
    pub fn driver_for(&self, duration: Duration) {
        let deadline = Timestamp::now() + Timestamp::from(duration);
        loop {
            if Timestamp::now() >= deadline {
                return;
            }
            if self.router.stop_requested() && !self.router.handle_stop_request() {
                return;
            }
            if self.driver_once() {
                continue;
            }
            let remaining = (deadline - Timestamp::now()).msecval().max(0);
            let wait = match self.router.next_timer_expiry() {
                Some(expiry) => (expiry - self.router.clock().now()).msecval().clamp(0, remaining),
                None => remaining,
            };
            self.wait(wait.min(MAX_WAIT_MS));
        }
    }

    /// Sleeps for up to `ms`, waking early when a registered descriptor
    /// becomes ready (its element's `selected` is dispatched before
    /// returning). Under a manual clock only a token wall-clock pause is
    /// taken — whoever owns the clock must advance it.
    fn wait(&self, ms: i64) {
        if self.router.clock().is_manual() {
            std::thread::sleep(Duration::from_millis(1));
            return;
        }
        let selectors = self.router.selectors_snapshot();
        if selectors.is_empty() {
            if ms > 0 {
                std::thread::sleep(Duration::from_millis(ms as u64));
            }
            return;
        }
        self.poll_selectors(&selectors, ms);
    }

    #[cfg(unix)]
    fn poll_selectors(&self, selectors: &[(i32, usize, u8)], ms: i64) {
        use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
        use std::os::fd::BorrowedFd;

        let mut fds: Vec<PollFd<'_>> = Vec::with_capacity(selectors.len());
        for &(fd, _element, mask) in selectors {
            let mut flags = PollFlags::empty();
            if mask & SELECT_READ != 0 {
                flags |= PollFlags::POLLIN;
            }
            if mask & SELECT_WRITE != 0 {
                flags |= PollFlags::POLLOUT;
            }
            // The fd stays registered for the poll's duration; elements
            // deregister through remove_select before closing.
            let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
            fds.push(PollFd::new(borrowed, flags));
        }
        let timeout = PollTimeout::from(ms.clamp(0, u16::MAX as i64) as u16);
        let ready = match poll(&mut fds, timeout) {
            Ok(n) => n,
            Err(_) => return,
        };
        if ready <= 0 {
            return;
        }
        let results: Vec<(i32, usize, u8)> = fds
            .iter()
            .zip(selectors)
            .filter_map(|(pfd, &(fd, element, _mask))| {
                let revents = pfd.revents().unwrap_or(PollFlags::empty());
                let mut mask = 0u8;
                if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
                    mask |= SELECT_READ;
                }
                if revents.contains(PollFlags::POLLOUT) {
                    mask |= SELECT_WRITE;
                }
                (mask != 0).then_some((fd, element, mask))
            })
            .collect();
        for (fd, element, mask) in results {
            self.router.dispatch_selected(fd, element, mask);
        }
    }

    #[cfg(not(unix))]
    fn poll_selectors(&self, _selectors: &[(i32, usize, u8)], ms: i64) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms as u64));
        }
    }
}
