//! Sleep queue and timer tick bookkeeping.
//!
//! Grounded on `original_source/threads/thread.c`'s `thread_sleep`/
//! `thread_wakeup`/`thread_tick`: a thread records the tick at which it
//! should wake, is parked on a blocked list, and a single pass over that
//! list each timer interrupt wakes everything due (`t->tick <= cur`).

use crate::config::TIME_SLICE_TICKS;
use crate::prelude::*;
use crate::sched::thread::{Status, Thread};
use std::sync::Arc;

pub struct SleepQueue {
    sleeping: Spin<Vec<Arc<Thread>>>,
}

impl SleepQueue {
    pub fn new() -> Self {
        Self {
            sleeping: Spin::new(Vec::new()),
        }
    }

    /// Parks `thread` until `wakeup_tick` (`thread_sleep`).
    pub fn sleep_until(&self, thread: &Arc<Thread>, wakeup_tick: u64) {
        thread.set_status(Status::Sleeping);
        thread.set_wakeup_tick(Some(wakeup_tick));
        self.sleeping.lock().push(thread.clone());
    }

    /// Scans once for every thread whose wakeup tick has arrived, removes
    /// them from the sleep list, and returns them ready to be reinserted
    /// into the scheduler's ready list (`thread_wakeup`).
    pub fn wake_due(&self, now: u64) -> Vec<Arc<Thread>> {
        let mut sleeping = self.sleeping.lock();
        let mut woken = Vec::new();
        sleeping.retain(|t| {
            if t.wakeup_tick().is_some_and(|tick| tick <= now) {
                t.set_wakeup_tick(None);
                t.set_status(Status::Ready);
                woken.push(t.clone());
                false
            } else {
                true
            }
        });
        woken
    }

    pub fn len(&self) -> usize {
        self.sleeping.lock().len()
    }
}

impl Default for SleepQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-thread run-length counter; signals a time-slice expiration once
/// `TIME_SLICE_TICKS` ticks have elapsed since the thread last yielded
/// (`thread_tick`).
pub struct TickCounter {
    ticks_since_yield: Spin<u64>,
}

impl TickCounter {
    pub fn new() -> Self {
        Self {
            ticks_since_yield: Spin::new(0),
        }
    }

    /// Returns `true` exactly when this tick crosses the slice boundary.
    pub fn tick(&self) -> bool {
        let mut ticks = self.ticks_since_yield.lock();
        *ticks += 1;
        *ticks >= TIME_SLICE_TICKS
    }

    pub fn reset(&self) {
        *self.ticks_since_yield.lock() = 0;
    }
}

impl Default for TickCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleeper_wakes_once_its_tick_arrives() {
        let queue = SleepQueue::new();
        let t = Thread::new(1, 10);
        queue.sleep_until(&t, 100);
        assert!(queue.wake_due(50).is_empty());
        assert_eq!(queue.len(), 1);

        let woken = queue.wake_due(100);
        assert_eq!(woken.len(), 1);
        assert_eq!(woken[0].tid, 1);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn tick_counter_signals_at_slice_boundary() {
        let counter = TickCounter::new();
        for _ in 0..TIME_SLICE_TICKS - 1 {
            assert!(!counter.tick());
        }
        assert!(counter.tick());
        counter.reset();
        assert!(!counter.tick());
    }
}
