//! The ready-list scheduler.
//!
//! Grounded on `original_source/threads/thread.c`'s `ready_list` (kept
//! sorted descending by priority via `list_insert_ordered` +
//! `thread_less_priority`) and `thread_unblock`/`thread_yield`/
//! `next_thread_to_run`. Laid out as a small struct wrapping a `Spin`-guarded
//! `Vec`, matching `kernel::task::scheduler::Scheduler`'s shape elsewhere in
//! this codebase (a lock-guarded run queue plus a `pick_next` style
//! accessor).

pub mod sync;
pub mod thread;
pub mod timer;

use crate::prelude::*;
use crate::sched::thread::{Status, Thread};
use std::sync::Arc;

pub struct Scheduler {
    ready: Spin<Vec<Arc<Thread>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            ready: Spin::new(Vec::new()),
        }
    }

    /// Inserts `thread` into the ready list, keeping it sorted descending by
    /// effective priority (`thread_unblock`/`thread_yield`'s
    /// `list_insert_ordered`).
    pub fn enqueue(&self, thread: Arc<Thread>) {
        thread.set_status(Status::Ready);
        let mut ready = self.ready.lock();
        let pos = ready
            .iter()
            .position(|t| t.priority() < thread.priority())
            .unwrap_or(ready.len());
        ready.insert(pos, thread);
    }

    /// Removes and returns the highest-priority ready thread
    /// (`next_thread_to_run`).
    pub fn pick_next(&self) -> Option<Arc<Thread>> {
        let mut ready = self.ready.lock();
        if ready.is_empty() {
            None
        } else {
            Some(ready.remove(0))
        }
    }

    pub fn len(&self) -> usize {
        self.ready.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.lock().is_empty()
    }

    /// `true` if `thread` is no longer the highest-priority runnable thread,
    /// i.e. the scheduler should preempt it (`thread_set_priority`'s check
    /// against `list_entry(list_begin(&ready_list), ...)`).
    pub fn should_preempt(&self, thread: &Arc<Thread>) -> bool {
        self.ready
            .lock()
            .first()
            .is_some_and(|front| front.priority() > thread.priority())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_next_returns_highest_priority_first() {
        let sched = Scheduler::new();
        sched.enqueue(Thread::new(1, 10));
        sched.enqueue(Thread::new(2, 50));
        sched.enqueue(Thread::new(3, 30));

        assert_eq!(sched.pick_next().unwrap().tid, 2);
        assert_eq!(sched.pick_next().unwrap().tid, 3);
        assert_eq!(sched.pick_next().unwrap().tid, 1);
        assert!(sched.pick_next().is_none());
    }

    #[test]
    fn equal_priority_threads_stay_in_arrival_order() {
        let sched = Scheduler::new();
        sched.enqueue(Thread::new(1, 20));
        sched.enqueue(Thread::new(2, 20));
        assert_eq!(sched.pick_next().unwrap().tid, 1);
        assert_eq!(sched.pick_next().unwrap().tid, 2);
    }

    #[test]
    fn should_preempt_detects_a_higher_priority_arrival() {
        let sched = Scheduler::new();
        let running = Thread::new(1, 20);
        assert!(!sched.should_preempt(&running));
        sched.enqueue(Thread::new(2, 50));
        assert!(sched.should_preempt(&running));
    }
}
