//! Scheduling metadata for a thread.
//!
//! Grounded on `original_source/threads/thread.c`'s `struct thread`: a
//! base/init priority plus a derived "effective" priority
//! (`init_priority`/`priority` in the original), a list of threads that have
//! donated to this one (`donations`), and the lock this thread is currently
//! blocked waiting to acquire (`wait_on_lock`). Laid out as a `Spin`-guarded
//! mutable core behind a plain struct (c.f. `src/kernel/task/thread.rs`).

use crate::config::PRI_DEFAULT;
use crate::prelude::*;
use crate::sched::sync::Lock;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    Running,
    Blocked,
    Sleeping,
}

struct ThreadState {
    status: Status,
    base_priority: u8,
    effective_priority: u8,
    wait_on_lock: Option<Arc<Lock>>,
    donations: Vec<Arc<Thread>>,
    wakeup_tick: Option<u64>,
}

/// A schedulable unit. Out of scope: the actual register context and kernel
/// stack switch across the syscall/ELF boundary; this models exactly the
/// state the scheduler and lock donation algorithm reason about.
pub struct Thread {
    pub tid: u32,
    state: Spin<ThreadState>,
}

impl Thread {
    pub fn new(tid: u32, priority: u8) -> Arc<Self> {
        Arc::new(Self {
            tid,
            state: Spin::new(ThreadState {
                status: Status::Ready,
                base_priority: priority,
                effective_priority: priority,
                wait_on_lock: None,
                donations: Vec::new(),
                wakeup_tick: None,
            }),
        })
    }

    pub fn with_default_priority(tid: u32) -> Arc<Self> {
        Self::new(tid, PRI_DEFAULT)
    }

    pub fn priority(&self) -> u8 {
        self.state.lock().effective_priority
    }

    pub fn base_priority(&self) -> u8 {
        self.state.lock().base_priority
    }

    pub fn status(&self) -> Status {
        self.state.lock().status
    }

    pub fn set_status(&self, status: Status) {
        self.state.lock().status = status;
    }

    pub fn wakeup_tick(&self) -> Option<u64> {
        self.state.lock().wakeup_tick
    }

    pub fn set_wakeup_tick(&self, tick: Option<u64>) {
        self.state.lock().wakeup_tick = tick;
    }

    pub(crate) fn wait_on_lock(&self) -> Option<Arc<Lock>> {
        self.state.lock().wait_on_lock.clone()
    }

    pub(crate) fn set_wait_on_lock(&self, lock: Option<Arc<Lock>>) {
        self.state.lock().wait_on_lock = lock;
    }

    pub(crate) fn push_donation(&self, donor: Arc<Thread>) {
        self.state.lock().donations.push(donor);
    }

    /// Removes every donation recorded against `lock` (`remove_with_lock`).
    pub(crate) fn remove_donations_for(&self, lock: &Arc<Lock>) {
        self.state.lock().donations.retain(|d| match d.wait_on_lock() {
            Some(l) => !Arc::ptr_eq(&l, lock),
            None => true,
        });
    }

    /// Sets `base_priority` and recomputes the effective priority
    /// (`thread_set_priority` + `refresh_priority`).
    pub fn set_base_priority(self: &Arc<Self>, priority: u8) {
        self.state.lock().base_priority = priority;
        self.refresh_priority();
    }

    /// Resets the effective priority to the base, then raises it to the
    /// highest outstanding donation, if any (`refresh_priority`).
    pub fn refresh_priority(self: &Arc<Self>) {
        let mut s = self.state.lock();
        s.effective_priority = s.base_priority;
        if let Some(top) = s.donations.iter().map(|d| d.priority()).max() {
            if top > s.effective_priority {
                s.effective_priority = top;
            }
        }
    }

    /// Directly raises the effective priority, independent of base
    /// (`holder->priority = cur->priority` in `donate_priority`).
    pub(crate) fn set_effective_priority(&self, priority: u8) {
        let mut s = self.state.lock();
        if priority > s.effective_priority {
            s.effective_priority = priority;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_thread_starts_at_base_priority() {
        let t = Thread::new(1, 20);
        assert_eq!(t.priority(), 20);
        assert_eq!(t.base_priority(), 20);
    }

    #[test]
    fn refresh_without_donations_restores_base() {
        let t = Thread::new(1, 20);
        t.set_effective_priority(40);
        assert_eq!(t.priority(), 40);
        t.refresh_priority();
        assert_eq!(t.priority(), 20);
    }

    #[test]
    fn refresh_keeps_highest_outstanding_donation() {
        let lock = Lock::new();
        let holder = Thread::new(1, 10);
        let low_donor = Thread::new(2, 15);
        let high_donor = Thread::new(3, 30);
        low_donor.set_wait_on_lock(Some(lock.clone()));
        high_donor.set_wait_on_lock(Some(lock));
        holder.push_donation(low_donor);
        holder.push_donation(high_donor);
        holder.refresh_priority();
        assert_eq!(holder.priority(), 30);
    }

    #[test]
    fn removing_donations_for_a_lock_restores_base() {
        let lock = Lock::new();
        let holder = Thread::new(1, 10);
        let donor = Thread::new(2, 50);
        donor.set_wait_on_lock(Some(lock.clone()));
        holder.push_donation(donor);
        holder.refresh_priority();
        assert_eq!(holder.priority(), 50);

        holder.remove_donations_for(&lock);
        holder.refresh_priority();
        assert_eq!(holder.priority(), 10);
    }
}
