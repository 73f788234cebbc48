//! Synchronization primitives with priority donation.
//!
//! `Lock` is grounded on the donation half of `original_source/threads/
//! thread.c` (`donate_priority`, `remove_with_lock`, `refresh_priority`) —
//! the pack's retrieved sources do not include `synch.c` itself, so the
//! acquire/release shape (register as a waiter, donate up the holder chain,
//! release reverses it) is reconstructed from `thread.c`'s donation
//! machinery plus the strategy-object locking style elsewhere in this
//! codebase's `sync::lock`/`sync::spin` (a `Lock` wrapping a small blocking
//! primitive, with the actual OS-level blocking out of scope — the
//! scheduler itself is in scope, the register/stack context switch it runs
//! on is not). `Semaphore` is grounded on the same file's use of semaphores
//! for fork/wait rendezvous.

use crate::config::MAX_DONATION_DEPTH;
use crate::prelude::*;
use crate::sched::thread::Thread;
use std::sync::Arc;

struct LockInner {
    holder: Option<Arc<Thread>>,
}

/// A mutex whose `acquire` donates the waiter's priority up the chain of
/// lock holders, nested up to `MAX_DONATION_DEPTH` levels deep.
pub struct Lock {
    inner: Spin<LockInner>,
}

impl Lock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Spin::new(LockInner { holder: None }),
        })
    }

    pub fn holder(&self) -> Option<Arc<Thread>> {
        self.inner.lock().holder.clone()
    }

    /// Attempts to take the lock for `thread`. On success, `thread` becomes
    /// the holder and any priority it had donated elsewhere is unaffected.
    /// On failure, `thread` is registered as a waiter on the holder (so the
    /// holder's `refresh_priority` sees it) and donation is propagated up
    /// the chain of locks the holder is itself waiting on.
    pub fn try_acquire(self: &Arc<Self>, thread: &Arc<Thread>) -> bool {
        let mut inner = self.inner.lock();
        if inner.holder.is_none() {
            inner.holder = Some(thread.clone());
            thread.set_wait_on_lock(None);
            return true;
        }
        let holder = inner.holder.clone().unwrap();
        drop(inner);

        thread.set_wait_on_lock(Some(self.clone()));
        holder.push_donation(thread.clone());
        holder.refresh_priority();
        crate::kdebug!(
            "thread {} donates priority {} to holder {}",
            thread.tid,
            thread.priority(),
            holder.tid
        );
        self.donate_chain(thread);
        false
    }

    /// Walks from `from` through the chain of lock holders, donating
    /// `from`'s priority at each step, stopping after `MAX_DONATION_DEPTH`
    /// levels or as soon as a thread in the chain isn't waiting on anything
    /// (`donate_priority`).
    fn donate_chain(&self, from: &Arc<Thread>) {
        let mut cur = from.clone();
        for _ in 0..MAX_DONATION_DEPTH {
            let Some(lock) = cur.wait_on_lock() else {
                break;
            };
            let Some(holder) = lock.holder() else {
                break;
            };
            holder.set_effective_priority(cur.priority());
            cur = holder;
        }
    }

    /// Releases the lock held by `thread`: clears the holder, drops every
    /// donation recorded against this lock, and restores `thread`'s
    /// effective priority to whatever remains donated from elsewhere
    /// (`lock_release` + `remove_with_lock` + `refresh_priority`).
    pub fn release(self: &Arc<Self>, thread: &Arc<Thread>) {
        self.inner.lock().holder = None;
        thread.remove_donations_for(self);
        thread.refresh_priority();
    }
}

/// A counting semaphore, used for fork/wait rendezvous: a parent blocks on a
/// semaphore until the child signals fork completion, and again until the
/// child exits.
pub struct Semaphore {
    count: Spin<u32>,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Self {
            count: Spin::new(initial),
        }
    }

    pub fn up(&self) {
        *self.count.lock() += 1;
    }

    /// Non-blocking probe: decrements and returns `true` if the count was
    /// positive. A real scheduler would block the caller on zero; blocking
    /// itself is out of scope here, so callers poll this from their own
    /// wait loop.
    pub fn try_down(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> u32 {
        *self.count.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncontended_acquire_succeeds_immediately() {
        let lock = Lock::new();
        let t = Thread::new(1, 10);
        assert!(lock.try_acquire(&t));
        assert!(Arc::ptr_eq(&lock.holder().unwrap(), &t));
    }

    #[test]
    fn waiter_donates_priority_to_holder() {
        let lock = Lock::new();
        let holder = Thread::new(1, 10);
        let waiter = Thread::new(2, 40);
        assert!(lock.try_acquire(&holder));
        assert!(!lock.try_acquire(&waiter));
        assert_eq!(holder.priority(), 40);
    }

    #[test]
    fn release_restores_holder_priority() {
        let lock = Lock::new();
        let holder = Thread::new(1, 10);
        let waiter = Thread::new(2, 40);
        lock.try_acquire(&holder);
        lock.try_acquire(&waiter);
        lock.release(&holder);
        assert_eq!(holder.priority(), 10);
    }

    #[test]
    fn donation_chains_through_nested_lock_holders() {
        let lock_a = Lock::new();
        let lock_b = Lock::new();
        let low = Thread::new(1, 5);
        let mid = Thread::new(2, 5);
        let high = Thread::new(3, 50);

        assert!(lock_a.try_acquire(&low));
        assert!(lock_b.try_acquire(&mid));
        // `mid` blocks on lock_a (held by `low`).
        assert!(!lock_a.try_acquire(&mid));
        // `high` blocks on lock_b (held by `mid`), which should propagate
        // into `low` too since `mid` is itself waiting on `lock_a`.
        assert!(!lock_b.try_acquire(&high));

        assert_eq!(mid.priority(), 50);
        assert_eq!(low.priority(), 50);
    }

    #[test]
    fn semaphore_try_down_respects_count() {
        let sem = Semaphore::new(1);
        assert!(sem.try_down());
        assert!(!sem.try_down());
        sem.up();
        assert!(sem.try_down());
    }
}
