//! Common imports pulled into every module.
//!
//! Trimmed to what this crate actually needs: the error alias and the lock
//! type aliases. The `PreemptGuard`/`MutexNoPreemption` pair elsewhere in
//! this codebase (disabling interrupts around a spinlock) has no
//! counterpart here because `sched::sync::Lock` takes over that role
//! directly, donation-aware, instead of a bare preemption-disabling
//! spinlock (see `sched::sync`).

pub use crate::errno::{Errno, KResult};

/// A busy-waiting mutex, the building block every higher-level lock in
/// `sched::sync` sits on top of. `spin::Mutex` behaves identically under
/// `std` and `no_std`, so the same choice of lock crate carries over
/// unchanged even though this crate targets `std`.
pub type Spin<T> = spin::Mutex<T>;
pub type SpinGuard<'a, T> = spin::MutexGuard<'a, T>;
pub type RwSpin<T> = spin::RwLock<T>;
