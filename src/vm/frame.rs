//! The frame table: a fixed pool of physical-page-sized buffers shared
//! (and evicted) across every process's supplemental page table.
//!
//! Grounded on `original_source/vm/vm.c`'s `vm_get_frame`/`vm_evict_frame`
//! and the clock hand kept in `frame_table` (a circular scan that clears an
//! "accessed" bit on its way past and evicts the first frame it finds
//! already clear). Each frame additionally tracks the set of pages sharing
//! it after a `fork` (the copy-on-write ring) — see REDESIGN FLAGS for why
//! this is a plain `Vec<Weak<Page>>` behind this frame's own lock rather
//! than an intrusive circular list.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::config::PAGE_SIZE;
use crate::prelude::*;
use crate::vm::page::Page;

pub struct Frame {
    pub id: usize,
    data: Spin<[u8; PAGE_SIZE]>,
    accessed: AtomicBool,
    sharers: Spin<Vec<Weak<Page>>>,
}

impl Frame {
    fn new(id: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            data: Spin::new([0u8; PAGE_SIZE]),
            accessed: AtomicBool::new(true),
            sharers: Spin::new(Vec::new()),
        })
    }

    pub fn copy_into(&self, buf: &mut [u8; PAGE_SIZE]) {
        buf.copy_from_slice(&*self.data.lock());
    }

    pub fn copy_from(&self, buf: &[u8; PAGE_SIZE]) {
        self.data.lock().copy_from_slice(buf);
    }

    pub fn zero(&self) {
        *self.data.lock() = [0u8; PAGE_SIZE];
    }

    pub fn mark_accessed(&self) {
        self.accessed.store(true, Ordering::Relaxed);
    }

    /// Adds `page` to this frame's sharer ring (a `fork` that shares a
    /// read-only frame between parent and child).
    pub fn add_sharer(&self, page: &Arc<Page>) {
        self.sharers.lock().push(Arc::downgrade(page));
    }

    /// Drops `page` from the sharer ring, e.g. once it takes its own private
    /// copy on a COW write fault.
    pub fn remove_sharer(&self, page: &Arc<Page>) {
        self.sharers
            .lock()
            .retain(|w| w.upgrade().is_some_and(|s| !Arc::ptr_eq(&s, page)));
    }

    /// Number of pages still sharing this frame (dead weak refs don't count).
    pub fn sharer_count(&self) -> usize {
        self.sharers
            .lock()
            .iter()
            .filter(|w| w.upgrade().is_some())
            .count()
    }

    pub fn is_shared(&self) -> bool {
        self.sharer_count() > 1
    }

    /// Snapshot of every page still sharing this frame, for the eviction
    /// path to walk when repurposing it.
    pub fn sharers_snapshot(&self) -> Vec<Arc<Page>> {
        self.sharers.lock().iter().filter_map(|w| w.upgrade()).collect()
    }
}

/// A fixed-capacity pool of frames with clock-hand eviction.
///
/// Grounded on `vm.c`'s global `frame_table`: one lock around the whole
/// table (`frame_lock`), a circular scan for a victim, and a callback into
/// the VM layer to actually swap the victim's owning page out before its
/// frame is repurposed.
pub struct FrameTable {
    capacity: usize,
    order: Spin<Vec<Arc<Frame>>>,
    hand: Spin<usize>,
    next_id: AtomicUsize,
}

impl FrameTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: Spin::new(Vec::new()),
            hand: Spin::new(0),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.lock().is_empty()
    }

    /// Allocates a fresh frame if the pool has room, without evicting
    /// anything (`palloc_get_page` succeeding on the fast path).
    pub fn try_alloc(&self) -> Option<Arc<Frame>> {
        let mut order = self.order.lock();
        if order.len() >= self.capacity {
            return None;
        }
        let frame = Frame::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        order.push(frame.clone());
        Some(frame)
    }

    /// Clock-scans for a frame whose accessed bit is already clear, clearing
    /// the bit on every frame it passes over on the way
    /// (`vm_get_victim`/`vm_evict_frame`). At most two full sweeps: the first
    /// clears every accessed bit that survived since the last scan, the
    /// second is guaranteed to find a victim.
    pub fn evict_candidate(&self) -> Option<Arc<Frame>> {
        let order = self.order.lock();
        if order.is_empty() {
            return None;
        }
        let mut hand = self.hand.lock();
        for _ in 0..2 * order.len() {
            let idx = *hand % order.len();
            let frame = order[idx].clone();
            *hand = (idx + 1) % order.len();
            if frame.accessed.swap(false, Ordering::Relaxed) {
                continue;
            }
            return Some(frame);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_alloc_respects_capacity() {
        let table = FrameTable::new(2);
        assert!(table.try_alloc().is_some());
        assert!(table.try_alloc().is_some());
        assert!(table.try_alloc().is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn evict_candidate_prefers_an_unaccessed_frame() {
        let table = FrameTable::new(3);
        let a = table.try_alloc().unwrap();
        let b = table.try_alloc().unwrap();
        let _c = table.try_alloc().unwrap();

        a.mark_accessed();
        b.accessed.store(false, Ordering::Relaxed);

        let victim = table.evict_candidate().unwrap();
        assert_eq!(victim.id, b.id);
    }

    #[test]
    fn sharer_ring_tracks_live_sharers_only() {
        let frame = Frame::new(0);
        let p1 = Page::new_uninit(0x1000, crate::vm::page::LazyLoad::Zero, crate::vm::page::PageFlags::ANON);
        {
            let p2 = Page::new_uninit(0x2000, crate::vm::page::LazyLoad::Zero, crate::vm::page::PageFlags::ANON);
            frame.add_sharer(&p1);
            frame.add_sharer(&p2);
            assert_eq!(frame.sharer_count(), 2);
            assert!(frame.is_shared());
        }
        frame.remove_sharer(&p1);
        assert_eq!(frame.sharer_count(), 0);
    }
}
