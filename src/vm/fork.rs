//! Supplemental page table duplication for `fork`.
//!
//! Grounded on `original_source/vm/vm.c`'s `supplemental_page_table_copy`/
//! `hash_copy_action`: every entry in the parent's SPT gets a twin in the
//! child's. A page that isn't resident yet is duplicated as the same
//! lazy-load descriptor (the child re-runs the same load the first time it
//! touches it); a resident, writable page is duplicated sharing the
//! parent's frame with both sides flipped to copy-on-write, so neither
//! writes the other's memory until a write fault actually splits them
//! (`vm_handle_wp_fault`).

use std::sync::Arc;

use crate::prelude::*;
use crate::vm::page::{Page, PageFlags};
use crate::vm::spt::SupplementalPageTable;

/// Duplicates every page in `parent` into a freshly built SPT for the
/// child process.
pub fn copy_spt(parent: &SupplementalPageTable) -> KResult<SupplementalPageTable> {
    let child = SupplementalPageTable::new();
    let mut err = None;

    parent.for_each(|page| {
        if err.is_some() {
            return;
        }
        if let Err(e) = copy_one(page, &child) {
            err = Some(e);
        }
    });

    match err {
        Some(e) => Err(e),
        None => Ok(child),
    }
}

fn copy_one(parent_page: &Arc<Page>, child: &SupplementalPageTable) -> KResult<()> {
    let (load, flags) = parent_page.clone_descriptor();

    if parent_page.is_resident() && flags.contains(PageFlags::WRITABLE) {
        let frame = parent_page.frame().expect("FRAME flag implies a frame");
        let child_page = Page::new_uninit(parent_page.addr, load, flags | PageFlags::CPWRITE);
        child_page.attach_frame(frame.clone());
        frame.add_sharer(&child_page);
        parent_page.set_flag(PageFlags::CPWRITE, true);
        return child.insert_page(child_page);
    }

    let child_page = Page::new_uninit(parent_page.addr, load, flags);
    child.insert_page(child_page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::SwapDisk;
    use crate::config::SWAP_SLOT_SECTORS;
    use crate::vm::fault::handle_fault;
    use crate::vm::frame::FrameTable;
    use crate::vm::page::LazyLoad;
    use crate::vm::swap::SwapEngine;

    fn harness() -> (FrameTable, SwapEngine) {
        let disk = SwapDisk::new((SWAP_SLOT_SECTORS * 4) as u32);
        (FrameTable::new(4), SwapEngine::new(&disk))
    }

    #[test]
    fn unresolved_page_copies_as_the_same_lazy_descriptor() {
        let parent = SupplementalPageTable::new();
        parent
            .alloc_page_with_initializer(0x1000, LazyLoad::Zero, PageFlags::ANON | PageFlags::WRITABLE)
            .unwrap();

        let child = copy_spt(&parent).unwrap();
        let child_page = child.find_page(0x1000).unwrap();
        assert!(!child_page.is_resident());
    }

    #[test]
    fn resident_writable_page_shares_the_frame_and_becomes_cow() {
        let (frames, swap) = harness();
        let parent = SupplementalPageTable::new();
        let parent_page = parent
            .alloc_page_with_initializer(0x2000, LazyLoad::Zero, PageFlags::ANON | PageFlags::WRITABLE)
            .unwrap();
        handle_fault(&parent, &frames, &swap, 0x2000, false, 0, 0x10000).unwrap();

        let child = copy_spt(&parent).unwrap();
        let child_page = child.find_page(0x2000).unwrap();

        assert!(parent_page.flags().contains(PageFlags::CPWRITE));
        assert!(child_page.flags().contains(PageFlags::CPWRITE));
        assert!(Arc::ptr_eq(
            &parent_page.frame().unwrap(),
            &child_page.frame().unwrap()
        ));
        assert_eq!(parent_page.frame().unwrap().sharer_count(), 2);
    }

    #[test]
    fn writing_through_the_child_after_fork_splits_the_frame() {
        let (frames, swap) = harness();
        let parent = SupplementalPageTable::new();
        parent
            .alloc_page_with_initializer(0x3000, LazyLoad::Zero, PageFlags::ANON | PageFlags::WRITABLE)
            .unwrap();
        handle_fault(&parent, &frames, &swap, 0x3000, false, 0, 0x10000).unwrap();

        let child = copy_spt(&parent).unwrap();
        handle_fault(&child, &frames, &swap, 0x3000, true, 0, 0x10000).unwrap();

        let parent_page = parent.find_page(0x3000).unwrap();
        let child_page = child.find_page(0x3000).unwrap();
        assert!(!Arc::ptr_eq(
            &parent_page.frame().unwrap(),
            &child_page.frame().unwrap()
        ));
        assert!(!child_page.flags().contains(PageFlags::CPWRITE));
        assert_eq!(parent_page.frame().unwrap().sharer_count(), 1);
    }
}
