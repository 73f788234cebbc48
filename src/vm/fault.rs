//! Page-fault classification and resolution.
//!
//! Grounded on `original_source/vm/vm.c`'s `vm_try_handle_fault`: given a
//! faulting address, decide whether it names a known SPT entry (resolve its
//! lazy load, or its swapped-out slot, or its copy-on-write write), a stack
//! growth within `STACK_GROWTH_LIMIT` of the current user stack pointer, or
//! neither (a genuine segfault).

use std::sync::Arc;

use crate::config::{PAGE_SIZE, STACK_GROWTH_LIMIT};
use crate::prelude::*;
use crate::vm::frame::{Frame, FrameTable};
use crate::vm::page::{LazyLoad, Page, PageFlags, Resident, VAddr, Variant};
use crate::vm::spt::SupplementalPageTable;
use crate::vm::swap::SwapEngine;

/// Obtains a frame for a fresh resident page, evicting the clock victim if
/// the pool is full (`vm_get_frame`/`vm_evict_frame`).
fn obtain_frame(frames: &FrameTable, swap: &SwapEngine) -> KResult<Arc<Frame>> {
    if let Some(frame) = frames.try_alloc() {
        return Ok(frame);
    }
    let victim = frames.evict_candidate().ok_or(Errno::NoMem)?;
    crate::kdebug!("evicting frame {} ({} sharers)", victim.id, victim.sharer_count());
    for page in victim.sharers_snapshot() {
        evict_page(&victim, &page, swap)?;
    }
    victim.zero();
    Ok(victim)
}

/// Detaches `page` from the frame it's being evicted from, choosing one of
/// three fates for its content:
///
/// - A dirty file-backed page (a written-to `mmap` page) is written back to
///   its inode, then dropped back to the lazy-load descriptor that will
///   re-read it on the next fault (`do_munmap`'s writeback, applied here to
///   eviction rather than only to unmap).
/// - A page flagged `NOSWAP` (a still-clean BSS page) is simply dropped back
///   to its lazy-load descriptor: its content is always cheaply re-derivable
///   as zero, so swapping it out would only burn a swap slot for no benefit.
/// - Anything else (a dirtied anonymous page) is written to the swap disk.
fn evict_page(frame: &Frame, page: &Arc<Page>, swap: &SwapEngine) -> KResult<()> {
    let flags = page.flags();
    if flags.contains(PageFlags::FILE) && flags.contains(PageFlags::DIRTY) {
        crate::vm::mmap::write_back_if_dirty(page)?;
        let (load, _) = page.clone_descriptor();
        page.detach_frame();
        page.set_variant(Variant::Uninit(load));
        return Ok(());
    }
    if flags.contains(PageFlags::NOSWAP) {
        let (load, _) = page.clone_descriptor();
        page.detach_frame();
        page.set_variant(Variant::Uninit(load));
        return Ok(());
    }
    let mut data = [0u8; PAGE_SIZE];
    frame.copy_into(&mut data);
    let slot = swap.swap_out(&data)?;
    page.detach_frame();
    page.set_swap_slot(Some(slot));
    Ok(())
}

/// Materializes `page`'s content into `frame` for the first time, from its
/// lazy-load descriptor (`vm_do_claim_page` / `vm_initializer`).
fn load_into(frame: &Frame, load: &LazyLoad) -> KResult<()> {
    match load {
        LazyLoad::Zero => frame.zero(),
        LazyLoad::File {
            inode,
            offset,
            read_bytes,
        } => {
            frame.zero();
            let mut buf = vec![0u8; *read_bytes];
            inode.read_at(&mut buf, *offset)?;
            frame.copy_from(&{
                let mut page_buf = [0u8; PAGE_SIZE];
                page_buf[..*read_bytes].copy_from_slice(&buf);
                page_buf
            });
        }
    }
    Ok(())
}

/// Brings `page` in from swap or from its lazy-load descriptor and attaches
/// a frame to it, leaving it resident.
fn resolve(page: &Arc<Page>, frames: &FrameTable, swap: &SwapEngine) -> KResult<()> {
    let frame = obtain_frame(frames, swap)?;
    if let Some(slot) = page.swap_slot() {
        let mut data = [0u8; PAGE_SIZE];
        swap.swap_in(slot, &mut data)?;
        frame.copy_from(&data);
    } else {
        let load = page.with_variant(|v| match v {
            Variant::Uninit(l) => Some(l.clone()),
            Variant::Resident(_) => None,
        });
        if let Some(load) = load {
            load_into(&frame, &load)?;
            let resident = match &load {
                LazyLoad::Zero => Resident::Anon,
                LazyLoad::File {
                    inode,
                    offset,
                    read_bytes,
                } => Resident::File {
                    inode: inode.clone(),
                    offset: *offset,
                    read_bytes: *read_bytes,
                },
            };
            page.set_variant(Variant::Resident(resident));
        }
    }
    frame.add_sharer(page);
    page.attach_frame(frame);
    Ok(())
}

/// Gives `page` a private copy of its frame, breaking the copy-on-write
/// sharing set up by `fork` (`vm_handle_wp_fault`).
fn break_cow(page: &Arc<Page>, frames: &FrameTable, swap: &SwapEngine) -> KResult<()> {
    let old_frame = page.frame().ok_or(Errno::Fault)?;
    if old_frame.sharer_count() <= 1 {
        page.set_flag(PageFlags::CPWRITE, false);
        page.set_flag(PageFlags::DIRTY, true);
        return Ok(());
    }
    let mut data = [0u8; PAGE_SIZE];
    old_frame.copy_into(&mut data);
    old_frame.remove_sharer(page);

    let new_frame = obtain_frame(frames, swap)?;
    new_frame.copy_from(&data);
    new_frame.add_sharer(page);
    page.attach_frame(new_frame);
    page.set_flag(PageFlags::CPWRITE, false);
    page.set_flag(PageFlags::DIRTY, true);
    Ok(())
}

/// True if `addr` is a plausible stack-growth fault: at or below `rsp` minus
/// a small slack (the `PUSHA`/`PUSH` instructions that fault before moving
/// the stack pointer) and within `STACK_GROWTH_LIMIT` of the stack's
/// original top (`vm_stack_growth`'s distance check in `vm_try_handle_fault`).
fn looks_like_stack_growth(addr: VAddr, user_rsp: VAddr, stack_top: VAddr) -> bool {
    addr < stack_top
        && user_rsp.saturating_sub(addr) <= 32
        && stack_top.saturating_sub(addr) <= STACK_GROWTH_LIMIT
}

/// Resolves one page fault, returning the now-resident page or an error if
/// the access is invalid (`vm_try_handle_fault`'s decision tree).
pub fn handle_fault(
    spt: &SupplementalPageTable,
    frames: &FrameTable,
    swap: &SwapEngine,
    fault_addr: VAddr,
    is_write: bool,
    user_rsp: VAddr,
    stack_top: VAddr,
) -> KResult<Arc<Page>> {
    if let Some(page) = spt.find_page(fault_addr) {
        if page.is_resident() {
            if is_write && page.flags().contains(PageFlags::CPWRITE) {
                break_cow(&page, frames, swap)?;
            } else if is_write && !page.flags().contains(PageFlags::WRITABLE) {
                return Err(Errno::Perm);
            } else if is_write {
                // A direct (non-COW) write means the page's content can no
                // longer be regenerated for free: it must survive a future
                // eviction as real data (swapped out, or written back if
                // file-backed) rather than being dropped.
                page.set_flag(PageFlags::DIRTY, true);
                page.set_flag(PageFlags::NOSWAP, false);
            }
            if let Some(frame) = page.frame() {
                frame.mark_accessed();
            }
        } else {
            if is_write && !page.flags().contains(PageFlags::WRITABLE) {
                return Err(Errno::Perm);
            }
            resolve(&page, frames, swap)?;
        }
        return Ok(page);
    }

    if looks_like_stack_growth(fault_addr, user_rsp, stack_top) {
        let page_addr = fault_addr & !(PAGE_SIZE - 1);
        let page = spt.alloc_page_with_initializer(
            page_addr,
            LazyLoad::Zero,
            PageFlags::ANON | PageFlags::STACK | PageFlags::WRITABLE,
        )?;
        resolve(&page, frames, swap)?;
        return Ok(page);
    }

    Err(Errno::Fault)
}
