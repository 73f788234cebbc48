//! Memory-mapped files.
//!
//! Grounded on `original_source/vm/file.c`'s `do_mmap`/`do_munmap` and the
//! per-process mapping table consulted on `munmap` and at process exit: a
//! `mmap` call installs one file-backed lazy page per page-sized chunk of
//! the requested range, handing back an id the caller later passes to
//! `munmap`. Unmapping walks the same run of pages, writing back whichever
//! were actually dirtied and dropping the rest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::PAGE_SIZE;
use crate::fs::inode::Inode;
use crate::prelude::*;
use crate::vm::page::{LazyLoad, Page, PageFlags, Resident, VAddr, Variant};
use crate::vm::spt::SupplementalPageTable;

pub type MmapId = u32;

#[derive(Clone)]
struct MmapRegion {
    pages: Vec<VAddr>,
}

/// A process's set of active memory-mapped-file regions.
pub struct MmapList {
    next_id: AtomicU32,
    regions: Spin<HashMap<MmapId, MmapRegion>>,
}

impl MmapList {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            regions: Spin::new(HashMap::new()),
        }
    }

    /// Maps `length` bytes of `inode` starting at `offset` into the
    /// page-aligned range beginning at `addr`, installing one file-backed
    /// lazy page per page-sized chunk (`do_mmap`). Each installed page
    /// starts out `NOSWAP`: clean until actually written to, after which
    /// the fault handler clears the flag and the page survives eviction by
    /// write-back instead of being dropped.
    ///
    /// Fails if `addr` is zero, isn't page-aligned, `length` is zero, or any
    /// page in the range is already mapped — rolling back whatever pages it
    /// had already installed before the failure.
    pub fn mmap(
        &self,
        spt: &SupplementalPageTable,
        inode: Arc<Inode>,
        addr: VAddr,
        offset: u32,
        length: usize,
    ) -> KResult<MmapId> {
        if addr == 0 || addr % PAGE_SIZE != 0 || length == 0 {
            return Err(Errno::Inval);
        }

        let page_count = length.div_ceil(PAGE_SIZE);
        let mut installed = Vec::with_capacity(page_count);
        for i in 0..page_count {
            let page_addr = addr + i * PAGE_SIZE;
            let file_offset = offset + (i * PAGE_SIZE) as u32;
            let read_bytes = (length - i * PAGE_SIZE).min(PAGE_SIZE);
            let result = spt.alloc_page_with_initializer(
                page_addr,
                LazyLoad::File {
                    inode: inode.clone(),
                    offset: file_offset,
                    read_bytes,
                },
                PageFlags::FILE | PageFlags::MMAP | PageFlags::WRITABLE | PageFlags::NOSWAP,
            );
            match result {
                Ok(_) => installed.push(page_addr),
                Err(e) => {
                    for page_addr in &installed {
                        spt.remove_page(*page_addr);
                    }
                    return Err(e);
                }
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.regions.lock().insert(id, MmapRegion { pages: installed });
        Ok(id)
    }

    /// Unmaps `id`: writes back any page that was actually dirtied, then
    /// drops every page it installed from the table (`do_munmap`).
    pub fn munmap(&self, spt: &SupplementalPageTable, id: MmapId) -> KResult<()> {
        let region = self.regions.lock().remove(&id).ok_or(Errno::Inval)?;
        for page_addr in &region.pages {
            if let Some(page) = spt.remove_page(*page_addr) {
                write_back_if_dirty(&page)?;
            }
        }
        Ok(())
    }

    /// Unmaps every remaining region, e.g. on process exit.
    pub fn destroy_all(&self, spt: &SupplementalPageTable) -> KResult<()> {
        let ids: Vec<MmapId> = self.regions.lock().keys().copied().collect();
        for id in ids {
            self.munmap(spt, id)?;
        }
        Ok(())
    }

    /// Duplicates this process's mapping bookkeeping for a forked child.
    /// The child's SPT copy already duplicates each mapped page's
    /// descriptor (`fork::copy_spt`); this only carries over the id →
    /// region table so the child can `munmap` by the same ids it inherited.
    pub fn fork(&self) -> Self {
        let regions = self.regions.lock().clone();
        Self {
            next_id: AtomicU32::new(self.next_id.load(Ordering::Relaxed)),
            regions: Spin::new(regions),
        }
    }

    pub fn len(&self) -> usize {
        self.regions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.lock().is_empty()
    }
}

impl Default for MmapList {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes a resident, dirtied file-backed page's frame content back to its
/// inode and clears `DIRTY`; a no-op for anything else. Shared between
/// `munmap` (which must flush immediately) and frame eviction (which hits
/// the identical fate for a `FILE | DIRTY` page).
pub(crate) fn write_back_if_dirty(page: &Arc<Page>) -> KResult<()> {
    let flags = page.flags();
    if !flags.contains(PageFlags::DIRTY) || !page.is_resident() {
        return Ok(());
    }
    let frame = page.frame().expect("FRAME flag implies a frame");
    let (inode, offset, read_bytes) = page
        .with_variant(|v| match v {
            Variant::Resident(Resident::File {
                inode,
                offset,
                read_bytes,
            }) => Some((inode.clone(), *offset, *read_bytes)),
            _ => None,
        })
        .ok_or(Errno::Fault)?;
    let mut data = [0u8; PAGE_SIZE];
    frame.copy_into(&mut data);
    inode.write_at(&data[..read_bytes], offset)?;
    page.set_flag(PageFlags::DIRTY, false);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockDevice, MemDisk, SwapDisk};
    use crate::config::SWAP_SLOT_SECTORS;
    use crate::fs::fat::Fat;
    use crate::fs::inode::InodeFlags;
    use crate::vm::fault::handle_fault;
    use crate::vm::fork::copy_spt;
    use crate::vm::frame::FrameTable;
    use crate::vm::swap::SwapEngine;

    fn file_inode_fixture(length: u32) -> Arc<Inode> {
        let disk: Arc<dyn BlockDevice> = MemDisk::new(256);
        let fat = Fat::format(disk.clone()).unwrap();
        let cluster = fat.create_chain(0);
        let sector = fat.cluster_to_sector(cluster);
        Inode::create(&fat, &disk, sector, length, InodeFlags::empty()).unwrap();
        Inode::load(fat, disk, sector).unwrap()
    }

    fn engine() -> (SupplementalPageTable, FrameTable, SwapEngine) {
        let disk = SwapDisk::new((SWAP_SLOT_SECTORS * 8) as u32);
        (SupplementalPageTable::new(), FrameTable::new(4), SwapEngine::new(&disk))
    }

    #[test]
    fn mmap_installs_one_page_per_chunk_of_the_requested_length() {
        let inode = file_inode_fixture(PAGE_SIZE as u32 * 2);
        let (spt, _frames, _swap) = engine();
        let mmaps = MmapList::new();

        let id = mmaps.mmap(&spt, inode, 0x4000, 0, PAGE_SIZE * 2).unwrap();
        assert_eq!(mmaps.len(), 1);
        assert!(spt.find_page(0x4000).is_some());
        assert!(spt.find_page(0x4000 + PAGE_SIZE).is_some());
        assert!(mmaps.munmap(&spt, id).is_ok());
    }

    #[test]
    fn mmap_over_an_already_mapped_page_rolls_back_partial_installs() {
        let inode = file_inode_fixture(PAGE_SIZE as u32 * 2);
        let (spt, _frames, _swap) = engine();
        spt.alloc_page_with_initializer(0x5000 + PAGE_SIZE, LazyLoad::Zero, PageFlags::ANON)
            .unwrap();

        let mmaps = MmapList::new();
        let err = mmaps
            .mmap(&spt, inode, 0x5000, 0, PAGE_SIZE * 2)
            .unwrap_err();
        assert_eq!(err, Errno::Exist);
        assert!(spt.find_page(0x5000).is_none());
        assert!(mmaps.is_empty());
    }

    #[test]
    fn munmap_writes_back_a_dirty_page_to_the_file() {
        let inode = file_inode_fixture(PAGE_SIZE as u32);
        let (spt, frames, swap) = engine();
        let mmaps = MmapList::new();

        let id = mmaps.mmap(&spt, inode.clone(), 0x6000, 0, PAGE_SIZE).unwrap();
        handle_fault(&spt, &frames, &swap, 0x6000, false, 0, 0x10000).unwrap();
        handle_fault(&spt, &frames, &swap, 0x6000, true, 0, 0x10000).unwrap();
        let page = spt.find_page(0x6000).unwrap();
        assert!(page.flags().contains(PageFlags::DIRTY));
        page.frame().unwrap().copy_from(&[0x7Eu8; PAGE_SIZE]);

        mmaps.munmap(&spt, id).unwrap();
        assert!(spt.find_page(0x6000).is_none());

        let mut readback = [0u8; PAGE_SIZE];
        inode.read_at(&mut readback, 0).unwrap();
        assert_eq!(&readback[..], &[0x7Eu8; PAGE_SIZE][..]);
    }

    #[test]
    fn munmap_of_an_unknown_id_fails() {
        let (spt, _frames, _swap) = engine();
        let mmaps = MmapList::new();
        assert_eq!(mmaps.munmap(&spt, 999).unwrap_err(), Errno::Inval);
    }

    #[test]
    fn fork_duplicates_the_mapping_table_for_the_child() {
        let inode = file_inode_fixture(PAGE_SIZE as u32);
        let (parent_spt, frames, swap) = engine();
        let parent_mmaps = MmapList::new();
        let id = parent_mmaps
            .mmap(&parent_spt, inode, 0x7000, 0, PAGE_SIZE)
            .unwrap();
        handle_fault(&parent_spt, &frames, &swap, 0x7000, false, 0, 0x10000).unwrap();

        let child_spt = copy_spt(&parent_spt).unwrap();
        let child_mmaps = parent_mmaps.fork();
        assert_eq!(child_mmaps.len(), 1);

        child_mmaps.munmap(&child_spt, id).unwrap();
        assert!(child_spt.find_page(0x7000).is_none());
        assert!(parent_spt.find_page(0x7000).is_some());
    }
}
