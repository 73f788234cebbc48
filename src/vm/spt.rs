//! The per-process supplemental page table.
//!
//! Grounded on `original_source/vm/vm.c`'s `supplemental_page_table_init`/
//! `spt_find_page`/`spt_insert_page` (a hash table keyed by the rounded-down
//! user virtual address) and `vm_alloc_page_with_initializer`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PAGE_SIZE;
use crate::prelude::*;
use crate::vm::page::{LazyLoad, Page, PageFlags, VAddr};

fn page_round_down(addr: VAddr) -> VAddr {
    addr & !(PAGE_SIZE - 1)
}

pub struct SupplementalPageTable {
    pages: Spin<HashMap<VAddr, Arc<Page>>>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self {
            pages: Spin::new(HashMap::new()),
        }
    }

    /// Registers a not-yet-resident page at `addr`, to be resolved by the
    /// fault handler on first touch (`vm_alloc_page_with_initializer`).
    pub fn alloc_page_with_initializer(
        &self,
        addr: VAddr,
        load: LazyLoad,
        flags: PageFlags,
    ) -> KResult<Arc<Page>> {
        let addr = page_round_down(addr);
        let mut pages = self.pages.lock();
        if pages.contains_key(&addr) {
            return Err(Errno::Exist);
        }
        let page = Page::new_uninit(addr, load, flags);
        pages.insert(addr, page.clone());
        Ok(page)
    }

    /// Registers a zero-filled anonymous page that backs the zeroed tail of
    /// a data segment. Flagged `NOSWAP`: until it's actually written to, its
    /// content is always free to regenerate as zero, so eviction drops it
    /// instead of spending a swap slot on it.
    pub fn alloc_bss_page(&self, addr: VAddr) -> KResult<Arc<Page>> {
        self.alloc_page_with_initializer(
            addr,
            LazyLoad::Zero,
            PageFlags::ANON | PageFlags::BSS | PageFlags::NOSWAP | PageFlags::WRITABLE,
        )
    }

    /// Directly registers an already-constructed page (used by `fork`'s SPT
    /// copy, which builds the child's pages itself).
    pub fn insert_page(&self, page: Arc<Page>) -> KResult<()> {
        let mut pages = self.pages.lock();
        if pages.contains_key(&page.addr) {
            return Err(Errno::Exist);
        }
        pages.insert(page.addr, page);
        Ok(())
    }

    pub fn find_page(&self, addr: VAddr) -> Option<Arc<Page>> {
        self.pages.lock().get(&page_round_down(addr)).cloned()
    }

    pub fn remove_page(&self, addr: VAddr) -> Option<Arc<Page>> {
        self.pages.lock().remove(&page_round_down(addr))
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }

    pub fn for_each(&self, mut f: impl FnMut(&Arc<Page>)) {
        for page in self.pages.lock().values() {
            f(page);
        }
    }
}

impl Default for SupplementalPageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_rounds_down_to_the_page_boundary() {
        let spt = SupplementalPageTable::new();
        let page = spt
            .alloc_page_with_initializer(0x1000 + 42, LazyLoad::Zero, PageFlags::ANON)
            .unwrap();
        assert_eq!(page.addr, 0x1000);
        assert!(spt.find_page(0x1000 + 999).is_some());
    }

    #[test]
    fn duplicate_alloc_at_the_same_page_fails() {
        let spt = SupplementalPageTable::new();
        spt.alloc_page_with_initializer(0x2000, LazyLoad::Zero, PageFlags::ANON)
            .unwrap();
        assert_eq!(
            spt.alloc_page_with_initializer(0x2000, LazyLoad::Zero, PageFlags::ANON)
                .unwrap_err(),
            Errno::Exist
        );
    }

    #[test]
    fn bss_page_starts_out_noswap() {
        let spt = SupplementalPageTable::new();
        let page = spt.alloc_bss_page(0x4000).unwrap();
        assert!(page.flags().contains(PageFlags::BSS));
        assert!(page.flags().contains(PageFlags::NOSWAP));
    }

    #[test]
    fn remove_page_drops_it_from_lookup() {
        let spt = SupplementalPageTable::new();
        spt.alloc_page_with_initializer(0x3000, LazyLoad::Zero, PageFlags::ANON)
            .unwrap();
        assert!(spt.remove_page(0x3000).is_some());
        assert!(spt.find_page(0x3000).is_none());
    }
}
