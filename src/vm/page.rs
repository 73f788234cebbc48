//! Supplemental page table entries.
//!
//! Grounded on `original_source/vm/vm.c`'s `struct page` / `enum vm_type`:
//! every user page is one of uninitialized (not yet backed by a frame),
//! anonymous, or file-backed, tagged with the bit flags `vm.c` checks before
//! a fault decision (`VM_MARKER_0` for stack pages, `writable`, the
//! COW-write bit, dirty, and the two swap-skip markers this crate resolves
//! the Open Question with — see REDESIGN FLAGS).

use std::sync::Arc;

use crate::fs::inode::Inode;
use crate::vm::frame::Frame;

pub type VAddr = usize;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PageFlags: u16 {
        const ANON     = 0b0000_0001;
        const FILE     = 0b0000_0010;
        const FRAME    = 0b0000_0100;
        const MMAP     = 0b0000_1000;
        const STACK    = 0b0001_0000;
        const WRITABLE = 0b0010_0000;
        const CPWRITE  = 0b0100_0000;
        const DIRTY    = 0b1000_0000;
        const NOSWAP   = 0b0001_0000_0000;
        const BSS      = 0b0010_0000_0000;
    }
}

/// What a page will become the first time it's faulted in
/// (`vm_alloc_page_with_initializer`'s lazy-load descriptor).
#[derive(Clone)]
pub enum LazyLoad {
    /// Zero-fill on first touch (anonymous demand-zero, or a BSS page).
    Zero,
    /// Read `read_bytes` bytes from `inode` at `offset`, zero-fill the rest
    /// of the page (a file-backed or MMAP page's initial load).
    File {
        inode: Arc<Inode>,
        offset: u32,
        read_bytes: usize,
    },
}

/// A page's backing, once it has a frame or a swap slot.
pub enum Resident {
    Anon,
    File {
        inode: Arc<Inode>,
        offset: u32,
        read_bytes: usize,
    },
}

pub enum Variant {
    Uninit(LazyLoad),
    Resident(Resident),
}

/// One supplemental page table entry.
pub struct Page {
    pub addr: VAddr,
    flags: Spin<PageFlags>,
    variant: Spin<Variant>,
    frame: Spin<Option<Arc<Frame>>>,
    swap_slot: Spin<Option<usize>>,
}

use crate::prelude::Spin;

impl Page {
    pub fn new_uninit(addr: VAddr, load: LazyLoad, flags: PageFlags) -> Arc<Self> {
        Arc::new(Self {
            addr,
            flags: Spin::new(flags),
            variant: Spin::new(Variant::Uninit(load)),
            frame: Spin::new(None),
            swap_slot: Spin::new(None),
        })
    }

    pub fn flags(&self) -> PageFlags {
        *self.flags.lock()
    }

    pub fn set_flag(&self, flag: PageFlags, on: bool) {
        self.flags.lock().set(flag, on);
    }

    pub fn is_resident(&self) -> bool {
        self.flags().contains(PageFlags::FRAME)
    }

    pub fn frame(&self) -> Option<Arc<Frame>> {
        self.frame.lock().clone()
    }

    pub fn attach_frame(&self, frame: Arc<Frame>) {
        *self.frame.lock() = Some(frame);
        self.flags.lock().insert(PageFlags::FRAME);
    }

    pub fn detach_frame(&self) -> Option<Arc<Frame>> {
        self.flags.lock().remove(PageFlags::FRAME);
        self.swap_slot.lock().take();
        self.frame.lock().take()
    }

    pub fn swap_slot(&self) -> Option<usize> {
        *self.swap_slot.lock()
    }

    pub fn set_swap_slot(&self, slot: Option<usize>) {
        *self.swap_slot.lock() = slot;
    }

    pub fn with_variant<R>(&self, f: impl FnOnce(&Variant) -> R) -> R {
        f(&self.variant.lock())
    }

    pub fn set_variant(&self, variant: Variant) {
        *self.variant.lock() = variant;
    }

    /// Deep-clones this page's logical description (not its frame) for
    /// `fork`'s SPT copy: a resident page becomes a lazily-resolved
    /// descriptor again unless the caller explicitly shares the frame.
    pub fn clone_descriptor(&self) -> (LazyLoad, PageFlags) {
        let flags = self.flags();
        let load = self.with_variant(|v| match v {
            Variant::Uninit(l) => l.clone(),
            Variant::Resident(Resident::Anon) => LazyLoad::Zero,
            Variant::Resident(Resident::File {
                inode,
                offset,
                read_bytes,
            }) => LazyLoad::File {
                inode: inode.clone(),
                offset: *offset,
                read_bytes: *read_bytes,
            },
        });
        (load, flags)
    }
}
