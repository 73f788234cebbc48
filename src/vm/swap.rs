//! The swap engine: a bitmap of free/used slots on a dedicated swap disk,
//! one slot per evicted page.
//!
//! Grounded on `original_source/vm/anon.c`'s `swap_table` (a `struct bitmap`
//! scanned for the next free run) and `anon_swap_in`/`anon_swap_out`. The
//! next-fit cursor matches `bitmap_scan_and_flip`'s behavior of resuming the
//! search where the previous allocation left off rather than always
//! restarting at slot 0.

use itertools::Itertools;
use std::sync::Arc;

use crate::block::{BlockDevice, SwapDisk};
use crate::config::{PAGE_SIZE, SECTOR_SIZE, SWAP_SLOT_SECTORS};
use crate::prelude::*;

pub struct SwapEngine {
    device: Arc<dyn BlockDevice>,
    used: Spin<Vec<bool>>,
    cursor: Spin<usize>,
}

impl SwapEngine {
    pub fn new(disk: &SwapDisk) -> Self {
        let slot_count = disk.0.sector_count() as usize / SWAP_SLOT_SECTORS;
        Self {
            device: disk.0.clone(),
            used: Spin::new(vec![false; slot_count]),
            cursor: Spin::new(0),
        }
    }

    pub fn slot_count(&self) -> usize {
        self.used.lock().len()
    }

    /// Finds the next free slot starting at the cursor and wrapping around,
    /// marks it used, and advances the cursor past it.
    fn alloc_slot(&self) -> KResult<usize> {
        let mut used = self.used.lock();
        if used.is_empty() {
            return Err(Errno::NoSpc);
        }
        let len = used.len();
        let mut cursor = self.cursor.lock();
        let start = *cursor;
        let found = used
            .iter()
            .cycle()
            .skip(start)
            .take(len)
            .find_position(|slot| !**slot)
            .map(|(offset, _)| (start + offset) % len);

        match found {
            Some(slot) => {
                used[slot] = true;
                *cursor = (slot + 1) % len;
                Ok(slot)
            }
            None => Err(Errno::NoSpc),
        }
    }

    pub fn free_slot(&self, slot: usize) {
        if let Some(used) = self.used.lock().get_mut(slot) {
            *used = false;
        }
    }

    /// Writes a full page out to a freshly allocated slot, returning the
    /// slot id the page must be swapped back in from (`anon_swap_out`).
    pub fn swap_out(&self, data: &[u8; PAGE_SIZE]) -> KResult<usize> {
        let slot = self.alloc_slot()?;
        for i in 0..SWAP_SLOT_SECTORS {
            let mut sector = [0u8; SECTOR_SIZE];
            let start = i * SECTOR_SIZE;
            sector.copy_from_slice(&data[start..start + SECTOR_SIZE]);
            self.device
                .write_sector((slot * SWAP_SLOT_SECTORS + i) as u32, &sector)?;
        }
        Ok(slot)
    }

    /// Reads a page back in from `slot` and frees it (`anon_swap_in`).
    pub fn swap_in(&self, slot: usize, data: &mut [u8; PAGE_SIZE]) -> KResult<()> {
        for i in 0..SWAP_SLOT_SECTORS {
            let mut sector = [0u8; SECTOR_SIZE];
            self.device
                .read_sector((slot * SWAP_SLOT_SECTORS + i) as u32, &mut sector)?;
            let start = i * SECTOR_SIZE;
            data[start..start + SECTOR_SIZE].copy_from_slice(&sector);
        }
        self.free_slot(slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_out_then_in_round_trips_a_page() {
        let disk = SwapDisk::new((SWAP_SLOT_SECTORS * 4) as u32);
        let engine = SwapEngine::new(&disk);
        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;

        let slot = engine.swap_out(&page).unwrap();
        let mut back = [0u8; PAGE_SIZE];
        engine.swap_in(slot, &mut back).unwrap();
        assert_eq!(page, back);
    }

    #[test]
    fn swap_in_frees_the_slot_for_reuse() {
        let disk = SwapDisk::new((SWAP_SLOT_SECTORS * 1) as u32);
        let engine = SwapEngine::new(&disk);
        let page = [0u8; PAGE_SIZE];

        let slot = engine.swap_out(&page).unwrap();
        assert_eq!(engine.swap_out(&page).unwrap_err(), Errno::NoSpc);

        let mut back = [0u8; PAGE_SIZE];
        engine.swap_in(slot, &mut back).unwrap();
        assert!(engine.swap_out(&page).is_ok());
    }

    #[test]
    fn next_fit_cursor_resumes_past_the_last_allocation() {
        let disk = SwapDisk::new((SWAP_SLOT_SECTORS * 3) as u32);
        let engine = SwapEngine::new(&disk);
        let page = [0u8; PAGE_SIZE];

        let first = engine.swap_out(&page).unwrap();
        engine.free_slot(first);
        let second = engine.swap_out(&page).unwrap();
        assert_ne!(first, second);
    }
}
