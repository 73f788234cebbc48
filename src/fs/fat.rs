//! FAT cluster allocator.
//!
//! Grounded on `original_source/filesys/fat.c` (`fat_create_chain`,
//! `fat_remove_chain`, `fat_get`/`fat_put`, `cluster_to_sector`) for exact
//! next-fit and chain-splice semantics, laid out as a single struct behind
//! one lock (c.f. `src/kernel/mem/page_alloc.rs`'s single
//! `Spin<...>`-guarded free-zone bitmap).

use crate::block::{BlockDevice, Sector};
use crate::config::{END_OF_CHAIN, FAT_MAGIC, ROOT_DIR_CLUSTER, SECTORS_PER_CLUSTER, SECTOR_SIZE};
use crate::prelude::*;
use std::sync::Arc;

/// Sector 0 layout.
#[derive(Clone, Copy)]
struct BootRecord {
    magic: u32,
    sectors_per_cluster: u32,
    total_sectors: u32,
    fat_start: u32,
    fat_sectors: u32,
    root_dir_cluster: u32,
}

impl BootRecord {
    fn to_sector(self) -> Sector {
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sectors_per_cluster.to_le_bytes());
        buf[8..12].copy_from_slice(&self.total_sectors.to_le_bytes());
        buf[12..16].copy_from_slice(&self.fat_start.to_le_bytes());
        buf[16..20].copy_from_slice(&self.fat_sectors.to_le_bytes());
        buf[20..24].copy_from_slice(&self.root_dir_cluster.to_le_bytes());
        buf
    }

    fn from_sector(buf: &Sector) -> Self {
        let r = |range: std::ops::Range<usize>| u32::from_le_bytes(buf[range].try_into().unwrap());
        Self {
            magic: r(0..4),
            sectors_per_cluster: r(4..8),
            total_sectors: r(8..12),
            fat_start: r(12..16),
            fat_sectors: r(16..20),
            root_dir_cluster: r(20..24),
        }
    }
}

struct FatInner {
    boot: BootRecord,
    /// `entries[c - 1]` is the FAT slot for cluster `c`. `0` means free,
    /// `END_OF_CHAIN` terminates a chain, anything else is the successor.
    entries: Vec<u32>,
    data_start: u32,
    /// Advisory next-fit cursor, best-effort and not itself locked.
    last_allocated: u32,
}

/// The cluster-linked allocator, serialized under a single write lock: every
/// operation executes under one allocator mutex.
pub struct Fat {
    device: Arc<dyn BlockDevice>,
    inner: Spin<FatInner>,
}

impl Fat {
    fn fat_length(total_sectors: u32) -> u32 {
        // Round up: each cluster needs one data sector plus its 4-byte FAT
        // entry; leave room for the boot sector itself.
        let entries_per_sector = (SECTOR_SIZE / 4) as u32;
        ((total_sectors.saturating_sub(1)) * entries_per_sector)
            / (entries_per_sector + SECTORS_PER_CLUSTER)
    }

    /// Formats a fresh filesystem onto `device`, writing the boot record and
    /// zeroing the root directory's first cluster.
    pub fn format(device: Arc<dyn BlockDevice>) -> KResult<Arc<Fat>> {
        let total_sectors = device.sector_count();
        let fat_length = Self::fat_length(total_sectors);
        if fat_length <= ROOT_DIR_CLUSTER {
            return Err(Errno::NoSpc);
        }
        let fat_sectors = (fat_length * 4).div_ceil(SECTOR_SIZE as u32).max(1);
        let boot = BootRecord {
            magic: FAT_MAGIC,
            sectors_per_cluster: SECTORS_PER_CLUSTER,
            total_sectors,
            fat_start: 1,
            fat_sectors,
            root_dir_cluster: ROOT_DIR_CLUSTER,
        };
        device.write_sector(0, &boot.to_sector())?;

        let mut entries = vec![0u32; fat_length as usize];
        entries[(ROOT_DIR_CLUSTER - 1) as usize] = END_OF_CHAIN;

        let data_start = boot.fat_start + fat_sectors;
        let zero = [0u8; SECTOR_SIZE];
        device.write_sector(data_start + (ROOT_DIR_CLUSTER - 1) * SECTORS_PER_CLUSTER, &zero)?;

        let fat = Arc::new(Fat {
            device,
            inner: Spin::new(FatInner {
                boot,
                entries,
                data_start,
                last_allocated: ROOT_DIR_CLUSTER,
            }),
        });
        fat.persist()?;
        Ok(fat)
    }

    /// Opens a previously formatted filesystem, reading the FAT table fully
    /// into memory (mirroring `fat_open`'s bulk load).
    pub fn open(device: Arc<dyn BlockDevice>) -> KResult<Arc<Fat>> {
        let mut boot_sector = [0u8; SECTOR_SIZE];
        device.read_sector(0, &mut boot_sector)?;
        let boot = BootRecord::from_sector(&boot_sector);
        assert_eq!(boot.magic, FAT_MAGIC, "FAT boot signature mismatch");

        let fat_length = Self::fat_length(boot.total_sectors);
        let mut entries = vec![0u32; fat_length as usize];
        let mut buf = [0u8; SECTOR_SIZE];
        let per_sector = SECTOR_SIZE / 4;
        for i in 0..boot.fat_sectors {
            device.read_sector(boot.fat_start + i, &mut buf)?;
            for (j, chunk) in buf.chunks_exact(4).enumerate() {
                let idx = (i as usize) * per_sector + j;
                if idx >= entries.len() {
                    break;
                }
                entries[idx] = u32::from_le_bytes(chunk.try_into().unwrap());
            }
        }

        let data_start = boot.fat_start + boot.fat_sectors;
        Ok(Arc::new(Fat {
            device,
            inner: Spin::new(FatInner {
                boot,
                entries,
                data_start,
                last_allocated: ROOT_DIR_CLUSTER,
            }),
        }))
    }

    /// Writes the boot record and the whole in-memory FAT table back to
    /// disk (mirrors `fat_close`).
    pub fn persist(&self) -> KResult<()> {
        let inner = self.inner.lock();
        self.device.write_sector(0, &inner.boot.to_sector())?;

        let per_sector = SECTOR_SIZE / 4;
        for i in 0..inner.boot.fat_sectors {
            let mut buf = [0u8; SECTOR_SIZE];
            for j in 0..per_sector {
                let idx = (i as usize) * per_sector + j;
                if idx >= inner.entries.len() {
                    break;
                }
                buf[j * 4..j * 4 + 4].copy_from_slice(&inner.entries[idx].to_le_bytes());
            }
            self.device.write_sector(inner.boot.fat_start + i, &buf)?;
        }
        Ok(())
    }

    pub fn root_dir_cluster(&self) -> u32 {
        self.inner.lock().boot.root_dir_cluster
    }

    fn fat_length_locked(inner: &FatInner) -> u32 {
        inner.entries.len() as u32
    }

    /// Appends a new cluster to the chain after `prev`, or starts a fresh
    /// chain if `prev == 0`. Returns `0` on exhaustion.
    pub fn create_chain(&self, prev: u32) -> u32 {
        assert_ne!(prev, END_OF_CHAIN);
        let mut inner = self.inner.lock();
        let length = Self::fat_length_locked(&inner);

        let mut candidate = inner.last_allocated;
        loop {
            if inner.entries[(candidate - 1) as usize] == 0 {
                break;
            }
            candidate = if candidate + 1 > length {
                ROOT_DIR_CLUSTER
            } else {
                candidate + 1
            };
            if candidate == inner.last_allocated {
                // Wrapped all the way around without finding a free slot.
                return 0;
            }
        }

        inner.last_allocated = candidate;
        if prev != 0 {
            inner.entries[(prev - 1) as usize] = candidate;
        }
        inner.entries[(candidate - 1) as usize] = END_OF_CHAIN;
        candidate
    }

    /// Frees every cluster in the chain starting at `head`. If `prev` is
    /// non-zero, it is first terminated so the chain is detached from its
    /// predecessor before being walked and zeroed.
    pub fn remove_chain(&self, head: u32, prev: u32) {
        assert!(head != END_OF_CHAIN && head != 0);
        let mut inner = self.inner.lock();
        inner.last_allocated = head;
        if prev != 0 {
            inner.entries[(prev - 1) as usize] = END_OF_CHAIN;
        }

        let mut cur = head;
        loop {
            let next = inner.entries[(cur - 1) as usize];
            inner.entries[(cur - 1) as usize] = 0;
            if next == END_OF_CHAIN {
                break;
            }
            cur = next;
        }
    }

    pub fn get(&self, c: u32) -> u32 {
        assert!(c != END_OF_CHAIN && c != 0);
        self.inner.lock().entries[(c - 1) as usize]
    }

    pub fn put(&self, c: u32, v: u32) {
        assert!(c != END_OF_CHAIN && c != 0);
        self.inner.lock().entries[(c - 1) as usize] = v;
    }

    pub fn cluster_to_sector(&self, c: u32) -> u32 {
        assert!(c != END_OF_CHAIN && c != 0);
        let inner = self.inner.lock();
        inner.data_start + (c - 1) * SECTORS_PER_CLUSTER
    }

    pub fn sector_to_cluster(&self, sector: u32) -> u32 {
        let inner = self.inner.lock();
        if sector < inner.data_start {
            return 0;
        }
        (sector - inner.data_start) / SECTORS_PER_CLUSTER + 1
    }

    pub(crate) fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }
}
