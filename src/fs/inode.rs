//! The inode layer.
//!
//! Grounded on `original_source/filesys/inode.c`'s `EFILESYS` half: one
//! on-disk sector per inode (magic, length, start cluster, directory/symlink
//! flags), a global intern table so opening the same sector twice shares one
//! in-memory object, bounce-buffered sector I/O, and atomic file growth under
//! a per-inode lock (`file_growth`). Laid out as a struct wrapping a
//! `Spin<...>`-guarded mutable core plus `Arc`-shared handles (c.f.
//! `src/kernel/vfs/inode.rs`'s `Inode` wrapper).

use crate::block::BlockDevice;
use crate::config::{DIRENT_NAME_MAX, INODE_MAGIC, SECTOR_SIZE};
use crate::fs::fat::Fat;
use crate::prelude::*;
use std::sync::Arc;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct InodeFlags: u8 {
        const DIR     = 0b001;
        const SYMLINK = 0b010;
    }
}

/// The on-disk inode record: exactly one sector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiskInode {
    pub magic: u32,
    pub length: u32,
    pub start_cluster: u32,
    pub flags: InodeFlags,
}

impl DiskInode {
    fn to_sector(self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.start_cluster.to_le_bytes());
        buf[12] = self.flags.bits();
        buf
    }

    fn from_sector(buf: &[u8; SECTOR_SIZE]) -> KResult<Self> {
        let r = |range: std::ops::Range<usize>| u32::from_le_bytes(buf[range].try_into().unwrap());
        let magic = r(0..4);
        if magic != INODE_MAGIC {
            return Err(Errno::Inval);
        }
        Ok(Self {
            magic,
            length: r(4..8),
            start_cluster: r(8..12),
            flags: InodeFlags::from_bits_truncate(buf[12]),
        })
    }
}

struct InodeState {
    disk: DiskInode,
    open_count: u32,
    deny_write_count: u32,
    cwd_count: u32,
    removed: bool,
}

/// An in-memory inode, shared by every opener of the same sector.
///
/// Growth and length reads share one lock (REDESIGN FLAGS: "inode length
/// reads take the per-inode growth lock"), so a concurrent reader can never
/// observe a length the cluster chain does not yet back.
pub struct Inode {
    /// The sector this inode's on-disk record lives at; also its intern key.
    pub sector: u32,
    fat: Arc<Fat>,
    device: Arc<dyn BlockDevice>,
    state: Spin<InodeState>,
}

impl Inode {
    /// Builds a fresh on-disk inode at `sector` with `length` bytes of
    /// (zeroed) data, allocating its cluster chain starting from `sector`'s
    /// own cluster (mirrors `inode_create`: the header cluster is the chain
    /// head, data clusters follow it).
    pub fn create(
        fat: &Arc<Fat>,
        device: &Arc<dyn BlockDevice>,
        sector: u32,
        length: u32,
        flags: InodeFlags,
    ) -> KResult<()> {
        let head = fat.sector_to_cluster(sector);
        let needed = (length as usize).div_ceil(SECTOR_SIZE);
        let mut cur = head;
        for _ in 0..needed {
            let next = fat.create_chain(cur);
            if next == 0 {
                fat.remove_chain(head, 0);
                return Err(Errno::NoSpc);
            }
            cur = next;
        }

        let after_head = fat.get(head);
        let start_cluster = if after_head != crate::config::END_OF_CHAIN {
            after_head
        } else {
            head
        };

        let disk = DiskInode {
            magic: INODE_MAGIC,
            length,
            start_cluster,
            flags,
        };
        device.write_sector(sector, &disk.to_sector())?;

        let zero = [0u8; SECTOR_SIZE];
        let mut c = head;
        while fat.get(c) != crate::config::END_OF_CHAIN {
            c = fat.get(c);
            device.write_sector(fat.cluster_to_sector(c), &zero)?;
        }
        Ok(())
    }

    /// Reads an inode's on-disk record fresh (used by the intern table on a
    /// cache miss; callers otherwise go through `FileSystem::open_inode`).
    pub(crate) fn load(fat: Arc<Fat>, device: Arc<dyn BlockDevice>, sector: u32) -> KResult<Arc<Inode>> {
        let mut buf = [0u8; SECTOR_SIZE];
        device.read_sector(sector, &mut buf)?;
        let disk = DiskInode::from_sector(&buf)?;
        Ok(Arc::new(Inode {
            sector,
            fat,
            device,
            state: Spin::new(InodeState {
                disk,
                open_count: 1,
                deny_write_count: 0,
                cwd_count: 0,
                removed: false,
            }),
        }))
    }

    pub fn is_dir(&self) -> bool {
        self.state.lock().disk.flags.contains(InodeFlags::DIR)
    }

    pub fn is_symlink(&self) -> bool {
        self.state.lock().disk.flags.contains(InodeFlags::SYMLINK)
    }

    pub fn image(&self) -> DiskInode {
        self.state.lock().disk
    }

    pub fn len(&self) -> u32 {
        self.state.lock().disk.length
    }

    pub fn bump_open(&self) {
        self.state.lock().open_count += 1;
    }

    pub fn bump_cwd(&self) {
        self.state.lock().cwd_count += 1;
    }

    pub fn drop_cwd(&self) {
        self.state.lock().cwd_count -= 1;
    }

    pub fn cwd_count(&self) -> u32 {
        self.state.lock().cwd_count
    }

    pub fn mark_removed(&self) {
        self.state.lock().removed = true;
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    pub fn deny_write(&self) {
        let mut s = self.state.lock();
        s.deny_write_count += 1;
    }

    pub fn allow_write(&self) {
        let mut s = self.state.lock();
        assert!(s.deny_write_count > 0);
        s.deny_write_count -= 1;
    }

    /// Decrements the opener count. Returns `true` if this was the last
    /// opener, in which case the caller (the intern table) should remove it
    /// from the map and, if marked removed, reclaim its cluster chain.
    pub fn close_one(&self) -> bool {
        let mut s = self.state.lock();
        s.open_count -= 1;
        s.open_count == 0
    }

    pub(crate) fn reclaim_chain(&self) {
        let head = self.fat.sector_to_cluster(self.sector);
        self.fat.remove_chain(head, 0);
    }

    fn byte_to_sector(&self, disk: &DiskInode, pos: u32) -> Option<u32> {
        if disk.length == 0 {
            return None;
        }
        let mut cluster = disk.start_cluster;
        let mut steps = pos / SECTOR_SIZE as u32;
        while steps > 0 {
            cluster = self.fat.get(cluster);
            if cluster == crate::config::END_OF_CHAIN {
                return None;
            }
            steps -= 1;
        }
        Some(self.fat.cluster_to_sector(cluster))
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u32) -> KResult<usize> {
        let disk = self.state.lock().disk;
        let mut total = 0usize;
        let mut offset = offset;
        let mut remaining = buf.len();
        while remaining > 0 {
            if offset >= disk.length {
                break;
            }
            let Some(sector_idx) = self.byte_to_sector(&disk, offset) else {
                break;
            };
            let sector_ofs = (offset as usize) % SECTOR_SIZE;
            let inode_left = (disk.length - offset) as usize;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let chunk = remaining.min(inode_left).min(sector_left);
            if chunk == 0 {
                break;
            }

            let mut sector = [0u8; SECTOR_SIZE];
            self.device.read_sector(sector_idx, &mut sector)?;
            buf[total..total + chunk].copy_from_slice(&sector[sector_ofs..sector_ofs + chunk]);

            total += chunk;
            offset += chunk as u32;
            remaining -= chunk;
        }
        Ok(total)
    }

    /// Writes `buf` at `offset`, growing the file first if the write
    /// reaches past the current end (`file_growth`). Growth and the length
    /// update happen atomically under the same lock a concurrent `len()`
    /// observes.
    pub fn write_at(&self, buf: &[u8], offset: u32) -> KResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        {
            let deny = self.state.lock().deny_write_count;
            if deny > 0 {
                return Ok(0);
            }
        }

        let required_end = offset + buf.len() as u32;
        {
            let mut s = self.state.lock();
            if required_end > s.disk.length {
                self.grow_locked(&mut s.disk, required_end)?;
                self.device.write_sector(self.sector, &s.disk.to_sector())?;
            }
        }

        let disk = self.state.lock().disk;
        let mut total = 0usize;
        let mut offset = offset;
        let mut remaining = buf.len();
        while remaining > 0 {
            let Some(sector_idx) = self.byte_to_sector(&disk, offset) else {
                break;
            };
            let sector_ofs = (offset as usize) % SECTOR_SIZE;
            let inode_left = (disk.length - offset) as usize;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let chunk = remaining.min(inode_left).min(sector_left);
            if chunk == 0 {
                break;
            }

            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                self.device.write_sector(sector_idx, buf[total..total + chunk].try_into().unwrap())?;
            } else {
                let mut sector = [0u8; SECTOR_SIZE];
                if sector_ofs > 0 || chunk < sector_left {
                    self.device.read_sector(sector_idx, &mut sector)?;
                }
                sector[sector_ofs..sector_ofs + chunk].copy_from_slice(&buf[total..total + chunk]);
                self.device.write_sector(sector_idx, &sector)?;
            }

            total += chunk;
            offset += chunk as u32;
            remaining -= chunk;
        }
        Ok(total)
    }

    /// Extends the cluster chain so that `required_end` bytes are backed by
    /// allocated clusters, zero-filling any newly allocated sectors.
    /// Mirrors `file_growth`'s two cases (empty file vs. partially-filled
    /// last sector) collapsed into one walk-then-extend routine.
    fn grow_locked(&self, disk: &mut DiskInode, required_end: u32) -> KResult<()> {
        let head = self.fat.sector_to_cluster(self.sector);
        let existing_sectors = (disk.length as usize).div_ceil(SECTOR_SIZE) as u32;
        let required_sectors = (required_end as usize).div_ceil(SECTOR_SIZE) as u32;
        let new_sectors = required_sectors.saturating_sub(existing_sectors);

        if new_sectors > 0 {
            let mut last = head;
            for _ in 0..existing_sectors {
                last = self.fat.get(last);
            }
            let tail_before_growth = last;

            let mut created = Vec::with_capacity(new_sectors as usize);
            for _ in 0..new_sectors {
                let next = self.fat.create_chain(last);
                if next == 0 {
                    if let Some(&first) = created.first() {
                        self.fat.remove_chain(first, tail_before_growth);
                    }
                    return Err(Errno::NoSpc);
                }
                created.push(next);
                last = next;
            }

            let zero = [0u8; SECTOR_SIZE];
            for cluster in &created {
                self.device.write_sector(self.fat.cluster_to_sector(*cluster), &zero)?;
            }

            if disk.length == 0 {
                disk.start_cluster = created[0];
            }
        }

        disk.length = required_end;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemDisk;

    fn fixture() -> (Arc<Fat>, Arc<dyn BlockDevice>, u32) {
        let disk: Arc<dyn BlockDevice> = MemDisk::new(256);
        let fat = Fat::format(disk.clone()).unwrap();
        let cluster = fat.create_chain(0);
        let sector = fat.cluster_to_sector(cluster);
        (fat, disk, sector)
    }

    #[test]
    fn create_and_reload_round_trips() {
        let (fat, device, sector) = fixture();
        Inode::create(&fat, &device, sector, 0, InodeFlags::empty()).unwrap();
        let inode = Inode::load(fat, device, sector).unwrap();
        assert_eq!(inode.len(), 0);
        assert!(!inode.is_dir());
    }

    #[test]
    fn write_past_eof_grows_the_file() {
        let (fat, device, sector) = fixture();
        Inode::create(&fat, &device, sector, 0, InodeFlags::empty()).unwrap();
        let inode = Inode::load(fat, device, sector).unwrap();

        let data = [0xABu8; 700];
        let n = inode.write_at(&data, 0).unwrap();
        assert_eq!(n, 700);
        assert_eq!(inode.len(), 700);

        let mut readback = [0u8; 700];
        let r = inode.read_at(&mut readback, 0).unwrap();
        assert_eq!(r, 700);
        assert_eq!(&readback[..], &data[..]);
    }

    #[test]
    fn write_within_allocated_region_does_not_reallocate() {
        let (fat, device, sector) = fixture();
        Inode::create(&fat, &device, sector, SECTOR_SIZE as u32 * 2, InodeFlags::empty()).unwrap();
        let inode = Inode::load(fat, device, sector).unwrap();

        inode.write_at(&[1, 2, 3], 10).unwrap();
        let mut buf = [0u8; 3];
        inode.read_at(&mut buf, 10).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(inode.len(), SECTOR_SIZE as u32 * 2);
    }

    #[test]
    fn read_past_length_returns_short_count() {
        let (fat, device, sector) = fixture();
        Inode::create(&fat, &device, sector, 4, InodeFlags::empty()).unwrap();
        let inode = Inode::load(fat, device, sector).unwrap();
        let mut buf = [0u8; 16];
        let n = inode.read_at(&mut buf, 0).unwrap();
        assert_eq!(n, 4);
    }

    #[test]
    fn name_length_constant_matches_dirent_budget() {
        assert_eq!(DIRENT_NAME_MAX, 14);
    }
}
