//! Directory entries and operations.
//!
//! Grounded on `original_source/filesys/directory.c`: a directory is just a
//! file whose contents are an array of fixed-size entries; entries 0 and 1
//! are always "." and ".."; removal of a non-empty or in-use-as-cwd
//! directory is refused (`dir_remove`); `readdir` silently skips "." and
//! "..". One lock per directory serializes `add`/`remove` the way
//! `dir_add`/`dir_remove` take `dir->d_lock`.

use crate::config::DIRENT_NAME_MAX;
use crate::fs::inode::{Inode, InodeFlags};
use crate::prelude::*;
use std::sync::Arc;

/// On-disk directory entry, packed into a fixed-size record inside a
/// directory's data: `{inode_sector, name[<=14], in_use}`.
#[derive(Clone)]
struct DirEntry {
    inode_sector: u32,
    name: [u8; DIRENT_NAME_MAX],
    name_len: u8,
    in_use: bool,
}

const ENTRY_SIZE: usize = 4 + DIRENT_NAME_MAX + 1 + 1;

impl DirEntry {
    fn empty() -> Self {
        Self {
            inode_sector: 0,
            name: [0u8; DIRENT_NAME_MAX],
            name_len: 0,
            in_use: false,
        }
    }

    fn named(name: &str, inode_sector: u32) -> KResult<Self> {
        if name.is_empty() || name.len() > DIRENT_NAME_MAX {
            return Err(Errno::NameTooLong);
        }
        let mut buf = [0u8; DIRENT_NAME_MAX];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self {
            inode_sector,
            name: buf,
            name_len: name.len() as u8,
            in_use: true,
        })
    }

    fn name(&self) -> &str {
        std::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }

    fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0..4].copy_from_slice(&self.inode_sector.to_le_bytes());
        buf[4..4 + DIRENT_NAME_MAX].copy_from_slice(&self.name);
        buf[4 + DIRENT_NAME_MAX] = self.name_len;
        buf[4 + DIRENT_NAME_MAX + 1] = self.in_use as u8;
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let inode_sector = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let mut name = [0u8; DIRENT_NAME_MAX];
        name.copy_from_slice(&buf[4..4 + DIRENT_NAME_MAX]);
        let name_len = buf[4 + DIRENT_NAME_MAX];
        let in_use = buf[4 + DIRENT_NAME_MAX + 1] != 0;
        Self {
            inode_sector,
            name,
            name_len,
            in_use,
        }
    }
}

/// A directory: an inode, a read cursor, and the lock `add`/`remove` take.
pub struct Dir {
    pub inode: Arc<Inode>,
    lock: Spin<()>,
}

impl Dir {
    pub fn new(inode: Arc<Inode>) -> Self {
        Self {
            inode,
            lock: Spin::new(()),
        }
    }

    /// Writes the two reserved entries for a freshly created directory.
    pub fn init_dot_entries(inode: &Inode, self_sector: u32, parent_sector: u32) -> KResult<()> {
        let dot = DirEntry::named(".", self_sector)?;
        let dotdot = DirEntry::named("..", parent_sector)?;
        inode.write_at(&dot.to_bytes(), 0)?;
        inode.write_at(&dotdot.to_bytes(), ENTRY_SIZE as u32)?;
        Ok(())
    }

    fn read_entry(&self, ofs: u32) -> KResult<Option<DirEntry>> {
        let mut buf = [0u8; ENTRY_SIZE];
        let n = self.inode.read_at(&mut buf, ofs)?;
        if n < ENTRY_SIZE {
            return Ok(None);
        }
        Ok(Some(DirEntry::from_bytes(&buf)))
    }

    fn find(&self, name: &str) -> KResult<Option<(DirEntry, u32)>> {
        let mut ofs = 0u32;
        while let Some(entry) = self.read_entry(ofs)? {
            if entry.in_use && entry.name() == name {
                return Ok(Some((entry, ofs)));
            }
            ofs += ENTRY_SIZE as u32;
        }
        Ok(None)
    }

    /// Looks up `name`, returning its inode sector if present.
    pub fn lookup(&self, name: &str) -> KResult<Option<u32>> {
        Ok(self.find(name)?.map(|(e, _)| e.inode_sector))
    }

    /// Adds `name -> inode_sector`. Fails if the name already exists or is
    /// invalid.
    pub fn add(&self, name: &str, inode_sector: u32) -> KResult<()> {
        let _g = self.lock.lock();
        let entry = DirEntry::named(name, inode_sector)?;
        if self.find(name)?.is_some() {
            return Err(Errno::Exist);
        }

        let mut ofs = 0u32;
        let slot = loop {
            match self.read_entry(ofs)? {
                Some(e) if !e.in_use => break ofs,
                Some(_) => ofs += ENTRY_SIZE as u32,
                None => break ofs,
            }
        };
        self.inode.write_at(&entry.to_bytes(), slot)?;
        Ok(())
    }

    /// Removes `name`. Refuses to remove a non-empty directory or one that
    /// is any process's current working directory (`dir_remove`'s checks).
    /// `open`/`close` delegate to the filesystem's intern table so the
    /// removed inode's open-count bookkeeping stays consistent.
    pub fn remove(
        &self,
        name: &str,
        open: impl Fn(u32) -> KResult<Arc<Inode>>,
        close: impl Fn(&Arc<Inode>),
    ) -> KResult<()> {
        let _g = self.lock.lock();
        let Some((entry, ofs)) = self.find(name)? else {
            return Err(Errno::NoEnt);
        };

        let target = open(entry.inode_sector)?;
        if target.is_dir() {
            if target.cwd_count() > 0 {
                close(&target);
                return Err(Errno::Busy);
            }
            let target_dir = Dir::new(target.clone());
            // Skip the two reserved entries at offsets 0 and ENTRY_SIZE.
            let mut ofs2 = 2 * ENTRY_SIZE as u32;
            while let Some(e) = target_dir.read_entry(ofs2)? {
                if e.in_use {
                    close(&target);
                    return Err(Errno::Busy);
                }
                ofs2 += ENTRY_SIZE as u32;
            }
        }

        let mut cleared = entry.clone();
        cleared.in_use = false;
        self.inode.write_at(&cleared.to_bytes(), ofs)?;
        target.mark_removed();
        close(&target);
        Ok(())
    }

    /// Yields every live, non-reserved entry name in order.
    pub fn readdir(&self) -> KResult<Vec<String>> {
        let mut names = Vec::new();
        let mut ofs = 0u32;
        while let Some(entry) = self.read_entry(ofs)? {
            ofs += ENTRY_SIZE as u32;
            if entry.name() == "." || entry.name() == ".." {
                continue;
            }
            if entry.in_use {
                names.push(entry.name().to_string());
            }
        }
        Ok(names)
    }
}

pub(crate) fn dir_entry_size() -> usize {
    ENTRY_SIZE
}

pub(crate) fn dir_flags() -> InodeFlags {
    InodeFlags::DIR
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockDevice, MemDisk};
    use crate::fs::fat::Fat;

    fn fresh_dir_inode(parent_sector: u32) -> (Arc<Fat>, Arc<dyn BlockDevice>, Arc<Inode>, u32) {
        let disk: Arc<dyn BlockDevice> = MemDisk::new(256);
        let fat = Fat::format(disk.clone()).unwrap();
        let cluster = fat.create_chain(0);
        let sector = fat.cluster_to_sector(cluster);
        Inode::create(&fat, &disk, sector, 16 * ENTRY_SIZE as u32, InodeFlags::DIR).unwrap();
        let inode = Inode::load(fat.clone(), disk.clone(), sector).unwrap();
        Dir::init_dot_entries(&inode, sector, parent_sector).unwrap();
        (fat, disk, inode, sector)
    }

    #[test]
    fn readdir_skips_dot_entries() {
        let (_, _, inode, sector) = fresh_dir_inode(1);
        let dir = Dir::new(inode);
        dir.add("a.txt", sector + 1).unwrap();
        let names = dir.readdir().unwrap();
        assert_eq!(names, vec!["a.txt".to_string()]);
    }

    #[test]
    fn add_duplicate_name_fails() {
        let (_, _, inode, sector) = fresh_dir_inode(1);
        let dir = Dir::new(inode);
        dir.add("a", sector + 1).unwrap();
        assert_eq!(dir.add("a", sector + 2), Err(Errno::Exist));
    }

    #[test]
    fn lookup_finds_added_entry() {
        let (_, _, inode, sector) = fresh_dir_inode(1);
        let dir = Dir::new(inode);
        dir.add("child", sector + 5).unwrap();
        assert_eq!(dir.lookup("child").unwrap(), Some(sector + 5));
        assert_eq!(dir.lookup("missing").unwrap(), None);
    }
}
