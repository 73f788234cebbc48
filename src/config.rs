//! Kernel-wide tunables.
//!
//! Grounded on `src/kernel/constants.rs`: a flat module of `pub const`s
//! rather than a runtime-parsed config file, because none of the in-scope
//! subsystems are configured past compile time.

/// Bytes per disk sector. Every on-disk structure (boot record, FAT entry
/// array, inode, directory entry) is sized relative to this.
pub const SECTOR_SIZE: usize = 512;

/// Bytes per virtual-memory page. Chosen as 8 sectors so that one evicted
/// anonymous page occupies exactly one swap slot (`SWAP_SLOT_SECTORS`).
pub const PAGE_SIZE: usize = 4096;

/// Sectors per swap slot; one slot backs one evicted page.
pub const SWAP_SLOT_SECTORS: usize = PAGE_SIZE / SECTOR_SIZE;

/// Maximum length of a single path component's name, matching the 14-byte
/// name field of an on-disk directory entry (15 bytes including the NUL).
pub const DIRENT_NAME_MAX: usize = 14;

/// Sentinel FAT entry marking the last cluster of a chain.
pub const END_OF_CHAIN: u32 = 0x0FFF_FFFF;

/// Cluster id reserved for the root directory's inode.
pub const ROOT_DIR_CLUSTER: u32 = 1;

/// Magic number identifying a valid on-disk inode sector.
pub const INODE_MAGIC: u32 = 0x494e_4f44;

/// Magic number identifying a formatted FAT boot sector.
pub const FAT_MAGIC: u32 = 0x4641_5431;

/// Sectors per cluster; fixed to 1 as in the reference design.
pub const SECTORS_PER_CLUSTER: u32 = 1;

/// Lowest schedulable priority.
pub const PRI_MIN: u8 = 0;
/// Highest schedulable priority.
pub const PRI_MAX: u8 = 63;
/// Priority newly created threads start at absent other instruction.
pub const PRI_DEFAULT: u8 = 31;

/// Timer ticks a thread runs before `thread_tick` flags a slice expiration.
pub const TIME_SLICE_TICKS: u64 = 4;

/// Timer ticks per second, used only to translate `timer_sleep` arguments.
pub const TIMER_FREQ: u64 = 100;

/// Maximum nesting depth `lock_acquire`'s priority donation will recurse
/// through before giving up: an 8th level donates, a 9th does not.
pub const MAX_DONATION_DEPTH: u32 = 8;

/// Maximum distance (in bytes) the user stack is allowed to grow downward
/// from its original top.
pub const STACK_GROWTH_LIMIT: usize = 1 << 20;
