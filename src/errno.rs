//! Typed error codes for every fallible operation in this crate.
//!
//! Grounded on `crates/posix_types/src/result.rs` (`PosixError`) and
//! `src/kernel/constants.rs`'s `pub const E*` table, generalized from the
//! two codes `PosixError` happened to need into the set this crate's
//! filesystem, scheduler and VM actually return.

use core::fmt;

/// Crate-wide result alias, the counterpart of `KResult<T> = Result<T, u32>`
/// elsewhere in this codebase.
pub type KResult<T> = Result<T, Errno>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    /// No such file or directory.
    NoEnt,
    /// File exists.
    Exist,
    /// Not a directory.
    NotDir,
    /// Is a directory.
    IsDir,
    /// Path component name exceeds `DIRENT_NAME_MAX`.
    NameTooLong,
    /// Too many levels of symbolic links.
    Loop,
    /// No space left on device (FAT exhausted, or swap disk full).
    NoSpc,
    /// Out of (frame) memory.
    NoMem,
    /// Invalid argument.
    Inval,
    /// Device or resource busy (non-empty directory, or in use as a cwd).
    Busy,
    /// Bad address (kernel address from user, null pointer).
    Fault,
    /// Operation not permitted (write to a read-only mapping).
    Perm,
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Errno::NoEnt => "no such file or directory",
            Errno::Exist => "file exists",
            Errno::NotDir => "not a directory",
            Errno::IsDir => "is a directory",
            Errno::NameTooLong => "name too long",
            Errno::Loop => "too many levels of symbolic links",
            Errno::NoSpc => "no space left on device",
            Errno::NoMem => "out of memory",
            Errno::Inval => "invalid argument",
            Errno::Busy => "device or resource busy",
            Errno::Fault => "bad address",
            Errno::Perm => "operation not permitted",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Errno {}
