//! Virtual memory: frame table, supplemental page table, swap, and the
//! page-fault/fork machinery built on top of them.
//!
//! Grounded on `original_source/vm/vm.c` and its `anon.c`/`file.c` page
//! operation tables, laid out the way `src/kernel/mem` lays out its own
//! concerns (one file per concern, wired together through a handful of
//! plain structs rather than the original's vtable-of-function-pointers
//! `page_operations`).

pub mod fault;
pub mod fork;
pub mod frame;
pub mod mmap;
pub mod page;
pub mod spt;
pub mod swap;
