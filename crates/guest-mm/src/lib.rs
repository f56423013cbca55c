//! Page-granular Linux memory management over 64 KiB host sections.
//!
//! The guest expects `mmap`/`munmap`/`mprotect`/`brk` at 4 KiB
//! granularity; the host only allocates 64 KiB blocks and has no native
//! copy-on-write. This crate closes both gaps: a per-page protection
//! table and per-block section ledger arbitrate the granularities, and
//! fork is built from section handle sharing plus write-protect
//! faulting.
//!
//! Module map:
//! - [`map`]: the ordered map-entry list and its arena
//! - [`mm`]: manager state, free-range search, brk, reset
//! - `mmap`: the three mapping operations
//! - `fork`: fork hand-off and the write-fault handler
//! - [`sys`]: Linux syscall shims

pub mod map;
pub mod mm;
pub mod sys;

mod error;
mod fork;
mod mmap;

pub use error::MmError;
pub use mm::{MapRange, Mm, host_prot};
