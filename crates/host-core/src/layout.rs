//! Fixed virtual address layout and page/block arithmetic.
//!
//! The guest sees a 2 GiB user address space. The host allocates in 64 KiB
//! blocks while the guest maps in 4 KiB pages; everything in the memory
//! manager arbitrates between the two granularities, so the conversion
//! helpers live here next to the layout constants.
//!
//! ```text
//! 80000000 ------------------------------ end of user address space
//! 72000000 ------------------------------
//!   71600000  translated code cache
//!   71410000  translator block arena
//!   71400000  translator bookkeeping
//!   71000000  kernel heap
//!   70FF0000  fork info
//!   70FE0000  startup (argv, env) data
//!   70FD0000  TLS data
//!   70900000  VFS data
//!   70800000  mm heap
//!   70700000  process struct
//!   70000000  mm bookkeeping
//! 70000000 ------------------------------ kernel-private region
//! ...          application code and data
//! 04000000 ------------------------------ lowest non-fixed allocation
//! ...          heap-window allocations
//! 01000000 ------------------------------ HEAP_BASE
//! 00000000 ------------------------------
//! ```

/// Guest page size.
pub const PAGE_SIZE: u32 = 0x1000;
pub const PAGE_SHIFT: u32 = 12;

/// Host allocation granule ("block").
pub const BLOCK_SIZE: u32 = 0x1_0000;
pub const BLOCK_SHIFT: u32 = 16;
pub const PAGES_PER_BLOCK: u32 = BLOCK_SIZE / PAGE_SIZE;

/// Bounds of the usermode address space.
pub const ADDRESS_SPACE_LOW: u32 = 0x0000_0000;
pub const ADDRESS_SPACE_HIGH: u32 = 0x8000_0000;

/// Window for non-fixed allocations.
pub const ADDRESS_ALLOCATION_LOW: u32 = 0x0400_0000;
pub const ADDRESS_ALLOCATION_HIGH: u32 = 0x7000_0000;

/// Window for `MapFlags::HEAP` allocations: `[HEAP_BASE, ADDRESS_ALLOCATION_LOW)`.
pub const HEAP_BASE: u32 = 0x0100_0000;

/// Kernel-private region.
pub const KERNEL_BASE: u32 = 0x7000_0000;
pub const KERNEL_END: u32 = 0x7200_0000;

/// Translator bookkeeping, block arena, and code cache inside the
/// kernel-private region. Emitted code embeds cache addresses as absolute
/// `u32` values, so these bases are part of the emitter contract.
pub const DBT_DATA_BASE: u32 = 0x7140_0000;
pub const DBT_BLOCKS_BASE: u32 = 0x7141_0000;
pub const DBT_BLOCKS_SIZE: u32 = 0x0010_0000;
pub const DBT_CACHE_BASE: u32 = 0x7160_0000;
pub const DBT_CACHE_SIZE: u32 = 0x0020_0000;

/// Number of 4 KiB pages in the user address space.
pub const PAGE_COUNT: usize = (ADDRESS_SPACE_HIGH >> PAGE_SHIFT) as usize;
/// Number of 64 KiB blocks in the user address space.
pub const BLOCK_COUNT: usize = (ADDRESS_SPACE_HIGH >> BLOCK_SHIFT) as usize;

/// Page index containing `addr`.
#[must_use]
pub const fn page_of(addr: u32) -> u32 {
    addr >> PAGE_SHIFT
}

/// Block index containing `addr`.
#[must_use]
pub const fn block_of(addr: u32) -> u32 {
    addr >> BLOCK_SHIFT
}

/// Block index containing `page`.
#[must_use]
pub const fn block_of_page(page: u32) -> u32 {
    page / PAGES_PER_BLOCK
}

/// Index of `page` within its block (0..16).
#[must_use]
pub const fn page_in_block(page: u32) -> u32 {
    page % PAGES_PER_BLOCK
}

/// First page of `block`.
#[must_use]
pub const fn first_page_of_block(block: u32) -> u32 {
    block * PAGES_PER_BLOCK
}

/// Start address of `page`.
#[must_use]
pub const fn page_address(page: u32) -> u32 {
    page << PAGE_SHIFT
}

/// Start address of `block`.
#[must_use]
pub const fn block_address(block: u32) -> u32 {
    block << BLOCK_SHIFT
}

/// Round `len` up to a whole number of pages (wrapping, like the guest ABI).
#[must_use]
pub const fn align_to_page(len: u32) -> u32 {
    len.wrapping_add(PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Whether `addr` sits on a page boundary.
#[must_use]
pub const fn is_page_aligned(addr: u32) -> bool {
    addr % PAGE_SIZE == 0
}
