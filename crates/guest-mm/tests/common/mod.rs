//! Shared fixtures for the memory manager tests.
#![allow(dead_code)]

use guest_mm::Mm;
use host_core::SimHost;
use linux_abi::{MapFlags, Prot};

pub const RW: Prot = Prot::READ.union(Prot::WRITE);
pub const ANON: MapFlags = MapFlags::PRIVATE.union(MapFlags::ANONYMOUS);
pub const FIXED_ANON: MapFlags = ANON.union(MapFlags::FIXED);

pub fn setup() -> (SimHost, Mm) {
    (SimHost::new(), Mm::new(SimHost::root_process()))
}

/// Opt into log output while debugging: `RUST_LOG=debug cargo test`.
pub fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Cross-check the page table, the block ledger and the map list against
/// each other over a range of blocks:
///
/// - a page has non-zero protection iff some entry contains it;
/// - a block's page count equals its number of mapped pages;
/// - a block has a section iff its page count is non-zero;
/// - the map list is ordered and overlap-free.
pub fn check_ledger(mm: &Mm, blocks: std::ops::Range<u32>) {
    let ranges = mm.ranges();
    for block in blocks {
        let first = block * 16;
        let mut mapped_pages = 0u32;
        for page in first..first + 16 {
            let mapped = ranges
                .iter()
                .any(|r| r.start_page <= page && page <= r.end_page);
            assert_eq!(
                mapped,
                !mm.page_prot(page).is_empty(),
                "page {page:#x}: protection byte disagrees with the map list"
            );
            if mapped {
                mapped_pages += 1;
            }
        }
        assert_eq!(
            u32::from(mm.block_page_count(block)),
            mapped_pages,
            "block {block:#x}: stale page count"
        );
        assert_eq!(
            mm.block_section(block).is_some(),
            mapped_pages > 0,
            "block {block:#x}: section presence disagrees with page count"
        );
    }
    for pair in ranges.windows(2) {
        assert!(
            pair[0].end_page < pair[1].start_page,
            "map list out of order or overlapping: {pair:?}"
        );
    }
}
