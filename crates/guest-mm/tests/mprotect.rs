//! Protection changes: batching against host granularity, coverage
//! validation, and the fork-aware write-bit mask.

mod common;

use common::{FIXED_ANON, RW, setup};
use guest_mm::MmError;
use host_core::HostProt;
use linux_abi::Prot;

#[test]
fn s6_host_calls_never_cross_a_block_boundary() {
    let (mut host, mut mm) = setup();
    // 96 KiB spanning the boundary between blocks 0x2000 and 0x2001.
    mm.mmap(&mut host, 0x2000_0000, 0x1_8000, RW, FIXED_ANON, None, 0)
        .expect("map");
    host.clear_protect_calls();

    // Re-protect 32 KiB straddling the boundary.
    mm.mprotect(&mut host, 0x2000_C000, 0x8000, Prot::READ)
        .expect("mprotect");

    for page in 0x2_000C..=0x2_0013u32 {
        assert_eq!(mm.page_prot(page), Prot::READ, "page {page:#x}");
    }
    // Pages outside the range keep their protection.
    assert_eq!(mm.page_prot(0x2_000B), RW);
    assert_eq!(mm.page_prot(0x2_0014), RW);

    let calls = host.protect_calls();
    assert_eq!(calls.len(), 2, "one call per touched block");
    for call in calls {
        let first_block = call.first_page / 16;
        let last_block = (call.first_page + call.pages - 1) / 16;
        assert_eq!(first_block, last_block, "call crossed a block: {call:?}");
        assert_eq!(call.prot, HostProt::ReadOnly);
    }
    assert_eq!((calls[0].first_page, calls[0].pages), (0x2_000C, 4));
    assert_eq!((calls[1].first_page, calls[1].pages), (0x2_0010, 4));
}

#[test]
fn prot_roundtrip_per_page() {
    let (mut host, mut mm) = setup();
    mm.mmap(&mut host, 0x2000_0000, 0x4000, RW, FIXED_ANON, None, 0)
        .expect("map");

    let rx = Prot::READ | Prot::EXEC;
    mm.mprotect(&mut host, 0x2000_1000, 0x2000, rx).expect("mprotect");

    assert_eq!(mm.page_prot(0x2_0000), RW);
    assert_eq!(mm.page_prot(0x2_0001), rx);
    assert_eq!(mm.page_prot(0x2_0002), rx);
    assert_eq!(mm.page_prot(0x2_0003), RW);
}

#[test]
fn mprotect_requires_full_contiguous_backing() {
    let (mut host, mut mm) = setup();

    assert_eq!(
        mm.mprotect(&mut host, 0x2000_0000, 0x1000, Prot::READ),
        Err(MmError::OutOfMemory),
        "nothing mapped"
    );

    mm.mmap(&mut host, 0x2000_0000, 0x2000, RW, FIXED_ANON, None, 0)
        .expect("map");
    assert_eq!(
        mm.mprotect(&mut host, 0x2000_0000, 0x4000, Prot::READ),
        Err(MmError::OutOfMemory),
        "range extends past the mapping"
    );

    // A hole in the middle fails too.
    mm.mmap(&mut host, 0x2000_3000, 0x1000, RW, FIXED_ANON, None, 0)
        .expect("second");
    assert_eq!(
        mm.mprotect(&mut host, 0x2000_0000, 0x4000, Prot::READ),
        Err(MmError::OutOfMemory),
        "gap between entries"
    );

    // Adjacent entries count as contiguous backing.
    mm.mmap(&mut host, 0x2000_2000, 0x1000, RW, FIXED_ANON, None, 0)
        .expect("fill the gap");
    mm.mprotect(&mut host, 0x2000_0000, 0x4000, Prot::READ)
        .expect("contiguous across entries");

    assert_eq!(
        mm.mprotect(&mut host, 0x2000_0800, 0x1000, Prot::READ),
        Err(MmError::InvalidArgument),
        "unaligned address"
    );
}

#[test]
fn write_bit_masked_while_stored_protection_lacks_write() {
    let (mut host, mut mm) = setup();
    // Mapped read-only: the stored protection has no write bit.
    mm.mmap(&mut host, 0x2000_0000, 0x1000, Prot::READ, FIXED_ANON, None, 0)
        .expect("map");
    host.clear_protect_calls();

    // Request read+write: stored protection updates, but the host call
    // must keep write off so a later fault is still observable.
    mm.mprotect(&mut host, 0x2000_0000, 0x1000, RW).expect("mprotect");
    assert_eq!(mm.page_prot(0x2_0000), RW);
    assert_eq!(host.protect_calls()[0].prot, HostProt::ReadOnly);

    // The first write faults; the fault handler notices the page is
    // logically writable and restores full access.
    let fault = host
        .guest_write(mm.pid(), 0x2000_0000, b"x")
        .expect_err("host write bit is still off");
    assert!(mm.handle_page_fault(&mut host, fault.addr));
    host.guest_write(mm.pid(), 0x2000_0000, b"x").expect("after fault");
}

#[test]
fn runs_of_distinct_protection_batch_separately() {
    let (mut host, mut mm) = setup();
    mm.mmap(&mut host, 0x2000_0000, 0x4000, RW, FIXED_ANON, None, 0)
        .expect("map");
    // Make page 1 read-only so the range has two protection runs.
    mm.mprotect(&mut host, 0x2000_1000, 0x1000, Prot::READ)
        .expect("carve");
    host.clear_protect_calls();

    mm.mprotect(&mut host, 0x2000_0000, 0x3000, RW).expect("mprotect");

    // Run [page0], run [page1] (write masked), run [page2].
    let calls = host.protect_calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].prot, HostProt::ReadWrite);
    assert_eq!(calls[1].prot, HostProt::ReadOnly);
    assert_eq!(calls[2].prot, HostProt::ReadWrite);
}
