//! Fork sharing and block-granular copy-on-write.

mod common;

use common::{FIXED_ANON, RW, setup, trace_init};
use host_core::SectionHost;
use linux_abi::Prot;

const ADDR: u32 = 0x2000_0000;

#[test]
fn s5_fork_then_write_isolates_both_sides() {
    trace_init();
    let (mut host, mut parent) = setup();
    parent
        .mmap(&mut host, ADDR, 0x1000, RW, FIXED_ANON, None, 0)
        .expect("map");
    host.guest_write(parent.pid(), ADDR, b"A").expect("pre-fork write");

    let child_pid = host.spawn_child(parent.pid());
    let mut child = parent.fork(&mut host, child_pid).expect("fork");
    assert_eq!(child.pid(), child_pid);

    // Both sides lost host write access; the stored protection is intact.
    assert_eq!(parent.page_prot(ADDR >> 12), RW);
    host.guest_write(parent.pid(), ADDR, b"B").expect_err("parent protected");
    host.guest_write(child_pid, ADDR, b"B").expect_err("child protected");

    // Parent writes first: two handles on the section, so the block is
    // cloned into a private section.
    let shared = parent.block_section(0x2000).expect("shared section");
    let fault = host.guest_write(parent.pid(), ADDR, b"B").expect_err("faults");
    assert!(parent.handle_page_fault(&mut host, fault.addr));
    host.guest_write(parent.pid(), ADDR, b"B").expect("parent write");

    let private = parent.block_section(0x2000).expect("cloned section");
    assert_ne!(private, shared, "parent switched to a fresh section");
    assert_eq!(host.handle_count(private).expect("count"), 1);

    // The child still sees the pre-fork contents.
    assert_eq!(host.guest_read(child_pid, ADDR, 1).expect("read"), b"A");
    assert_eq!(host.guest_read(parent.pid(), ADDR, 1).expect("read"), b"B");

    // Child writes next: it is the sole owner of the old section now, so
    // no copy happens — just a protection restore.
    let fault = host.guest_write(child_pid, ADDR, b"C").expect_err("faults");
    assert_eq!(host.handle_count(shared).expect("count"), 1);
    assert!(child.handle_page_fault(&mut host, fault.addr));
    host.guest_write(child_pid, ADDR, b"C").expect("child write");

    assert_eq!(child.block_section(0x2000), Some(shared));
    assert_eq!(host.guest_read(parent.pid(), ADDR, 1).expect("read"), b"B");
    assert_eq!(host.guest_read(child_pid, ADDR, 1).expect("read"), b"C");
}

#[test]
fn fault_restores_the_whole_block() {
    let (mut host, mut parent) = setup();
    // Two pages in the same block.
    parent
        .mmap(&mut host, ADDR, 0x2000, RW, FIXED_ANON, None, 0)
        .expect("map");

    let child_pid = host.spawn_child(parent.pid());
    parent.fork(&mut host, child_pid).expect("fork");

    let fault = host.guest_write(parent.pid(), ADDR, b"x").expect_err("faults");
    assert!(parent.handle_page_fault(&mut host, fault.addr));

    // Copy-on-write works per 64 KiB block: the second page came back
    // writable with the same fault.
    host.guest_write(parent.pid(), ADDR + 0x1000, b"y")
        .expect("same block, no second fault");
}

#[test]
fn genuine_faults_are_rejected() {
    let (mut host, mut mm) = setup();
    mm.mmap(&mut host, ADDR, 0x1000, Prot::READ, FIXED_ANON, None, 0)
        .expect("map");

    assert!(
        !mm.handle_page_fault(&mut host, 0x9000_0000),
        "outside the user address space"
    );
    assert!(
        !mm.handle_page_fault(&mut host, ADDR),
        "page is not logically writable"
    );
    assert!(
        !mm.handle_page_fault(&mut host, 0x3000_0000),
        "nothing mapped at the address"
    );
}

#[test]
fn fork_write_protects_every_mapped_page() {
    let (mut host, mut parent) = setup();
    parent
        .mmap(&mut host, ADDR, 0x1000, RW, FIXED_ANON, None, 0)
        .expect("low");
    parent
        .mmap(&mut host, ADDR + 0x10_0000, 0x1000, RW, FIXED_ANON, None, 0)
        .expect("high");

    let child_pid = host.spawn_child(parent.pid());
    parent.fork(&mut host, child_pid).expect("fork");

    for addr in [ADDR, ADDR + 0x10_0000] {
        host.guest_write(parent.pid(), addr, b"p").expect_err("parent");
        host.guest_write(child_pid, addr, b"c").expect_err("child");
        // Reads still work on both sides.
        host.guest_read(parent.pid(), addr, 1).expect("parent read");
        host.guest_read(child_pid, addr, 1).expect("child read");
    }
}
