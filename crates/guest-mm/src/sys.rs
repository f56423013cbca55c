//! Linux syscall shims.
//!
//! Each shim takes the raw guest arguments, applies the Linux calling
//! convention, and returns either a value or a negated errno packed into
//! an `i32` — user addresses never reach the sign bit, so the packing is
//! unambiguous.

use host_core::layout::PAGE_SIZE;
use host_core::{FdTable, SectionHost};
use linux_abi::{EINVAL, MapFlags, OldMmapArgs, Prot};
use tracing::debug;

use crate::mm::Mm;

fn pack<E: Into<i32>>(result: Result<u32, E>) -> i32 {
    match result {
        Ok(value) => value as i32,
        Err(err) => -err.into(),
    }
}

impl From<crate::MmError> for i32 {
    fn from(err: crate::MmError) -> Self {
        err.errno()
    }
}

/// `mmap(addr, length, prot, flags, fd, offset)` with a byte offset.
pub fn sys_mmap<H: SectionHost, F: FdTable>(
    mm: &mut Mm,
    host: &mut H,
    fds: &F,
    addr: u32,
    length: u32,
    prot: u32,
    flags: u32,
    fd: i32,
    offset: u32,
) -> i32 {
    debug!("mmap({addr:#x}, {length:#x}, {prot:#x}, {flags:#x}, {fd}, {offset:#x})");
    if offset % PAGE_SIZE != 0 {
        return -EINVAL;
    }
    pack(mm.mmap(
        host,
        addr,
        length,
        Prot::from_bits_truncate(prot as u8),
        MapFlags::from_bits_truncate(flags),
        fds.get(fd),
        offset / PAGE_SIZE,
    ))
}

/// `mmap2`: identical to `mmap` but the offset is already in pages.
pub fn sys_mmap2<H: SectionHost, F: FdTable>(
    mm: &mut Mm,
    host: &mut H,
    fds: &F,
    addr: u32,
    length: u32,
    prot: u32,
    flags: u32,
    fd: i32,
    offset_pages: u32,
) -> i32 {
    debug!("mmap2({addr:#x}, {length:#x}, {prot:#x}, {flags:#x}, {fd}, {offset_pages:#x})");
    pack(mm.mmap(
        host,
        addr,
        length,
        Prot::from_bits_truncate(prot as u8),
        MapFlags::from_bits_truncate(flags),
        fds.get(fd),
        offset_pages,
    ))
}

/// The ancient single-argument `mmap`: all six arguments live in a
/// packed struct in guest memory.
pub fn sys_oldmmap<H: SectionHost, F: FdTable>(
    mm: &mut Mm,
    host: &mut H,
    fds: &F,
    args_addr: u32,
) -> i32 {
    debug!("oldmmap({args_addr:#x})");
    let mut raw = [0u8; OldMmapArgs::SIZE];
    if host.read_process(mm.pid(), args_addr, &mut raw).is_err() {
        return -EINVAL;
    }
    let args = OldMmapArgs::from_bytes(&raw);
    sys_mmap(
        mm,
        host,
        fds,
        args.addr,
        args.len,
        args.prot,
        args.flags,
        args.fd as i32,
        args.offset,
    )
}

/// `munmap(addr, length)`.
pub fn sys_munmap<H: SectionHost>(mm: &mut Mm, host: &mut H, addr: u32, length: u32) -> i32 {
    debug!("munmap({addr:#x}, {length:#x})");
    pack(mm.munmap(host, addr, length).map(|()| 0))
}

/// `mprotect(addr, length, prot)`.
pub fn sys_mprotect<H: SectionHost>(
    mm: &mut Mm,
    host: &mut H,
    addr: u32,
    length: u32,
    prot: u32,
) -> i32 {
    debug!("mprotect({addr:#x}, {length:#x}, {prot:#x})");
    pack(
        mm.mprotect(host, addr, length, Prot::from_bits_truncate(prot as u8))
            .map(|()| 0),
    )
}

/// `brk(addr)`: returns the (possibly unchanged) break. A failed growth
/// is reported by the break staying put, never by an errno.
pub fn sys_brk<H: SectionHost>(mm: &mut Mm, host: &mut H, addr: u32) -> i32 {
    mm.brk_to(host, addr) as i32
}

/// `msync`: accepted and ignored; private mappings have no write-back.
pub fn sys_msync(addr: u32, length: u32, flags: u32) -> i32 {
    debug!("msync({addr:#x}, {length:#x}, {flags:#x}) ignored");
    0
}

/// `mlock`: accepted and ignored; everything is resident.
pub fn sys_mlock(addr: u32, length: u32) -> i32 {
    debug!("mlock({addr:#x}, {length:#x}) ignored");
    0
}

/// `munlock`: accepted and ignored.
pub fn sys_munlock(addr: u32, length: u32) -> i32 {
    debug!("munlock({addr:#x}, {length:#x}) ignored");
    0
}
