//! Fork hand-off and write-fault copy-on-write.
//!
//! The host has no native copy-on-write, but sections can be mapped into
//! several processes. Fork therefore shares every live section with the
//! child and strips the host write bit from every mapped page on both
//! sides. The first write on either side faults; the fault handler asks
//! how many handles the block's section has:
//!
//! - one: this side already owns the block exclusively — restore the
//!   stored protection and retry;
//! - more: clone the block into a fresh section, remap, then restore.
//!
//! The 64 KiB block is the copy-on-write unit. Per-page sections would
//! be finer but would need sixteen times the handles.

use host_core::layout::{
    ADDRESS_SPACE_HIGH, BLOCK_COUNT, BLOCK_SIZE, PAGES_PER_BLOCK, block_address, block_of,
    first_page_of_block, page_of,
};
use host_core::{ProcessId, SectionHandle, SectionHost};
use linux_abi::Prot;
use tracing::debug;

use crate::MmError;
use crate::mm::{Mm, host_prot};

impl Mm {
    /// Duplicate this manager into `child`: copy the bookkeeping, map
    /// every live section into the child at the same address, and
    /// write-protect every mapped page in both processes. The stored
    /// guest protection is left untouched.
    pub fn fork<H: SectionHost>(
        &mut self,
        host: &mut H,
        child: ProcessId,
    ) -> Result<Mm, MmError> {
        let mut child_mm = self.clone();
        child_mm.pid = child;

        for block in 0..BLOCK_COUNT as u32 {
            if let Some(handle) = self.sections[block as usize] {
                host.map_view(handle, child, block).map_err(|err| {
                    debug!("fork: mapping block {block:#x} into child failed: {err}");
                    host.dump_virtual_map(child);
                    MmError::OutOfMemory
                })?;
            }
        }

        let mut cursor = self.map.head;
        while let Some(idx) = cursor {
            let (start, end, next) = {
                let e = self.map.get(idx);
                (e.start_page, e.end_page, e.next)
            };
            for page in start..=end {
                let stored = Prot::from_bits_truncate(self.page_prot[page as usize]);
                let hp = host_prot(stored - Prot::WRITE);
                host.protect(child, page, 1, hp)
                    .map_err(|_| MmError::OutOfMemory)?;
                host.protect(self.pid, page, 1, hp)
                    .map_err(|_| MmError::OutOfMemory)?;
            }
            cursor = next;
        }
        Ok(child_mm)
    }

    /// Try to absorb a write fault at `addr`.
    ///
    /// Returns `false` if the fault is genuine: outside user space, on a
    /// page the guest may not write, or on a block with no section.
    pub fn handle_page_fault<H: SectionHost>(&mut self, host: &mut H, addr: u32) -> bool {
        debug!("page fault at {addr:#x} (page {:#x})", page_of(addr));
        if addr >= ADDRESS_SPACE_HIGH {
            debug!("{addr:#x} outside user address space");
            return false;
        }
        let page = page_of(addr);
        if !Prot::from_bits_truncate(self.page_prot[page as usize]).contains(Prot::WRITE) {
            debug!("page {page:#x} not logically writable");
            return false;
        }
        let block = block_of(addr);
        let Some(handle) = self.sections[block as usize] else {
            debug!("block {block:#x} has no section");
            return false;
        };

        let count = match host.handle_count(handle) {
            Ok(count) => count,
            Err(err) => {
                debug!("querying section of block {block:#x} failed: {err}");
                return false;
            }
        };
        if count == 1 {
            debug!("sole owner of block {block:#x}, restoring protection");
        } else {
            debug!("block {block:#x} shared by {count} handles, cloning");
            if !self.clone_block(host, block, handle) {
                return false;
            }
        }

        // Exclusive owner now; put the stored protection back on the
        // whole block.
        let first = first_page_of_block(block);
        for page in first..first + PAGES_PER_BLOCK {
            let stored = Prot::from_bits_truncate(self.page_prot[page as usize]);
            if host.protect(self.pid, page, 1, host_prot(stored)).is_err() {
                debug!("restoring protection on page {page:#x} failed");
                return false;
            }
        }
        true
    }

    /// Replace `block`'s shared section with a private copy.
    fn clone_block<H: SectionHost>(
        &mut self,
        host: &mut H,
        block: u32,
        old: SectionHandle,
    ) -> bool {
        let addr = block_address(block);
        let mut contents = vec![0u8; BLOCK_SIZE as usize];
        if host.read_process(self.pid, addr, &mut contents).is_err() {
            debug!("reading block {block:#x} for clone failed");
            return false;
        }
        let Ok(new) = host.create_section(self.pid) else {
            debug!("creating clone section for block {block:#x} failed");
            return false;
        };
        if host.unmap_view(self.pid, block).is_err() {
            debug!("unmapping shared view of block {block:#x} failed");
            return false;
        }
        let _ = host.close_handle(self.pid, old);
        if host.map_view(new, self.pid, block).is_err() {
            debug!("remapping clone of block {block:#x} failed");
            return false;
        }
        if host.write_process(self.pid, addr, &contents).is_err() {
            debug!("copying contents into clone of block {block:#x} failed");
            return false;
        }
        self.sections[block as usize] = Some(new);
        true
    }
}
