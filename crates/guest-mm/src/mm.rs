//! Memory manager state and the bookkeeping that backs every operation.
//!
//! Linux `mmap` works on 4 KiB page boundaries while the host only
//! allocates on 64 KiB boundaries. Every operation here arbitrates
//! between the two: the per-page protection table is the source of
//! truth for what the guest may do, the per-block ledger tracks which
//! 64 KiB granules have a host section behind them and how many live
//! pages each contains.
//!
//! A block's section is created when its first page is mapped and closed
//! when the last page is unmapped: `section.is_some() == (page_count > 0)`
//! at every quiescent point.

use host_core::layout::{
    ADDRESS_ALLOCATION_HIGH, ADDRESS_ALLOCATION_LOW, ADDRESS_SPACE_HIGH, BLOCK_COUNT, PAGE_COUNT,
    align_to_page, block_of, page_of,
};
use host_core::{HostProt, ProcessId, SectionHandle, SectionHost};
use linux_abi::{MapFlags, Prot};
use tracing::debug;

use crate::MmError;
use crate::map::MapArena;

/// Derive host protection from the stored guest protection.
#[must_use]
pub fn host_prot(prot: Prot) -> HostProt {
    let (r, w, x) = (
        prot.contains(Prot::READ),
        prot.contains(Prot::WRITE),
        prot.contains(Prot::EXEC),
    );
    if x && w {
        HostProt::ExecuteReadWrite
    } else if x && r {
        HostProt::ExecuteRead
    } else if x {
        HostProt::Execute
    } else if w {
        HostProt::ReadWrite
    } else if r {
        HostProt::ReadOnly
    } else {
        HostProt::NoAccess
    }
}

/// A mapped range as reported by [`Mm::ranges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRange {
    pub start_page: u32,
    pub end_page: u32,
    pub file_backed: bool,
    pub offset_pages: u32,
}

/// Per-process memory manager.
#[derive(Clone)]
pub struct Mm {
    pub(crate) pid: ProcessId,
    pub(crate) brk: u32,
    pub(crate) map: MapArena,
    /// Section handle per 64 KiB block, if any.
    pub(crate) sections: Box<[Option<SectionHandle>]>,
    /// Live 4 KiB pages per block.
    pub(crate) page_count: Box<[u8]>,
    /// Stored guest protection bits per page. Zero means unmapped.
    pub(crate) page_prot: Box<[u8]>,
}

impl Mm {
    /// Fresh manager for `pid` with nothing mapped.
    #[must_use]
    pub fn new(pid: ProcessId) -> Self {
        Self {
            pid,
            brk: 0,
            map: MapArena::new(),
            sections: vec![None; BLOCK_COUNT].into_boxed_slice(),
            page_count: vec![0u8; BLOCK_COUNT].into_boxed_slice(),
            page_prot: vec![0u8; PAGE_COUNT].into_boxed_slice(),
        }
    }

    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Current program break.
    #[must_use]
    pub const fn brk(&self) -> u32 {
        self.brk
    }

    /// Raise the break to at least `addr`. Used by the loader; never
    /// lowers the break.
    pub fn update_brk(&mut self, addr: u32) {
        self.brk = self.brk.max(addr);
    }

    /// Stored guest protection of `page`.
    #[must_use]
    pub fn page_prot(&self, page: u32) -> Prot {
        Prot::from_bits_truncate(self.page_prot[page as usize])
    }

    /// Section handle of `block`, if one exists.
    #[must_use]
    pub fn block_section(&self, block: u32) -> Option<SectionHandle> {
        self.sections[block as usize]
    }

    /// Live page count of `block`.
    #[must_use]
    pub fn block_page_count(&self, block: u32) -> u8 {
        self.page_count[block as usize]
    }

    /// Snapshot of the map list, in list order.
    #[must_use]
    pub fn ranges(&self) -> Vec<MapRange> {
        let mut out = Vec::new();
        let mut cursor = self.map.head;
        while let Some(idx) = cursor {
            let e = self.map.get(idx);
            out.push(MapRange {
                start_page: e.start_page,
                end_page: e.end_page,
                file_backed: e.file.is_some(),
                offset_pages: e.offset_pages,
            });
            cursor = e.next;
        }
        out
    }

    /// Find `count` consecutive free pages inside `[low, high)`.
    pub(crate) fn find_free_pages_in(&self, count: u32, low: u32, high: u32) -> Option<u32> {
        let mut last = page_of(low);
        let mut cursor = self.map.head;
        while let Some(idx) = cursor {
            let e = self.map.get(idx);
            if e.start_page >= page_of(low) {
                if e.start_page - last >= count {
                    return Some(last);
                }
                last = e.end_page + 1;
            }
            cursor = e.next;
        }
        (page_of(high) - last >= count).then_some(last)
    }

    /// Find a free range of `len_bytes` (rounded up to pages) in the main
    /// allocation window. Returns the first page.
    #[must_use]
    pub fn find_free_pages(&self, len_bytes: u32) -> Option<u32> {
        self.find_free_pages_in(
            page_of(align_to_page(len_bytes)),
            ADDRESS_ALLOCATION_LOW,
            ADDRESS_ALLOCATION_HIGH,
        )
    }

    /// Release all user-window memory: sections in the allocation window
    /// are closed and map entries wholly inside it are removed.
    /// Kernel-window mappings survive, which is what lets the process
    /// image be rebuilt after exec.
    pub fn reset<H: SectionHost>(&mut self, host: &mut H) {
        for block in block_of(ADDRESS_ALLOCATION_LOW)..block_of(ADDRESS_ALLOCATION_HIGH) {
            if let Some(handle) = self.sections[block as usize] {
                let _ = host.unmap_view(self.pid, block);
                let _ = host.close_handle(self.pid, handle);
                self.sections[block as usize] = None;
                self.page_count[block as usize] = 0;
            }
        }
        let low = page_of(ADDRESS_ALLOCATION_LOW);
        let high = page_of(ADDRESS_ALLOCATION_HIGH);
        let mut pred: Option<u32> = None;
        let mut cursor = self.map.head;
        while let Some(idx) = cursor {
            let e = self.map.get(idx);
            let next = e.next;
            if e.start_page >= low && e.end_page < high {
                for page in e.start_page..=e.end_page {
                    self.page_prot[page as usize] = 0;
                }
                match pred {
                    None => self.map.head = next,
                    Some(p) => self.map.get_mut(p).next = next,
                }
                self.map.free(idx);
            } else {
                pred = Some(idx);
            }
            cursor = next;
        }
    }

    /// Release every section unconditionally. The manager is unusable
    /// afterwards.
    pub fn shutdown<H: SectionHost>(&mut self, host: &mut H) {
        for block in 0..BLOCK_COUNT as u32 {
            if let Some(handle) = self.sections[block as usize].take() {
                let _ = host.unmap_view(self.pid, block);
                let _ = host.close_handle(self.pid, handle);
            }
        }
    }

    /// Move the break to `addr`, mapping the growth as fixed anonymous
    /// read-write-execute pages. Shrinking performs no host action; the
    /// break never decreases. Returns the (possibly unchanged) break —
    /// a failed growth leaves the break where it was, as `brk(2)` does.
    pub fn brk_to<H: SectionHost>(&mut self, host: &mut H, addr: u32) -> u32 {
        debug!("brk({addr:#x}), current {:#x}", self.brk);
        let cur = align_to_page(self.brk);
        let new = align_to_page(addr);
        if new > self.brk {
            if new > cur {
                let grown = self.mmap(
                    host,
                    cur,
                    new - cur,
                    Prot::READ | Prot::WRITE | Prot::EXEC,
                    MapFlags::FIXED | MapFlags::ANONYMOUS | MapFlags::PRIVATE,
                    None,
                    0,
                );
                if let Err(err) = grown {
                    debug!("enlarging brk failed: {err}");
                    return self.brk;
                }
            }
            self.brk = new;
        }
        self.brk
    }

    /// Range check shared by the mapping operations: the byte range must
    /// sit inside the user address space and must not wrap.
    pub(crate) fn check_range(addr: u32, length: u32) -> Result<(), MmError> {
        let end = u64::from(addr) + u64::from(length);
        if addr >= ADDRESS_SPACE_HIGH || end >= u64::from(ADDRESS_SPACE_HIGH) {
            return Err(MmError::InvalidArgument);
        }
        Ok(())
    }

    /// Debug dump of this process's host-side virtual map.
    pub fn dump<H: SectionHost>(&self, host: &H) {
        host.dump_virtual_map(self.pid);
    }
}
