//! `mmap`, `munmap` and `mprotect`.

use std::rc::Rc;

use host_core::layout::{
    ADDRESS_ALLOCATION_HIGH, ADDRESS_ALLOCATION_LOW, HEAP_BASE, PAGE_SIZE, PAGES_PER_BLOCK,
    align_to_page, block_of, block_of_page, first_page_of_block, is_page_aligned, page_address,
    page_of,
};
use host_core::{MapFile, SectionHost};
use linux_abi::{MapFlags, Prot};
use tracing::debug;

use crate::MmError;
use crate::mm::{Mm, host_prot};

impl Mm {
    /// Map `length` bytes at `addr` (or wherever a free range is found).
    ///
    /// File-backed mappings are populated eagerly through the file's
    /// positional read; the host cannot map files at 4 KiB granularity,
    /// so the pages are internally granted write permission for the
    /// population and keep it (the requested protection is still what
    /// `mprotect` reasons about).
    pub fn mmap<H: SectionHost>(
        &mut self,
        host: &mut H,
        addr: u32,
        length: u32,
        prot: Prot,
        flags: MapFlags,
        file: Option<Rc<dyn MapFile>>,
        offset_pages: u32,
    ) -> Result<u32, MmError> {
        if length == 0 {
            return Err(MmError::InvalidArgument);
        }
        let length = align_to_page(length);
        if length == 0 {
            // Rounding wrapped: the request covered the top of the
            // address space.
            return Err(MmError::InvalidArgument);
        }
        Self::check_range(addr, length)?;
        if flags.contains(MapFlags::SHARED) {
            debug!("MAP_SHARED is not supported");
            return Err(MmError::InvalidArgument);
        }
        if flags.contains(MapFlags::ANONYMOUS) && file.is_some() {
            debug!("MAP_ANONYMOUS with a file");
            return Err(MmError::InvalidArgument);
        }
        if !flags.contains(MapFlags::ANONYMOUS) && file.is_none() {
            debug!("file mapping without a file");
            return Err(MmError::BadFile);
        }

        let addr = if flags.contains(MapFlags::FIXED) {
            if !is_page_aligned(addr) {
                debug!("MAP_FIXED with unaligned address {addr:#x}");
                return Err(MmError::InvalidArgument);
            }
            addr
        } else {
            let pages = page_of(length);
            let found = if flags.contains(MapFlags::HEAP) {
                self.find_free_pages_in(pages, HEAP_BASE, ADDRESS_ALLOCATION_LOW)
            } else {
                self.find_free_pages_in(pages, ADDRESS_ALLOCATION_LOW, ADDRESS_ALLOCATION_HIGH)
            };
            let Some(first_page) = found else {
                debug!("no free range of {pages} pages");
                return Err(MmError::OutOfMemory);
            };
            page_address(first_page)
        };

        let start_page = page_of(addr);
        let end_page = page_of(addr + length - 1);
        let start_block = block_of(addr);
        let end_block = block_of(addr + length - 1);

        // A fixed mapping evicts whatever it overlaps; a found range is
        // free by construction.
        if flags.contains(MapFlags::FIXED) {
            self.munmap(host, addr, length)?;
        }

        let mut prot = prot;
        if !flags.contains(MapFlags::ANONYMOUS) {
            prot |= Prot::WRITE;
        }

        // Create sections for blocks that have none yet, rolling back
        // this call's creations if one fails.
        for block in start_block..=end_block {
            if self.page_count[block as usize] != 0 {
                continue;
            }
            let handle = match host.create_section(self.pid) {
                Ok(handle) => handle,
                Err(err) => {
                    debug!("creating section for block {block:#x} failed: {err}");
                    self.rollback_sections(host, start_block, block);
                    return Err(MmError::OutOfMemory);
                }
            };
            if let Err(err) = host.map_view(handle, self.pid, block) {
                debug!("mapping section at block {block:#x} failed: {err}");
                host.dump_virtual_map(self.pid);
                let _ = host.close_handle(self.pid, handle);
                self.rollback_sections(host, start_block, block);
                return Err(MmError::OutOfMemory);
            }
            self.sections[block as usize] = Some(handle);
        }

        let idx = self.map.alloc().ok_or(MmError::OutOfMemory)?;
        {
            let e = self.map.get_mut(idx);
            e.start_page = start_page;
            e.end_page = end_page;
            e.file = file.clone();
            e.offset_pages = offset_pages;
        }

        self.insert_ordered(idx, end_page);

        if let Some(file) = file {
            let mut buf = vec![0u8; ((end_page - start_page + 1) * PAGE_SIZE) as usize];
            file.pread(&mut buf, u64::from(offset_pages) * u64::from(PAGE_SIZE));
            host.write_process(self.pid, page_address(start_page), &buf)
                .map_err(|_| MmError::OutOfMemory)?;
        }

        for page in start_page..=end_page {
            self.page_prot[page as usize] = prot.bits();
            self.page_count[block_of_page(page) as usize] += 1;
            host.protect(self.pid, page, 1, host_prot(prot))
                .map_err(|_| MmError::OutOfMemory)?;
        }
        debug!("mapped {length:#x} bytes at {addr:#x}");
        Ok(addr)
    }

    /// Undo the sections this call created in `[start_block, failed_block)`.
    /// Blocks that already carried pages are left alone.
    fn rollback_sections<H: SectionHost>(&mut self, host: &mut H, start_block: u32, failed_block: u32) {
        for block in start_block..failed_block {
            if self.page_count[block as usize] == 0 {
                if let Some(handle) = self.sections[block as usize].take() {
                    let _ = host.unmap_view(self.pid, block);
                    let _ = host.close_handle(self.pid, handle);
                }
            }
        }
    }

    /// Link the freshly filled entry `idx` into the ordered list.
    fn insert_ordered(&mut self, idx: u32, end_page: u32) {
        match self.map.head {
            None => self.map.head = Some(idx),
            Some(head) if self.map.get(head).start_page > end_page => {
                self.map.get_mut(idx).next = Some(head);
                self.map.head = Some(idx);
            }
            Some(head) => {
                let mut at = head;
                loop {
                    let next = self.map.get(at).next;
                    match next {
                        Some(n) if self.map.get(n).start_page <= end_page => at = n,
                        _ => {
                            self.map.get_mut(idx).next = next;
                            self.map.get_mut(at).next = Some(idx);
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Unmap `[addr, addr + length)`. Overlapping entries are split,
    /// trimmed or removed; blocks whose last page goes away lose their
    /// section.
    pub fn munmap<H: SectionHost>(
        &mut self,
        host: &mut H,
        addr: u32,
        length: u32,
    ) -> Result<(), MmError> {
        if !is_page_aligned(addr) || length == 0 {
            return Err(MmError::InvalidArgument);
        }
        let length = align_to_page(length);
        if length == 0 {
            return Err(MmError::InvalidArgument);
        }
        Self::check_range(addr, length)?;

        let unmap_start = page_of(addr);
        let unmap_end = page_of(addr + length - 1);

        let mut pred: Option<u32> = None;
        let mut cursor = self.map.head;
        while let Some(idx) = cursor {
            let (e_start, e_end, file_backed, e_next) = {
                let e = self.map.get(idx);
                (e.start_page, e.end_page, e.file.is_some(), e.next)
            };
            if e_start > unmap_end {
                break;
            }
            if e_end < unmap_start {
                pred = Some(idx);
                cursor = e_next;
                continue;
            }

            let start = unmap_start.max(e_start);
            let end = unmap_end.min(e_end);

            if start > e_start && end < e_end {
                // Interior unmap: split into two entries.
                let tail = self.map.alloc().ok_or(MmError::OutOfMemory)?;
                let tail_file = self.map.get(idx).file.clone();
                {
                    let t = self.map.get_mut(tail);
                    t.start_page = end + 1;
                    t.end_page = e_end;
                    t.file = tail_file;
                    t.next = e_next;
                }
                if file_backed {
                    let base_offset = self.map.get(idx).offset_pages;
                    self.map.get_mut(tail).offset_pages = base_offset + (end + 1 - e_start);
                }
                let e = self.map.get_mut(idx);
                e.end_page = start - 1;
                e.next = Some(tail);
                pred = Some(idx);
                cursor = Some(tail);
            } else if start > e_start {
                self.map.get_mut(idx).end_page = start - 1;
                pred = Some(idx);
                cursor = e_next;
            } else if end < e_end {
                let e = self.map.get_mut(idx);
                if file_backed {
                    e.offset_pages += end + 1 - e_start;
                }
                e.start_page = end + 1;
                pred = Some(idx);
                cursor = e_next;
            } else {
                // Fully covered: unlink and release the file reference.
                match pred {
                    None => self.map.head = e_next,
                    Some(p) => self.map.get_mut(p).next = e_next,
                }
                self.map.free(idx);
                cursor = e_next;
            }

            for page in start..=end {
                self.page_prot[page as usize] = 0;
                self.page_count[block_of_page(page) as usize] -= 1;
            }
            for block in block_of_page(start)..=block_of_page(end) {
                if self.page_count[block as usize] == 0 {
                    if let Some(handle) = self.sections[block as usize].take() {
                        let _ = host.unmap_view(self.pid, block);
                        let _ = host.close_handle(self.pid, handle);
                    }
                }
            }
        }
        Ok(())
    }

    /// Change the stored protection of `[addr, addr + length)`.
    ///
    /// The whole range must be backed by contiguous map entries. Host
    /// calls are batched over runs of uniform stored protection but
    /// never cross a 64 KiB block boundary; when the stored protection
    /// lacks write, the requested write bit is masked out of the host
    /// call so the fork-fault path still sees the first genuine write.
    pub fn mprotect<H: SectionHost>(
        &mut self,
        host: &mut H,
        addr: u32,
        length: u32,
        prot: Prot,
    ) -> Result<(), MmError> {
        if !is_page_aligned(addr) || length == 0 {
            return Err(MmError::InvalidArgument);
        }
        let length = align_to_page(length);
        if length == 0 {
            return Err(MmError::InvalidArgument);
        }
        Self::check_range(addr, length)?;

        let start_page = page_of(addr);
        let end_page = page_of(addr + length - 1);

        // Coverage check: every page in the range must belong to some
        // entry, with no gaps between entries.
        let mut covered = start_page;
        let mut cursor = self.map.head;
        while let Some(idx) = cursor {
            let e = self.map.get(idx);
            if e.start_page > end_page {
                break;
            }
            if e.end_page >= covered {
                if e.start_page > covered {
                    break; // gap
                }
                covered = e.end_page + 1;
                if covered > end_page {
                    break;
                }
            }
            cursor = e.next;
        }
        if covered <= end_page {
            return Err(MmError::OutOfMemory);
        }

        // Apply per run of uniform stored protection.
        let mut run_start = start_page;
        for page in start_page..=end_page + 1 {
            if page != end_page + 1
                && self.page_prot[page as usize] == self.page_prot[run_start as usize]
            {
                continue;
            }
            let old = Prot::from_bits_truncate(self.page_prot[run_start as usize]);
            let effective = if old.contains(Prot::WRITE) {
                prot
            } else {
                prot - Prot::WRITE
            };
            let hp = host_prot(effective);
            let mut at = run_start;
            while at < page {
                let block_end = first_page_of_block(block_of_page(at)) + PAGES_PER_BLOCK;
                let upto = page.min(block_end);
                host.protect(self.pid, at, upto - at, hp)
                    .map_err(|_| MmError::OutOfMemory)?;
                at = upto;
            }
            run_start = page;
        }

        for page in start_page..=end_page {
            self.page_prot[page as usize] = prot.bits();
        }
        Ok(())
    }
}
