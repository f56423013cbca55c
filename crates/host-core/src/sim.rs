//! In-memory host: sections, processes, protection, faults.
//!
//! `SimHost` gives the memory manager a complete host to run against in
//! tests. Sections are 64 KiB byte vectors with a global handle count;
//! processes are view tables plus per-page host protection. Guest loads
//! and stores go through [`SimHost::guest_read`]/[`SimHost::guest_write`],
//! which enforce host protection and report a fault instead of trapping —
//! the test then feeds the fault to the memory manager exactly the way
//! the real exception handler would.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::layout::{
    BLOCK_SIZE, PAGES_PER_BLOCK, block_address, block_of, block_of_page, first_page_of_block,
    page_address, page_of,
};
use crate::{HostError, HostProt, ProcessId, SectionHandle, SectionHost};

/// A guest access that host protection refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestFault {
    /// Faulting address.
    pub addr: u32,
}

/// One `protect` call as issued by the memory manager. Recorded so tests
/// can assert on batching behavior (host calls never cross a block).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectCall {
    pub pid: ProcessId,
    pub first_page: u32,
    pub pages: u32,
    pub prot: HostProt,
}

struct SectionSlot {
    /// Block contents; `None` once the last handle closed.
    data: Option<Vec<u8>>,
    handles: u32,
}

struct Proc {
    /// block index -> section slot index
    views: BTreeMap<u32, u32>,
    /// page index -> host protection, for pages inside mapped views
    page_prot: BTreeMap<u32, HostProt>,
    /// section slot indices this process holds a handle to
    handles: BTreeSet<u32>,
}

impl Proc {
    fn new() -> Self {
        Self {
            views: BTreeMap::new(),
            page_prot: BTreeMap::new(),
            handles: BTreeSet::new(),
        }
    }
}

/// The simulated host.
pub struct SimHost {
    sections: Vec<SectionSlot>,
    processes: Vec<Proc>,
    /// Remaining successful section creations before injected failure.
    fail_creates_after: Option<u32>,
    protect_log: Vec<ProtectCall>,
}

impl SimHost {
    /// Create the host with one initial process (id 0).
    #[must_use]
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
            processes: vec![Proc::new()],
            fail_creates_after: None,
            protect_log: Vec::new(),
        }
    }

    /// The initial process.
    #[must_use]
    pub const fn root_process() -> ProcessId {
        ProcessId(0)
    }

    /// Spawn a child of `parent`. The child starts with no views but
    /// inherits a handle to every section the parent holds, which is how
    /// section handle counts climb across fork.
    pub fn spawn_child(&mut self, parent: ProcessId) -> ProcessId {
        let inherited = self.processes[parent.0 as usize].handles.clone();
        for &idx in &inherited {
            self.sections[idx as usize].handles += 1;
        }
        let mut child = Proc::new();
        child.handles = inherited;
        self.processes.push(child);
        ProcessId(self.processes.len() as u32 - 1)
    }

    /// Make the next `successes` section creations succeed, then fail.
    pub fn fail_section_creates_after(&mut self, successes: u32) {
        self.fail_creates_after = Some(successes);
    }

    /// Protection calls issued so far.
    #[must_use]
    pub fn protect_calls(&self) -> &[ProtectCall] {
        &self.protect_log
    }

    pub fn clear_protect_calls(&mut self) {
        self.protect_log.clear();
    }

    /// Guest load: fails with the faulting address if any touched page is
    /// unmapped or no-access.
    pub fn guest_read(&self, pid: ProcessId, addr: u32, len: u32) -> Result<Vec<u8>, GuestFault> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let proc = &self.processes[pid.0 as usize];
        let mut page = page_of(addr);
        while page <= page_of(addr + len - 1) {
            if !proc.page_prot.get(&page).is_some_and(|p| p.allows_read()) {
                return Err(GuestFault {
                    addr: page_address(page).max(addr),
                });
            }
            page += 1;
        }
        let mut buf = vec![0u8; len as usize];
        self.read_process(pid, addr, &mut buf)
            .map_err(|_| GuestFault { addr })?;
        Ok(buf)
    }

    /// Guest store: fails with the faulting address if any touched page
    /// is not host-writable.
    pub fn guest_write(
        &mut self,
        pid: ProcessId,
        addr: u32,
        bytes: &[u8],
    ) -> Result<(), GuestFault> {
        if bytes.is_empty() {
            return Ok(());
        }
        let proc = &self.processes[pid.0 as usize];
        let mut page = page_of(addr);
        while page <= page_of(addr + bytes.len() as u32 - 1) {
            if !proc.page_prot.get(&page).is_some_and(|p| p.allows_write()) {
                return Err(GuestFault {
                    addr: page_address(page).max(addr),
                });
            }
            page += 1;
        }
        self.write_process(pid, addr, bytes)
            .map_err(|_| GuestFault { addr })
    }

    fn slot(&self, handle: SectionHandle) -> Result<&SectionSlot, HostError> {
        self.sections
            .get(handle.0 as usize)
            .filter(|s| s.data.is_some())
            .ok_or(HostError::BadHandle)
    }

    fn proc(&self, pid: ProcessId) -> Result<&Proc, HostError> {
        self.processes
            .get(pid.0 as usize)
            .ok_or(HostError::BadProcess)
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionHost for SimHost {
    fn create_section(&mut self, pid: ProcessId) -> Result<SectionHandle, HostError> {
        self.proc(pid)?;
        if let Some(remaining) = self.fail_creates_after {
            if remaining == 0 {
                return Err(HostError::SectionCreate);
            }
            self.fail_creates_after = Some(remaining - 1);
        }
        let idx = self.sections.len() as u32;
        self.sections.push(SectionSlot {
            data: Some(vec![0u8; BLOCK_SIZE as usize]),
            handles: 1,
        });
        self.processes[pid.0 as usize].handles.insert(idx);
        Ok(SectionHandle(idx))
    }

    fn map_view(
        &mut self,
        handle: SectionHandle,
        pid: ProcessId,
        block: u32,
    ) -> Result<(), HostError> {
        self.slot(handle)?;
        let proc = self
            .processes
            .get_mut(pid.0 as usize)
            .ok_or(HostError::BadProcess)?;
        if proc.views.contains_key(&block) {
            return Err(HostError::ViewOverlap(block));
        }
        proc.views.insert(block, handle.0);
        let first = first_page_of_block(block);
        for page in first..first + PAGES_PER_BLOCK {
            proc.page_prot.insert(page, HostProt::ExecuteReadWrite);
        }
        Ok(())
    }

    fn unmap_view(&mut self, pid: ProcessId, block: u32) -> Result<(), HostError> {
        let proc = self
            .processes
            .get_mut(pid.0 as usize)
            .ok_or(HostError::BadProcess)?;
        proc.views.remove(&block).ok_or(HostError::NoView(block))?;
        let first = first_page_of_block(block);
        for page in first..first + PAGES_PER_BLOCK {
            proc.page_prot.remove(&page);
        }
        Ok(())
    }

    fn close_handle(&mut self, pid: ProcessId, handle: SectionHandle) -> Result<(), HostError> {
        let proc = self
            .processes
            .get_mut(pid.0 as usize)
            .ok_or(HostError::BadProcess)?;
        if !proc.handles.remove(&handle.0) {
            return Err(HostError::BadHandle);
        }
        let slot = self
            .sections
            .get_mut(handle.0 as usize)
            .ok_or(HostError::BadHandle)?;
        slot.handles -= 1;
        if slot.handles == 0 {
            slot.data = None;
        }
        Ok(())
    }

    fn handle_count(&self, handle: SectionHandle) -> Result<u32, HostError> {
        Ok(self.slot(handle)?.handles)
    }

    fn protect(
        &mut self,
        pid: ProcessId,
        first_page: u32,
        pages: u32,
        prot: HostProt,
    ) -> Result<(), HostError> {
        self.proc(pid)?;
        for page in first_page..first_page + pages {
            if !self.processes[pid.0 as usize]
                .views
                .contains_key(&block_of_page(page))
            {
                return Err(HostError::ProtectFailed(page));
            }
        }
        let proc = &mut self.processes[pid.0 as usize];
        for page in first_page..first_page + pages {
            proc.page_prot.insert(page, prot);
        }
        self.protect_log.push(ProtectCall {
            pid,
            first_page,
            pages,
            prot,
        });
        Ok(())
    }

    fn read_process(&self, pid: ProcessId, addr: u32, buf: &mut [u8]) -> Result<(), HostError> {
        let proc = self.proc(pid)?;
        let mut addr = addr;
        let mut done = 0usize;
        while done < buf.len() {
            let block = block_of(addr);
            let slot = *proc.views.get(&block).ok_or(HostError::NoView(block))?;
            let data = self.sections[slot as usize]
                .data
                .as_ref()
                .ok_or(HostError::BadHandle)?;
            let off = (addr - block_address(block)) as usize;
            let n = (BLOCK_SIZE as usize - off).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&data[off..off + n]);
            done += n;
            addr += n as u32;
        }
        Ok(())
    }

    fn write_process(&mut self, pid: ProcessId, addr: u32, bytes: &[u8]) -> Result<(), HostError> {
        self.proc(pid)?;
        let mut addr = addr;
        let mut done = 0usize;
        while done < bytes.len() {
            let block = block_of(addr);
            let slot = *self.processes[pid.0 as usize]
                .views
                .get(&block)
                .ok_or(HostError::NoView(block))?;
            let data = self.sections[slot as usize]
                .data
                .as_mut()
                .ok_or(HostError::BadHandle)?;
            let off = (addr - block_address(block)) as usize;
            let n = (BLOCK_SIZE as usize - off).min(bytes.len() - done);
            data[off..off + n].copy_from_slice(&bytes[done..done + n]);
            done += n;
            addr += n as u32;
        }
        Ok(())
    }

    fn dump_virtual_map(&self, pid: ProcessId) {
        let Ok(proc) = self.proc(pid) else { return };
        for (&block, &slot) in &proc.views {
            debug!(
                "{:#010x} - {:#010x} <- section {}",
                block_address(block),
                block_address(block) + BLOCK_SIZE,
                slot,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: u32 = 0x2000;

    #[test]
    fn section_lifecycle_and_handle_counts() {
        let mut host = SimHost::new();
        let root = SimHost::root_process();
        let h = host.create_section(root).expect("create");
        assert_eq!(host.handle_count(h).expect("count"), 1);

        let child = host.spawn_child(root);
        assert_eq!(host.handle_count(h).expect("count"), 2);

        host.close_handle(root, h).expect("close parent");
        assert_eq!(host.handle_count(h).expect("count"), 1);
        host.close_handle(child, h).expect("close child");
        assert_eq!(host.handle_count(h), Err(HostError::BadHandle));
    }

    #[test]
    fn views_share_section_contents() {
        let mut host = SimHost::new();
        let root = SimHost::root_process();
        let child = host.spawn_child(root);
        let h = host.create_section(root).expect("create");
        host.map_view(h, root, BLOCK).expect("map root");
        host.map_view(h, child, BLOCK).expect("map child");

        let addr = block_address(BLOCK) + 0x123;
        host.write_process(root, addr, b"shared").expect("write");
        let mut buf = [0u8; 6];
        host.read_process(child, addr, &mut buf).expect("read");
        assert_eq!(&buf, b"shared");
    }

    #[test]
    fn guest_write_respects_protection() {
        let mut host = SimHost::new();
        let root = SimHost::root_process();
        let h = host.create_section(root).expect("create");
        host.map_view(h, root, BLOCK).expect("map");

        let addr = block_address(BLOCK);
        host.guest_write(root, addr, b"x").expect("fresh view is writable");

        host.protect(root, first_page_of_block(BLOCK), 1, HostProt::ReadOnly)
            .expect("protect");
        let fault = host.guest_write(root, addr, b"y").expect_err("must fault");
        assert_eq!(fault.addr, addr);
        // The read side still works and sees the first write.
        assert_eq!(host.guest_read(root, addr, 1).expect("read"), b"x");
    }

    #[test]
    fn injected_section_failures() {
        let mut host = SimHost::new();
        let root = SimHost::root_process();
        host.fail_section_creates_after(1);
        assert!(host.create_section(root).is_ok());
        assert_eq!(host.create_section(root), Err(HostError::SectionCreate));
    }

    #[test]
    fn cross_block_process_access() {
        let mut host = SimHost::new();
        let root = SimHost::root_process();
        let a = host.create_section(root).expect("create");
        let b = host.create_section(root).expect("create");
        host.map_view(a, root, BLOCK).expect("map");
        host.map_view(b, root, BLOCK + 1).expect("map");

        let addr = block_address(BLOCK) + BLOCK_SIZE - 2;
        host.write_process(root, addr, b"span").expect("write");
        let mut buf = [0u8; 4];
        host.read_process(root, addr, &mut buf).expect("read");
        assert_eq!(&buf, b"span");
    }
}
