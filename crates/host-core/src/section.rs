//! Section objects, page protection and process memory.
//!
//! A *section* is a host-kernel memory object of one 64 KiB block that can
//! be mapped into several processes at the same virtual address; it is the
//! substrate for fork sharing. Handles are inheritable: spawning a child
//! process gives it a handle to every section its parent holds, which is
//! what makes the outstanding-handle count the copy-on-write discriminator.

use crate::HostError;

/// Identifies a process on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

/// Handle to a section object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionHandle(pub u32);

/// Host-side page protection, derived from the guest's stored protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostProt {
    NoAccess,
    ReadOnly,
    ReadWrite,
    Execute,
    ExecuteRead,
    ExecuteReadWrite,
}

impl HostProt {
    /// Whether guest stores are allowed under this protection.
    #[must_use]
    pub const fn allows_write(self) -> bool {
        matches!(self, Self::ReadWrite | Self::ExecuteReadWrite)
    }

    /// Whether guest loads are allowed under this protection.
    #[must_use]
    pub const fn allows_read(self) -> bool {
        !matches!(self, Self::NoAccess)
    }
}

/// Host memory primitives the memory manager is built on.
///
/// Mirrors the NT section API surface: create/map/unmap/close on 64 KiB
/// sections, `VirtualProtect`-style per-page protection in an arbitrary
/// process, and privileged process memory access (used to populate
/// file-backed mappings and to copy block contents when cloning).
pub trait SectionHost {
    /// Create a 64 KiB read-write-execute section. The creating process
    /// holds the (inheritable) handle.
    fn create_section(&mut self, pid: ProcessId) -> Result<SectionHandle, HostError>;

    /// Map a view of the section into `pid` at `block`'s address.
    /// The fresh view is fully read-write-execute.
    fn map_view(
        &mut self,
        handle: SectionHandle,
        pid: ProcessId,
        block: u32,
    ) -> Result<(), HostError>;

    /// Remove the view mapped at `block` in `pid`. Does not affect the
    /// handle count.
    fn unmap_view(&mut self, pid: ProcessId, block: u32) -> Result<(), HostError>;

    /// Close `pid`'s handle to the section. The section dies when its
    /// last handle closes.
    fn close_handle(&mut self, pid: ProcessId, handle: SectionHandle) -> Result<(), HostError>;

    /// Number of outstanding handles to the section, across all processes.
    fn handle_count(&self, handle: SectionHandle) -> Result<u32, HostError>;

    /// Set host protection on `pages` pages starting at `first_page` in
    /// `pid`. Every page must lie inside a mapped view.
    fn protect(
        &mut self,
        pid: ProcessId,
        first_page: u32,
        pages: u32,
        prot: HostProt,
    ) -> Result<(), HostError>;

    /// Privileged read of `pid`'s memory, ignoring page protection.
    fn read_process(&self, pid: ProcessId, addr: u32, buf: &mut [u8]) -> Result<(), HostError>;

    /// Privileged write to `pid`'s memory, ignoring page protection.
    fn write_process(&mut self, pid: ProcessId, addr: u32, bytes: &[u8]) -> Result<(), HostError>;

    /// Log the process's virtual map at debug level. Used on allocation
    /// failures to diagnose address space conflicts.
    fn dump_virtual_map(&self, pid: ProcessId);
}

/// Transfer of control into translated code.
///
/// `dbt_run` resolves the entry block, then hands the host code address
/// and the guest stack pointer to this trait; a real host jumps and never
/// returns, the test double records the pair.
pub trait EnterHost {
    fn enter(&mut self, entry: u32, guest_sp: u32);
}
