//! Guest code fetch interface.

/// Byte-level access to guest memory, used by the translator to read the
/// instruction stream. In the running emulator guest memory is mapped
/// into the process, so fetches are plain loads; tests hand the
/// translator a flat buffer instead.
pub trait GuestBus {
    /// Read one byte of guest memory.
    fn fetch(&self, addr: u32) -> u8;
}

/// A contiguous piece of guest code at a fixed base address.
pub struct FlatCode<'a> {
    base: u32,
    bytes: &'a [u8],
}

impl<'a> FlatCode<'a> {
    #[must_use]
    pub const fn new(base: u32, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }
}

impl GuestBus for FlatCode<'_> {
    fn fetch(&self, addr: u32) -> u8 {
        let off = addr.wrapping_sub(self.base) as usize;
        self.bytes.get(off).copied().unwrap_or(0)
    }
}
