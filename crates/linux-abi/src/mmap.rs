//! `mmap` protection bits, mapping flags and the old packed argument block.

use bitflags::bitflags;

bitflags! {
    /// Linux page protection bits (`PROT_*`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Prot: u8 {
        /// Page may be read.
        const READ = 0x1;
        /// Page may be written.
        const WRITE = 0x2;
        /// Page may be executed.
        const EXEC = 0x4;
    }
}

bitflags! {
    /// Linux mapping flags (`MAP_*`), plus one internal flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// Share the mapping (rejected by this memory manager).
        const SHARED = 0x01;
        /// Private copy-on-write mapping.
        const PRIVATE = 0x02;
        /// Place the mapping exactly at the given address.
        const FIXED = 0x10;
        /// No backing file.
        const ANONYMOUS = 0x20;
        /// Internal: allocate from the low heap window instead of the main
        /// allocation window. Never set by guest code.
        const HEAP = 0x0200_0000;
    }
}

/// Argument block of the single-pointer `old_mmap` syscall.
///
/// The guest passes the address of this struct; all six fields are 32-bit
/// little-endian words in guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OldMmapArgs {
    pub addr: u32,
    pub len: u32,
    pub prot: u32,
    pub flags: u32,
    pub fd: u32,
    pub offset: u32,
}

impl OldMmapArgs {
    /// Size of the packed block in guest memory.
    pub const SIZE: usize = 24;

    /// Decode the block from its guest-memory byte image.
    #[must_use]
    pub fn from_bytes(raw: &[u8; Self::SIZE]) -> Self {
        let word = |i: usize| {
            u32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]])
        };
        Self {
            addr: word(0),
            len: word(4),
            prot: word(8),
            flags: word(12),
            fd: word(16),
            offset: word(20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_mmap_args_decode() {
        let mut raw = [0u8; OldMmapArgs::SIZE];
        raw[0..4].copy_from_slice(&0x2000_0000u32.to_le_bytes());
        raw[4..8].copy_from_slice(&0x5000u32.to_le_bytes());
        raw[8..12].copy_from_slice(&3u32.to_le_bytes());
        raw[12..16].copy_from_slice(&0x22u32.to_le_bytes());
        raw[16..20].copy_from_slice(&(-1i32 as u32).to_le_bytes());
        raw[20..24].copy_from_slice(&0u32.to_le_bytes());

        let args = OldMmapArgs::from_bytes(&raw);
        assert_eq!(args.addr, 0x2000_0000);
        assert_eq!(args.len, 0x5000);
        assert_eq!(args.prot, 3);
        assert_eq!(args.flags, 0x22);
        assert_eq!(args.fd as i32, -1);
        assert_eq!(args.offset, 0);
    }

    #[test]
    fn prot_bits_match_linux_values() {
        assert_eq!(Prot::READ.bits(), 1);
        assert_eq!(Prot::WRITE.bits(), 2);
        assert_eq!(Prot::EXEC.bits(), 4);
        assert_eq!(MapFlags::FIXED.bits(), 0x10);
        assert_eq!(MapFlags::ANONYMOUS.bits(), 0x20);
    }
}
