//! Translator diagnostics.
//!
//! Everything here is a design gap, not a runtime condition: an
//! instruction or prefix the translator does not know how to rewrite.
//! The process must halt rather than run a block whose semantics would
//! silently diverge from the guest's.

use thiserror::Error;

/// Fatal translation diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("LOCK prefix not supported at {pc:#x}")]
    LockPrefix { pc: u32 },
    #[error("segment override prefix {prefix:#04x} not supported at {pc:#x}")]
    SegmentOverride { prefix: u8, pc: u32 },
    #[error("address size prefix not supported at {pc:#x}")]
    AddressSizePrefix { pc: u32 },
    #[error("unknown opcode {opcode:#04x} at {pc:#x}")]
    UnknownOpcode { opcode: u8, pc: u32 },
    #[error("invalid opcode {opcode:#04x} at {pc:#x}")]
    InvalidOpcode { opcode: u8, pc: u32 },
    #[error("privileged opcode {opcode:#04x} at {pc:#x}")]
    PrivilegedOpcode { opcode: u8, pc: u32 },
    #[error("unsupported opcode {opcode:#04x} at {pc:#x}")]
    UnsupportedOpcode { opcode: u8, pc: u32 },
    #[error("int {vector:#04x} not supported at {pc:#x}")]
    UnsupportedInt { vector: u8, pc: u32 },
    #[error("mov to/from segment selector {seg} not supported at {pc:#x}")]
    UnsupportedSegment { seg: u8, pc: u32 },
    #[error("no usable scratch register at {pc:#x}")]
    NoScratchRegister { pc: u32 },
    #[error("esp cannot be used as an index register")]
    SpIndex,
}
