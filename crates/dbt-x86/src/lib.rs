//! Dynamic binary translator: 32-bit guest x86 to host x86.
//!
//! The guest instruction stream is translated one basic block at a time
//! into an executable code cache. Non-control instructions are copied
//! verbatim; control transfers, `int 0x80`, and GS segment moves are
//! rewritten. Direct branches chain through patchable trampolines so the
//! steady state runs without dispatcher involvement; indirect branches
//! always go through the hash-indexed dispatcher.
//!
//! Module map:
//! - [`insn`]: static per-opcode descriptor tables
//! - [`decode`]: prefix/ModR/M/SIB/immediate parsing
//! - [`emit`]: host byte emission and ModR/M synthesis
//! - [`translate`]: the block translator, cache and chaining

pub mod bus;
pub mod decode;
pub mod emit;
pub mod insn;
pub mod operand;
pub mod translate;

mod error;

pub use bus::{FlatCode, GuestBus};
pub use error::TranslateError;
pub use translate::{Dbt, DbtConfig, ExternSymbols, TlsOffsets};
