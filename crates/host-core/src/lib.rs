//! Host boundary for the emulator core.
//!
//! The translator and the memory manager never touch the host OS directly.
//! Everything they need from it — section objects, per-page protection,
//! raw process memory access, TLS slots, control transfer into generated
//! code — is expressed as the traits in this crate. `SimHost` implements
//! the memory side entirely in memory so every test can run the real MM
//! logic, including fork sharing and write-fault copy-on-write, without a
//! kernel underneath.

mod error;
mod file;
pub mod layout;
mod section;
mod sim;
mod tls;

pub use error::HostError;
pub use file::{FdTable, MapFile, MemFile};
pub use section::{EnterHost, HostProt, ProcessId, SectionHandle, SectionHost};
pub use sim::{GuestFault, ProtectCall, SimHost};
pub use tls::{TebTls, TlsHost};
