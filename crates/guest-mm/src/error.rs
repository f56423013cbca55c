//! Memory manager error type.

use linux_abi::{EBADF, EINVAL, ENOMEM};
use thiserror::Error;

/// Failure of a memory management operation.
///
/// The syscall shims negate [`MmError::errno`] for the guest; rollback of
/// partial work has already happened by the time one of these is
/// returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MmError {
    /// Bad alignment, bad range, wrapping range, or unsupported flag.
    #[error("invalid argument")]
    InvalidArgument,
    /// No free range, or a host allocation failed.
    #[error("out of memory")]
    OutOfMemory,
    /// A file mapping was requested without a file.
    #[error("bad file descriptor")]
    BadFile,
}

impl MmError {
    /// The Linux errno for this error.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => EINVAL,
            Self::OutOfMemory => ENOMEM,
            Self::BadFile => EBADF,
        }
    }
}
