//! Host boundary failure type.

use thiserror::Error;

/// Failure reported by a host primitive.
///
/// The memory manager maps these onto Linux errnos at its own boundary;
/// the variants only need to distinguish what the rollback paths care
/// about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HostError {
    /// Section object creation failed (quota, commit failure).
    #[error("section creation failed")]
    SectionCreate,
    /// No view is mapped at the given block.
    #[error("no view mapped at block {0:#x}")]
    NoView(u32),
    /// A view is already mapped at the given block.
    #[error("view already mapped at block {0:#x}")]
    ViewOverlap(u32),
    /// The handle does not refer to a live section.
    #[error("stale or foreign section handle")]
    BadHandle,
    /// Unknown process.
    #[error("no such process")]
    BadProcess,
    /// Protection change failed at the given page.
    #[error("protect failed at page {0:#x}")]
    ProtectFailed(u32),
}
