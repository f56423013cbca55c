//! Linux errno numbers, as returned (negated) from syscall shims.

/// Operation not permitted.
pub const EPERM: i32 = 1;
/// Bad file descriptor.
pub const EBADF: i32 = 9;
/// Out of memory.
pub const ENOMEM: i32 = 12;
/// Invalid argument.
pub const EINVAL: i32 = 22;
