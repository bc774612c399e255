//! Kernel-wide error type.
//!
//! Mirrors the ABI's small set of negative error codes (`KernelError::code`)
//! while giving internal code a real `Result` to propagate with `?`, the way
//! string-literal errors are gradually replaced with typed variants in larger
//! kernels.

use core::fmt;

/// Result alias used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Malformed system-call or API argument.
    InvalidArgument,
    /// Physical frame or page-table exhaustion.
    OutOfMemory,
    /// No free task slot.
    NoFreeTask,
    /// Target task id does not exist, or the caller lacks permission to name it.
    BadTask,
    /// Free-bitmap exhausted on the backing disk.
    NoDisk,
    /// `ipc_try_send` targeted a task not blocked in `ipc_recv`.
    IpcNotRecv,
    /// A user buffer failed the `MEMCHK` permission check.
    Fault { addr: usize },
    /// File or directory lookup failed.
    NotFound,
    /// `file_create` found an existing entry at the target path.
    FileExists,
    /// Path could not be parsed (too long, empty component, …).
    BadPath,
}

impl KernelError {
    /// Narrow to the small negative integer the syscall ABI returns in eax.
    ///
    /// This is the only place a `KernelError` is allowed to degrade to an
    /// integer; everywhere else in the kernel passes the typed value.
    pub fn code(self) -> i32 {
        match self {
            KernelError::InvalidArgument => -1,
            KernelError::OutOfMemory => -2,
            KernelError::NoFreeTask => -3,
            KernelError::BadTask => -4,
            KernelError::NoDisk => -5,
            KernelError::IpcNotRecv => -6,
            KernelError::Fault { .. } => -7,
            KernelError::NotFound => -8,
            KernelError::FileExists => -9,
            KernelError::BadPath => -10,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::NoFreeTask => write!(f, "no free task slot"),
            KernelError::BadTask => write!(f, "bad task id"),
            KernelError::NoDisk => write!(f, "disk exhausted"),
            KernelError::IpcNotRecv => write!(f, "target not receiving"),
            KernelError::Fault { addr } => write!(f, "user memory fault at {:#x}", addr),
            KernelError::NotFound => write!(f, "not found"),
            KernelError::FileExists => write!(f, "file exists"),
            KernelError::BadPath => write!(f, "bad path"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_all_negative() {
        let all = [
            KernelError::InvalidArgument,
            KernelError::OutOfMemory,
            KernelError::NoFreeTask,
            KernelError::BadTask,
            KernelError::NoDisk,
            KernelError::IpcNotRecv,
            KernelError::Fault { addr: 0 },
            KernelError::NotFound,
            KernelError::FileExists,
            KernelError::BadPath,
        ];
        for e in all {
            assert!(e.code() < 0);
        }
    }
}
