//! The raw `int $0x30` trap, and typed wrappers over each syscall number
//! (§6's ABI: call number in eax, args in edx/ecx/ebx/edi/esi, return in
//! eax).

use crate::abi::{self, syscall, Perm};

/// Negative-integer error kinds returned in `eax`, mirroring
/// `kernel::error::KernelError::code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    InvalidArgument,
    OutOfMemory,
    NoFreeTask,
    BadTask,
    NoDisk,
    IpcNotRecv,
    Fault,
    NotFound,
    FileExists,
    BadPath,
    Unknown(i32),
}

impl From<i32> for SyscallError {
    fn from(code: i32) -> Self {
        match code {
            -1 => SyscallError::InvalidArgument,
            -2 => SyscallError::OutOfMemory,
            -3 => SyscallError::NoFreeTask,
            -4 => SyscallError::BadTask,
            -5 => SyscallError::NoDisk,
            -6 => SyscallError::IpcNotRecv,
            -7 => SyscallError::Fault,
            -8 => SyscallError::NotFound,
            -9 => SyscallError::FileExists,
            -10 => SyscallError::BadPath,
            other => SyscallError::Unknown(other),
        }
    }
}

pub type SyscallResult<T> = Result<T, SyscallError>;

/// Issue the raw trap. Only this function touches inline assembly; every
/// other wrapper in this module builds on it.
///
/// # Safety
/// `num` must name a syscall this library knows how to interpret the
/// return value of, and the argument values must already satisfy that
/// call's documented preconditions (alignment, permission bits, ...).
unsafe fn raw(num: u32, a1: u32, a2: u32, a3: u32, a4: u32, a5: u32) -> i32 {
    #[cfg(target_arch = "x86")]
    {
        let ret: i32;
        // SAFETY: matches the trap ABI `trap::dispatch::dispatch_by_vector`
        // expects for `vectors::SYSCALL`.
        unsafe {
            core::arch::asm!(
                "int 0x30",
                inout("eax") num => ret,
                in("edx") a1,
                in("ecx") a2,
                in("ebx") a3,
                in("edi") a4,
                in("esi") a5,
                options(nostack),
            );
        }
        ret
    }
    #[cfg(not(target_arch = "x86"))]
    {
        let _ = (num, a1, a2, a3, a4, a5);
        unreachable!("syscalls are only issuable on a real x86 target")
    }
}

fn check(code: i32) -> SyscallResult<i32> {
    if code < 0 {
        Err(SyscallError::from(code))
    } else {
        Ok(code)
    }
}

pub fn cputs(s: &[u8]) {
    // SAFETY: `s` is a valid Rust slice; the kernel re-validates the range
    // against the caller's page table before reading it (MEMCHK).
    unsafe {
        raw(syscall::CPUTS, s.as_ptr() as u32, s.len() as u32, 0, 0, 0);
    }
}

pub fn getenvid() -> i32 {
    // SAFETY: takes no pointer arguments.
    unsafe { raw(syscall::GETENVID, 0, 0, 0, 0, 0) }
}

pub fn env_destroy(id: i32) -> SyscallResult<()> {
    // SAFETY: no pointer arguments; `id` is merely looked up by the kernel.
    check(unsafe { raw(syscall::ENV_DESTROY, id as u32, 0, 0, 0, 0) }).map(|_| ())
}

pub fn sys_yield() -> ! {
    // SAFETY: no pointer arguments; never returns.
    unsafe {
        raw(syscall::YIELD, 0, 0, 0, 0, 0);
    }
    unreachable!("sys_yield never returns")
}

pub fn exofork() -> SyscallResult<i32> {
    // SAFETY: no pointer arguments.
    check(unsafe { raw(syscall::EXOFORK, 0, 0, 0, 0, 0) })
}

pub fn env_set_status(id: i32, status: u32) -> SyscallResult<()> {
    // SAFETY: no pointer arguments.
    check(unsafe { raw(syscall::ENV_SET_STATUS, id as u32, status, 0, 0, 0) }).map(|_| ())
}

pub fn env_set_pgfault_upcall(id: i32, upcall: usize) -> SyscallResult<()> {
    // SAFETY: `upcall` is an entry point address in the caller's own
    // address space; the kernel stores it without dereferencing it here.
    check(unsafe {
        raw(
            syscall::ENV_SET_PGFAULT_UPCALL,
            id as u32,
            upcall as u32,
            0,
            0,
            0,
        )
    })
    .map(|_| ())
}

pub fn page_alloc(id: i32, va: usize, perm: Perm) -> SyscallResult<()> {
    // SAFETY: the kernel validates `va`/`perm` before mapping anything.
    check(unsafe {
        raw(
            syscall::PAGE_ALLOC,
            id as u32,
            va as u32,
            perm.bits(),
            0,
            0,
        )
    })
    .map(|_| ())
}

pub fn page_map(src: i32, sva: usize, dst: i32, dva: usize, perm: Perm) -> SyscallResult<()> {
    // SAFETY: the kernel validates both virtual addresses and `perm`.
    check(unsafe {
        raw(
            syscall::PAGE_MAP,
            src as u32,
            sva as u32,
            dst as u32,
            dva as u32,
            perm.bits(),
        )
    })
    .map(|_| ())
}

pub fn page_unmap(id: i32, va: usize) -> SyscallResult<()> {
    // SAFETY: the kernel validates `va` before touching the page table.
    check(unsafe { raw(syscall::PAGE_UNMAP, id as u32, va as u32, 0, 0, 0) }).map(|_| ())
}

pub fn ipc_try_send(id: i32, value: u32, sva: usize, perm: Perm) -> SyscallResult<()> {
    // SAFETY: the kernel validates `sva`/`perm` like `page_alloc` before
    // transferring anything.
    check(unsafe {
        raw(
            syscall::IPC_TRY_SEND,
            id as u32,
            value,
            sva as u32,
            perm.bits(),
            0,
        )
    })
    .map(|_| ())
}

/// Raw result of a completed `ipc_recv`: the sender's id, the value, and
/// any permission bits a transferred page was mapped with. Populated by
/// the user-space IPC layer from the receiver's post-wakeup register/task
/// state, not directly by this syscall wrapper (`ipc_recv` itself blocks).
#[derive(Debug, Clone, Copy)]
pub struct IpcMessage {
    pub from: i32,
    pub value: u32,
    pub perm: Perm,
}

pub fn ipc_recv(dva: usize) -> SyscallResult<i32> {
    if dva != 0 && dva >= abi::UTOP {
        return Err(SyscallError::InvalidArgument);
    }
    // SAFETY: this call blocks until a sender delivers a message; the
    // kernel validates `dva`'s alignment itself.
    check(unsafe { raw(syscall::IPC_RECV, dva as u32, 0, 0, 0, 0) })
}

/// Read back the caller's own delivered `from`/`value`/`perm` IPC fields
/// into `out`, once `ipc_recv` has returned (i.e. a send has woken this
/// task). The resumed trap frame carries nothing useful in registers; the
/// payload lives only in the kernel's per-task record.
pub fn ipc_status(out: &mut [u32; 3]) -> SyscallResult<()> {
    // SAFETY: `out` is a valid 12-byte buffer in this task's own address
    // space; the kernel re-validates it's mapped and writable before use.
    check(unsafe {
        raw(
            syscall::IPC_STATUS,
            out.as_mut_ptr() as u32,
            0,
            0,
            0,
            0,
        )
    })
    .map(|_| ())
}

/// Current permission bits of the page mapped at `va` in task `id`
/// (`0` names the caller), or `Err(InvalidArgument)` if nothing is mapped
/// there.
pub fn page_perm(id: i32, va: usize) -> SyscallResult<Perm> {
    // SAFETY: no pointer arguments; the kernel looks the mapping up itself.
    check(unsafe { raw(syscall::PAGE_PERM, id as u32, va as u32, 0, 0, 0) })
        .map(|bits| Perm::from_bits_truncate(bits as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_codes_decode_to_known_variants() {
        assert_eq!(SyscallError::from(-4), SyscallError::BadTask);
        assert_eq!(SyscallError::from(-6), SyscallError::IpcNotRecv);
        assert_eq!(SyscallError::from(-999), SyscallError::Unknown(-999));
    }

    #[test]
    fn ipc_recv_rejects_unaligned_high_dva() {
        let res = ipc_recv(abi::UTOP + 1);
        assert_eq!(res, Err(SyscallError::InvalidArgument));
    }
}
