//! Shared kernel/user ABI constants. Grounded on JOS's `inc/memlayout.h` /
//! `inc/syscall.h` / `inc/mmu.h` — small headers `#include`d by both the
//! kernel and the user library so neither side hand-maintains its own copy.
//! This crate mirrors that by duplicating the handful of values user code
//! needs rather than depending on the kernel crate directly.

pub const PGSIZE: usize = 4096;
pub const PTSIZE: usize = PGSIZE * 1024;

pub const UTOP: usize = 0xEF00_0000;
pub const UXSTACKTOP: usize = UTOP;
pub const USTACKTOP: usize = 0xEEBF_E000;
pub const UVPT: usize = 0xEF00_0000;

pub const DISKMAP: usize = 0x1000_0000;
pub const DISKSIZE: usize = 0x1000_0000;
pub const SECTSIZE: usize = 512;
pub const BLKSIZE: usize = PGSIZE;
pub const BLKSECTS: usize = BLKSIZE / SECTSIZE;

bitflags::bitflags! {
    /// Same bit positions as `kernel::mm::vm::PdeFlags`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Perm: u32 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        const COW = 1 << 9;
        const SHARE = 1 << 10;
    }
}

pub mod syscall {
    pub const CPUTS: u32 = 0;
    pub const CGETC: u32 = 1;
    pub const GETENVID: u32 = 2;
    pub const ENV_DESTROY: u32 = 3;
    pub const YIELD: u32 = 4;
    pub const EXOFORK: u32 = 5;
    pub const ENV_SET_STATUS: u32 = 6;
    pub const ENV_SET_PGFAULT_UPCALL: u32 = 7;
    pub const ENV_SET_TRAPFRAME: u32 = 8;
    pub const PAGE_ALLOC: u32 = 9;
    pub const PAGE_MAP: u32 = 10;
    pub const PAGE_UNMAP: u32 = 11;
    pub const IPC_TRY_SEND: u32 = 12;
    pub const IPC_RECV: u32 = 13;
    pub const IPC_STATUS: u32 = 14;
    pub const PAGE_PERM: u32 = 15;
}

pub const ENV_RUNNABLE: u32 = 1;
pub const ENV_NOT_RUNNABLE: u32 = 0;

pub const fn round_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

pub const fn round_up(addr: usize, align: usize) -> usize {
    round_down(addr + align - 1, align)
}
