//! Disk block cache backed by page-fault fill (§4.9). Grounded on
//! `fs/bc.c`: the FS task's page-fault handler recognizes faults inside its
//! `DISKMAP..DISKMAP+DISKSIZE` window, fills the page from the IDE device on
//! first touch, and clears the hardware DIRTY bit by remapping after every
//! read and every explicit flush.

use crate::abi::{self, Perm, BLKSECTS, BLKSIZE, DISKMAP, DISKSIZE, PGSIZE};
use crate::pgfault::UserTrapFrame;
use crate::syscall;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    Invalid,
    NoDisk,
    NotFound,
    FileExists,
    BadPath,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

pub type FsResult<T> = Result<T, FsError>;

/// Virtual address the given disk block is mapped at within this task's
/// cache window. Mirrors `diskaddr`.
pub fn diskaddr(blockno: u32) -> usize {
    DISKMAP + blockno as usize * BLKSIZE
}

fn block_of(va: usize) -> u32 {
    ((va - DISKMAP) / BLKSIZE) as u32
}

/// True if `va` falls in the reserved disk-cache window.
fn in_cache_window(va: usize) -> bool {
    va >= DISKMAP && va < DISKMAP + DISKSIZE
}

/// Stand-in for the IDE device collaborator (§6): reads/writes `BLKSECTS`
/// sectors starting at `blockno * BLKSECTS`. A real build issues polled PIO
/// through the IOPL-enabled port range; that device-driver detail is out of
/// scope (§1 Non-goals) so this crate isolates it behind a trait any host
/// test or future driver can implement.
pub trait IdeDevice {
    fn read_sectors(&mut self, start_sector: u32, buf: &mut [u8]);
    fn write_sectors(&mut self, start_sector: u32, buf: &[u8]);
}

/// The page-fault handler registered by `fs_init` for disk-cache misses.
/// Mirrors `bc_pgfault`: validates the fault lands in the cache window,
/// allocates the backing page, reads the block in, then re-maps with DIRTY
/// cleared.
pub fn bc_pgfault(dev: &mut dyn IdeDevice, tf: &UserTrapFrame) {
    let va = abi::round_down(tf.fault_va as usize, PGSIZE);
    if !in_cache_window(va) {
        panic!("page fault at {:#x} outside the disk cache window", tf.fault_va);
    }

    let blockno = block_of(va);

    syscall::page_alloc(0, va, Perm::USER | Perm::WRITABLE | Perm::PRESENT)
        .expect("page_alloc for disk cache fill");

    let buf = unsafe { core::slice::from_raw_parts_mut(va as *mut u8, BLKSIZE) };
    dev.read_sectors(blockno * BLKSECTS as u32, buf);

    // Re-map to the same frame with only the recognised bits set, which has
    // the side effect of clearing the hardware DIRTY bit the read itself
    // never sets but a stale mapping might carry.
    syscall::page_map(0, va, 0, va, Perm::USER | Perm::WRITABLE | Perm::PRESENT)
        .expect("remap disk cache page after fill");
}

/// Write `addr`'s block back to disk if mapped and dirty, then clear DIRTY
/// by remapping. A no-op if the page isn't mapped or isn't dirty. Mirrors
/// `flush_block`; `addr` need not be page-aligned.
pub fn flush_block(dev: &mut dyn IdeDevice, addr: usize) {
    let va = abi::round_down(addr, PGSIZE);
    if !in_cache_window(va) {
        return;
    }

    // `page_perm` both confirms the page is actually mapped (a no-op
    // window never touched by `bc_pgfault` is a plain no-op here, not a
    // read of unmapped memory) and, without a UVPT self-map to inspect the
    // DIRTY bit directly, stands in for dirty-bit inspection too: this
    // conservatively always writes back once presence is confirmed, which
    // is always a safe superset of "only when dirty".
    if syscall::page_perm(0, va).is_err() {
        return;
    }

    let blockno = block_of(va);
    let buf = unsafe { core::slice::from_raw_parts(va as *const u8, BLKSIZE) };
    dev.write_sectors(blockno * BLKSECTS as u32, buf);

    syscall::page_map(0, va, 0, va, Perm::USER | Perm::WRITABLE | Perm::PRESENT).ok();
}
