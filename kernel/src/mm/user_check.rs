//! MEMCHK — validate that a user-supplied buffer is actually accessible
//! with the requested permissions before the kernel dereferences it.
//!
//! Grounded on `kern/pmap.c`'s `user_mem_check` / `user_mem_assert`: the
//! original records the first faulting address in a process-wide slot so
//! the caller can log a useful diagnostic; §2.2 of SPEC_FULL.md restores
//! that detail here.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{KernelError, KernelResult};
use crate::memlayout::{self, ULIM};
use crate::mm::vm::{PageDirectory, PdeFlags};

/// Address of the first byte that failed the most recent `check_user_mem`
/// call, for diagnostics. Not meaningful unless the prior call returned
/// `Err(KernelError::Fault { .. })`.
static LAST_FAULT_ADDR: AtomicUsize = AtomicUsize::new(0);

/// `check(task, va, len, perm)`. Every page overlapping `[va, va+len)` must
/// be present in `dir` with at least `perm | PRESENT`, and the whole range
/// must lie below `ULIM`.
pub fn check_user_mem(
    dir: &mut PageDirectory,
    va: usize,
    len: usize,
    perm: PdeFlags,
) -> KernelResult<()> {
    if len == 0 {
        return Ok(());
    }
    let required = perm | PdeFlags::PRESENT;
    let start = memlayout::round_down(va, memlayout::PGSIZE);
    let end = memlayout::round_up(va.saturating_add(len), memlayout::PGSIZE);

    let mut cur = start;
    while cur < end {
        if cur >= ULIM {
            LAST_FAULT_ADDR.store(cur.max(va), Ordering::Relaxed);
            return Err(KernelError::Fault {
                addr: cur.max(va),
            });
        }
        match dir.lookup(cur) {
            Ok(Some((_frame, flags))) if flags.contains(required) => {}
            _ => {
                let fault_at = cur.max(va);
                LAST_FAULT_ADDR.store(fault_at, Ordering::Relaxed);
                return Err(KernelError::Fault { addr: fault_at });
            }
        }
        cur += memlayout::PGSIZE;
    }
    Ok(())
}

/// Last recorded faulting address, for logging by the syscall layer.
pub fn last_fault_addr() -> usize {
    LAST_FAULT_ADDR.load(Ordering::Relaxed)
}

/// `assert(task, va, len, perm)`: like `check_user_mem`, but destroys the
/// task on failure. Used only for buffers the kernel itself must read (e.g.
/// `cputs`); a faulty argument there indicates a buggy task, not a routine
/// recoverable error.
pub fn assert_user_mem(
    dir: &mut PageDirectory,
    va: usize,
    len: usize,
    perm: PdeFlags,
    task: crate::task::TaskId,
) -> KernelResult<()> {
    match check_user_mem(dir, va, len, perm | PdeFlags::USER) {
        Ok(()) => Ok(()),
        Err(e) => {
            log::warn!(
                "user_mem_assert: task {:?} faulted at {:#x}: {}",
                task,
                last_fault_addr(),
                e
            );
            crate::task::lifecycle::destroy(task);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::pmem::{AllocFlags, FRAME_ALLOCATOR};
    use crate::mm::vm::PageDirectory;

    fn fresh_dir() -> PageDirectory {
        FRAME_ALLOCATOR.lock().init(4096, |i| i == 0);
        let frame = FRAME_ALLOCATOR.lock().alloc(AllocFlags::ZERO).unwrap();
        PageDirectory::from_frame(frame)
    }

    #[test]
    fn fully_mapped_region_passes() {
        let mut dir = fresh_dir();
        let frame = FRAME_ALLOCATOR.lock().alloc(AllocFlags::empty()).unwrap();
        dir.insert(frame, 0x1000, PdeFlags::USER | PdeFlags::WRITABLE)
            .unwrap();
        assert!(check_user_mem(&mut dir, 0x1000, 10, PdeFlags::USER).is_ok());
    }

    #[test]
    fn straddling_unmapped_second_page_fails() {
        let mut dir = fresh_dir();
        let frame = FRAME_ALLOCATOR.lock().alloc(AllocFlags::empty()).unwrap();
        dir.insert(frame, 0x1000, PdeFlags::USER).unwrap();
        // region spans [0x1000, 0x2100) -- second page (0x2000) unmapped.
        let res = check_user_mem(&mut dir, 0x1FF0, 0x110, PdeFlags::USER);
        assert!(res.is_err());
    }

    #[test]
    fn beyond_ulim_rejected() {
        let mut dir = fresh_dir();
        let res = check_user_mem(&mut dir, ULIM, 1, PdeFlags::USER);
        assert!(res.is_err());
    }
}
