//! PMEM — the physical frame allocator.
//!
//! A frame descriptor array, one entry per physical page, linked into a
//! singly-linked free list through the descriptor itself (no separate
//! allocation for list nodes). Grounded on `kern/pmap.c`'s `page_init` /
//! `page_alloc` / `page_free` / `page_decref`.

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::memlayout::PGSIZE;

/// Maximum number of physical frames this kernel can track. Sized generously
/// for a teaching-kernel workload; real hardware detection picks a smaller
/// `npages` at boot.
const MAX_FRAMES: usize = 1 << 18; // 1 GiB at 4 KiB frames

bitflags::bitflags! {
    /// Flags passed to [`FrameAllocator::alloc`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Zero the frame's contents (via the kernel direct map) before returning it.
        const ZERO = 1 << 0;
    }
}

/// A physical frame number (not an address — multiply by `PGSIZE` for the
/// physical address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Frame(pub u32);

impl Frame {
    pub const fn number(self) -> u32 {
        self.0
    }

    pub const fn phys_addr(self) -> usize {
        (self.0 as usize) * PGSIZE
    }

    pub const fn from_phys_addr(addr: usize) -> Self {
        Frame((addr / PGSIZE) as u32)
    }
}

/// One descriptor per physical frame.
#[derive(Clone, Copy)]
struct FrameDesc {
    refcount: u16,
    /// Index + 1 of the next free frame, or 0 if this frame is not on the
    /// free list (either allocated, or the list terminator).
    next_free: u32,
}

impl FrameDesc {
    const fn new() -> Self {
        FrameDesc {
            refcount: 0,
            next_free: 0,
        }
    }
}

/// The physical frame allocator: a descriptor array plus a free-list head.
///
/// Invariant (checked by tests): a frame is on the free list iff its
/// refcount is zero and no page-table entry in any task references it. The
/// second half of that invariant is enforced by callers (`pgtab::remove`
/// calls `decref`, never frees directly).
pub struct FrameAllocator {
    descs: [FrameDesc; MAX_FRAMES],
    free_head: u32,
    npages: u32,
}

impl FrameAllocator {
    const fn new() -> Self {
        FrameAllocator {
            descs: [FrameDesc::new(); MAX_FRAMES],
            free_head: 0,
            npages: 0,
        }
    }

    /// Populate the free list from scratch. `npages` is the number of
    /// physical frames present on this machine; `reserved` yields frame
    /// numbers that must never be handed out (frame 0, the I/O hole, the
    /// kernel image, the SMP trampoline, and anything the boot bump
    /// allocator already carved out).
    pub fn init(&mut self, npages: u32, reserved: impl Fn(u32) -> bool) {
        self.npages = npages;
        self.free_head = 0;
        // Push in descending order so ascending-index frames are handed out
        // first, matching the original free-list ordering.
        for i in (0..npages).rev() {
            if reserved(i) {
                self.descs[i as usize] = FrameDesc {
                    refcount: 1,
                    next_free: 0,
                };
                continue;
            }
            self.descs[i as usize] = FrameDesc {
                refcount: 0,
                next_free: self.free_head + 1,
            };
            self.free_head = i + 1;
        }
    }

    /// Remove the head of the free list. Does not touch the refcount —
    /// callers that intend to keep the frame mapped must bump it themselves
    /// (normally via `pgtab::insert`).
    pub fn alloc(&mut self, flags: AllocFlags) -> Option<Frame> {
        if self.free_head == 0 {
            return None;
        }
        let idx = self.free_head - 1;
        self.free_head = self.descs[idx as usize].next_free;
        self.descs[idx as usize].next_free = 0;
        let frame = Frame(idx);

        if flags.contains(AllocFlags::ZERO) {
            // SAFETY: the kernel direct map covers all physical memory and
            // this frame was just removed from the free list, so nothing
            // else can observe the write racing with us.
            unsafe {
                let dst = crate::mm::vm::direct_map(frame.phys_addr()) as *mut u8;
                core::ptr::write_bytes(dst, 0, PGSIZE);
            }
        }
        Some(frame)
    }

    /// Return a frame to the free list. Precondition: refcount is already
    /// zero and the frame is not already linked into the list.
    pub fn free(&mut self, frame: Frame) -> KernelResult<()> {
        let idx = frame.0 as usize;
        if self.descs[idx].refcount != 0 {
            return Err(KernelError::InvalidArgument);
        }
        self.descs[idx].next_free = self.free_head;
        self.free_head = frame.0 + 1;
        Ok(())
    }

    /// Increment a frame's reference count.
    pub fn incref(&mut self, frame: Frame) {
        self.descs[frame.0 as usize].refcount += 1;
    }

    /// Decrement a frame's reference count; free it once the count reaches
    /// zero.
    pub fn decref(&mut self, frame: Frame) -> KernelResult<()> {
        let desc = &mut self.descs[frame.0 as usize];
        debug_assert!(desc.refcount > 0, "decref of already-free frame");
        desc.refcount = desc.refcount.saturating_sub(1);
        if desc.refcount == 0 {
            self.free(frame)
        } else {
            Ok(())
        }
    }

    pub fn refcount(&self, frame: Frame) -> u16 {
        self.descs[frame.0 as usize].refcount
    }

    /// Whether `frame` currently sits on the free list (test/debug helper).
    pub fn is_free(&self, frame: Frame) -> bool {
        self.descs[frame.0 as usize].refcount == 0
    }
}

/// Global frame allocator, guarded by the big kernel lock in practice but
/// additionally spin-locked here so unit tests can exercise it directly
/// without the rest of the kernel.
pub static FRAME_ALLOCATOR: Mutex<FrameAllocator> = Mutex::new(FrameAllocator::new());

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(npages: u32) -> FrameAllocator {
        let mut a = FrameAllocator::new();
        a.init(npages, |i| i == 0);
        a
    }

    #[test]
    fn frame_zero_is_reserved() {
        let mut a = fresh(16);
        for _ in 0..15 {
            let f = a.alloc(AllocFlags::empty()).expect("frame available");
            assert_ne!(f.0, 0, "frame 0 must never be handed out");
        }
        assert!(a.alloc(AllocFlags::empty()).is_none());
    }

    #[test]
    fn free_then_realloc_round_trips() {
        let mut a = fresh(4);
        let f = a.alloc(AllocFlags::empty()).unwrap();
        a.incref(f);
        a.decref(f).unwrap();
        assert!(a.is_free(f));
        let f2 = a.alloc(AllocFlags::empty()).unwrap();
        assert_eq!(f, f2, "the only freed frame should be handed back out");
    }

    #[test]
    fn decref_to_zero_frees_frame() {
        let mut a = fresh(4);
        let f = a.alloc(AllocFlags::empty()).unwrap();
        a.incref(f);
        a.incref(f);
        a.decref(f).unwrap();
        assert!(!a.is_free(f), "refcount still 1, must not be free");
        a.decref(f).unwrap();
        assert!(a.is_free(f));
    }

    #[test]
    fn free_with_nonzero_refcount_rejected() {
        let mut a = fresh(4);
        let f = a.alloc(AllocFlags::empty()).unwrap();
        a.incref(f);
        assert!(a.free(f).is_err());
    }
}
