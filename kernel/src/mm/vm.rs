//! PGTAB — the two-level (page directory / page table) address-space
//! walker for 32-bit x86 paging.
//!
//! Grounded on `kern/pmap.c`'s `pgdir_walk` / `page_insert` / `page_lookup`
//! / `page_remove` / `boot_map_region` / `mmio_map_region`, translated to
//! safe-ish Rust around raw PDE/PTE arrays addressed through the kernel
//! direct map.

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::memlayout::{self, MMIOBASE, MMIOLIM, PGSIZE, UVPT};
use crate::mm::pmem::{AllocFlags, Frame, FRAME_ALLOCATOR};

pub const PAGE_SIZE: usize = PGSIZE;
const ENTRIES: usize = 1024;

bitflags::bitflags! {
    /// Page-directory / page-table entry flags. Bit positions match the x86
    /// hardware page-table format; the three AVAIL bits (9-11) carry
    /// `COW` and `SHARE` software semantics.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PdeFlags: u32 {
        const PRESENT       = 1 << 0;
        const WRITABLE      = 1 << 1;
        const USER          = 1 << 2;
        const WRITETHROUGH  = 1 << 3;
        const CACHEDISABLE  = 1 << 4;
        const ACCESSED      = 1 << 5;
        const DIRTY         = 1 << 6;
        /// Software bit: copy-on-write (FORK).
        const COW           = 1 << 9;
        /// Software bit: share verbatim across `fork` (FORK).
        const SHARE         = 1 << 10;
    }
}

/// Bits callers may legally pass into `insert`/`page_alloc`/`page_map`.
pub const PTE_SYSCALL: PdeFlags = PdeFlags::from_bits_truncate(
    PdeFlags::PRESENT.bits()
        | PdeFlags::WRITABLE.bits()
        | PdeFlags::USER.bits()
        | PdeFlags::COW.bits()
        | PdeFlags::SHARE.bits(),
);

/// One raw 32-bit page-directory or page-table entry.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct RawEntry(u32);

impl RawEntry {
    const fn empty() -> Self {
        RawEntry(0)
    }

    fn new(frame: Frame, flags: PdeFlags) -> Self {
        RawEntry(((frame.0 as u32) << 12) | flags.bits())
    }

    fn frame(self) -> Frame {
        Frame(self.0 >> 12)
    }

    fn flags(self) -> PdeFlags {
        PdeFlags::from_bits_truncate(self.0 & 0xFFF)
    }

    fn is_present(self) -> bool {
        self.flags().contains(PdeFlags::PRESENT)
    }
}

/// Translate a physical address into the kernel's direct-mapped virtual
/// address for it. Out of scope's "boot loader" detail aside, this is the
/// one function every other part of PGTAB relies on to touch frame contents
/// before any task-private mapping exists.
pub fn direct_map(phys_addr: usize) -> usize {
    memlayout::KERNBASE + phys_addr
}

fn entry_table<'a>(frame: Frame) -> &'a mut [RawEntry; ENTRIES] {
    // SAFETY: `frame` always names a page-table or page-directory frame
    // previously allocated by this module and reachable through the direct
    // map; callers hold the big kernel lock while calling into PGTAB.
    unsafe { &mut *(direct_map(frame.phys_addr()) as *mut [RawEntry; ENTRIES]) }
}

/// Owns a task's (or the kernel's) page directory frame. Cheap to copy: the
/// frame number is the only state, identical to the original's bare `pde_t
/// *pgdir` pointer.
#[derive(Clone, Copy)]
pub struct PageDirectory {
    pub frame: Frame,
}

/// The kernel's own page directory frame, set once at boot by the arch init
/// path. Every task's directory clones the kernel's entries at or above
/// `UTOP` out of this.
static KERNEL_PGDIR: Mutex<Option<Frame>> = Mutex::new(None);

/// Record the kernel's page directory frame. Called once during boot, before
/// any task is created.
pub fn set_kernel_pgdir(frame: Frame) {
    *KERNEL_PGDIR.lock() = Some(frame);
}

pub fn kernel_pgdir_frame() -> Option<Frame> {
    *KERNEL_PGDIR.lock()
}

impl PageDirectory {
    pub fn from_frame(frame: Frame) -> Self {
        PageDirectory { frame }
    }

    /// Clone the kernel's PDEs at or above `UTOP` into this (freshly
    /// zeroed) directory, then self-map `UVPT` to this directory's own
    /// frame, read-only to user mode. Grounded on `env_setup_vm`.
    pub fn clone_kernel_mappings(&mut self) -> KernelResult<()> {
        let kern_frame = kernel_pgdir_frame().ok_or(KernelError::InvalidArgument)?;
        let kern_table = entry_table(kern_frame);
        let first = memlayout::pdx(memlayout::UTOP);
        let my_table = self.pde_table();
        for i in first..ENTRIES {
            my_table[i] = kern_table[i];
        }
        let uvpt_idx = memlayout::pdx(UVPT);
        my_table[uvpt_idx] = RawEntry::new(self.frame, PdeFlags::PRESENT | PdeFlags::USER);
        Ok(())
    }

    fn pde_table(&self) -> &mut [RawEntry; ENTRIES] {
        entry_table(self.frame)
    }

    /// `walk(va, create) -> *PTE`. Returns the index pair `(pde_idx,
    /// pte_idx)` plus a reference to the live PTE slot, or `None` if the
    /// page table is absent and `create` was false.
    pub fn walk(&mut self, va: usize, create: bool) -> KernelResult<Option<PteSlot<'_>>> {
        let pde_idx = memlayout::pdx(va);
        let pde = self.pde_table()[pde_idx];

        let pt_frame = if pde.is_present() {
            pde.frame()
        } else {
            if !create {
                return Ok(None);
            }
            let mut alloc = FRAME_ALLOCATOR.lock();
            let frame = alloc.alloc(AllocFlags::ZERO).ok_or(KernelError::OutOfMemory)?;
            alloc.incref(frame);
            drop(alloc);
            self.pde_table()[pde_idx] =
                RawEntry::new(frame, PdeFlags::PRESENT | PdeFlags::WRITABLE | PdeFlags::USER);
            frame
        };

        let pt = entry_table(pt_frame);
        let pte_idx = memlayout::ptx(va);
        Ok(Some(PteSlot {
            table: pt,
            index: pte_idx,
        }))
    }

    /// `insert(frame, va, perm)`. Maps `va` to `frame` with `perm |
    /// PRESENT`. If another frame is already mapped there, it is removed —
    /// but only *after* the new mapping's refcount has been bumped, so
    /// remapping the same frame at the same `va` never transiently drops to
    /// a zero refcount.
    pub fn insert(&mut self, frame: Frame, va: usize, perm: PdeFlags) -> KernelResult<()> {
        // Walk (and possibly allocate a page-table page) *before* touching
        // the refcount: `walk` can fail with `OutOfMemory`, and bumping the
        // refcount first would leak `frame` on that path with no PTE ever
        // written to balance it back out.
        let mut slot = self.walk(va, true)?.expect("just created above");

        FRAME_ALLOCATOR.lock().incref(frame);

        if slot.get().is_present() {
            let old = slot.get().frame();
            slot.clear();
            invalidate(self, va);
            FRAME_ALLOCATOR.lock().decref(old)?;
        }

        slot.set(frame, perm | PdeFlags::PRESENT);
        Ok(())
    }

    /// `lookup(va) -> (Frame, perm)?`.
    pub fn lookup(&mut self, va: usize) -> KernelResult<Option<(Frame, PdeFlags)>> {
        match self.walk(va, false)? {
            Some(mut slot) if slot.get().is_present() => {
                let e = slot.get();
                Ok(Some((e.frame(), e.flags())))
            }
            _ => Ok(None),
        }
    }

    /// `remove(va)`. Idempotent: unmapped `va` is a no-op.
    pub fn remove(&mut self, va: usize) -> KernelResult<()> {
        if let Some(mut slot) = self.walk(va, false)? {
            if slot.get().is_present() {
                let frame = slot.get().frame();
                slot.clear();
                invalidate(self, va);
                FRAME_ALLOCATOR.lock().decref(frame)?;
            }
        }
        Ok(())
    }

    /// `boot_map_region(va, size, pa, perm)`. Static identity-style mapping
    /// used to build the kernel's own address space; does not touch
    /// refcounts, since these mappings outlive any single task and are
    /// never torn down by `destroy`.
    pub fn boot_map_region(&mut self, va: usize, size: usize, pa: usize, perm: PdeFlags) {
        let mut off = 0;
        while off < size {
            let pde_idx = memlayout::pdx(va + off);
            let pde = self.pde_table()[pde_idx];
            let pt_frame = if pde.is_present() {
                pde.frame()
            } else {
                let mut alloc = FRAME_ALLOCATOR.lock();
                let frame = alloc
                    .alloc(AllocFlags::ZERO)
                    .expect("boot_map_region must not run out of memory");
                drop(alloc);
                self.pde_table()[pde_idx] = RawEntry::new(
                    frame,
                    PdeFlags::PRESENT | PdeFlags::WRITABLE | PdeFlags::USER,
                );
                frame
            };
            let pt = entry_table(pt_frame);
            let pte_idx = memlayout::ptx(va + off);
            pt[pte_idx] = RawEntry::new(Frame::from_phys_addr(pa + off), perm | PdeFlags::PRESENT);
            off += PGSIZE;
        }
    }
}

/// A live reference to one PTE slot, returned by `walk`.
pub struct PteSlot<'a> {
    table: &'a mut [RawEntry; ENTRIES],
    index: usize,
}

impl PteSlot<'_> {
    pub fn get(&self) -> RawEntry {
        self.table[self.index]
    }

    fn set(&mut self, frame: Frame, flags: PdeFlags) {
        self.table[self.index] = RawEntry::new(frame, flags);
    }

    fn clear(&mut self) {
        self.table[self.index] = RawEntry::empty();
    }
}

/// TLB invalidation is required only when editing the page table the
/// current CPU is actively using (cross-CPU shootdown is out of scope; see
/// SPEC_FULL.md §9's resolved open question).
fn invalidate(dir: &PageDirectory, va: usize) {
    if crate::sync::current_pagedir_frame() == Some(dir.frame) {
        // SAFETY: `va` is a valid virtual address in the currently loaded
        // address space.
        #[cfg(target_arch = "x86")]
        unsafe {
            x86::tlb::flush(va);
        }
        #[cfg(not(target_arch = "x86"))]
        let _ = va;
    }
}

/// `mmio_map_region(pa, size) -> va`. Bump-allocates inside
/// `MMIOBASE..MMIOLIM`; panics (rather than returning an error) on
/// exhaustion, matching the original's treatment of a boot-time
/// misconfiguration as fatal.
pub fn mmio_map_region(kernel_dir: &mut PageDirectory, pa: usize, size: usize) -> usize {
    use core::sync::atomic::{AtomicUsize, Ordering};
    static NEXT: AtomicUsize = AtomicUsize::new(MMIOBASE);

    let size = memlayout::round_up(size, PGSIZE);
    let va = NEXT.fetch_add(size, Ordering::SeqCst);
    assert!(va + size <= MMIOLIM, "MMIO region exhausted");

    kernel_dir.boot_map_region(
        va,
        size,
        pa,
        PdeFlags::WRITABLE | PdeFlags::CACHEDISABLE | PdeFlags::WRITETHROUGH,
    );
    va
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_dir() -> (PageDirectory, Frame) {
        crate::mm::pmem::FRAME_ALLOCATOR
            .lock()
            .init(4096, |i| i == 0);
        let frame = FRAME_ALLOCATOR.lock().alloc(AllocFlags::ZERO).unwrap();
        (PageDirectory::from_frame(frame), frame)
    }

    #[test]
    fn clone_kernel_mappings_self_maps_uvpt() {
        let (mut kdir, kframe) = fresh_dir();
        kdir.boot_map_region(memlayout::KERNBASE, PGSIZE, 0, PdeFlags::WRITABLE);
        set_kernel_pgdir(kframe);

        let frame = FRAME_ALLOCATOR.lock().alloc(AllocFlags::ZERO).unwrap();
        let mut dir = PageDirectory::from_frame(frame);
        dir.clone_kernel_mappings().unwrap();

        let uvpt_pde = dir.pde_table()[memlayout::pdx(UVPT)];
        assert_eq!(uvpt_pde.frame(), dir.frame);
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let (mut dir, _root) = fresh_dir();
        let frame = FRAME_ALLOCATOR.lock().alloc(AllocFlags::empty()).unwrap();
        dir.insert(frame, 0x1000, PdeFlags::USER | PdeFlags::WRITABLE)
            .unwrap();
        let (found, perm) = dir.lookup(0x1000).unwrap().unwrap();
        assert_eq!(found, frame);
        assert!(perm.contains(PdeFlags::USER | PdeFlags::PRESENT));
    }

    #[test]
    fn remove_is_idempotent() {
        let (mut dir, _root) = fresh_dir();
        dir.remove(0x2000).unwrap();
        dir.remove(0x2000).unwrap();
        assert!(dir.lookup(0x2000).unwrap().is_none());
    }

    #[test]
    fn remap_same_frame_same_va_keeps_refcount_positive() {
        let (mut dir, _root) = fresh_dir();
        let frame = FRAME_ALLOCATOR.lock().alloc(AllocFlags::empty()).unwrap();
        dir.insert(frame, 0x3000, PdeFlags::USER).unwrap();
        let before = FRAME_ALLOCATOR.lock().refcount(frame);
        dir.insert(frame, 0x3000, PdeFlags::USER | PdeFlags::WRITABLE)
            .unwrap();
        let after = FRAME_ALLOCATOR.lock().refcount(frame);
        assert_eq!(before, after, "remapping the same frame at the same va must not transiently free it");
    }

    #[test]
    fn insert_remove_restores_refcount() {
        let (mut dir, _root) = fresh_dir();
        let frame = FRAME_ALLOCATOR.lock().alloc(AllocFlags::empty()).unwrap();
        let before = FRAME_ALLOCATOR.lock().refcount(frame);
        dir.insert(frame, 0x4000, PdeFlags::USER).unwrap();
        dir.remove(0x4000).unwrap();
        let after = FRAME_ALLOCATOR.lock().refcount(frame);
        assert_eq!(before, after);
    }
}
