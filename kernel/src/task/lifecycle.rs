//! TASK lifecycle: `alloc`, `create`, `destroy` (§4.3).

use crate::error::{KernelError, KernelResult};
use crate::memlayout::{self, USTACKTOP};
use crate::mm::pmem::{AllocFlags, FRAME_ALLOCATOR};
use crate::mm::vm::{PageDirectory, PdeFlags};
use crate::task::loader;
use crate::task::pcb::{TaskId, TaskStatus, TaskType};
use crate::task::table::TASK_TABLE;
use crate::trap::frame::TrapFrame;

/// Segment selectors a freshly allocated task's saved frame is given.
/// `| 3` sets RPL=3; real values come from the GDT layout restored in
/// SPEC_FULL.md §2.2.
pub mod selectors {
    pub const GD_UT: u16 = 0x18;
    pub const GD_UD: u16 = 0x20;
    pub const RPL_USER: u16 = 3;
}

/// `alloc(parent) -> Task`. Draws a free slot, builds the task's page
/// directory (kernel entries cloned, self-mapped at `UVPT`), and seeds the
/// saved trap frame with the initial user register state.
pub fn alloc(parent: TaskId) -> KernelResult<TaskId> {
    let pgdir_frame = FRAME_ALLOCATOR
        .lock()
        .alloc(AllocFlags::ZERO)
        .ok_or(KernelError::OutOfMemory)?;
    FRAME_ALLOCATOR.lock().incref(pgdir_frame);

    let mut dir = PageDirectory::from_frame(pgdir_frame);
    dir.clone_kernel_mappings()?;

    let id = TASK_TABLE.lock().alloc(pgdir_frame, parent)?;

    let mut tf = TrapFrame::default();
    tf.ds = selectors::GD_UD | selectors::RPL_USER;
    tf.es = selectors::GD_UD | selectors::RPL_USER;
    tf.ss = selectors::GD_UD | selectors::RPL_USER;
    tf.cs = selectors::GD_UT | selectors::RPL_USER;
    tf.esp = USTACKTOP as u32;
    tf.eflags = 1 << 9; // IF

    let mut table = TASK_TABLE.lock();
    if let Some(task) = table.get_mut(id) {
        task.trapframe = tf;
        task.pgfault_upcall = 0;
        task.ipc.recving = false;
    }
    drop(table);

    Ok(id)
}

/// `create(image, kind) -> Task`. `alloc`s a task, loads the ELF image into
/// it, and — for `TaskType::Fs` — raises IOPL in the saved eflags so the
/// task may execute port I/O.
pub fn create(image: &[u8], kind: TaskType) -> KernelResult<TaskId> {
    let id = alloc(TaskId::SELF)?;

    let pgdir_frame = TASK_TABLE
        .lock()
        .get(id)
        .ok_or(KernelError::BadTask)?
        .pagedir_frame;
    let mut dir = PageDirectory::from_frame(pgdir_frame);
    let entry = loader::load_image(&mut dir, image)?;

    let mut table = TASK_TABLE.lock();
    if let Some(task) = table.get_mut(id) {
        task.trapframe.eip = entry;
        task.kind = kind;
        if kind == TaskType::Fs {
            task.trapframe.eflags |= 3 << 12; // IOPL = 3
        }
    }
    Ok(id)
}

/// `destroy(task)`. If `task` is `Running` on another CPU (i.e. it isn't
/// this CPU's current task), mark it `Dying` and return immediately — the
/// owning CPU reaps it on its next trap (`trap::dispatch::trap` already
/// implements that half). Otherwise walk every present user PDE/PTE below
/// `UTOP`, decrefs each mapped frame and its leaf page table, then decrefs
/// the directory itself. If destroying the currently running task, this CPU
/// is switched onto the kernel's page directory first, so the victim's
/// frame is never freed out from under the directory the CPU is actively
/// using — matching `env_free`/`env_destroy`'s CR3 switch-away.
pub fn destroy(id: TaskId) -> KernelResult<()> {
    let is_self = crate::sync::current_task() == Some(id);

    let pgdir_frame = {
        let mut table = TASK_TABLE.lock();
        let task = table.get_mut(id).ok_or(KernelError::BadTask)?;
        if task.status == TaskStatus::Running && !is_self {
            task.status = TaskStatus::Dying;
            return Ok(());
        }
        task.status = TaskStatus::Dying;
        task.pagedir_frame
    };

    if is_self {
        if let Some(kernel_frame) = crate::mm::vm::kernel_pgdir_frame() {
            // SAFETY: the kernel directory is always live once boot has
            // run `set_kernel_pgdir`; switching to it before freeing the
            // victim's own directory leaves this CPU with a valid CR3
            // throughout.
            unsafe { crate::arch::x86::switch_pgdir(kernel_frame) };
            crate::sync::set_current_pagedir_frame(kernel_frame);
        }
    }

    let mut dir = PageDirectory::from_frame(pgdir_frame);
    let mut va = 0usize;
    while va < memlayout::UTOP {
        if dir.lookup(va).ok().flatten().is_some() {
            dir.remove(va)?;
        }
        va += memlayout::PGSIZE;
    }

    FRAME_ALLOCATOR.lock().decref(pgdir_frame)?;
    TASK_TABLE.lock().free(id);

    if is_self {
        crate::sync::set_current_task(None);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_seeds_user_segment_selectors() {
        FRAME_ALLOCATOR.lock().init(4096, |i| i == 0);
        let kframe = FRAME_ALLOCATOR.lock().alloc(AllocFlags::ZERO).unwrap();
        crate::mm::vm::set_kernel_pgdir(kframe);
        TASK_TABLE.lock().reset();

        let id = alloc(TaskId::SELF).unwrap();
        let table = TASK_TABLE.lock();
        let task = table.get(id).unwrap();
        assert_eq!(task.trapframe.cs & 0x3, selectors::RPL_USER);
        assert_eq!(task.trapframe.esp, USTACKTOP as u32);
    }

    #[test]
    fn destroy_frees_the_slot() {
        FRAME_ALLOCATOR.lock().init(4096, |i| i == 0);
        let kframe = FRAME_ALLOCATOR.lock().alloc(AllocFlags::ZERO).unwrap();
        crate::mm::vm::set_kernel_pgdir(kframe);
        TASK_TABLE.lock().reset();

        let id = alloc(TaskId::SELF).unwrap();
        destroy(id).unwrap();
        assert!(TASK_TABLE.lock().get(id).is_none());
    }
}
