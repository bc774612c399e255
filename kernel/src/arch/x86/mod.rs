//! x86 (32-bit protected mode) architecture glue: GDT/IDT setup and the
//! hand-written assembly trampolines assembled by `build.rs`.

pub mod gdt;
pub mod idt;

use crate::mm::pmem::Frame;
use crate::task::{TaskId, TASK_TABLE};
use crate::trap::frame::TrapFrame;

extern "C" {
    /// Restores GPRs/segment selectors from `*tf` and `iret`s to user mode.
    /// Defined in `src/arch/x86/asm/env_pop_tf.S`.
    fn env_pop_tf_asm(tf: *const TrapFrame) -> !;
}

/// `env_pop_tf(id)`: load `id`'s page directory into CR3 (already done by
/// the caller via `sync::set_current_pagedir_frame`, reflected into the
/// hardware by this call), then jump into its saved trap frame. Never
/// returns.
///
/// # Safety
/// `id` must name a live task whose saved trap frame and page directory are
/// fully initialised; this function loads CR3 and performs a privilege-level
/// transition based on raw selector values in the trap frame.
pub unsafe fn env_pop_tf(id: TaskId) -> ! {
    let (frame, tf) = {
        let table = TASK_TABLE.lock();
        let task = table.get(id).expect("env_pop_tf: task vanished");
        (task.pagedir_frame, task.trapframe)
    };
    // SAFETY: `frame` is the task's own page directory, allocated and
    // populated by `task::lifecycle::alloc`/`load_image`.
    unsafe {
        x86::controlregs::cr3_write(frame.phys_addr() as u64);
    }
    // SAFETY: `tf` was copied out of a live task's record under the lock
    // above and describes a valid ring-3 return state.
    unsafe { env_pop_tf_asm(&tf) }
}

/// Load `frame` into CR3 without touching the current task or trap frame —
/// used when stepping a CPU off a task's address space before that task's
/// directory is torn down (self-destroy) or before halting.
///
/// # Safety
/// `frame` must be a live, fully-populated page directory (the kernel's own,
/// or another task's) that will remain valid for as long as this CPU keeps
/// it loaded.
pub unsafe fn switch_pgdir(frame: Frame) {
    // SAFETY: caller's contract.
    unsafe {
        x86::controlregs::cr3_write(frame.phys_addr() as u64);
    }
}

/// Park this CPU in a halted, interrupt-enabled loop.
///
/// # Safety
/// Must only be called with the big kernel lock already released — `hlt`
/// with interrupts enabled is how this CPU waits for the next timer IRQ to
/// re-enter the scheduler.
pub unsafe fn halt_loop() -> ! {
    loop {
        // SAFETY: `sti; hlt` is safe to execute repeatedly; the kernel's
        // timer handler is responsible for eventually calling back into
        // `sched::sched_yield`.
        unsafe {
            core::arch::asm!("sti", "hlt", options(nomem, nostack));
        }
    }
}

pub fn init_gdt() {
    gdt::init_cpu(crate::sync::this_cpu(), crate::memlayout::KSTACKTOP as u32);
}

pub fn init_idt() {
    idt::init();
}
