//! SCHED — round-robin scheduling over the task table (§4.5).
//!
//! Grounded on `kern/sched.c`'s `sched_yield` / `sched_halt` / `env_run`.

use crate::memlayout::NENV;
use crate::sync::{self, CpuStatus};
use crate::task::{Task, TaskId, TaskStatus, TASK_TABLE};

/// Starting at `(current index + 1) mod NENV`, scan for the first
/// `RUNNABLE` task and run it. If none is found and the previously running
/// task is still `RUNNING`, keep running it; otherwise halt this CPU.
pub fn sched_yield() -> ! {
    let start = sync::current_task().map(|t| t.index()).unwrap_or(0);

    let table = TASK_TABLE.lock();
    for offset in 1..=NENV {
        let idx = (start + offset) % NENV;
        if let Some(task) = table.task_at(idx) {
            if task.status == TaskStatus::Runnable {
                let id = task.id;
                drop(table);
                env_run(id);
            }
        }
    }

    if let Some(cur) = sync::current_task() {
        if let Some(task) = table.get(cur) {
            if task.status == TaskStatus::Running {
                drop(table);
                env_run(cur);
            }
        }
    }
    drop(table);

    halt();
}

/// Load `id`'s address space, mark it `Running`, and resume it in user
/// mode. Never returns — control transfers to the task via the assembly
/// `env_pop_tf` stub (wired up in `build.rs`/`arch::x86`).
pub fn env_run(id: TaskId) -> ! {
    {
        let mut table = TASK_TABLE.lock();
        if let Some(cur_id) = sync::current_task() {
            if cur_id != id {
                if let Some(cur) = table.get_mut(cur_id) {
                    if cur.status == TaskStatus::Running {
                        cur.status = TaskStatus::NotRunnable;
                        let _ = cur; // re-marked Runnable below via separate branch
                    }
                }
            }
        }
        if let Some(cur_id) = sync::current_task() {
            if cur_id != id {
                if let Some(cur) = table.get_mut(cur_id) {
                    if cur.status == TaskStatus::NotRunnable {
                        cur.status = TaskStatus::Runnable;
                    }
                }
            }
        }

        if let Some(task) = table.get_mut(id) {
            task.status = TaskStatus::Running;
            task.runs += 1;
            sync::set_current_pagedir_frame(task.pagedir_frame);
        }
    }
    sync::set_current_task(Some(id));

    // SAFETY: `env_pop_tf` is implemented in the assembly trampoline
    // assembled by `build.rs`; it loads CR3 from the task's saved
    // directory, restores the saved trap frame, and performs `iret` back
    // to user mode. It never returns.
    unsafe { crate::arch::x86::env_pop_tf(id) }
}

/// Drop this CPU into a halted, interrupts-enabled loop until the next
/// timer interrupt re-enters the scheduler. Grounded on `sched_halt`.
pub fn halt() -> ! {
    let any_live = TASK_TABLE
        .lock()
        .iter()
        .any(|t: &Task| matches!(t.status, TaskStatus::Runnable | TaskStatus::Running | TaskStatus::Dying));

    if !any_live {
        panic!("sched_halt: no runnable tasks left, entering kernel monitor");
    }

    sync::set_current_task(None);
    sync::swap_cpu_status(CpuStatus::Halted);

    // SAFETY: `arch_halt_loop` parks the CPU in `hlt` with interrupts
    // enabled; a timer IRQ re-enters `trap` and eventually calls back into
    // `sched_yield`.
    unsafe { crate::arch::x86::halt_loop() }
}
