//! LOCK — the big kernel lock and per-CPU state.
//!
//! A single spinlock serialises all kernel-mode execution that touches
//! shared state (the task table, the frame free list, the IDT). Per-CPU
//! state (the currently running task, this CPU's halt status) is kept in a
//! fixed-size array indexed by CPU id rather than true thread-local storage,
//! matching the original's `thiscpu`/`cpunum()` pattern.

use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use spin::Mutex;

use crate::mm::pmem::Frame;
use crate::task::TaskId;

pub const MAX_CPUS: usize = 8;

/// Whether a CPU is actively running kernel/user code, or halted awaiting
/// an interrupt. Mirrors the original's `CPU_STARTED` / `CPU_HALTED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuStatus {
    Started = 0,
    Halted = 1,
}

struct PerCpu {
    status: AtomicU8,
    current_task: Mutex<Option<TaskId>>,
    current_pagedir: AtomicUsize,
}

impl PerCpu {
    const fn new() -> Self {
        PerCpu {
            status: AtomicU8::new(CpuStatus::Started as u8),
            current_task: Mutex::new(None),
            current_pagedir: AtomicUsize::new(0),
        }
    }
}

const NONE_CPU: PerCpu = PerCpu::new();
static PER_CPU: [PerCpu; MAX_CPUS] = [NONE_CPU; MAX_CPUS];

/// Which physical CPU is executing this code. A real kernel reads this out
/// of a per-CPU APIC id or GS-relative slot; boot/SMP bring-up specifics are
/// out of scope here, so tests and the uniprocessor boot path simply use 0.
pub fn this_cpu() -> usize {
    0
}

/// The big kernel lock. Held for the duration of any kernel-mode code path
/// that touches the task table, the frame allocator, or the IDT.
pub static BIG_KERNEL_LOCK: Mutex<()> = Mutex::new(());

/// Acquire the big kernel lock. Returns a guard; dropping it releases the
/// lock. Exposed as a free function (rather than `BIG_KERNEL_LOCK.lock()`
/// directly) so call sites read like the original's `lock_kernel()`.
pub fn lock_kernel() -> spin::MutexGuard<'static, ()> {
    BIG_KERNEL_LOCK.lock()
}

/// Swap this CPU's status, returning the previous value — used by `trap`
/// to detect "this CPU was halted inside the scheduler" (§4.4 step 3) and
/// by `sched::halt` to mark the CPU halted.
pub fn swap_cpu_status(new: CpuStatus) -> CpuStatus {
    let prev = PER_CPU[this_cpu()]
        .status
        .swap(new as u8, Ordering::SeqCst);
    if prev == CpuStatus::Halted as u8 {
        CpuStatus::Halted
    } else {
        CpuStatus::Started
    }
}

/// The task currently running on this CPU, if any.
pub fn current_task() -> Option<TaskId> {
    *PER_CPU[this_cpu()].current_task.lock()
}

/// Set the task currently running on this CPU.
pub fn set_current_task(id: Option<TaskId>) {
    *PER_CPU[this_cpu()].current_task.lock() = id;
}

/// The page-directory frame currently loaded on this CPU (tracked in
/// software; the hardware source of truth is CR3).
pub fn current_pagedir_frame() -> Option<Frame> {
    let raw = PER_CPU[this_cpu()].current_pagedir.load(Ordering::Relaxed);
    if raw == 0 {
        None
    } else {
        Some(Frame((raw - 1) as u32))
    }
}

/// Record the page-directory frame this CPU just switched to.
pub fn set_current_pagedir_frame(frame: Frame) {
    PER_CPU[this_cpu()]
        .current_pagedir
        .store(frame.0 as usize + 1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_status_swap_reports_previous() {
        let prev = swap_cpu_status(CpuStatus::Halted);
        assert_eq!(prev, CpuStatus::Started);
        let prev2 = swap_cpu_status(CpuStatus::Started);
        assert_eq!(prev2, CpuStatus::Halted);
    }

    #[test]
    fn current_task_round_trips() {
        set_current_task(None);
        assert_eq!(current_task(), None);
        let id = TaskId::new(7, 3);
        set_current_task(Some(id));
        assert_eq!(current_task(), Some(id));
        set_current_task(None);
    }
}
