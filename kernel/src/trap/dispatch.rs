//! `trap(frame)` — the entry point every assembly vector stub calls into,
//! and the vector dispatch table (§4.4).

use core::sync::atomic::{AtomicBool, Ordering};

use crate::mm::vm::PageDirectory;
use crate::sched;
use crate::sync::{self, CpuStatus};
use crate::syscall;
use crate::task::{TaskStatus, TASK_TABLE};
use crate::trap::frame::{is_user_mode, vectors, TrapFrame};
use crate::trap::pagefault;

/// Set by the panic handler before it halts, so a trap arriving on another
/// CPU mid-panic halts immediately instead of racing the panicking CPU.
pub static PANICKING: AtomicBool = AtomicBool::new(false);

/// Clear eflags.DF; some compiled user code assumes it is clear at call
/// boundaries.
fn clear_direction_flag() {
    #[cfg(target_arch = "x86")]
    // SAFETY: `cld` has no side effects beyond the flags register.
    unsafe {
        core::arch::asm!("cld", options(nomem, nostack));
    }
}

/// The common trap handler. Called by every assembly vector stub with a
/// pointer to the frame it just pushed.
///
/// # Safety
/// `tf` must point to a valid, fully-populated [`TrapFrame`] built by the
/// matching assembly stub on the current CPU's stack.
#[no_mangle]
pub unsafe extern "C" fn trap(tf: *mut TrapFrame) {
    clear_direction_flag();

    if PANICKING.load(Ordering::SeqCst) {
        // SAFETY: halting is always safe; a panicking CPU wants every
        // other CPU quiesced.
        unsafe {
            crate::arch::x86::halt_loop();
        }
    }

    // A CPU that was halted does not hold the big lock; every other path
    // into `trap` (a nested trap from kernel mode, or a trap from user
    // mode) does, or is about to acquire it below.
    let was_halted = sync::swap_cpu_status(CpuStatus::Started) == CpuStatus::Halted;

    // SAFETY: `tf` is valid per this function's safety contract.
    let frame = unsafe { *tf };
    let from_user = is_user_mode(frame.cs);

    let _guard = if from_user || was_halted {
        Some(sync::lock_kernel())
    } else {
        None
    };

    let current = sync::current_task();
    if from_user {
        if let Some(id) = current {
            let dying = {
                let table = TASK_TABLE.lock();
                table.get(id).map(|t| t.status == TaskStatus::Dying).unwrap_or(false)
            };
            if dying {
                let _ = crate::task::lifecycle::destroy(id);
                drop(_guard);
                sched::sched_yield();
            }
            let mut table = TASK_TABLE.lock();
            if let Some(task) = table.get_mut(id) {
                task.trapframe = frame;
            }
        }
    }

    dispatch_by_vector(current, &frame);

    drop(_guard);
    match sync::current_task() {
        Some(id) => {
            let running = TASK_TABLE
                .lock()
                .get(id)
                .map(|t| t.status == TaskStatus::Running)
                .unwrap_or(false);
            if running {
                sched::env_run(id);
            } else {
                sched::sched_yield();
            }
        }
        None => sched::sched_yield(),
    }
}

fn dispatch_by_vector(current: Option<crate::task::TaskId>, frame: &TrapFrame) {
    match frame.trapno {
        vectors::PAGE_FAULT => {
            if let Some(id) = current {
                pagefault::handle(id, frame);
            }
        }
        vectors::BREAKPOINT => {
            log::info!("breakpoint trap; no debug monitor in this build");
        }
        vectors::SYSCALL => {
            if let Some(id) = current {
                let pgdir_frame = TASK_TABLE.lock().get(id).map(|t| t.pagedir_frame);
                if let Some(pgdir_frame) = pgdir_frame {
                    let mut dir = PageDirectory::from_frame(pgdir_frame);
                    let regs = frame.regs;
                    let ret = syscall::dispatch(
                        id,
                        &mut dir,
                        regs.eax,
                        regs.edx,
                        regs.ecx,
                        regs.ebx,
                        regs.edi,
                        regs.esi,
                    );
                    let mut table = TASK_TABLE.lock();
                    if let Some(task) = table.get_mut(id) {
                        task.trapframe.regs.eax = ret as u32;
                    }
                }
            }
        }
        vectors::IRQ_TIMER => {
            // LAPIC EOI and CPU-0 tick bookkeeping are out of scope
            // (timer programming is named explicitly in §1); the
            // scheduler invocation after this function returns is what
            // this vector exists for.
        }
        vectors::IRQ_KBD | vectors::IRQ_SERIAL => {
            // Device drain is out of scope; draining is the
            // responsibility of the (unimplemented) console driver.
        }
        vectors::IRQ_SPURIOUS => {}
        other => {
            if let Some(id) = current {
                log::warn!("task {:?}: unhandled trap {}, destroying", id, other);
                let _ = crate::task::lifecycle::destroy(id);
            } else {
                panic!("unhandled trap {} from kernel mode", other);
            }
        }
    }
}
