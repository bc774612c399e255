//! Page-fault handler and the user-level upcall frame it synthesises
//! (§4.4.1). Grounded on `kern/trap.c`'s `page_fault_handler`.

use crate::memlayout::{PGSIZE, UXSTACKTOP};
use crate::mm::vm::{PageDirectory, PdeFlags};
use crate::task::{TaskId, TaskStatus, TASK_TABLE};
use crate::trap::frame::{is_user_mode, TrapFrame, UserTrapFrame, USER_TRAPFRAME_SIZE};

/// Reads CR2, the hardware fault-address register. Out of scope's "boot
/// loader"/register-access minutiae aside, PGTAB needs this one value.
fn fault_address() -> usize {
    #[cfg(target_arch = "x86")]
    {
        // SAFETY: CR2 is always readable from kernel mode.
        unsafe { x86::controlregs::cr2() as usize }
    }
    #[cfg(not(target_arch = "x86"))]
    {
        0
    }
}

/// `page_fault_handler(frame)`. Kernel-mode faults are always fatal.
/// A user-mode fault with no registered upcall destroys the task; otherwise
/// a [`UserTrapFrame`] is pushed onto the task's user exception stack and
/// the task is resumed at its upcall entry point.
pub fn handle(id: TaskId, tf: &TrapFrame) {
    let fault_va = fault_address();

    if !is_user_mode(tf.cs) {
        panic!(
            "page fault in kernel mode at {:#x} (eip {:#x})",
            fault_va, tf.eip
        );
    }

    let upcall = {
        let table = TASK_TABLE.lock();
        table.get(id).map(|t| t.pgfault_upcall).unwrap_or(0)
    };
    if upcall == 0 {
        log::warn!("task {:?} faulted at {:#x} with no pgfault upcall", id, fault_va);
        let _ = crate::task::lifecycle::destroy(id);
        return;
    }

    let pgdir_frame = {
        let table = TASK_TABLE.lock();
        match table.get(id) {
            Some(t) => t.pagedir_frame,
            None => return,
        }
    };
    let mut dir = PageDirectory::from_frame(pgdir_frame);

    // Nested fault: the trap-time esp already lies on the exception stack.
    // Leave a 4-byte gap below the previous frame so the restart stub can
    // tell the two apart (§4.4.1, boundary behaviour in §8).
    let trap_esp = tf.esp as usize;
    let dst = if trap_esp >= UXSTACKTOP - PGSIZE && trap_esp < UXSTACKTOP {
        trap_esp - USER_TRAPFRAME_SIZE - 4
    } else {
        UXSTACKTOP - USER_TRAPFRAME_SIZE
    };

    match dir.lookup(dst) {
        Ok(Some((_frame, flags))) if flags.contains(PdeFlags::USER | PdeFlags::WRITABLE) => {}
        _ => {
            log::warn!(
                "task {:?}: exception stack at {:#x} not user-writable, destroying",
                id,
                dst
            );
            let _ = crate::task::lifecycle::destroy(id);
            return;
        }
    }

    let utf = UserTrapFrame {
        regs: tf.regs,
        es: tf.es,
        ds: tf.ds,
        trapno: tf.trapno,
        err: tf.err,
        fault_va: fault_va as u32,
        eip: tf.eip,
        cs: tf.cs,
        eflags: tf.eflags,
        esp: tf.esp,
        ss: tf.ss,
    };

    // SAFETY: `dst`'s page was just confirmed present, user, and writable
    // in `id`'s own address space, and is reachable through the kernel
    // direct map since the fault was handled with `id`'s directory active.
    unsafe {
        let phys = dir.lookup(crate::memlayout::round_down(dst, PGSIZE)).unwrap().unwrap().0;
        let page_off = crate::memlayout::page_offset(dst);
        let out = (crate::mm::vm::direct_map(phys.phys_addr()) + page_off) as *mut UserTrapFrame;
        out.write_unaligned(utf);
    }

    let mut table = TASK_TABLE.lock();
    if let Some(task) = table.get_mut(id) {
        task.trapframe.eip = upcall as u32;
        task.trapframe.esp = dst as u32;
        task.status = TaskStatus::Runnable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::pmem::{AllocFlags, FRAME_ALLOCATOR};
    use crate::mm::vm::set_kernel_pgdir;
    use crate::task::lifecycle;

    fn setup() -> TaskId {
        FRAME_ALLOCATOR.lock().init(4096, |i| i == 0);
        let kframe = FRAME_ALLOCATOR.lock().alloc(AllocFlags::ZERO).unwrap();
        set_kernel_pgdir(kframe);
        TASK_TABLE.lock().reset();
        lifecycle::alloc(TaskId::SELF).unwrap()
    }

    #[test]
    fn no_upcall_registered_destroys_the_task() {
        let id = setup();
        let tf = TrapFrame {
            cs: 0x1B, // user code, RPL 3
            ..Default::default()
        };
        handle(id, &tf);
        assert!(TASK_TABLE.lock().get(id).is_none());
    }

    #[test]
    #[should_panic(expected = "page fault in kernel mode")]
    fn kernel_mode_fault_panics() {
        let id = setup();
        let tf = TrapFrame {
            cs: 0x08, // kernel code
            ..Default::default()
        };
        handle(id, &tf);
    }
}
