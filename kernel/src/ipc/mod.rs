//! IPC — synchronous send/recv rendezvous with optional page transfer
//! (§4.7). Grounded on `kern/syscall.c`'s `sys_ipc_recv` /
//! `sys_ipc_try_send`.

use crate::error::{KernelError, KernelResult};
use crate::memlayout::UTOP;
use crate::mm::vm::{PageDirectory, PdeFlags};
use crate::task::{valid_user_perm, TaskId, TaskStatus, TASK_TABLE};

/// `recv(dva)`. Parks the caller: sets `recving`, records `dst_va`, marks
/// the task `NotRunnable`. Does not itself yield — the syscall dispatcher
/// calls `sched::sched_yield()` immediately after this returns, matching
/// the original's "does not observe a return" note.
pub fn recv(caller: TaskId, dva: usize) -> KernelResult<()> {
    if dva < UTOP && dva % crate::memlayout::PGSIZE != 0 {
        return Err(KernelError::InvalidArgument);
    }
    let mut table = TASK_TABLE.lock();
    let task = table.get_mut(caller).ok_or(KernelError::BadTask)?;
    task.ipc.recving = true;
    task.ipc.dst_va = dva;
    task.status = TaskStatus::NotRunnable;
    Ok(())
}

/// `try_send(caller, target, val, sva, perm)`. `caller_dir` is the
/// caller's page directory (needed to validate and look up `sva`);
/// `target_dir` the receiver's (to map the transferred page, if any).
pub fn try_send(
    caller: TaskId,
    caller_dir: &mut PageDirectory,
    target: TaskId,
    target_dir: &mut PageDirectory,
    val: u32,
    sva: usize,
    perm: PdeFlags,
) -> KernelResult<()> {
    {
        let table = TASK_TABLE.lock();
        let recv_task = table.get(target).ok_or(KernelError::BadTask)?;
        if !recv_task.ipc.recving {
            return Err(KernelError::IpcNotRecv);
        }
    }

    let mut transferred_perm = PdeFlags::empty();
    if sva < UTOP {
        if sva % crate::memlayout::PGSIZE != 0 {
            return Err(KernelError::InvalidArgument);
        }
        if !valid_user_perm(perm) {
            return Err(KernelError::InvalidArgument);
        }
        let (frame, src_flags) = caller_dir
            .lookup(sva)
            .ok()
            .flatten()
            .ok_or(KernelError::InvalidArgument)?;
        if perm.contains(PdeFlags::WRITABLE) && !src_flags.contains(PdeFlags::WRITABLE) {
            return Err(KernelError::InvalidArgument);
        }

        let dst_va = {
            let table = TASK_TABLE.lock();
            table.get(target).ok_or(KernelError::BadTask)?.ipc.dst_va
        };
        if dst_va < UTOP {
            target_dir.insert(frame, dst_va, perm)?;
            transferred_perm = perm;
        }
    }

    let mut table = TASK_TABLE.lock();
    let recv_task = table.get_mut(target).ok_or(KernelError::BadTask)?;
    recv_task.ipc.value = val;
    recv_task.ipc.from = caller.raw();
    recv_task.ipc.perm = transferred_perm.bits();
    recv_task.ipc.recving = false;
    recv_task.status = TaskStatus::Runnable;
    recv_task.trapframe.regs.eax = 0;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::pmem::{AllocFlags, FRAME_ALLOCATOR};
    use crate::mm::vm::set_kernel_pgdir;
    use crate::task::lifecycle;

    fn setup() -> (TaskId, TaskId) {
        FRAME_ALLOCATOR.lock().init(4096, |i| i == 0);
        let kframe = FRAME_ALLOCATOR.lock().alloc(AllocFlags::ZERO).unwrap();
        set_kernel_pgdir(kframe);
        TASK_TABLE.lock().reset();
        let a = lifecycle::alloc(TaskId::SELF).unwrap();
        let b = lifecycle::alloc(TaskId::SELF).unwrap();
        (a, b)
    }

    #[test]
    fn try_send_to_non_recving_task_fails_without_side_effects() {
        let (a, b) = setup();
        let a_frame = TASK_TABLE.lock().get(a).unwrap().pagedir_frame;
        let b_frame = TASK_TABLE.lock().get(b).unwrap().pagedir_frame;
        let mut a_dir = PageDirectory::from_frame(a_frame);
        let mut b_dir = PageDirectory::from_frame(b_frame);

        let res = try_send(a, &mut a_dir, b, &mut b_dir, 7, UTOP, PdeFlags::empty());
        assert_eq!(res, Err(KernelError::IpcNotRecv));
        assert_eq!(TASK_TABLE.lock().get(b).unwrap().status, TaskStatus::Runnable);
    }

    #[test]
    fn recv_then_send_delivers_value() {
        let (a, b) = setup();
        recv(b, UTOP).unwrap();
        assert_eq!(TASK_TABLE.lock().get(b).unwrap().status, TaskStatus::NotRunnable);

        let a_frame = TASK_TABLE.lock().get(a).unwrap().pagedir_frame;
        let b_frame = TASK_TABLE.lock().get(b).unwrap().pagedir_frame;
        let mut a_dir = PageDirectory::from_frame(a_frame);
        let mut b_dir = PageDirectory::from_frame(b_frame);

        try_send(a, &mut a_dir, b, &mut b_dir, 7, UTOP, PdeFlags::empty()).unwrap();

        let table = TASK_TABLE.lock();
        let recv_task = table.get(b).unwrap();
        assert_eq!(recv_task.status, TaskStatus::Runnable);
        assert_eq!(recv_task.ipc.value, 7);
        assert_eq!(recv_task.ipc.from, a.raw());
        assert!(!recv_task.ipc.recving);
    }

    #[test]
    fn ipc_with_page_transfer_maps_frame_in_receiver() {
        let (a, b) = setup();
        let a_frame = TASK_TABLE.lock().get(a).unwrap().pagedir_frame;
        let b_frame = TASK_TABLE.lock().get(b).unwrap().pagedir_frame;
        let mut a_dir = PageDirectory::from_frame(a_frame);
        let mut b_dir = PageDirectory::from_frame(b_frame);

        let page_frame = FRAME_ALLOCATOR.lock().alloc(AllocFlags::ZERO).unwrap();
        a_dir
            .insert(page_frame, 0x400000, PdeFlags::USER | PdeFlags::PRESENT)
            .unwrap();

        recv(b, 0x400000).unwrap();
        try_send(
            a,
            &mut a_dir,
            b,
            &mut b_dir,
            42,
            0x400000,
            PdeFlags::USER | PdeFlags::PRESENT,
        )
        .unwrap();

        let (found, _) = b_dir.lookup(0x400000).unwrap().unwrap();
        assert_eq!(found, page_frame);
        assert_eq!(TASK_TABLE.lock().get(b).unwrap().ipc.perm, (PdeFlags::USER | PdeFlags::PRESENT).bits());
    }
}
