//! SYSCALL — dispatch table, argument validation via MEMCHK, capability
//! checks (§4.6). Grounded on `kern/syscall.c`'s `syscall` switch.

use crate::error::KernelError;
use crate::ipc;
use crate::mm::pmem::{AllocFlags, FRAME_ALLOCATOR};
use crate::mm::user_check::check_user_mem;
use crate::mm::vm::{PageDirectory, PdeFlags};
use crate::sched;
use crate::task::{lifecycle, valid_user_perm, TaskId, TaskStatus, TASK_TABLE};
use crate::trap::frame::TrapFrame;

pub const SYS_CPUTS: u32 = 0;
pub const SYS_CGETC: u32 = 1;
pub const SYS_GETENVID: u32 = 2;
pub const SYS_ENV_DESTROY: u32 = 3;
pub const SYS_YIELD: u32 = 4;
pub const SYS_EXOFORK: u32 = 5;
pub const SYS_ENV_SET_STATUS: u32 = 6;
pub const SYS_ENV_SET_PGFAULT_UPCALL: u32 = 7;
pub const SYS_ENV_SET_TRAPFRAME: u32 = 8;
pub const SYS_PAGE_ALLOC: u32 = 9;
pub const SYS_PAGE_MAP: u32 = 10;
pub const SYS_PAGE_UNMAP: u32 = 11;
pub const SYS_IPC_TRY_SEND: u32 = 12;
pub const SYS_IPC_RECV: u32 = 13;
pub const SYS_IPC_STATUS: u32 = 14;
pub const SYS_PAGE_PERM: u32 = 15;

/// `syscall(num, a1, a2, a3, a4, a5) -> i32`. The single entry point
/// `trap::dispatch` hands the post-fault-frame-copy syscall vector to.
/// `caller` and `caller_dir` are resolved by the trap layer from the
/// currently running task.
pub fn dispatch(
    caller: TaskId,
    caller_dir: &mut PageDirectory,
    num: u32,
    a1: u32,
    a2: u32,
    a3: u32,
    a4: u32,
    a5: u32,
) -> i32 {
    let result: Result<i32, KernelError> = match num {
        SYS_CPUTS => sys_cputs(caller, caller_dir, a1 as usize, a2 as usize).map(|()| 0),
        SYS_CGETC => Ok(sys_cgetc()),
        SYS_GETENVID => Ok(caller.raw()),
        SYS_ENV_DESTROY => sys_env_destroy(caller, TaskId::new_raw(a1 as i32)).map(|()| 0),
        SYS_YIELD => sched::sched_yield(),
        SYS_EXOFORK => sys_exofork(caller),
        SYS_ENV_SET_STATUS => {
            sys_env_set_status(caller, TaskId::new_raw(a1 as i32), a2).map(|()| 0)
        }
        SYS_ENV_SET_PGFAULT_UPCALL => {
            sys_env_set_pgfault_upcall(caller, TaskId::new_raw(a1 as i32), a2 as usize).map(|()| 0)
        }
        SYS_ENV_SET_TRAPFRAME => {
            sys_env_set_trapframe(caller, TaskId::new_raw(a1 as i32), a2 as usize).map(|()| 0)
        }
        SYS_PAGE_ALLOC => sys_page_alloc(
            caller,
            TaskId::new_raw(a1 as i32),
            a2 as usize,
            PdeFlags::from_bits_truncate(a3),
        )
        .map(|()| 0),
        SYS_PAGE_MAP => sys_page_map(
            TaskId::new_raw(a1 as i32),
            a2 as usize,
            TaskId::new_raw(a3 as i32),
            a4 as usize,
            PdeFlags::from_bits_truncate(a5),
        )
        .map(|()| 0),
        SYS_PAGE_UNMAP => {
            sys_page_unmap(caller, TaskId::new_raw(a1 as i32), a2 as usize).map(|()| 0)
        }
        SYS_IPC_TRY_SEND => sys_ipc_try_send(
            caller,
            caller_dir,
            TaskId::new_raw(a1 as i32),
            a2,
            a3 as usize,
            PdeFlags::from_bits_truncate(a4),
        )
        .map(|()| 0),
        SYS_IPC_RECV => match sys_ipc_recv(caller, a1 as usize) {
            Ok(()) => sched::sched_yield(),
            Err(e) => Err(e),
        },
        SYS_IPC_STATUS => sys_ipc_status(caller, caller_dir, a1 as usize).map(|()| 0),
        SYS_PAGE_PERM => sys_page_perm(caller, TaskId::new_raw(a1 as i32), a2 as usize),
        _ => Err(KernelError::InvalidArgument),
    };

    match result {
        Ok(v) => v,
        Err(e) => {
            log::warn!("syscall {} from task {:?} failed: {}", num, caller, e);
            e.code()
        }
    }
}

fn sys_cputs(
    caller: TaskId,
    dir: &mut PageDirectory,
    s: usize,
    n: usize,
) -> Result<(), KernelError> {
    crate::mm::user_check::assert_user_mem(dir, s, n, PdeFlags::empty(), caller)?;
    // SAFETY: `assert_user_mem` above verified `[s, s+n)` is mapped and
    // readable by `caller`; the kernel's direct map covers the same
    // physical frames the user mapping points to.
    for i in 0..n {
        let byte = unsafe { *((crate::mm::vm::direct_map(s) + i) as *const u8) };
        crate::print!("{}", byte as char);
    }
    Ok(())
}

fn sys_cgetc() -> i32 {
    // Non-blocking console read; no input device wired up in this build.
    0
}

fn sys_env_destroy(caller: TaskId, target: TaskId) -> Result<(), KernelError> {
    let resolved = TASK_TABLE.lock().resolve_checked(target, Some(caller))?;
    lifecycle::destroy(resolved)
}

fn sys_exofork(caller: TaskId) -> Result<i32, KernelError> {
    let child = lifecycle::alloc(caller)?;
    let mut table = TASK_TABLE.lock();
    let parent_tf = table.get(caller).ok_or(KernelError::BadTask)?.trapframe;
    let child_task = table.get_mut(child).ok_or(KernelError::BadTask)?;
    child_task.trapframe = parent_tf;
    child_task.trapframe.regs.eax = 0; // child sees 0
    child_task.status = TaskStatus::NotRunnable;
    Ok(child.raw())
}

fn sys_env_set_status(caller: TaskId, target: TaskId, status: u32) -> Result<(), KernelError> {
    let new_status = match status {
        0 => TaskStatus::NotRunnable,
        1 => TaskStatus::Runnable,
        _ => return Err(KernelError::InvalidArgument),
    };
    let resolved = TASK_TABLE.lock().resolve_checked(target, Some(caller))?;
    let mut table = TASK_TABLE.lock();
    table.get_mut(resolved).ok_or(KernelError::BadTask)?.status = new_status;
    Ok(())
}

fn sys_env_set_pgfault_upcall(
    caller: TaskId,
    target: TaskId,
    upcall: usize,
) -> Result<(), KernelError> {
    let resolved = TASK_TABLE.lock().resolve_checked(target, Some(caller))?;
    let mut table = TASK_TABLE.lock();
    table
        .get_mut(resolved)
        .ok_or(KernelError::BadTask)?
        .pgfault_upcall = upcall;
    Ok(())
}

/// Install a caller-supplied trap frame, forcing CPL=3, IF set, IOPL
/// cleared — a task may never hand itself kernel-mode selectors or raised
/// privilege through this call.
fn sys_env_set_trapframe(
    caller: TaskId,
    target: TaskId,
    tf_va: usize,
) -> Result<(), KernelError> {
    let resolved = TASK_TABLE.lock().resolve_checked(target, Some(caller))?;
    let caller_frame = TASK_TABLE
        .lock()
        .get(caller)
        .ok_or(KernelError::BadTask)?
        .pagedir_frame;
    let mut caller_dir = PageDirectory::from_frame(caller_frame);
    check_user_mem(
        &mut caller_dir,
        tf_va,
        core::mem::size_of::<TrapFrame>(),
        PdeFlags::USER,
    )?;

    // SAFETY: `check_user_mem` above confirmed `tf_va` names a readable,
    // correctly sized user mapping.
    let mut tf = unsafe { *(crate::mm::vm::direct_map(tf_va) as *const TrapFrame) };
    tf.cs |= 0x3;
    tf.ss |= 0x3;
    tf.eflags |= 1 << 9; // IF
    tf.eflags &= !(3 << 12); // IOPL = 0

    let mut table = TASK_TABLE.lock();
    table.get_mut(resolved).ok_or(KernelError::BadTask)?.trapframe = tf;
    Ok(())
}

fn sys_page_alloc(
    caller: TaskId,
    target: TaskId,
    va: usize,
    perm: PdeFlags,
) -> Result<(), KernelError> {
    if va >= crate::memlayout::UTOP || va % crate::memlayout::PGSIZE != 0 {
        return Err(KernelError::InvalidArgument);
    }
    if !valid_user_perm(perm) {
        return Err(KernelError::InvalidArgument);
    }
    let resolved = TASK_TABLE.lock().resolve_checked(target, Some(caller))?;
    let pgdir_frame = TASK_TABLE
        .lock()
        .get(resolved)
        .ok_or(KernelError::BadTask)?
        .pagedir_frame;
    let mut dir = PageDirectory::from_frame(pgdir_frame);
    let frame = FRAME_ALLOCATOR
        .lock()
        .alloc(AllocFlags::ZERO)
        .ok_or(KernelError::OutOfMemory)?;
    dir.insert(frame, va, perm)
}

/// Share a frame mapped in `src` at `sva` into `dst` at `dva`. If `perm`
/// asks for `WRITABLE`, the source mapping must already be writable.
fn sys_page_map(
    src: TaskId,
    sva: usize,
    dst: TaskId,
    dva: usize,
    perm: PdeFlags,
) -> Result<(), KernelError> {
    if sva >= crate::memlayout::UTOP
        || sva % crate::memlayout::PGSIZE != 0
        || dva >= crate::memlayout::UTOP
        || dva % crate::memlayout::PGSIZE != 0
    {
        return Err(KernelError::InvalidArgument);
    }
    if !valid_user_perm(perm) {
        return Err(KernelError::InvalidArgument);
    }
    let (src_frame, dst_frame) = {
        let table = TASK_TABLE.lock();
        (
            table.get(src).ok_or(KernelError::BadTask)?.pagedir_frame,
            table.get(dst).ok_or(KernelError::BadTask)?.pagedir_frame,
        )
    };
    let mut src_dir = PageDirectory::from_frame(src_frame);
    let mut dst_dir = PageDirectory::from_frame(dst_frame);

    let (frame, src_perm) = src_dir
        .lookup(sva)
        .ok()
        .flatten()
        .ok_or(KernelError::InvalidArgument)?;
    if perm.contains(PdeFlags::WRITABLE) && !src_perm.contains(PdeFlags::WRITABLE) {
        return Err(KernelError::InvalidArgument);
    }
    dst_dir.insert(frame, dva, perm)
}

fn sys_page_unmap(caller: TaskId, target: TaskId, va: usize) -> Result<(), KernelError> {
    if va >= crate::memlayout::UTOP || va % crate::memlayout::PGSIZE != 0 {
        return Err(KernelError::InvalidArgument);
    }
    let resolved = TASK_TABLE.lock().resolve_checked(target, Some(caller))?;
    let pgdir_frame = TASK_TABLE
        .lock()
        .get(resolved)
        .ok_or(KernelError::BadTask)?
        .pagedir_frame;
    let mut dir = PageDirectory::from_frame(pgdir_frame);
    dir.remove(va)
}

fn sys_ipc_try_send(
    caller: TaskId,
    caller_dir: &mut PageDirectory,
    target: TaskId,
    val: u32,
    sva: usize,
    perm: PdeFlags,
) -> Result<(), KernelError> {
    let resolved = TASK_TABLE.lock().resolve(target, Some(caller))?;
    let target_frame = TASK_TABLE
        .lock()
        .get(resolved)
        .ok_or(KernelError::BadTask)?
        .pagedir_frame;
    let mut target_dir = PageDirectory::from_frame(target_frame);
    ipc::try_send(caller, caller_dir, resolved, &mut target_dir, val, sva, perm)
}

/// Validate and park the caller; the scheduler call that actually
/// relinquishes the CPU happens in `dispatch` after this returns `Ok`.
fn sys_ipc_recv(caller: TaskId, dva: usize) -> Result<(), KernelError> {
    ipc::recv(caller, dva)
}

/// Write the caller's own `from`/`value`/`perm` IPC fields (as three
/// consecutive `u32`s: sender id, value, permission bits) into the
/// caller-supplied buffer at `out_va`. Called by the user-space `ipc_recv`
/// wrapper immediately after it is resumed by a send, since the resumed
/// trap frame itself carries nothing but `eax = 0` — the delivered payload
/// lives only in the task's own record (`ipc::try_send` writes it there).
fn sys_ipc_status(
    caller: TaskId,
    caller_dir: &mut PageDirectory,
    out_va: usize,
) -> Result<(), KernelError> {
    const LEN: usize = 3 * core::mem::size_of::<u32>();
    check_user_mem(caller_dir, out_va, LEN, PdeFlags::WRITABLE)?;

    let (from, value, perm) = {
        let table = TASK_TABLE.lock();
        let task = table.get(caller).ok_or(KernelError::BadTask)?;
        (task.ipc.from, task.ipc.value, task.ipc.perm)
    };

    let (frame, _) = caller_dir
        .lookup(out_va)
        .ok()
        .flatten()
        .ok_or(KernelError::InvalidArgument)?;
    let off = crate::memlayout::page_offset(out_va);
    // SAFETY: `check_user_mem` confirmed `[out_va, out_va+LEN)` is mapped
    // and writable by `caller`, and `LEN` is small enough to never cross a
    // page boundary from any 4-byte-aligned `out_va` `page_perm` callers use.
    unsafe {
        let base = (crate::mm::vm::direct_map(frame.phys_addr()) + off) as *mut u32;
        base.write(from as u32);
        base.add(1).write(value);
        base.add(2).write(perm);
    }
    Ok(())
}

/// Read back the current permission bits of the page mapped at `va` in
/// `target`, without requiring a UVPT self-map. `user::fork`'s `duppage`
/// uses this to decide whether a page should be shared verbatim, mapped
/// copy-on-write, or mapped read-only as-is; the COW fault handler uses it
/// to confirm a faulting page actually carries the `COW` bit before
/// treating the fault as legitimate, the way `pgfault` checks `uvpt`.
fn sys_page_perm(caller: TaskId, target: TaskId, va: usize) -> Result<i32, KernelError> {
    if va >= crate::memlayout::UTOP || va % crate::memlayout::PGSIZE != 0 {
        return Err(KernelError::InvalidArgument);
    }
    let resolved = TASK_TABLE.lock().resolve(target, Some(caller))?;
    let pgdir_frame = TASK_TABLE
        .lock()
        .get(resolved)
        .ok_or(KernelError::BadTask)?
        .pagedir_frame;
    let mut dir = PageDirectory::from_frame(pgdir_frame);
    let (_, perm) = dir
        .lookup(va)
        .ok()
        .flatten()
        .ok_or(KernelError::InvalidArgument)?;
    Ok(perm.bits() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_caller() -> (TaskId, PageDirectory) {
        FRAME_ALLOCATOR.lock().init(4096, |i| i == 0);
        let kframe = FRAME_ALLOCATOR.lock().alloc(AllocFlags::ZERO).unwrap();
        crate::mm::vm::set_kernel_pgdir(kframe);
        TASK_TABLE.lock().reset();
        let caller = lifecycle::alloc(TaskId::SELF).unwrap();
        let frame = TASK_TABLE.lock().get(caller).unwrap().pagedir_frame;
        (caller, PageDirectory::from_frame(frame))
    }

    #[test]
    fn unknown_syscall_number_is_invalid_argument() {
        let (caller, mut dir) = fresh_caller();
        let code = dispatch(caller, &mut dir, 0xFFFF, 0, 0, 0, 0, 0);
        assert_eq!(code, KernelError::InvalidArgument.code());
    }

    #[test]
    fn getenvid_returns_caller_id() {
        let (caller, mut dir) = fresh_caller();
        let code = dispatch(caller, &mut dir, SYS_GETENVID, 0, 0, 0, 0, 0);
        assert_eq!(code, caller.raw());
    }

    #[test]
    fn page_perm_reports_the_mapped_bits() {
        let (caller, mut dir) = fresh_caller();
        let perm = PdeFlags::USER | PdeFlags::PRESENT | PdeFlags::WRITABLE;
        let alloc_ok = dispatch(caller, &mut dir, SYS_PAGE_ALLOC, 0, 0x1000, perm.bits(), 0, 0);
        assert_eq!(alloc_ok, 0);

        let reported = dispatch(caller, &mut dir, SYS_PAGE_PERM, 0, 0x1000, 0, 0, 0);
        assert_eq!(reported, perm.bits() as i32);
    }

    #[test]
    fn page_perm_on_unmapped_va_is_invalid_argument() {
        let (caller, mut dir) = fresh_caller();
        let code = dispatch(caller, &mut dir, SYS_PAGE_PERM, 0, 0x1000, 0, 0, 0);
        assert_eq!(code, KernelError::InvalidArgument.code());
    }

    #[test]
    fn exofork_then_unrelated_set_status_is_rejected() {
        let (caller, mut dir) = fresh_caller();
        let child_raw = dispatch(caller, &mut dir, SYS_EXOFORK, 0, 0, 0, 0, 0);
        assert!(child_raw >= 0);

        // Parent may set the child runnable.
        let ok = dispatch(
            caller,
            &mut dir,
            SYS_ENV_SET_STATUS,
            child_raw as u32,
            1,
            0,
            0,
            0,
        );
        assert_eq!(ok, 0);

        // An unrelated task may not.
        let stranger = lifecycle::alloc(TaskId::SELF).unwrap();
        let stranger_frame = TASK_TABLE.lock().get(stranger).unwrap().pagedir_frame;
        let mut stranger_dir = PageDirectory::from_frame(stranger_frame);
        let rejected = dispatch(
            stranger,
            &mut stranger_dir,
            SYS_ENV_SET_STATUS,
            child_raw as u32,
            0,
            0,
            0,
            0,
        );
        assert_eq!(rejected, KernelError::BadTask.code());
    }
}
