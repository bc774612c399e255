//! User-space IPC wrappers (§7, §9). Grounded on `lib/ipc.c`: retry
//! `ipc_recv`/`ipc_try_send` across the kernel's `IPC_NOT_RECV` race window
//! by yielding and trying again, rather than making the caller handle it.
//!
//! `lib/ipc.c` also offers `ipc_find_env`, a linear scan of the read-only
//! UENVS task-table window for a task of a given type. This crate does not
//! map that window (§2.2 restores only the items it names — GDT/IDT layout,
//! not every read-only user window the original exposes), so that lookup is
//! out of scope here; callers that need a well-known server task id must
//! learn it some other way (e.g. a fixed id convention).
//!
//! What the missing UENVS window does cost this crate: the resumed trap
//! frame after `ipc_recv` carries nothing but `eax = 0`, so the delivered
//! `from`/`value`/`perm` can't be read out of registers the way the raw
//! syscall's return code alone might suggest. `ipc_recv` below reads them
//! back with the dedicated `SYS_IPC_STATUS` call instead.

use crate::abi::{Perm, UTOP};
use crate::syscall::{self, IpcMessage, SyscallError, SyscallResult};

/// Send `value` (and optionally the page at `sva` with `perm`) to `to`,
/// retrying while the target isn't yet receiving.
pub fn ipc_send(to: i32, value: u32, sva: usize, perm: Perm) {
    loop {
        match syscall::ipc_try_send(to, value, sva, perm) {
            Ok(()) => return,
            Err(SyscallError::IpcNotRecv) => syscall::sys_yield(),
            Err(e) => panic!("ipc_send to {to}: {e:?}"),
        }
    }
}

/// Block until a message arrives, optionally accepting a transferred page
/// at `dva`. Returns the sender's id, the value, and the permission bits a
/// transferred page was mapped with (`Perm::empty()` if none was sent).
pub fn ipc_recv(dva: usize) -> IpcMessage {
    if dva != 0 && dva >= UTOP {
        panic!("ipc_recv: dva {dva:#x} is not below UTOP");
    }

    if let Err(e) = syscall::ipc_recv(dva) {
        panic!("ipc_recv: {e:?}");
    }

    let mut fields = [0u32; 3];
    match syscall::ipc_status(&mut fields) {
        Ok(()) => IpcMessage {
            from: fields[0] as i32,
            value: fields[1],
            perm: Perm::from_bits_truncate(fields[2]),
        },
        Err(e) => panic!("ipc_recv: failed to read back delivered message: {e:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "is not below UTOP")]
    fn ipc_recv_rejects_addresses_at_or_above_utop() {
        ipc_recv(UTOP);
    }
}
