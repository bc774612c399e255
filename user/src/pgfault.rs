//! User-level page-fault upcall registration (§4.4.1, §9 "user-space
//! upcalls as coroutines"). Grounded on `lib/pgfault.c`.

use crate::abi::{Perm, UTOP, UXSTACKTOP};
use crate::syscall;
use spin::Mutex;

/// The frame the kernel pushes onto the user exception stack, per the
/// wire layout in spec §6.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct UserTrapFrame {
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub oesp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub es: u16,
    pub ds: u16,
    pub trapno: u32,
    pub err: u32,
    pub fault_va: u32,
    pub eip: u32,
    pub cs: u16,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u16,
}

type Handler = fn(&UserTrapFrame);

static HANDLER: Mutex<Option<Handler>> = Mutex::new(None);

/// Register `handler` as this task's page-fault handler. Allocates the
/// user exception stack page on first use, then installs the kernel-side
/// upcall pointer. Grounded on `set_pgfault_handler`.
pub fn set_pgfault_handler(handler: Handler) {
    let first_time = HANDLER.lock().is_none();
    *HANDLER.lock() = Some(handler);

    if first_time {
        // Ignore "already mapped" races; a real implementation checks via
        // `page_lookup`'s read-only UVPT window, which this crate doesn't
        // map (§2.2 did not restore that detail — only the GDT layout and
        // the other items it names).
        let _ = syscall::page_alloc(
            0,
            UXSTACKTOP - crate::abi::PGSIZE,
            Perm::USER | Perm::WRITABLE | Perm::PRESENT,
        );
        let _ = syscall::env_set_pgfault_upcall(0, _pgfault_upcall as usize);
    }
}

/// Dispatch a delivered [`UserTrapFrame`] to the registered handler. Called
/// by the assembly upcall trampoline (`_pgfault_upcall`) after it has
/// located the frame on the exception stack.
///
/// # Safety
/// Must only be invoked by `_pgfault_upcall` with a frame it actually
/// popped off the user exception stack.
#[no_mangle]
unsafe extern "C" fn pgfault_dispatch(tf: *const UserTrapFrame) {
    // SAFETY: caller's contract.
    let tf = unsafe { &*tf };
    match *HANDLER.lock() {
        Some(h) => h(tf),
        None => panic!("page fault at {:#x} with no handler registered", tf.fault_va),
    }
}

extern "C" {
    /// Restores the saved frame and resumes at `utf_eip`/`utf_esp`.
    /// Defined in `asm/pfentry.S`, assembled by this crate's `build.rs`.
    fn _pgfault_upcall() -> !;
}

/// Address below which a write-faulting page may legally be re-mapped by a
/// handler (`fork`'s COW path uses this as a sanity bound).
pub fn below_utop(va: usize) -> bool {
    va < UTOP
}
