//! Exonix user library: the code every task above the kernel links against
//! (§9's user-space collaborators — copy-on-write `fork`, IPC wrappers, and
//! the FS-CORE file server). Built as both a library (host-target unit
//! tests) and a `no_std` crate linked into real user tasks on the bare-metal
//! target; see `build.rs` for the assembled page-fault return stub.

#![cfg_attr(target_os = "none", no_std)]

// Host target (`cargo test` on a dev machine): pull in std the same way the
// kernel crate's `lib.rs` does for its own host test builds.
#[cfg(not(target_os = "none"))]
extern crate std;

pub mod abi;
pub mod fork;
pub mod fs;
pub mod ipc;
pub mod pgfault;
pub mod syscall;

#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    syscall::cputs(b"user task panicked\n");
    let _ = info;
    syscall::sys_yield()
}
