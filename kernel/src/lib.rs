//! Exonix kernel library.
//!
//! Built as both a library (for host-target unit tests) and a `no_std`
//! binary (for the real bare-metal target); see `main.rs` for the entry
//! point and `build.rs` for the assembled trampolines this crate links
//! against on a genuine x86 target.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(all(test, target_os = "none"), no_main)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(all(feature = "alloc", target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(feature = "alloc", target_os = "none"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

// Host target (running `cargo test` on a dev machine): use the system
// allocator and std's panic/unwind machinery, the way the teacher's
// `lib.rs` swaps in `std::alloc::System` for non-bare-metal builds.
#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
pub mod serial;

pub mod arch;
pub mod elf;
pub mod error;
pub mod ipc;
pub mod logger;
pub mod memlayout;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod task;
pub mod trap;

/// Boot-time initialisation shared by the real entry point and (if ever
/// needed) integration tests: serial console, the `log` facade, GDT/IDT,
/// and the physical frame allocator.
///
/// # Safety
/// Must run exactly once, early in boot, before interrupts are enabled and
/// before any task is created.
pub unsafe fn init(npages: u32, reserved: impl Fn(u32) -> bool) {
    serial::init();
    logger::init();
    log::info!("exonix: booting, {} physical frames", npages);

    mm::FRAME_ALLOCATOR.lock().init(npages, reserved);

    arch::x86::init_gdt();
    arch::x86::init_idt();

    task::TASK_TABLE.lock().reset();
}

#[cfg(all(target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    trap::dispatch::PANICKING.store(true, core::sync::atomic::Ordering::SeqCst);
    log::error!("panic: {}", info);
    // SAFETY: halting is always a safe way to stop after a fatal error.
    unsafe { arch::x86::halt_loop() }
}
