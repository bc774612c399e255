//! Bare-metal entry point. Only built for a real `target_os = "none"`
//! target; `cargo test` exercises the library crate directly on the host.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
use exonix_kernel::{arch, task};

/// The boot CPU's reserved-frame policy: frame 0, the legacy I/O hole
/// (0xA0000..0x100000), and anything the bootstrap bump allocator already
/// carved out before the frame-descriptor array itself existed.
#[cfg(target_os = "none")]
fn is_reserved(frame: u32) -> bool {
    const IO_HOLE_START: u32 = 0xA_0000 / exonix_kernel::memlayout::PGSIZE as u32;
    const IO_HOLE_END: u32 = 0x10_0000 / exonix_kernel::memlayout::PGSIZE as u32;
    frame == 0 || (frame >= IO_HOLE_START && frame < IO_HOLE_END)
}

#[cfg(target_os = "none")]
#[no_mangle]
pub extern "C" fn _start(npages: u32) -> ! {
    // SAFETY: this is the very first code to run after the boot loader
    // hands off control; no interrupts are enabled yet and no task exists.
    unsafe {
        exonix_kernel::init(npages, is_reserved);
    }

    let init_image: &[u8] = &[]; // supplied by the boot loader in a real image
    let _ = task::lifecycle::create(init_image, task::TaskType::User);

    // SAFETY: at least one task now exists (or the panic above already
    // fired); entering the scheduler hands control to it.
    unsafe { arch::x86::halt_loop() };
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("exonix-kernel only runs as a bare-metal target_os = \"none\" image");
}
