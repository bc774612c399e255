//! Architecture-specific glue. Only `x86` (32-bit protected mode) is
//! implemented; the module boundary exists so the rest of the kernel never
//! spells out `cfg(target_arch = "x86")` directly.

#[cfg(target_arch = "x86")]
pub mod x86;

#[cfg(not(target_arch = "x86"))]
pub mod x86 {
    //! Host-test stand-in: the real trampolines never run off-target, so
    //! these simply make the crate's other modules type-check under `cargo
    //! test` on a dev machine.

    pub unsafe fn env_pop_tf(_id: crate::task::TaskId) -> ! {
        unreachable!("env_pop_tf is only callable on a real x86 target")
    }

    /// No-op off-target: CR3 is a software fiction in host tests, tracked
    /// entirely through `sync::set_current_pagedir_frame`.
    pub unsafe fn switch_pgdir(_frame: crate::mm::pmem::Frame) {}

    pub unsafe fn halt_loop() -> ! {
        unreachable!("halt_loop is only callable on a real x86 target")
    }

    pub fn init_gdt() {}
    pub fn init_idt() {}
}
