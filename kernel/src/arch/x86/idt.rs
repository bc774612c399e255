//! IDT wiring (§4.4): one gate per trap vector, with DPL 0 for faults and
//! DPL 3 for the vectors user mode may enter directly (breakpoint, syscall).

use crate::arch::x86::gdt::GD_KT;
use crate::trap::frame::vectors;

const IDT_ENTRIES: usize = 256;

#[derive(Clone, Copy)]
#[repr(transparent)]
struct Gate(u64);

impl Gate {
    const fn null() -> Self {
        Gate(0)
    }

    fn interrupt(handler: u32, selector: u16, dpl: u8) -> Self {
        let access = 0x8Eu64 | ((dpl as u64) << 5); // present, 32-bit interrupt gate
        Gate(
            (handler as u64 & 0xFFFF)
                | ((selector as u64) << 16)
                | (access << 40)
                | (((handler as u64) >> 16) << 48),
        )
    }
}

static mut IDT: [Gate; IDT_ENTRIES] = [Gate::null(); IDT_ENTRIES];

#[repr(C, packed)]
struct Idtr {
    limit: u16,
    base: u32,
}

/// Install one gate. `handler` is the address of the assembly trap-vector
/// stub generated per vector in `trapentry.S` (assembled by `build.rs`).
fn set_gate(vector: usize, handler: u32, dpl: u8) {
    // SAFETY: called only during single-threaded boot, before interrupts
    // are enabled.
    unsafe {
        IDT[vector] = Gate::interrupt(handler, GD_KT, dpl);
    }
}

extern "C" {
    /// One label per vector, defined in the assembled `trapentry.S`. The
    /// array is built by that file; Rust only needs its base address.
    static trap_handlers: [u32; IDT_ENTRIES];
}

/// Populate every vector from the generated handler table, then widen DPL
/// to 3 for the two vectors user mode is allowed to invoke directly.
pub fn init() {
    // SAFETY: `trap_handlers` is a linker-provided symbol populated by the
    // assembled stub file; reading its address (not its contents as Rust
    // data) is always valid.
    let handlers = unsafe { &trap_handlers };
    for (vector, &handler) in handlers.iter().enumerate() {
        set_gate(vector, handler, 0);
    }
    set_gate(vectors::BREAKPOINT as usize, handlers[vectors::BREAKPOINT as usize], 3);
    set_gate(vectors::SYSCALL as usize, handlers[vectors::SYSCALL as usize], 3);

    let idtr = Idtr {
        limit: (core::mem::size_of::<[Gate; IDT_ENTRIES]>() - 1) as u16,
        // SAFETY: `IDT` is 'static and never moved.
        base: unsafe { core::ptr::addr_of!(IDT) as u32 },
    };
    // SAFETY: `idtr` describes the just-populated, 'static `IDT` table.
    #[cfg(target_arch = "x86")]
    unsafe {
        core::arch::asm!("lidt [{0}]", in(reg) &idtr, options(nostack));
    }
    #[cfg(not(target_arch = "x86"))]
    let _ = idtr;
}
