//! GDT layout restored per SPEC_FULL.md §2.2: null, kernel code, kernel
//! data, user code, user data, then one TSS descriptor per CPU. Construction
//! syntax for the descriptors themselves is the out-of-scope "boot loader"
//! detail named in §1; only the layout and selectors are needed so
//! `env_pop_tf`'s segment selectors mean something.

use crate::sync::MAX_CPUS;

pub const GD_KT: u16 = 0x08;
pub const GD_KD: u16 = 0x10;
pub const GD_UT: u16 = 0x18;
pub const GD_UD: u16 = 0x20;
pub const GD_TSS0: u16 = 0x28;

/// One 64-bit raw segment descriptor.
#[derive(Clone, Copy)]
#[repr(transparent)]
struct Descriptor(u64);

impl Descriptor {
    const fn null() -> Self {
        Descriptor(0)
    }

    const fn flat(executable: bool, dpl: u8) -> Self {
        // base=0, limit=0xfffff (4K granular, so 4 GiB), present, 32-bit.
        let access = 0x90 | (executable as u64) << 3 | 0x2 | ((dpl as u64) << 5);
        let limit_hi_flags = 0xC_0Fu64; // granularity+32-bit, limit bits 16-19
        Descriptor(0x0000_FFFFu64 | (access << 40) | (limit_hi_flags << 48))
    }
}

#[repr(C, packed)]
struct Tss {
    _link: u16,
    _pad0: u16,
    esp0: u32,
    ss0: u16,
    _pad1: u16,
    _rest: [u32; 23],
    _iomap_base: u16,
}

const TSS_SIZE: usize = core::mem::size_of::<Tss>();

struct GdtEntries {
    null: Descriptor,
    kernel_code: Descriptor,
    kernel_data: Descriptor,
    user_code: Descriptor,
    user_data: Descriptor,
    tss: [Descriptor; MAX_CPUS],
}

static mut GDT: GdtEntries = GdtEntries {
    null: Descriptor::null(),
    kernel_code: Descriptor::flat(true, 0),
    kernel_data: Descriptor::flat(false, 0),
    user_code: Descriptor::flat(true, 3),
    user_data: Descriptor::flat(false, 3),
    tss: [Descriptor::null(); MAX_CPUS],
};

static mut TSS: [Tss; MAX_CPUS] = [const {
    Tss {
        _link: 0,
        _pad0: 0,
        esp0: 0,
        ss0: 0,
        _pad1: 0,
        _rest: [0; 23],
        _iomap_base: 0,
    }
}; MAX_CPUS];

/// Install this CPU's TSS descriptor (kernel stack pointer for privilege
/// transitions) and load `tr` with it.
pub fn init_cpu(cpu: usize, kstack_top: u32) {
    // SAFETY: each CPU only ever touches its own `cpu` index; the GDT/TSS
    // tables are laid out once at link time and never resized.
    unsafe {
        TSS[cpu].esp0 = kstack_top;
        TSS[cpu].ss0 = GD_KD;

        let base = core::ptr::addr_of!(TSS[cpu]) as u64;
        let limit = (TSS_SIZE - 1) as u64;
        let access = 0x89u64; // present, DPL 0, 32-bit TSS, busy=0
        GDT.tss[cpu] = Descriptor(
            (limit & 0xFFFF)
                | ((base & 0xFFFFFF) << 16)
                | (access << 40)
                | (((limit >> 16) & 0xF) << 48)
                | (((base >> 24) & 0xFF) << 56),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_are_distinct_and_ring_tagged() {
        assert_eq!(GD_UT & 0x3, 0);
        assert_eq!(GD_UD & 0x3, 0);
        assert_ne!(GD_KT, GD_UT);
    }
}
