//! TASK data model: the generational task id and the per-task record.

use crate::memlayout::{ENVGENSHIFT, NENV};
use crate::mm::vm::PdeFlags;
use crate::trap::frame::TrapFrame;

/// A generational task identifier: the low 10 bits are the task's index in
/// the task array, the remaining bits are a generation counter. Comparing
/// full ids (not just indices) distinguishes the current occupant of a slot
/// from a prior one that has since been destroyed and reallocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(i32);

impl TaskId {
    /// The distinguished id meaning "the caller itself" wherever a task id
    /// is accepted as an argument.
    pub const SELF: TaskId = TaskId(0);

    pub fn new(index: usize, generation: i32) -> Self {
        debug_assert!(index < NENV);
        TaskId(generation | index as i32)
    }

    /// Wrap a raw id received from a syscall argument, without asserting
    /// anything about which slot it names — callers must still resolve it
    /// through the task table before trusting it.
    pub fn new_raw(raw: i32) -> Self {
        TaskId(raw)
    }

    pub fn index(self) -> usize {
        (self.0 as usize) & (NENV - 1)
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn is_self(self) -> bool {
        self.0 == 0
    }

    /// Compute the next generation's id for the slot at `index`, given the
    /// previous occupant's raw id (or 0 if the slot was never used). Keeps
    /// the id non-negative by folding the sign bit back into a minimal
    /// positive generation, per SPEC_FULL.md §9's generational-id note.
    pub fn next_generation(prev_raw: i32, index: usize) -> Self {
        let mut generation = (prev_raw.wrapping_add(1 << ENVGENSHIFT)) & !((NENV - 1) as i32);
        if generation <= 0 {
            generation = 1 << ENVGENSHIFT;
        }
        TaskId(generation | index as i32)
    }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Free,
    Dying,
    Runnable,
    Running,
    NotRunnable,
}

/// What kind of task this is; only `Fs` changes behavior (it gets IOPL
/// access for raw disk I/O).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    User,
    Fs,
}

/// IPC rendezvous state embedded in each task record (§4.7).
#[derive(Debug, Clone, Copy, Default)]
pub struct IpcState {
    pub recving: bool,
    pub dst_va: usize,
    pub from: i32,
    pub value: u32,
    pub perm: u32,
}

/// The per-task control block.
pub struct Task {
    pub id: TaskId,
    pub parent_id: i32,
    pub status: TaskStatus,
    pub kind: TaskType,
    pub trapframe: TrapFrame,
    pub pagedir_frame: crate::mm::pmem::Frame,
    pub runs: u32,
    pub cpu_affinity: Option<usize>,
    pub pgfault_upcall: usize,
    pub ipc: IpcState,
}

impl Task {
    pub fn can_name(&self, caller: TaskId) -> bool {
        self.id == caller || self.parent_id == caller.raw()
    }
}

/// Permission bits a caller may request for `page_alloc`/`page_map`, per
/// §4.6 — `(perm & (USER|PRESENT)) == (USER|PRESENT)` and only
/// `WRITABLE`/the AVAIL bits beyond that.
pub fn valid_user_perm(perm: PdeFlags) -> bool {
    let required = PdeFlags::USER | PdeFlags::PRESENT;
    if !perm.contains(required) {
        return false;
    }
    let allowed = required | PdeFlags::WRITABLE | PdeFlags::COW | PdeFlags::SHARE;
    allowed.contains(perm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_recovered_from_id() {
        let id = TaskId::new(42, 1 << ENVGENSHIFT);
        assert_eq!(id.index(), 42);
    }

    #[test]
    fn next_generation_increases_and_stays_positive() {
        let first = TaskId::next_generation(0, 5);
        assert_eq!(first.index(), 5);
        assert!(first.raw() > 0);

        let second = TaskId::next_generation(first.raw(), 5);
        assert!(second.raw() > first.raw());
        assert_eq!(second.index(), 5);
        assert_ne!(first, second, "successive occupants of a slot must differ");
    }

    #[test]
    fn self_id_is_distinguished() {
        assert!(TaskId::SELF.is_self());
        let real = TaskId::new(3, 1 << ENVGENSHIFT);
        assert!(!real.is_self());
    }
}
