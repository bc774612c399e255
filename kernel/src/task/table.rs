//! The global task array and its free list.
//!
//! Mirrors `kern/env.c`'s `env_init`: the free list is built by pushing
//! array indices in *reverse* order, so the first index ever handed out by
//! `alloc` is index 0 — without that, the id-index invariant in
//! SPEC_FULL.md §8 ("id's low bits equal the index of t in the task array")
//! holds vacuously but the boot task would not land on the expected slot 0.

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::memlayout::NENV;
use crate::mm::pmem::Frame;
use crate::task::pcb::{IpcState, Task, TaskId, TaskStatus, TaskType};
use crate::trap::frame::TrapFrame;

struct Slot {
    task: Option<Task>,
    /// Raw id of the last occupant of this slot, or 0 if never used.
    last_id: i32,
    next_free: Option<usize>,
}

pub struct TaskTable {
    slots: [Slot; NENV],
    free_head: Option<usize>,
}

const EMPTY_SLOT: Slot = Slot {
    task: None,
    last_id: 0,
    next_free: None,
};

impl TaskTable {
    const fn new() -> Self {
        TaskTable {
            slots: [EMPTY_SLOT; NENV],
            free_head: None,
        }
    }

    /// Rebuild the free list, index 0 first. Called once at boot.
    pub fn reset(&mut self) {
        self.free_head = None;
        for i in (0..NENV).rev() {
            self.slots[i].task = None;
            self.slots[i].next_free = self.free_head;
            self.free_head = Some(i);
        }
    }

    /// Take a free slot and fill it with a fresh task record. Returns the
    /// new task's id.
    pub fn alloc(&mut self, pagedir_frame: Frame, parent_id: TaskId) -> KernelResult<TaskId> {
        let idx = self.free_head.ok_or(KernelError::NoFreeTask)?;
        self.free_head = self.slots[idx].next_free;

        let id = TaskId::next_generation(self.slots[idx].last_id, idx);
        self.slots[idx].task = Some(Task {
            id,
            parent_id: parent_id.raw(),
            status: TaskStatus::Runnable,
            kind: TaskType::User,
            trapframe: TrapFrame::default(),
            pagedir_frame,
            runs: 0,
            cpu_affinity: None,
            pgfault_upcall: 0,
            ipc: IpcState::default(),
        });
        Ok(id)
    }

    /// Return a slot to the free list after teardown.
    pub fn free(&mut self, id: TaskId) {
        let idx = id.index();
        self.slots[idx].last_id = id.raw();
        self.slots[idx].task = None;
        self.slots[idx].next_free = self.free_head;
        self.free_head = Some(idx);
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        let idx = id.index();
        match &self.slots[idx].task {
            Some(t) if t.id == id => Some(t),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        let idx = id.index();
        match &mut self.slots[idx].task {
            Some(t) if t.id == id => Some(t),
            _ => None,
        }
    }

    /// Resolve a task id the way `envid2env` does: 0 means "the current
    /// task"; any other value must exactly match a live occupant.
    pub fn resolve(&self, id: TaskId, current: Option<TaskId>) -> KernelResult<TaskId> {
        if id.is_self() {
            return current.ok_or(KernelError::BadTask);
        }
        match self.get(id) {
            Some(t) => Ok(t.id),
            None => Err(KernelError::BadTask),
        }
    }

    /// `envid2env` with `checkperm`: additionally require that `caller` may
    /// name the target (itself, or its parent).
    pub fn resolve_checked(
        &self,
        id: TaskId,
        current: Option<TaskId>,
    ) -> KernelResult<TaskId> {
        let resolved = self.resolve(id, current)?;
        let caller = current.ok_or(KernelError::BadTask)?;
        let target = self.get(resolved).ok_or(KernelError::BadTask)?;
        if target.can_name(caller) {
            Ok(resolved)
        } else {
            Err(KernelError::BadTask)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.slots.iter().filter_map(|s| s.task.as_ref())
    }

    /// All slot indices in array order, for the round-robin scheduler and
    /// for destroy's PTE walk — exposed as indices rather than `&Task`
    /// since the scheduler needs to advance past tasks that don't exist.
    pub fn slot_count(&self) -> usize {
        NENV
    }

    pub fn task_at(&self, index: usize) -> Option<&Task> {
        self.slots[index].task.as_ref()
    }
}

pub static TASK_TABLE: Mutex<TaskTable> = Mutex::new(TaskTable::new());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::pmem::Frame;

    #[test]
    fn first_alloc_after_reset_is_index_zero() {
        let mut t = TaskTable::new();
        t.reset();
        let id = t.alloc(Frame(0), TaskId::SELF).unwrap();
        assert_eq!(id.index(), 0);
    }

    #[test]
    fn freed_slot_gets_new_generation_on_realloc() {
        let mut t = TaskTable::new();
        t.reset();
        let first = t.alloc(Frame(0), TaskId::SELF).unwrap();
        t.free(first);
        let second = t.alloc(Frame(0), TaskId::SELF).unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
    }

    #[test]
    fn resolve_self_uses_current() {
        let mut t = TaskTable::new();
        t.reset();
        let id = t.alloc(Frame(0), TaskId::SELF).unwrap();
        assert_eq!(t.resolve(TaskId::SELF, Some(id)).unwrap(), id);
    }

    #[test]
    fn resolve_checked_rejects_unrelated_caller() {
        let mut t = TaskTable::new();
        t.reset();
        let parent = t.alloc(Frame(0), TaskId::SELF).unwrap();
        let child = t.alloc(Frame(0), parent).unwrap();
        let stranger = t.alloc(Frame(0), TaskId::SELF).unwrap();

        assert!(t.resolve_checked(child, Some(parent)).is_ok());
        assert!(t.resolve_checked(child, Some(stranger)).is_err());
    }
}
