//! Task ready queues (internal use only).
//!
//! One singly linked FIFO per priority level, threaded through the task
//! control blocks' `next` fields with head/tail sentinels, plus a one-word
//! bitmap of non-empty levels so the scheduler finds the highest-priority
//! candidate without scanning.
use crate::{
    cfg::KernelTraits,
    klock::{CpuLockCell, CpuLockGuard},
    utils::Init,
    PortThreading, Priority, TaskId, TASK_ID_NONE,
};

/// Head and tail of one priority level's FIFO. [`TASK_ID_NONE`] when empty;
/// `head == NONE ⇔ tail == NONE`.
pub struct ReadyList<Traits: PortThreading> {
    head: CpuLockCell<Traits, TaskId>,
    tail: CpuLockCell<Traits, TaskId>,
}

impl<Traits: PortThreading> Init for ReadyList<Traits> {
    const INIT: Self = Self {
        head: CpuLockCell::new(TASK_ID_NONE),
        tail: CpuLockCell::new(TASK_ID_NONE),
    };
}

impl<Traits: PortThreading> ReadyList<Traits> {
    pub(crate) fn reset(&self, lock: &mut CpuLockGuard<Traits>) {
        self.head.set(lock, TASK_ID_NONE);
        self.tail.set(lock, TASK_ID_NONE);
    }
}

/// Append `task` to the tail of its priority level. Used when a task becomes
/// newly ready so that equal-priority tasks run in activation order.
pub(crate) fn push_tail<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    prio: Priority,
    task: TaskId,
) {
    let state = Traits::state();
    let list = &state.ready_lists[prio as usize];
    state.task_cbs[task as usize].next.set(lock, TASK_ID_NONE);
    let head = list.head.get(lock);
    if head == TASK_ID_NONE {
        list.head.set(lock, task);
    } else {
        let tail = list.tail.get(lock);
        state.task_cbs[tail as usize].next.set(lock, task);
    }
    list.tail.set(lock, task);
    state
        .ready_bitmap
        .with_mut(lock, |map| map.set(prio as usize));
}

/// Prepend `task` to its priority level. Used for a preempted task, which
/// must be the next to execute at its own level.
pub(crate) fn push_head<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    prio: Priority,
    task: TaskId,
) {
    let state = Traits::state();
    let list = &state.ready_lists[prio as usize];
    let head = list.head.get(lock);
    state.task_cbs[task as usize].next.set(lock, head);
    list.head.set(lock, task);
    if list.tail.get(lock) == TASK_ID_NONE {
        list.tail.set(lock, task);
    }
    state
        .ready_bitmap
        .with_mut(lock, |map| map.set(prio as usize));
}

/// Pop the head of the given priority level, or [`TASK_ID_NONE`] if the
/// level is empty.
pub(crate) fn pop_head<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    prio: Priority,
) -> TaskId {
    let state = Traits::state();
    let list = &state.ready_lists[prio as usize];
    let task = list.head.get(lock);
    if task == TASK_ID_NONE {
        return TASK_ID_NONE;
    }
    if list.tail.get(lock) == task {
        list.head.set(lock, TASK_ID_NONE);
        list.tail.set(lock, TASK_ID_NONE);
        state
            .ready_bitmap
            .with_mut(lock, |map| map.clear(prio as usize));
    } else {
        let next = state.task_cbs[task as usize].next.get(lock);
        list.head.set(lock, next);
    }
    state.task_cbs[task as usize].next.set(lock, TASK_ID_NONE);
    task
}

/// Peek at the head of the given priority level.
pub(crate) fn peek_head<Traits: KernelTraits>(
    lock: &CpuLockGuard<Traits>,
    prio: Priority,
) -> TaskId {
    Traits::state().ready_lists[prio as usize].head.get(lock)
}

/// The highest priority level with at least one ready task.
pub(crate) fn highest_ready<Traits: KernelTraits>(lock: &CpuLockGuard<Traits>) -> Option<Priority> {
    Traits::state()
        .ready_bitmap
        .with(lock, |map| map.find_highest_set())
        .map(|p| p as Priority)
}
