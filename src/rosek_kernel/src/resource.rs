//! Priority-ceiling resource layer (OSEK Priority Ceiling Protocol).
//!
//! A task that acquires a resource has its effective priority raised to the
//! resource's ceiling, which keeps every other potential holder off the CPU
//! for the duration. Held resources form a per-task LIFO stack threaded
//! through the resource control blocks' `next` fields.
use crate::{
    cfg::KernelTraits,
    error::{os_check, os_check_ext, ResultCode, ServiceId},
    klock::{CpuLockCell, CpuLockGuard},
    utils::Init,
    PortThreading, ResourceId, TaskId, RESOURCE_ID_NONE, TASK_ID_NONE,
};

/// Resource control block.
pub struct ResourceCb<Traits: PortThreading> {
    /// Next resource under this one in the holder's stack.
    pub(crate) next: CpuLockCell<Traits, ResourceId>,
    /// Holding task, for diagnostics and the extended double-get check.
    pub(crate) holder: CpuLockCell<Traits, TaskId>,
}

impl<Traits: PortThreading> Init for ResourceCb<Traits> {
    const INIT: Self = Self {
        next: CpuLockCell::new(RESOURCE_ID_NONE),
        holder: CpuLockCell::new(TASK_ID_NONE),
    };
}

impl<Traits: PortThreading> ResourceCb<Traits> {
    pub(crate) fn reset(&self, lock: &mut CpuLockGuard<Traits>) {
        self.next.set(lock, RESOURCE_ID_NONE);
        self.holder.set(lock, TASK_ID_NONE);
    }
}

/// `GetResource` service.
pub(crate) fn get_resource_internal<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    res: ResourceId,
) -> ResultCode {
    let cfg = Traits::cfg();
    let state = Traits::state();

    os_check_ext!(
        Traits,
        lock,
        (res as usize) < cfg.resources.len(),
        ServiceId::GetResource,
        ResultCode::Id,
        [res]
    );

    let running = state.running_task.get(lock);
    let task_cb = &state.task_cbs[running as usize];
    let rcb = &state.resource_cbs[res as usize];
    let ceiling = cfg.resources[res as usize].ceiling;

    // The caller's current priority must not exceed the ceiling; otherwise
    // acquiring the resource would *lower* its priority.
    os_check_ext!(
        Traits,
        lock,
        task_cb.effective_priority.get(lock) <= ceiling,
        ServiceId::GetResource,
        ResultCode::Access,
        [res]
    );
    os_check_ext!(
        Traits,
        lock,
        rcb.holder.get(lock) == TASK_ID_NONE,
        ServiceId::GetResource,
        ResultCode::Access,
        [res]
    );

    rcb.holder.set(lock, running);
    rcb.next.set(lock, task_cb.held_resource.get(lock));
    task_cb.held_resource.set(lock, res);
    task_cb.effective_priority.set(lock, ceiling);
    ResultCode::Ok
}

/// `ReleaseResource` service. Resources are released in strictly LIFO
/// order; the caller's effective priority falls back to the next held
/// ceiling, or its base priority.
pub(crate) fn release_resource_internal<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    res: ResourceId,
) -> ResultCode {
    let cfg = Traits::cfg();
    let state = Traits::state();

    os_check_ext!(
        Traits,
        lock,
        (res as usize) < cfg.resources.len(),
        ServiceId::ReleaseResource,
        ResultCode::Id,
        [res]
    );

    let running = state.running_task.get(lock);
    let task_cb = &state.task_cbs[running as usize];
    os_check!(
        Traits,
        lock,
        task_cb.held_resource.get(lock) == res,
        ServiceId::ReleaseResource,
        ResultCode::NoFunc,
        [res]
    );

    let rcb = &state.resource_cbs[res as usize];
    os_check_ext!(
        Traits,
        lock,
        rcb.holder.get(lock) == running,
        ServiceId::ReleaseResource,
        ResultCode::NoFunc,
        [res]
    );

    rcb.holder.set(lock, TASK_ID_NONE);
    task_cb.held_resource.set(lock, rcb.next.get(lock));
    rcb.next.set(lock, RESOURCE_ID_NONE);

    let remaining = task_cb.held_resource.get(lock);
    let priority = if remaining == RESOURCE_ID_NONE {
        cfg.tasks[running as usize].priority
    } else {
        cfg.resources[remaining as usize].ceiling
    };
    task_cb.effective_priority.set(lock, priority);
    ResultCode::Ok
}

// Internal resources
// ---------------------------------------------------------------------------
//
// A task's internal resource is acquired whenever the task is dispatched and
// released at every rescheduling service entry, giving non-preemption groups
// without user bookkeeping. Both operations are no-ops unless the running
// task declares an internal resource and its resource stack is in the
// expected shape (holding nothing for acquire, holding exactly the internal
// resource on top for release).

pub(crate) fn internal_release<Traits: KernelTraits>(lock: &mut CpuLockGuard<Traits>) {
    let state = Traits::state();
    let running = state.running_task.get(lock);
    if running == TASK_ID_NONE || state.call_context.get(lock) != crate::CallContext::Task {
        return;
    }
    let res = Traits::cfg().tasks[running as usize].internal_resource;
    if res != RESOURCE_ID_NONE
        && state.task_cbs[running as usize].held_resource.get(lock) == res
    {
        let _ = release_resource_internal::<Traits>(lock, res);
    }
}

pub(crate) fn internal_get<Traits: KernelTraits>(lock: &mut CpuLockGuard<Traits>) {
    let state = Traits::state();
    let running = state.running_task.get(lock);
    if running == TASK_ID_NONE {
        return;
    }
    let res = Traits::cfg().tasks[running as usize].internal_resource;
    if res != RESOURCE_ID_NONE
        && state.task_cbs[running as usize].held_resource.get(lock) == RESOURCE_ID_NONE
    {
        let _ = get_resource_internal::<Traits>(lock, res);
    }
}
