//! Task state machine and the scheduler.
pub(crate) mod readyqueue;

use crate::{
    cfg::KernelTraits,
    error::{os_assert_ext, os_check, os_check_ext, ResultCode, ServiceId},
    klock::{CpuLockCell, CpuLockGuard},
    utils::Init,
    CallContext, PortThreading, Priority, ResourceId, TaskId, RESOURCE_ID_NONE, TASK_ID_NONE,
};

/// Task state.
///
/// `ReadyFirst` and `Ready` both map to the OSEK *ready* state; the former
/// marks a task that has not run since its activation, so the port must
/// build a fresh execution state before dispatching it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    Suspended,
    ReadyFirst,
    Ready,
    Running,
}

impl Init for TaskState {
    const INIT: Self = Self::Suspended;
}

/// Task control block.
pub struct TaskCb<Traits: PortThreading> {
    pub(crate) state: CpuLockCell<Traits, TaskState>,
    /// Pending activation count. Non-zero iff the task is not suspended.
    pub(crate) activation: CpuLockCell<Traits, u8>,
    /// Link inside the ready queue of the task's effective priority;
    /// [`TASK_ID_NONE`] when not queued.
    pub(crate) next: CpuLockCell<Traits, TaskId>,
    /// Top of the held-resource stack; [`RESOURCE_ID_NONE`] when none.
    pub(crate) held_resource: CpuLockCell<Traits, ResourceId>,
    /// Base priority, or the highest ceiling currently held.
    pub(crate) effective_priority: CpuLockCell<Traits, Priority>,
}

impl<Traits: PortThreading> Init for TaskCb<Traits> {
    const INIT: Self = Self {
        state: CpuLockCell::new(TaskState::Suspended),
        activation: CpuLockCell::new(0),
        next: CpuLockCell::new(TASK_ID_NONE),
        held_resource: CpuLockCell::new(RESOURCE_ID_NONE),
        effective_priority: CpuLockCell::new(0),
    };
}

impl<Traits: PortThreading> TaskCb<Traits> {
    pub(crate) fn reset(&self, lock: &mut CpuLockGuard<Traits>) {
        self.state.set(lock, TaskState::Suspended);
        self.activation.set(lock, 0);
        self.next.set(lock, TASK_ID_NONE);
        self.held_resource.set(lock, RESOURCE_ID_NONE);
        self.effective_priority.set(lock, 0);
    }
}

// State transitions
// ---------------------------------------------------------------------------

fn pre_task_hook<Traits: KernelTraits>(task: TaskId) {
    if let Some(hook) = Traits::cfg().pre_task_hook {
        hook(task);
    }
}

fn post_task_hook<Traits: KernelTraits>(task: TaskId) {
    if let Some(hook) = Traits::cfg().post_task_hook {
        hook(task);
    }
}

fn running_to_suspended<Traits: KernelTraits>(lock: &mut CpuLockGuard<Traits>, task: TaskId) {
    let cb = &Traits::state().task_cbs[task as usize];
    os_assert_ext!(
        cb.state.get(lock) == TaskState::Running,
        "suspending a task that is not running"
    );
    cb.state.set(lock, TaskState::Suspended);
    post_task_hook::<Traits>(task);
}

/// Push the preempted task back at the head of its level so it's next in
/// line to execute again.
fn running_to_ready<Traits: KernelTraits>(lock: &mut CpuLockGuard<Traits>, task: TaskId) {
    let cb = &Traits::state().task_cbs[task as usize];
    os_assert_ext!(
        cb.state.get(lock) == TaskState::Running,
        "readying a task that is not running"
    );
    let prio = cb.effective_priority.get(lock);
    readyqueue::push_head::<Traits>(lock, prio, task);
    cb.state.set(lock, TaskState::Ready);
    post_task_hook::<Traits>(task);
}

pub(crate) fn suspended_to_ready<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    task: TaskId,
) {
    let cb = &Traits::state().task_cbs[task as usize];
    os_assert_ext!(
        cb.state.get(lock) == TaskState::Suspended,
        "activating a task that is not suspended"
    );
    let prio = Traits::cfg().tasks[task as usize].priority;
    cb.state.set(lock, TaskState::ReadyFirst);
    cb.effective_priority.set(lock, prio);
    readyqueue::push_tail::<Traits>(lock, prio, task);
}

fn ready_to_running<Traits: KernelTraits>(lock: &mut CpuLockGuard<Traits>, task: TaskId) {
    let cb = &Traits::state().task_cbs[task as usize];
    let state = cb.state.get(lock);
    os_assert_ext!(
        state == TaskState::Ready || state == TaskState::ReadyFirst,
        "dispatching a task that is not ready"
    );
    let prio = cb.effective_priority.get(lock);
    let popped = readyqueue::pop_head::<Traits>(lock, prio);
    os_assert_ext!(popped == task, "ready queue head does not match candidate");

    if state == TaskState::ReadyFirst {
        // Safety: the task is about to become the running task
        unsafe { Traits::prepare_state(task) };
    }
    cb.state.set(lock, TaskState::Running);
    pre_task_hook::<Traits>(task);
}

// Scheduler
// ---------------------------------------------------------------------------

/// Dispatch the highest-priority ready task if it outranks the caller.
///
/// Updates the running-task slot only; the context swap is performed by the
/// caller (the syscall dispatcher or the ISR tail) once the kernel state is
/// consistent. If nothing is ready and no task is running, the slot becomes
/// the sentinel and control eventually returns to the boot context, which
/// idles in the port's wait primitive.
pub(crate) fn schedule_internal<Traits: KernelTraits>(lock: &mut CpuLockGuard<Traits>) {
    let state = Traits::state();
    let running = state.running_task.get(lock);

    let current_prio: i16 = if running != TASK_ID_NONE
        && state.task_cbs[running as usize].state.get(lock) == TaskState::Running
    {
        state.task_cbs[running as usize].effective_priority.get(lock) as i16
    } else {
        -1
    };

    match readyqueue::highest_ready::<Traits>(lock) {
        Some(prio) if (prio as i16) > current_prio => {
            if current_prio >= 0 {
                running_to_ready::<Traits>(lock, running);
            }
            let next = readyqueue::peek_head::<Traits>(lock, prio);
            ready_to_running::<Traits>(lock, next);
            state.running_task.set(lock, next);
        }
        _ => {
            if current_prio < 0 {
                state.running_task.set(lock, TASK_ID_NONE);
            }
        }
    }
}

/// `Schedule` service.
pub(crate) fn schedule_service<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
) -> ResultCode {
    os_check_ext!(
        Traits,
        lock,
        Traits::state().call_context.get(lock) == CallContext::Task,
        ServiceId::Schedule,
        ResultCode::CallLevel
    );
    schedule_internal::<Traits>(lock);
    ResultCode::Ok
}

// Services
// ---------------------------------------------------------------------------

/// `ActivateTask` service. Transfers a suspended task to the ready state, or
/// queues another activation up to the configured maximum.
pub(crate) fn activate_internal<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    task: TaskId,
) -> ResultCode {
    let cfg = Traits::cfg();
    os_check_ext!(
        Traits,
        lock,
        (task as usize) < cfg.tasks.len(),
        ServiceId::ActivateTask,
        ResultCode::Id,
        [task]
    );

    let cb = &Traits::state().task_cbs[task as usize];
    let activation = cb.activation.get(lock);
    os_check!(
        Traits,
        lock,
        activation < cfg.tasks[task as usize].max_activations,
        ServiceId::ActivateTask,
        ResultCode::Limit,
        [task]
    );

    cb.activation.set(lock, activation + 1);
    if activation == 0 {
        suspended_to_ready::<Traits>(lock, task);
    }
    ResultCode::Ok
}

/// `TerminateTask` service. If the task has activations queued, it is
/// readied again at the tail of its priority level.
pub(crate) fn terminate_internal<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
) -> ResultCode {
    let state = Traits::state();
    let running = state.running_task.get(lock);

    os_check_ext!(
        Traits,
        lock,
        state.call_context.get(lock) == CallContext::Task,
        ServiceId::TerminateTask,
        ResultCode::CallLevel
    );
    os_check_ext!(
        Traits,
        lock,
        running != TASK_ID_NONE
            && state.task_cbs[running as usize].state.get(lock) == TaskState::Running,
        ServiceId::TerminateTask,
        ResultCode::State
    );
    os_check_ext!(
        Traits,
        lock,
        state.task_cbs[running as usize].held_resource.get(lock) == RESOURCE_ID_NONE,
        ServiceId::TerminateTask,
        ResultCode::Resource
    );

    running_to_suspended::<Traits>(lock, running);

    let cb = &state.task_cbs[running as usize];
    let activation = cb.activation.get(lock) - 1;
    cb.activation.set(lock, activation);
    if activation > 0 {
        suspended_to_ready::<Traits>(lock, running);
    }
    ResultCode::Ok
}

/// `ChainTask` service: terminate the caller and activate `task`.
///
/// The target's activation limit is checked before the caller is touched, so
/// E_OS_LIMIT leaves the caller running with no state mutated. Chaining to
/// self requeues the caller at the tail of its priority level.
pub(crate) fn chain_internal<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    task: TaskId,
) -> ResultCode {
    let cfg = Traits::cfg();
    let state = Traits::state();
    let running = state.running_task.get(lock);

    os_check_ext!(
        Traits,
        lock,
        state.call_context.get(lock) == CallContext::Task,
        ServiceId::ChainTask,
        ResultCode::CallLevel,
        [task]
    );
    os_check_ext!(
        Traits,
        lock,
        running != TASK_ID_NONE
            && state.task_cbs[running as usize].state.get(lock) == TaskState::Running,
        ServiceId::ChainTask,
        ResultCode::State,
        [task]
    );
    os_check_ext!(
        Traits,
        lock,
        state.task_cbs[running as usize].held_resource.get(lock) == RESOURCE_ID_NONE,
        ServiceId::ChainTask,
        ResultCode::Resource,
        [task]
    );
    os_check_ext!(
        Traits,
        lock,
        (task as usize) < cfg.tasks.len(),
        ServiceId::ChainTask,
        ResultCode::Id,
        [task]
    );

    if task != running {
        os_check!(
            Traits,
            lock,
            state.task_cbs[task as usize].activation.get(lock)
                < cfg.tasks[task as usize].max_activations,
            ServiceId::ChainTask,
            ResultCode::Limit,
            [task]
        );
    }

    running_to_suspended::<Traits>(lock, running);
    let caller_cb = &state.task_cbs[running as usize];
    let activation = caller_cb.activation.get(lock) - 1;
    caller_cb.activation.set(lock, activation);
    if activation > 0 {
        suspended_to_ready::<Traits>(lock, running);
    }

    let target_cb = &state.task_cbs[task as usize];
    let activation = target_cb.activation.get(lock) + 1;
    target_cb.activation.set(lock, activation);
    if activation == 1 {
        suspended_to_ready::<Traits>(lock, task);
    }
    ResultCode::Ok
}

/// `Shutdown` service: halt the scheduler. The caller, if a task, is pushed
/// back to its ready queue for diagnostics; it never runs again.
pub(crate) fn shutdown_internal<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
) -> ResultCode {
    let state = Traits::state();
    state.keep_running.set(lock, false);

    let running = state.running_task.get(lock);
    if running != TASK_ID_NONE
        && state.task_cbs[running as usize].state.get(lock) == TaskState::Running
    {
        running_to_ready::<Traits>(lock, running);
    }
    state.running_task.set(lock, TASK_ID_NONE);
    ResultCode::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        klock::lock_cpu,
        testing::{noop_entry, stub_system},
        KernelCfg, KernelStatic, System,
    };

    fn enter_task_context<Traits: KernelTraits>() {
        let mut lock = lock_cpu::<Traits>();
        Traits::state()
            .call_context
            .set(&mut lock, CallContext::Task);
    }

    fn task_state<Traits: KernelTraits>(task: TaskId) -> TaskState {
        let lock = lock_cpu::<Traits>();
        Traits::state().task_cbs[task as usize].state.get(&lock)
    }

    fn activation_count<Traits: KernelTraits>(task: TaskId) -> u8 {
        let lock = lock_cpu::<Traits>();
        Traits::state().task_cbs[task as usize].activation.get(&lock)
    }

    fn in_ready_queue<Traits: KernelTraits>(task: TaskId) -> bool {
        let lock = lock_cpu::<Traits>();
        let state = Traits::state();
        for prio in 0..=Traits::cfg().priority_count {
            let mut t = readyqueue::peek_head::<Traits>(&lock, prio as Priority);
            while t != TASK_ID_NONE {
                if t == task {
                    return true;
                }
                t = state.task_cbs[t as usize].next.get(&lock);
            }
        }
        false
    }

    fn run_scheduler<Traits: KernelTraits>() {
        let mut lock = lock_cpu::<Traits>();
        schedule_internal::<Traits>(&mut lock);
    }

    #[test]
    fn init_readies_autostart_tasks() {
        static TASKS: [crate::TaskCfg; 2] = [
            crate::TaskCfg::new(0, noop_entry).with_autostart(),
            crate::TaskCfg::new(1, noop_entry),
        ];
        static CFG: KernelCfg = KernelCfg::new(&TASKS, 2);
        stub_system!(struct Sys, CFG);

        System::<Sys>::init();
        assert_eq!(task_state::<Sys>(0), TaskState::ReadyFirst);
        assert!(in_ready_queue::<Sys>(0));
        assert_eq!(task_state::<Sys>(1), TaskState::Suspended);
        assert!(!in_ready_queue::<Sys>(1));
        // no task runs until start()
        assert_eq!(System::<Sys>::current_task(), None);
    }

    #[test]
    fn scheduler_dispatches_highest_priority() {
        static TASKS: [crate::TaskCfg; 3] = [
            crate::TaskCfg::new(0, noop_entry).with_autostart(),
            crate::TaskCfg::new(2, noop_entry).with_autostart(),
            crate::TaskCfg::new(1, noop_entry).with_autostart(),
        ];
        static CFG: KernelCfg = KernelCfg::new(&TASKS, 3);
        stub_system!(struct Sys, CFG);

        System::<Sys>::init();
        enter_task_context::<Sys>();
        run_scheduler::<Sys>();

        assert_eq!(System::<Sys>::current_task(), Some(1));
        assert_eq!(task_state::<Sys>(1), TaskState::Running);
        assert!(!in_ready_queue::<Sys>(1));
        assert!(in_ready_queue::<Sys>(0));
        assert!(in_ready_queue::<Sys>(2));
    }

    #[test]
    fn preemption_keeps_preempted_task_first_in_line() {
        static TASKS: [crate::TaskCfg; 3] = [
            crate::TaskCfg::new(0, noop_entry).with_autostart(),
            crate::TaskCfg::new(0, noop_entry),
            crate::TaskCfg::new(1, noop_entry),
        ];
        static CFG: KernelCfg = KernelCfg::new(&TASKS, 2);
        stub_system!(struct Sys, CFG);

        System::<Sys>::init();
        enter_task_context::<Sys>();
        run_scheduler::<Sys>();
        assert_eq!(System::<Sys>::current_task(), Some(0));

        // An equal-priority activation queues behind; a higher-priority one
        // preempts and pushes the running task back to the head of its level.
        {
            let mut lock = lock_cpu::<Sys>();
            assert_eq!(activate_internal::<Sys>(&mut lock, 1), ResultCode::Ok);
            assert_eq!(activate_internal::<Sys>(&mut lock, 2), ResultCode::Ok);
            schedule_internal::<Sys>(&mut lock);
        }

        assert_eq!(System::<Sys>::current_task(), Some(2));
        assert_eq!(task_state::<Sys>(0), TaskState::Ready);
        {
            let lock = lock_cpu::<Sys>();
            assert_eq!(readyqueue::peek_head::<Sys>(&lock, 0), 0);
        }

        // When the preemptor terminates, the preempted task resumes before
        // its equal-priority peer.
        {
            let mut lock = lock_cpu::<Sys>();
            assert_eq!(terminate_internal::<Sys>(&mut lock), ResultCode::Ok);
            schedule_internal::<Sys>(&mut lock);
        }
        assert_eq!(System::<Sys>::current_task(), Some(0));
    }

    #[test]
    fn equal_priority_tasks_run_in_activation_order() {
        static TASKS: [crate::TaskCfg; 3] = [
            crate::TaskCfg::new(0, noop_entry),
            crate::TaskCfg::new(0, noop_entry),
            crate::TaskCfg::new(0, noop_entry),
        ];
        static CFG: KernelCfg = KernelCfg::new(&TASKS, 1);
        stub_system!(struct Sys, CFG);

        System::<Sys>::init();
        enter_task_context::<Sys>();
        for task in [1u8, 2, 0] {
            assert_eq!(System::<Sys>::activate_task(task), Ok(()));
        }

        let mut order = [TASK_ID_NONE; 3];
        for slot in order.iter_mut() {
            let mut lock = lock_cpu::<Sys>();
            schedule_internal::<Sys>(&mut lock);
            *slot = Sys::state().running_task.get(&lock);
            assert_eq!(terminate_internal::<Sys>(&mut lock), ResultCode::Ok);
        }
        assert_eq!(order, [1, 2, 0]);
    }

    #[test]
    fn activation_limit_is_enforced() {
        static TASKS: [crate::TaskCfg; 2] = [
            crate::TaskCfg::new(0, noop_entry),
            crate::TaskCfg::new(1, noop_entry),
        ];
        static CFG: KernelCfg = KernelCfg::new(&TASKS, 2);
        stub_system!(struct Sys, CFG);

        System::<Sys>::init();
        assert_eq!(System::<Sys>::activate_task(1), Ok(()));
        assert_eq!(task_state::<Sys>(1), TaskState::ReadyFirst);

        // basic profile: a second activation of a ready task is rejected and
        // alters nothing
        assert_eq!(
            System::<Sys>::activate_task(1),
            Err(ResultCode::Limit)
        );
        assert_eq!(activation_count::<Sys>(1), 1);
        assert_eq!(task_state::<Sys>(1), TaskState::ReadyFirst);

        let record = System::<Sys>::last_error();
        assert_eq!(record.service, ServiceId::ActivateTask);
        assert_eq!(record.status, ResultCode::Limit);
        assert_eq!(record.params[0], 1);
    }

    #[cfg(feature = "extended_checks")]
    #[test]
    fn activating_an_unknown_task_is_rejected() {
        static TASKS: [crate::TaskCfg; 1] = [crate::TaskCfg::new(0, noop_entry)];
        static CFG: KernelCfg = KernelCfg::new(&TASKS, 1);
        stub_system!(struct Sys, CFG);

        System::<Sys>::init();
        assert_eq!(System::<Sys>::activate_task(7), Err(ResultCode::Id));
    }

    #[test]
    fn multiple_activations_run_the_task_repeatedly() {
        static TASKS: [crate::TaskCfg; 1] =
            [crate::TaskCfg::new(0, noop_entry).with_max_activations(3)];
        static CFG: KernelCfg = KernelCfg::new(&TASKS, 1);
        stub_system!(struct Sys, CFG);

        System::<Sys>::init();
        enter_task_context::<Sys>();
        for _ in 0..3 {
            assert_eq!(System::<Sys>::activate_task(0), Ok(()));
        }
        assert_eq!(System::<Sys>::activate_task(0), Err(ResultCode::Limit));

        // the task runs three times before becoming suspended again
        for remaining in (0..3u8).rev() {
            let mut lock = lock_cpu::<Sys>();
            schedule_internal::<Sys>(&mut lock);
            assert_eq!(
                Sys::state().running_task.get(&lock),
                0,
                "activation {remaining}"
            );
            assert_eq!(terminate_internal::<Sys>(&mut lock), ResultCode::Ok);
            drop(lock);
            assert_eq!(activation_count::<Sys>(0), remaining);
        }
        assert_eq!(task_state::<Sys>(0), TaskState::Suspended);
    }

    #[cfg(feature = "extended_checks")]
    #[test]
    fn terminate_is_rejected_outside_task_context() {
        static TASKS: [crate::TaskCfg; 1] = [crate::TaskCfg::new(0, noop_entry)];
        static CFG: KernelCfg = KernelCfg::new(&TASKS, 1);
        stub_system!(struct Sys, CFG);

        System::<Sys>::init();
        {
            let mut lock = lock_cpu::<Sys>();
            Sys::state().call_context.set(&mut lock, CallContext::Isr1);
            assert_eq!(
                terminate_internal::<Sys>(&mut lock),
                ResultCode::CallLevel
            );
        }
    }

    #[test]
    fn chain_to_self_requeues_at_the_tail() {
        static TASKS: [crate::TaskCfg; 2] = [
            crate::TaskCfg::new(0, noop_entry).with_autostart(),
            crate::TaskCfg::new(0, noop_entry),
        ];
        static CFG: KernelCfg = KernelCfg::new(&TASKS, 1);
        stub_system!(struct Sys, CFG);

        System::<Sys>::init();
        enter_task_context::<Sys>();
        run_scheduler::<Sys>();
        assert_eq!(System::<Sys>::current_task(), Some(0));
        assert_eq!(System::<Sys>::activate_task(1), Ok(()));

        {
            let mut lock = lock_cpu::<Sys>();
            assert_eq!(chain_internal::<Sys>(&mut lock, 0), ResultCode::Ok);
            schedule_internal::<Sys>(&mut lock);
        }
        // the chained-to self went behind the already-ready peer
        assert_eq!(System::<Sys>::current_task(), Some(1));
        assert_eq!(task_state::<Sys>(0), TaskState::ReadyFirst);
    }

    #[test]
    fn chain_at_the_limit_leaves_the_caller_running() {
        static TASKS: [crate::TaskCfg; 2] = [
            crate::TaskCfg::new(0, noop_entry).with_autostart(),
            crate::TaskCfg::new(1, noop_entry),
        ];
        static CFG: KernelCfg = KernelCfg::new(&TASKS, 2);
        stub_system!(struct Sys, CFG);

        System::<Sys>::init();
        enter_task_context::<Sys>();
        run_scheduler::<Sys>();
        assert_eq!(System::<Sys>::current_task(), Some(0));

        // fill the target's activation queue
        {
            let mut lock = lock_cpu::<Sys>();
            assert_eq!(activate_internal::<Sys>(&mut lock, 1), ResultCode::Ok);
        }

        {
            let mut lock = lock_cpu::<Sys>();
            assert_eq!(chain_internal::<Sys>(&mut lock, 1), ResultCode::Limit);
        }
        // no partial state mutation: the caller is still the running task
        assert_eq!(System::<Sys>::current_task(), Some(0));
        assert_eq!(task_state::<Sys>(0), TaskState::Running);
        assert_eq!(activation_count::<Sys>(0), 1);
    }

    #[test]
    fn shutdown_halts_the_scheduler() {
        static TASKS: [crate::TaskCfg; 1] =
            [crate::TaskCfg::new(0, noop_entry).with_autostart()];
        static CFG: KernelCfg = KernelCfg::new(&TASKS, 1);
        stub_system!(struct Sys, CFG);

        System::<Sys>::init();
        enter_task_context::<Sys>();
        run_scheduler::<Sys>();
        {
            let mut lock = lock_cpu::<Sys>();
            assert_eq!(shutdown_internal::<Sys>(&mut lock), ResultCode::Ok);
            assert!(!Sys::state().keep_running.get(&lock));
            assert_eq!(Sys::state().running_task.get(&lock), TASK_ID_NONE);
        }
    }
}
