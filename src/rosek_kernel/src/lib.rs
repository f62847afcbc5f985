//! A static-priority, fixed-configuration real-time task kernel implementing
//! the OSEK/VDX OS profile semantics.
//!
//! The kernel multiplexes a bounded set of statically declared tasks onto one
//! CPU under a preemptive priority-ceiling discipline. Tasks are activated by
//! explicit service calls or by timed alarms bound to counters. Every object
//! is identified by a small integer drawn from a closed range; nothing is
//! allocated at runtime.
//!
//! A *system* is a marker type tying together a port (an implementation of
//! [`PortThreading`]) and a static configuration (an implementation of
//! [`KernelStatic`], usually via [`configure_kernel!`]). All services are
//! invoked through the [`System`] facade parameterized on that type.
#![cfg_attr(not(test), no_std)]

mod alarm;
mod cfg;
mod error;
mod klock;
mod resource;
mod syscall;
mod task;
pub mod utils;

#[cfg(test)]
mod testing;

pub use crate::{
    alarm::{AlarmCb, CounterCb, TICK_HALF},
    cfg::{
        AlarmCfg, KernelCfg, KernelStatic, KernelTraits, ResourceCfg, TaskCfg, MAX_ALARMS,
        MAX_COUNTERS, MAX_PRIORITY_LEVELS, MAX_RESOURCES, MAX_TASKS,
    },
    error::{ErrorRecord, ResultCode, ServiceId},
    resource::ResourceCb,
    syscall::Request,
    task::{TaskCb, TaskState},
};

use crate::{klock::CpuLockCell, task::readyqueue::ReadyList, utils::Init, utils::PrioBitmap};

// Identifiers
// ---------------------------------------------------------------------------

/// Task identifier, `0..task_count`.
pub type TaskId = u8;
/// Resource identifier, `0..resource_count`.
pub type ResourceId = u8;
/// Alarm identifier, `0..alarm_count`.
pub type AlarmId = u8;
/// Counter identifier, `0..counter_count`.
pub type CounterId = u8;
/// Priority level. Higher value = higher priority.
pub type Priority = u8;
/// Counter tick value. Wraps through zero; see [`TICK_HALF`].
pub type Tick = u32;

/// The "no task" sentinel.
pub const TASK_ID_NONE: TaskId = TaskId::MAX;
/// The "no resource" sentinel.
pub const RESOURCE_ID_NONE: ResourceId = ResourceId::MAX;
/// The "no alarm" sentinel.
pub const ALARM_ID_NONE: AlarmId = AlarmId::MAX;

/// The reserved scheduler-lock resource. Its ceiling is the blocking
/// priority, so holding it disables preemption.
pub const RES_SCHEDULER: ResourceId = 0;

/// The counter advanced by [`System::timer_tick`].
pub const SYSTEM_COUNTER: CounterId = 0;

/// Classification of the currently active stack; governs which services are
/// permitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallContext {
    /// The kernel has not been started.
    None,
    Task,
    Isr1,
    Isr2,
}

impl Init for CallContext {
    const INIT: Self = Self::None;
}

// Port layer
// ---------------------------------------------------------------------------

/// The architecture capabilities the kernel requires: interrupt masking,
/// context management, and idling. The only place raw architecture
/// intrinsics live.
///
/// # Safety
///
/// The implementation must uphold single-core execution semantics: between
/// `suspend_interrupts` and the matching `resume_interrupts` no other kernel
/// code runs, and `swap_state`/`exit_and_dispatch` transfer execution such
/// that exactly one context is ever running.
pub unsafe trait PortThreading: Sized + 'static {
    /// Saved interrupt mask, so critical sections may nest.
    type IrqState: Copy + Send + 'static;

    fn port_init();

    /// Low-power idle until an interrupt arrives. Called from the boot
    /// context with interrupts enabled.
    fn port_wait();

    /// Halt after shutdown. Never returns.
    fn port_shutdown() -> !;

    fn suspend_interrupts() -> Self::IrqState;
    fn resume_interrupts(state: Self::IrqState);
    fn disable_interrupts();
    fn enable_interrupts();

    /// Build an initial execution state that will enter the task's entry
    /// function with interrupts enabled.
    ///
    /// # Safety
    ///
    /// Must be called with interrupts suspended, on a task that is being
    /// dispatched for the first time since its activation.
    unsafe fn prepare_state(task: TaskId);

    /// Save `prev`'s volatile state and restore `next`'s. Either may be
    /// [`TASK_ID_NONE`], denoting the boot/idle context.
    ///
    /// # Safety
    ///
    /// Must be called with interrupts suspended, from the context identified
    /// by `prev`.
    unsafe fn swap_state(next: TaskId, prev: TaskId);

    /// Abandon the calling context (its task terminated) and dispatch
    /// `next`.
    ///
    /// # Safety
    ///
    /// Must be called with interrupts suspended, from the context of the
    /// terminated task. The port takes over the interrupt-mask bookkeeping.
    unsafe fn exit_and_dispatch(next: TaskId) -> !;
}

// Kernel state
// ---------------------------------------------------------------------------

/// The mutable state of one system: every control block, the ready queues,
/// the running-task slot, and the call context. Obtained via
/// [`KernelStatic::state`]; all members are guarded by the CPU lock.
pub struct KernelState<Traits: PortThreading> {
    pub(crate) task_cbs: [TaskCb<Traits>; MAX_TASKS],
    pub(crate) ready_lists: [ReadyList<Traits>; MAX_PRIORITY_LEVELS + 1],
    pub(crate) ready_bitmap: CpuLockCell<Traits, PrioBitmap>,
    pub(crate) resource_cbs: [ResourceCb<Traits>; MAX_RESOURCES],
    pub(crate) alarm_cbs: [AlarmCb<Traits>; MAX_ALARMS],
    pub(crate) counter_cbs: [CounterCb<Traits>; MAX_COUNTERS],
    pub(crate) running_task: CpuLockCell<Traits, TaskId>,
    pub(crate) call_context: CpuLockCell<Traits, CallContext>,
    pub(crate) keep_running: CpuLockCell<Traits, bool>,
    pub(crate) last_error: CpuLockCell<Traits, ErrorRecord>,
}

impl<Traits: PortThreading> Init for KernelState<Traits> {
    const INIT: Self = Self {
        task_cbs: Init::INIT,
        ready_lists: Init::INIT,
        ready_bitmap: Init::INIT,
        resource_cbs: Init::INIT,
        alarm_cbs: Init::INIT,
        counter_cbs: Init::INIT,
        running_task: CpuLockCell::new(TASK_ID_NONE),
        call_context: Init::INIT,
        keep_running: CpuLockCell::new(true),
        last_error: Init::INIT,
    };
}

// Public API
// ---------------------------------------------------------------------------

/// The service facade of one system.
pub struct System<Traits>(core::marker::PhantomData<Traits>);

#[inline]
fn into_result(code: ResultCode) -> Result<(), ResultCode> {
    if code.is_ok() {
        Ok(())
    } else {
        Err(code)
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Initialize the kernel from the static configuration: zero every
    /// control block, initialize the port, and ready the autostart tasks.
    /// No task runs until [`Self::start`].
    pub fn init() {
        let cfg = Traits::cfg();
        cfg::validate(cfg);

        {
            let mut lock = klock::lock_cpu::<Traits>();
            let state = Traits::state();
            for cb in state.task_cbs.iter() {
                cb.reset(&mut lock);
            }
            for list in state.ready_lists.iter() {
                list.reset(&mut lock);
            }
            state.ready_bitmap.set(&mut lock, PrioBitmap::new());
            for cb in state.resource_cbs.iter() {
                cb.reset(&mut lock);
            }
            for cb in state.alarm_cbs.iter() {
                cb.reset(&mut lock);
            }
            for cb in state.counter_cbs.iter() {
                cb.reset(&mut lock);
            }
            state.running_task.set(&mut lock, TASK_ID_NONE);
            state.call_context.set(&mut lock, CallContext::None);
            state.keep_running.set(&mut lock, true);
            state.last_error.set(&mut lock, ErrorRecord::INIT);
        }

        Traits::port_init();

        let mut lock = klock::lock_cpu::<Traits>();
        for (i, task_cfg) in cfg.tasks.iter().enumerate() {
            if task_cfg.autostart {
                let cb = &Traits::state().task_cbs[i];
                cb.activation.set(&mut lock, 1);
                task::suspended_to_ready::<Traits>(&mut lock, i as TaskId);
            }
        }
    }

    /// Start scheduling. The calling context becomes the boot/idle context:
    /// it dispatches the first task and then waits for interrupts whenever
    /// no task is ready, until shutdown.
    pub fn start() -> ! {
        {
            let mut lock = klock::lock_cpu::<Traits>();
            Traits::state()
                .call_context
                .set(&mut lock, CallContext::Task);
        }
        Traits::enable_interrupts();

        let _ = syscall::dispatch::<Traits>(Request::Schedule);

        loop {
            {
                let lock = klock::lock_cpu::<Traits>();
                if !Traits::state().keep_running.get(&lock) {
                    drop(lock);
                    Traits::port_shutdown();
                }
            }
            Traits::port_wait();
        }
    }

    /// The timer tick ISR body. The port calls this from its timer
    /// interrupt, on the interrupted context: it advances the system
    /// counter, runs its alarm queue, and reschedules. A context switch
    /// decided here takes effect on return.
    pub fn timer_tick() {
        let mut lock = klock::lock_cpu::<Traits>();
        let state = Traits::state();
        let prev_context = state.call_context.get(&lock);
        if prev_context == CallContext::None {
            return;
        }
        let prev = state.running_task.get(&lock);

        state.call_context.set(&mut lock, CallContext::Isr1);
        let _ = alarm::increment_internal::<Traits>(&mut lock, SYSTEM_COUNTER);
        task::schedule_internal::<Traits>(&mut lock);
        state.call_context.set(&mut lock, prev_context);

        let next = state.running_task.get(&lock);
        if next != prev {
            // The preempted context stays resumable: a preempted task was
            // pushed to the head of its ready queue, the boot context idles.
            // Safety: interrupts are suspended; `prev` is this context
            unsafe { Traits::swap_state(next, prev) };
        }
    }

    /// Dispatch a raw service request. The typed wrappers below all funnel
    /// through this; a port implementing a trap-based kernel entry may call
    /// it from its trap handler.
    pub fn syscall(req: Request<'_>) -> ResultCode {
        syscall::dispatch::<Traits>(req)
    }

    /// Halt the scheduler. Does not return when called from a task.
    pub fn shutdown() -> Result<(), ResultCode> {
        into_result(syscall::dispatch::<Traits>(Request::Shutdown))
    }

    /// Queue one activation of `task`, readying it if it was suspended.
    pub fn activate_task(task: TaskId) -> Result<(), ResultCode> {
        into_result(syscall::dispatch::<Traits>(Request::ActivateTask(task)))
    }

    /// Terminate the calling task. Does not return on success.
    pub fn terminate_task() -> Result<(), ResultCode> {
        into_result(syscall::dispatch::<Traits>(Request::TerminateTask))
    }

    /// Terminate the calling task and activate `task`. Does not return on
    /// success.
    pub fn chain_task(task: TaskId) -> Result<(), ResultCode> {
        into_result(syscall::dispatch::<Traits>(Request::ChainTask(task)))
    }

    /// Yield to a higher-priority ready task, if any. The point of
    /// rescheduling for non-preemptable tasks.
    pub fn schedule() -> Result<(), ResultCode> {
        into_result(syscall::dispatch::<Traits>(Request::Schedule))
    }

    /// The currently running task, if any.
    pub fn current_task() -> Option<TaskId> {
        let lock = klock::lock_cpu::<Traits>();
        let task = Traits::state().running_task.get(&lock);
        if task == TASK_ID_NONE {
            None
        } else {
            Some(task)
        }
    }

    /// Acquire a resource, raising the caller's priority to its ceiling.
    pub fn get_resource(res: ResourceId) -> Result<(), ResultCode> {
        into_result(syscall::dispatch::<Traits>(Request::GetResource(res)))
    }

    /// Release the most recently acquired resource.
    pub fn release_resource(res: ResourceId) -> Result<(), ResultCode> {
        into_result(syscall::dispatch::<Traits>(Request::ReleaseResource(res)))
    }

    /// Arm `alarm` to expire in `increment` ticks, then every `cycle` ticks
    /// if `cycle` is non-zero.
    pub fn set_rel_alarm(alarm: AlarmId, increment: Tick, cycle: Tick) -> Result<(), ResultCode> {
        into_result(syscall::dispatch::<Traits>(Request::SetRelAlarm {
            alarm,
            increment,
            cycle,
        }))
    }

    /// Arm `alarm` to expire when its counter reaches `start`, then every
    /// `cycle` ticks if `cycle` is non-zero.
    pub fn set_abs_alarm(alarm: AlarmId, start: Tick, cycle: Tick) -> Result<(), ResultCode> {
        into_result(syscall::dispatch::<Traits>(Request::SetAbsAlarm {
            alarm,
            start,
            cycle,
        }))
    }

    /// Disarm `alarm`.
    pub fn cancel_alarm(alarm: AlarmId) -> Result<(), ResultCode> {
        into_result(syscall::dispatch::<Traits>(Request::CancelAlarm(alarm)))
    }

    /// The number of ticks before `alarm` expires.
    pub fn get_alarm(alarm: AlarmId) -> Result<Tick, ResultCode> {
        let mut tick = 0;
        into_result(syscall::dispatch::<Traits>(Request::GetAlarm {
            alarm,
            tick: &mut tick,
        }))
        .map(|()| tick)
    }

    /// Advance a counter by one tick, expiring its due alarms.
    pub fn increment_counter(counter: CounterId) -> Result<(), ResultCode> {
        into_result(syscall::dispatch::<Traits>(Request::IncrementCounter(
            counter,
        )))
    }

    /// The record of the most recent failed check.
    pub fn last_error() -> ErrorRecord {
        let lock = klock::lock_cpu::<Traits>();
        Traits::state().last_error.get(&lock)
    }
}
