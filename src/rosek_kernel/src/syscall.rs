//! The syscall dispatcher.
//!
//! Every task-facing service funnels through [`dispatch`], which establishes
//! the interrupts-suspended critical section once, brackets rescheduling
//! services with the caller's internal-resource release/reacquire, and
//! performs the context swap at the tail if the scheduling decision changed
//! the running task.
use crate::{
    alarm,
    cfg::KernelTraits,
    error::ResultCode,
    klock, resource, task, AlarmId, CallContext, CounterId, ResourceId, TaskId, Tick,
};

/// A service request.
pub enum Request<'a> {
    Schedule,
    TerminateTask,
    ChainTask(TaskId),
    ActivateTask(TaskId),
    GetResource(ResourceId),
    ReleaseResource(ResourceId),
    SetRelAlarm {
        alarm: AlarmId,
        increment: Tick,
        cycle: Tick,
    },
    SetAbsAlarm {
        alarm: AlarmId,
        start: Tick,
        cycle: Tick,
    },
    CancelAlarm(AlarmId),
    GetAlarm {
        alarm: AlarmId,
        tick: &'a mut Tick,
    },
    IncrementCounter(CounterId),
    Shutdown,
}

/// Execute a service request and return its status.
///
/// On return the caller is the running task again (or, for a successfully
/// terminated caller, never: its context is abandoned through
/// `exit_and_dispatch`).
pub(crate) fn dispatch<Traits: KernelTraits>(req: Request<'_>) -> ResultCode {
    let mut lock = klock::lock_cpu::<Traits>();
    let state = Traits::state();
    let prev = state.running_task.get(&lock);
    // In ISR context the scheduling decision is deferred to the ISR tail.
    let in_task = state.call_context.get(&lock) == CallContext::Task;
    // Set when the service terminated the calling task: its context must be
    // abandoned even if the scheduler picked the same task again (an
    // immediate re-activation restarts at the entry function).
    let mut caller_exited = false;

    let code = match req {
        Request::Schedule => {
            resource::internal_release::<Traits>(&mut lock);
            let code = task::schedule_service::<Traits>(&mut lock);
            resource::internal_get::<Traits>(&mut lock);
            code
        }
        Request::TerminateTask => {
            resource::internal_release::<Traits>(&mut lock);
            let code = task::terminate_internal::<Traits>(&mut lock);
            if code.is_ok() && in_task {
                caller_exited = true;
                task::schedule_internal::<Traits>(&mut lock);
            }
            resource::internal_get::<Traits>(&mut lock);
            code
        }
        Request::ChainTask(t) => {
            resource::internal_release::<Traits>(&mut lock);
            let code = task::chain_internal::<Traits>(&mut lock, t);
            if code.is_ok() && in_task {
                caller_exited = true;
                task::schedule_internal::<Traits>(&mut lock);
            }
            resource::internal_get::<Traits>(&mut lock);
            code
        }
        Request::ActivateTask(t) => {
            let code = task::activate_internal::<Traits>(&mut lock, t);
            if code.is_ok() && in_task {
                task::schedule_internal::<Traits>(&mut lock);
            }
            code
        }
        Request::GetResource(r) => resource::get_resource_internal::<Traits>(&mut lock, r),
        Request::ReleaseResource(r) => {
            let code = resource::release_resource_internal::<Traits>(&mut lock, r);
            if code.is_ok() && in_task {
                task::schedule_internal::<Traits>(&mut lock);
            }
            code
        }
        Request::SetRelAlarm {
            alarm,
            increment,
            cycle,
        } => alarm::set_rel_internal::<Traits>(&mut lock, alarm, increment, cycle),
        Request::SetAbsAlarm {
            alarm,
            start,
            cycle,
        } => alarm::set_abs_internal::<Traits>(&mut lock, alarm, start, cycle),
        Request::CancelAlarm(a) => alarm::cancel_internal::<Traits>(&mut lock, a),
        Request::GetAlarm { alarm, tick } => {
            alarm::get_alarm_internal::<Traits>(&mut lock, alarm, tick)
        }
        Request::IncrementCounter(c) => {
            let code = alarm::increment_internal::<Traits>(&mut lock, c);
            if code.is_ok() && in_task {
                task::schedule_internal::<Traits>(&mut lock);
            }
            code
        }
        Request::Shutdown => task::shutdown_internal::<Traits>(&mut lock),
    };

    let next = state.running_task.get(&lock);
    if caller_exited {
        // The port takes over the interrupt-mask bookkeeping from the
        // abandoned critical section.
        core::mem::forget(lock);
        // Safety: CPU Lock is active and the kernel state is consistent
        unsafe { Traits::exit_and_dispatch(next) }
    }
    if next != prev {
        // Safety: ditto; `prev` is the context we are executing on
        unsafe { Traits::swap_state(next, prev) };
    }
    drop(lock);
    code
}
