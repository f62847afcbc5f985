//! Counters and the alarm engine.
//!
//! Each counter owns a min-heap of queued alarms keyed by absolute tick
//! deadline. Deadlines wrap through zero, so the heap order and all
//! remaining-time arithmetic use the half-range sequence comparison
//! [`tick_lt`] instead of plain `<`.
use core::mem;

use arrayvec::ArrayVec;

use crate::{
    cfg::{KernelTraits, MAX_ALARMS},
    error::{os_check, os_check_ext, ResultCode, ServiceId},
    klock::{CpuLockCell, CpuLockGuard},
    task,
    utils::binary_heap::{BinaryHeap, BinaryHeapCtx},
    utils::Init,
    AlarmId, CounterId, PortThreading, Tick, TASK_ID_NONE,
};

/// Half of the tick modulus.
pub const TICK_HALF: Tick = 1 << (Tick::BITS - 1);

/// Wrap-aware less-than: `lt(a, b)` iff `b - a ∈ (0, TICK_HALF]`. Naive `<`
/// would reorder deadlines when the counter overflows.
#[inline]
pub(crate) fn tick_lt(a: Tick, b: Tick) -> bool {
    b.wrapping_sub(a).wrapping_sub(1) < TICK_HALF
}

/// The queued alarms of one counter. Zero-based with an explicit length;
/// capacity bounds the total number of alarms attachable to one counter.
pub(crate) type AlarmHeap = ArrayVec<AlarmId, MAX_ALARMS>;

/// Counter control block.
pub struct CounterCb<Traits: PortThreading> {
    /// Monotonically increasing, wrapping tick count.
    pub(crate) ticks: CpuLockCell<Traits, Tick>,
    pub(crate) queue: CpuLockCell<Traits, AlarmHeap>,
}

impl<Traits: PortThreading> Init for CounterCb<Traits> {
    const INIT: Self = Self {
        ticks: CpuLockCell::new(0),
        queue: CpuLockCell::new(AlarmHeap::new_const()),
    };
}

impl<Traits: PortThreading> CounterCb<Traits> {
    pub(crate) fn reset(&self, lock: &mut CpuLockGuard<Traits>) {
        self.ticks.set(lock, 0);
        self.queue.with_mut(lock, |q| q.clear());
    }
}

/// Alarm control block.
pub struct AlarmCb<Traits: PortThreading> {
    /// Absolute deadline on the owning counter.
    pub(crate) expires: CpuLockCell<Traits, Tick>,
    /// Re-arm period; 0 for one-shot alarms.
    pub(crate) cycle: CpuLockCell<Traits, Tick>,
    /// True iff the alarm occupies a slot in its counter's heap.
    pub(crate) queued: CpuLockCell<Traits, bool>,
}

impl<Traits: PortThreading> Init for AlarmCb<Traits> {
    const INIT: Self = Self {
        expires: CpuLockCell::new(0),
        cycle: CpuLockCell::new(0),
        queued: CpuLockCell::new(false),
    };
}

impl<Traits: PortThreading> AlarmCb<Traits> {
    pub(crate) fn reset(&self, lock: &mut CpuLockGuard<Traits>) {
        self.expires.set(lock, 0);
        self.cycle.set(lock, 0);
        self.queued.set(lock, false);
    }
}

/// Heap comparator reading the alarms' deadlines.
struct DeadlineOrder<'a, Traits: KernelTraits> {
    lock: &'a CpuLockGuard<Traits>,
}

impl<Traits: KernelTraits> BinaryHeapCtx<AlarmId> for DeadlineOrder<'_, Traits> {
    #[inline]
    fn lt(&mut self, x: &AlarmId, y: &AlarmId) -> bool {
        let cbs = &Traits::state().alarm_cbs;
        tick_lt(
            cbs[*x as usize].expires.get(self.lock),
            cbs[*y as usize].expires.get(self.lock),
        )
    }
}

/// Insert `alarm` into its counter's heap with the given deadline.
fn arm<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    alarm: AlarmId,
    counter: CounterId,
    deadline: Tick,
    cycle: Tick,
) {
    let state = Traits::state();
    let acb = &state.alarm_cbs[alarm as usize];
    acb.expires.set(lock, deadline);
    acb.cycle.set(lock, cycle);

    let ccb = &state.counter_cbs[counter as usize];
    let mut queue = ccb.queue.with_mut(lock, mem::take);
    queue.heap_push(alarm, DeadlineOrder::<Traits> { lock: &*lock });
    ccb.queue.with_mut(lock, |q| *q = queue);
    acb.queued.set(lock, true);
}

/// `SetRelAlarm` service: deadline = current count + `increment`.
pub(crate) fn set_rel_internal<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    alarm: AlarmId,
    increment: Tick,
    cycle: Tick,
) -> ResultCode {
    let cfg = Traits::cfg();
    os_check_ext!(
        Traits,
        lock,
        (alarm as usize) < cfg.alarms.len(),
        ServiceId::SetRelAlarm,
        ResultCode::Id,
        [alarm, increment, cycle]
    );
    os_check!(
        Traits,
        lock,
        increment != 0,
        ServiceId::SetRelAlarm,
        ResultCode::Value,
        [alarm, increment, cycle]
    );
    let state = Traits::state();
    os_check!(
        Traits,
        lock,
        !state.alarm_cbs[alarm as usize].queued.get(lock),
        ServiceId::SetRelAlarm,
        ResultCode::State,
        [alarm, increment, cycle]
    );

    let counter = cfg.alarms[alarm as usize].counter;
    let deadline = state.counter_cbs[counter as usize]
        .ticks
        .get(lock)
        .wrapping_add(increment);
    arm::<Traits>(lock, alarm, counter, deadline, cycle);
    ResultCode::Ok
}

/// `SetAbsAlarm` service: deadline = `start`. A start value already in the
/// past (wrap-wise) expires only when the counter reaches it again.
pub(crate) fn set_abs_internal<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    alarm: AlarmId,
    start: Tick,
    cycle: Tick,
) -> ResultCode {
    let cfg = Traits::cfg();
    os_check_ext!(
        Traits,
        lock,
        (alarm as usize) < cfg.alarms.len(),
        ServiceId::SetAbsAlarm,
        ResultCode::Id,
        [alarm, start, cycle]
    );
    let state = Traits::state();
    os_check!(
        Traits,
        lock,
        !state.alarm_cbs[alarm as usize].queued.get(lock),
        ServiceId::SetAbsAlarm,
        ResultCode::State,
        [alarm, start, cycle]
    );

    let counter = cfg.alarms[alarm as usize].counter;
    arm::<Traits>(lock, alarm, counter, start, cycle);
    ResultCode::Ok
}

/// `CancelAlarm` service. The heap has no position index, so this linearly
/// scans for the alarm, swap-removes it and restores the heap order.
pub(crate) fn cancel_internal<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    alarm: AlarmId,
) -> ResultCode {
    let cfg = Traits::cfg();
    os_check_ext!(
        Traits,
        lock,
        (alarm as usize) < cfg.alarms.len(),
        ServiceId::CancelAlarm,
        ResultCode::Id,
        [alarm]
    );
    let state = Traits::state();
    os_check!(
        Traits,
        lock,
        state.alarm_cbs[alarm as usize].queued.get(lock),
        ServiceId::CancelAlarm,
        ResultCode::NoFunc,
        [alarm]
    );

    let counter = cfg.alarms[alarm as usize].counter;
    let ccb = &state.counter_cbs[counter as usize];
    let pos = ccb
        .queue
        .with(&*lock, |q| q.iter().position(|&a| a == alarm));
    os_check!(
        Traits,
        lock,
        pos.is_some(),
        ServiceId::CancelAlarm,
        ResultCode::NoFunc,
        [alarm]
    );
    if let Some(pos) = pos {
        let mut queue = ccb.queue.with_mut(lock, mem::take);
        let _ = queue.heap_remove(pos, DeadlineOrder::<Traits> { lock: &*lock });
        ccb.queue.with_mut(lock, |q| *q = queue);
    }
    state.alarm_cbs[alarm as usize].queued.set(lock, false);
    ResultCode::Ok
}

/// `GetAlarm` service: the number of ticks before the alarm expires.
pub(crate) fn get_alarm_internal<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    alarm: AlarmId,
    tick: &mut Tick,
) -> ResultCode {
    let cfg = Traits::cfg();
    os_check_ext!(
        Traits,
        lock,
        (alarm as usize) < cfg.alarms.len(),
        ServiceId::GetAlarm,
        ResultCode::Id,
        [alarm]
    );
    let state = Traits::state();
    os_check!(
        Traits,
        lock,
        state.alarm_cbs[alarm as usize].queued.get(lock),
        ServiceId::GetAlarm,
        ResultCode::NoFunc,
        [alarm]
    );

    let counter = cfg.alarms[alarm as usize].counter;
    let now = state.counter_cbs[counter as usize].ticks.get(lock);
    *tick = state.alarm_cbs[alarm as usize]
        .expires
        .get(lock)
        .wrapping_sub(now);
    ResultCode::Ok
}

/// `IncrementCounter` service: advance the counter and run every alarm that
/// has become due.
pub(crate) fn increment_internal<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    counter: CounterId,
) -> ResultCode {
    os_check_ext!(
        Traits,
        lock,
        (counter as usize) < Traits::cfg().counter_count,
        ServiceId::IncrementCounter,
        ResultCode::Id,
        [counter]
    );
    let ccb = &Traits::state().counter_cbs[counter as usize];
    let now = ccb.ticks.get(lock).wrapping_add(1);
    ccb.ticks.set(lock, now);
    counter_tick::<Traits>(lock, counter);
    ResultCode::Ok
}

/// Pop and fire every alarm whose deadline has been reached.
fn counter_tick<Traits: KernelTraits>(lock: &mut CpuLockGuard<Traits>, counter: CounterId) {
    let cfg = Traits::cfg();
    let state = Traits::state();
    let ccb = &state.counter_cbs[counter as usize];
    let now = ccb.ticks.get(lock);

    let mut queue = ccb.queue.with_mut(lock, mem::take);
    loop {
        let Some(&root) = queue.first() else { break };
        let deadline = state.alarm_cbs[root as usize].expires.get(lock);
        if tick_lt(now, deadline) {
            // the earliest deadline is still in the future
            break;
        }

        let _ = queue.heap_pop(DeadlineOrder::<Traits> { lock: &*lock });
        state.alarm_cbs[root as usize].queued.set(lock, false);

        let target = cfg.alarms[root as usize].task;
        if target != TASK_ID_NONE {
            // An activation at the limit is a warning: it goes through the
            // error record and hook, but the tick carries on.
            let _ = task::activate_internal::<Traits>(lock, target);
        }

        let cycle = state.alarm_cbs[root as usize].cycle.get(lock);
        if cycle != 0 {
            let acb = &state.alarm_cbs[root as usize];
            acb.expires.set(lock, deadline.wrapping_add(cycle));
            queue.heap_push(root, DeadlineOrder::<Traits> { lock: &*lock });
            acb.queued.set(lock, true);
        }
    }
    ccb.queue.with_mut(lock, |q| *q = queue);
}
