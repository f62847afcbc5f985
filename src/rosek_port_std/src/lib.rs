//! Simulation environment for running the kernel on a hosted target.
//!
//! Each task runs on a dedicated OS thread gated so that exactly one context
//! (the boot context or one task) executes at a time, which is the execution
//! model the kernel is written for. The interrupt mask is simulated by a
//! depth counter; "timer interrupts" are pended with [`pend_timer_tick`] (or
//! a background [`start_timer`] thread) and delivered on the current context
//! whenever the mask drops to zero or the boot context idles, the same
//! granularity a signal-driven hosted port provides.
//!
//! ```ignore
//! rosek_port_std::use_port!(unsafe struct SystemTraits);
//! rosek_kernel::configure_kernel!(SystemTraits, CFG);
//!
//! rosek_port_std::boot::<SystemTraits>(); // returns on shutdown
//! ```
pub use rosek_kernel as kernel;

use std::any::Any;
use std::panic::{catch_unwind, panic_any, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

use kernel::{KernelStatic, System, TaskId, TASK_ID_NONE};
use once_cell::sync::OnceCell;

/// A system type usable with this port.
pub trait PortInstance: kernel::KernelTraits {
    fn port_state() -> &'static State;
}

/// Implement the port traits for a system type. The type must also be given
/// a kernel configuration with [`rosek_kernel::configure_kernel!`].
#[macro_export]
macro_rules! use_port {
    (unsafe struct $Ty:ident) => {
        struct $Ty;

        unsafe impl $crate::kernel::PortThreading for $Ty {
            type IrqState = u32;
            fn port_init() {
                $crate::port_init::<Self>()
            }
            fn port_wait() {
                $crate::port_wait::<Self>()
            }
            fn port_shutdown() -> ! {
                $crate::port_shutdown::<Self>()
            }
            fn suspend_interrupts() -> u32 {
                $crate::suspend_interrupts::<Self>()
            }
            fn resume_interrupts(state: u32) {
                $crate::resume_interrupts::<Self>(state)
            }
            fn disable_interrupts() {
                $crate::disable_interrupts::<Self>()
            }
            fn enable_interrupts() {
                $crate::enable_interrupts::<Self>()
            }
            unsafe fn prepare_state(task: $crate::kernel::TaskId) {
                $crate::prepare_state::<Self>(task)
            }
            unsafe fn swap_state(
                next: $crate::kernel::TaskId,
                prev: $crate::kernel::TaskId,
            ) {
                $crate::swap_state::<Self>(next, prev)
            }
            unsafe fn exit_and_dispatch(next: $crate::kernel::TaskId) -> ! {
                $crate::exit_and_dispatch::<Self>(next)
            }
        }

        impl $crate::PortInstance for $Ty {
            fn port_state() -> &'static $crate::State {
                static STATE: $crate::State = $crate::State::new();
                &STATE
            }
        }
    };
}

// Port state
// ---------------------------------------------------------------------------

/// Port-side state of one simulated system.
pub struct State {
    inner: OnceCell<Inner>,
}

impl State {
    pub const fn new() -> Self {
        Self {
            inner: OnceCell::new(),
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    /// One gate per context: tasks by id, the boot context last.
    gates: Vec<Gate>,
    irq: Mutex<IrqInner>,
    /// Wakes the boot context out of `port_wait`.
    irq_cv: Condvar,
    shutdown: AtomicBool,
    /// Which task threads have been spawned.
    spawned: Mutex<Vec<bool>>,
    /// A panic that escaped a task entry, re-raised by `boot`.
    task_panic: Mutex<Option<Box<dyn Any + Send>>>,
}

struct IrqInner {
    /// Simulated interrupt-mask nesting depth; 0 = interrupts enabled.
    depth: u32,
    /// Timer interrupts waiting to be delivered.
    pending_ticks: u32,
    /// True while a tick is being delivered, to keep nested mask
    /// transitions from re-entering the delivery loop.
    draining: bool,
}

impl Inner {
    fn new(task_count: usize) -> Self {
        Self {
            gates: (0..task_count + 1).map(|_| Gate::new()).collect(),
            irq: Mutex::new(IrqInner {
                depth: 0,
                pending_ticks: 0,
                draining: false,
            }),
            irq_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            spawned: Mutex::new(vec![false; task_count]),
            task_panic: Mutex::new(None),
        }
    }
}

/// A binary semaphore parking one context.
struct Gate {
    resume: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self {
            resume: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn signal(&self) {
        *self.resume.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut resume = self.resume.lock().unwrap();
        while !*resume {
            resume = self.cv.wait(resume).unwrap();
        }
        *resume = false;
    }
}

fn inner<Traits: PortInstance>() -> &'static Inner {
    Traits::port_state()
        .inner
        .get_or_init(|| Inner::new(Traits::cfg().tasks.len()))
}

fn gate_index<Traits: PortInstance>(ctx: TaskId) -> usize {
    if ctx == TASK_ID_NONE {
        Traits::cfg().tasks.len()
    } else {
        ctx as usize
    }
}

fn ctx_name(ctx: TaskId) -> String {
    if ctx == TASK_ID_NONE {
        "boot".to_owned()
    } else {
        format!("task{ctx}")
    }
}

// Unwind payloads. `ExitToken` unwinds a terminated task's thread back to
// its worker loop; `ShutdownToken` unwinds the boot thread back to `boot`.
struct ExitToken;
struct ShutdownToken;

static PANIC_HOOK: std::sync::Once = std::sync::Once::new();

/// Keep the default panic hook from printing our control-flow payloads.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if info.payload().is::<ExitToken>() || info.payload().is::<ShutdownToken>() {
                return;
            }
            prev(info);
        }));
    });
}

// Entry points
// ---------------------------------------------------------------------------

/// Initialize the kernel and run it on the calling thread, which becomes the
/// boot/idle context. Returns once the kernel shuts down. A panic escaping a
/// task entry function is resumed on the caller.
pub fn boot<Traits: PortInstance>() {
    install_panic_hook();
    let result = catch_unwind(|| {
        System::<Traits>::init();
        System::<Traits>::start()
    });
    match result {
        Ok(()) => unreachable!("System::start never returns"),
        Err(payload) if payload.is::<ShutdownToken>() => {
            if let Some(panic) = inner::<Traits>().task_panic.lock().unwrap().take() {
                resume_unwind(panic);
            }
            log::debug!("kernel shut down");
        }
        Err(payload) => resume_unwind(payload),
    }
}

/// Queue one timer interrupt. It is delivered on the current context at the
/// next point where the simulated interrupt mask allows it. May be called
/// from any thread.
pub fn pend_timer_tick<Traits: PortInstance>() {
    let inner = inner::<Traits>();
    {
        let mut irq = inner.irq.lock().unwrap();
        irq.pending_ticks += 1;
    }
    inner.irq_cv.notify_all();
}

/// Spawn a background thread pending one timer tick per `period`, the
/// hosted analog of a periodic hardware timer. Stops at shutdown.
pub fn start_timer<Traits: PortInstance>(period: Duration) {
    thread::Builder::new()
        .name("timer".to_owned())
        .spawn(move || loop {
            thread::sleep(period);
            if inner::<Traits>().shutdown.load(Ordering::Relaxed) {
                break;
            }
            pend_timer_tick::<Traits>();
        })
        .expect("failed to spawn the timer thread");
}

/// `env_logger` setup for tests and examples.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// PortThreading implementation
// ---------------------------------------------------------------------------

#[doc(hidden)]
pub fn port_init<Traits: PortInstance>() {
    install_panic_hook();
    let inner = inner::<Traits>();
    inner.shutdown.store(false, Ordering::Relaxed);
    log::trace!(
        "port initialized with {} task context(s)",
        inner.gates.len() - 1
    );
}

#[doc(hidden)]
pub fn port_wait<Traits: PortInstance>() {
    let inner = inner::<Traits>();
    let mut irq = inner.irq.lock().unwrap();
    loop {
        if inner.shutdown.load(Ordering::Relaxed) {
            drop(irq);
            panic_any(ShutdownToken);
        }
        if irq.pending_ticks > 0 && irq.depth == 0 && !irq.draining {
            irq.pending_ticks -= 1;
            irq.draining = true;
            drop(irq);
            System::<Traits>::timer_tick();
            irq = inner.irq.lock().unwrap();
            irq.draining = false;
            return;
        }
        let (guard, _) = inner
            .irq_cv
            .wait_timeout(irq, Duration::from_millis(50))
            .unwrap();
        irq = guard;
    }
}

#[doc(hidden)]
pub fn port_shutdown<Traits: PortInstance>() -> ! {
    let inner = inner::<Traits>();
    inner.shutdown.store(true, Ordering::Relaxed);
    inner.irq_cv.notify_all();
    log::debug!("halting the scheduler");
    // Parked task threads stay parked; the process reclaims them.
    panic_any(ShutdownToken);
}

#[doc(hidden)]
pub fn suspend_interrupts<Traits: PortInstance>() -> u32 {
    let mut irq = inner::<Traits>().irq.lock().unwrap();
    let prev = irq.depth;
    irq.depth += 1;
    prev
}

#[doc(hidden)]
pub fn resume_interrupts<Traits: PortInstance>(state: u32) {
    let inner = inner::<Traits>();
    let mut irq = inner.irq.lock().unwrap();
    irq.depth = state;
    if irq.depth == 0 && !irq.draining && !inner.shutdown.load(Ordering::Relaxed) {
        // deliver interrupts that arrived while masked
        irq.draining = true;
        while irq.pending_ticks > 0 {
            irq.pending_ticks -= 1;
            drop(irq);
            System::<Traits>::timer_tick();
            irq = inner.irq.lock().unwrap();
        }
        irq.draining = false;
    }
}

#[doc(hidden)]
pub fn disable_interrupts<Traits: PortInstance>() {
    let mut irq = inner::<Traits>().irq.lock().unwrap();
    irq.depth = irq.depth.max(1);
}

#[doc(hidden)]
pub fn enable_interrupts<Traits: PortInstance>() {
    resume_interrupts::<Traits>(0);
}

#[doc(hidden)]
pub fn prepare_state<Traits: PortInstance>(task: TaskId) {
    let inner = inner::<Traits>();
    let mut spawned = inner.spawned.lock().unwrap();
    if spawned[task as usize] {
        // the worker loop reruns the entry function on its next resume
        return;
    }
    spawned[task as usize] = true;

    let cfg = &Traits::cfg().tasks[task as usize];
    let entry = cfg.entry;
    thread::Builder::new()
        .name(format!("task{task}"))
        .stack_size(cfg.stack_size)
        .spawn(move || task_thread::<Traits>(task, entry))
        .expect("failed to spawn a task thread");
}

#[doc(hidden)]
pub fn swap_state<Traits: PortInstance>(next: TaskId, prev: TaskId) {
    let inner = inner::<Traits>();
    log::trace!("context switch {} -> {}", ctx_name(prev), ctx_name(next));
    inner.gates[gate_index::<Traits>(next)].signal();
    inner.gates[gate_index::<Traits>(prev)].wait();
}

#[doc(hidden)]
pub fn exit_and_dispatch<Traits: PortInstance>(next: TaskId) -> ! {
    let inner = inner::<Traits>();
    log::trace!("context exit -> {}", ctx_name(next));
    inner.gates[gate_index::<Traits>(next)].signal();
    // Unwind this thread back to its worker loop. The abandoned interrupt
    // mask is reset when a context (re)starts.
    panic_any(ExitToken);
}

// Task threads
// ---------------------------------------------------------------------------

fn task_thread<Traits: PortInstance>(task: TaskId, entry: fn()) {
    let inner = inner::<Traits>();
    loop {
        inner.gates[task as usize].wait();
        if inner.shutdown.load(Ordering::Relaxed) {
            break;
        }

        // A fresh activation begins with interrupts enabled.
        inner.irq.lock().unwrap().depth = 0;
        log::trace!("task{task} activation starting");

        let result = catch_unwind(AssertUnwindSafe(|| {
            entry();
            // Ending the entry function without TerminateTask is forbidden
            // by the kernel contract; the hosted port terminates on the
            // task's behalf.
            let _ = System::<Traits>::terminate_task();
        }));
        match result {
            Err(payload) if payload.is::<ExitToken>() => continue,
            Err(payload) => {
                // A real panic. Park the kernel and hand the payload to
                // `boot` so the host sees the failure.
                *inner.task_panic.lock().unwrap() = Some(payload);
                inner.shutdown.store(true, Ordering::Relaxed);
                inner.irq_cv.notify_all();
                let boot_gate = &inner.gates[gate_index::<Traits>(TASK_ID_NONE)];
                boot_gate.signal();
                break;
            }
            Ok(()) => {
                log::error!("task{task} failed to terminate");
                break;
            }
        }
    }
}
