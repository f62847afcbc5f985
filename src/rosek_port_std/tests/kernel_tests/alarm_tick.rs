//! Timer-driven task activation through the counter/alarm engine.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rosek_kernel::{AlarmCfg, KernelCfg, System, TaskCfg};
use rosek_port_std as port;

/// Ticks pended while a task runs are delivered at the next
/// interrupt-enable boundary; the expiring alarm's task preempts.
mod syscall_driven {
    use super::*;

    port::use_port!(unsafe struct SystemTraits);
    rosek_kernel::configure_kernel!(SystemTraits, CFG);

    type K = System<SystemTraits>;

    static TASKS: [TaskCfg; 2] = [
        TaskCfg::new(0, setter).with_autostart(),
        TaskCfg::new(1, expired),
    ];
    static ALARMS: [AlarmCfg; 1] = [AlarmCfg { counter: 0, task: 1 }];
    static CFG: KernelCfg = KernelCfg {
        tasks: &TASKS,
        resources: &[],
        alarms: &ALARMS,
        counter_count: 1,
        priority_count: 2,
        pre_task_hook: None,
        post_task_hook: None,
        error_hook: None,
    };

    static EXPIRED: AtomicBool = AtomicBool::new(false);

    fn setter() {
        K::set_rel_alarm(0, 2, 0).unwrap();
        port::pend_timer_tick::<SystemTraits>();
        port::pend_timer_tick::<SystemTraits>();
        assert!(!EXPIRED.load(Ordering::Relaxed));

        // both ticks are delivered when this service call unmasks
        // interrupts on its way out
        K::schedule().unwrap();
        assert!(EXPIRED.load(Ordering::Relaxed));
        K::shutdown().unwrap();
    }

    fn expired() {
        EXPIRED.store(true, Ordering::Relaxed);
        K::terminate_task().unwrap();
    }

    #[test]
    fn pended_ticks_fire_the_alarm() {
        port::init_logging();
        port::boot::<SystemTraits>();
        assert!(EXPIRED.load(Ordering::Relaxed));
    }
}

/// With no task ready, ticks from the background timer are delivered in the
/// boot context's idle wait.
mod idle_driven {
    use super::*;

    port::use_port!(unsafe struct SystemTraits);
    rosek_kernel::configure_kernel!(SystemTraits, CFG);

    type K = System<SystemTraits>;

    static TASKS: [TaskCfg; 2] = [
        TaskCfg::new(0, setter).with_autostart(),
        TaskCfg::new(1, expired),
    ];
    static ALARMS: [AlarmCfg; 1] = [AlarmCfg { counter: 0, task: 1 }];
    static CFG: KernelCfg = KernelCfg {
        tasks: &TASKS,
        resources: &[],
        alarms: &ALARMS,
        counter_count: 1,
        priority_count: 2,
        pre_task_hook: None,
        post_task_hook: None,
        error_hook: None,
    };

    static EXPIRED: AtomicBool = AtomicBool::new(false);

    fn setter() {
        K::set_rel_alarm(0, 3, 0).unwrap();
        port::start_timer::<SystemTraits>(Duration::from_millis(1));
        K::terminate_task().unwrap();
    }

    fn expired() {
        EXPIRED.store(true, Ordering::Relaxed);
        K::shutdown().unwrap();
    }

    #[test]
    fn idle_wait_delivers_timer_ticks() {
        port::init_logging();
        port::boot::<SystemTraits>();
        assert!(EXPIRED.load(Ordering::Relaxed));
    }
}
