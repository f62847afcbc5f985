//! Holding the scheduler-lock resource (id 0) keeps a higher-priority
//! activation from preempting until it is released.
use std::sync::atomic::{AtomicBool, Ordering};

use rosek_kernel::{KernelCfg, ResourceCfg, System, TaskCfg, RES_SCHEDULER};
use rosek_port_std as port;

port::use_port!(unsafe struct SystemTraits);
rosek_kernel::configure_kernel!(SystemTraits, CFG);

type K = System<SystemTraits>;

static TASKS: [TaskCfg; 2] = [
    TaskCfg::new(0, low_task).with_autostart(),
    TaskCfg::new(1, high_task),
];
static RESOURCES: [ResourceCfg; 1] = [ResourceCfg { ceiling: 2 }];
static CFG: KernelCfg = KernelCfg {
    tasks: &TASKS,
    resources: &RESOURCES,
    alarms: &[],
    counter_count: 0,
    priority_count: 2,
    pre_task_hook: None,
    post_task_hook: None,
    error_hook: None,
};

static HIGH_RAN: AtomicBool = AtomicBool::new(false);

fn low_task() {
    K::get_resource(RES_SCHEDULER).unwrap();
    K::activate_task(1).unwrap();
    assert!(
        !HIGH_RAN.load(Ordering::Relaxed),
        "preempted while holding the scheduler lock"
    );
    K::release_resource(RES_SCHEDULER).unwrap();
    assert!(HIGH_RAN.load(Ordering::Relaxed));
    K::shutdown().unwrap();
}

fn high_task() {
    HIGH_RAN.store(true, Ordering::Relaxed);
    K::terminate_task().unwrap();
}

#[test]
fn scheduler_lock_blocks_preemption() {
    port::init_logging();
    port::boot::<SystemTraits>();
    assert!(HIGH_RAN.load(Ordering::Relaxed));
}
