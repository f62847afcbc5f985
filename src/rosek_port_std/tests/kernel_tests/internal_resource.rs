//! A task with an internal resource is not preempted by tasks at or below
//! the internal ceiling until it reaches a rescheduling point.
use std::sync::atomic::{AtomicBool, Ordering};

use rosek_kernel::{KernelCfg, ResourceCfg, System, TaskCfg};
use rosek_port_std as port;

port::use_port!(unsafe struct SystemTraits);
rosek_kernel::configure_kernel!(SystemTraits, CFG);

type K = System<SystemTraits>;

static TASKS: [TaskCfg; 2] = [
    TaskCfg::new(0, grouped).with_autostart().with_internal_resource(1),
    TaskCfg::new(1, preemptor),
];
static RESOURCES: [ResourceCfg; 2] = [
    ResourceCfg { ceiling: 2 },
    ResourceCfg { ceiling: 1 },
];
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

static PREEMPTOR_RAN: AtomicBool = AtomicBool::new(false);

fn grouped() {
    // the internal resource keeps us at the group ceiling, so the
    // higher-base-priority activation does not preempt here
    K::activate_task(1).unwrap();
    assert!(!PREEMPTOR_RAN.load(Ordering::Relaxed));

    // Schedule() is the rescheduling point: the internal resource is
    // released across it
    K::schedule().unwrap();
    assert!(PREEMPTOR_RAN.load(Ordering::Relaxed));
    K::shutdown().unwrap();
}

fn preemptor() {
    PREEMPTOR_RAN.store(true, Ordering::Relaxed);
    K::terminate_task().unwrap();
}

#[test]
fn internal_resource_forms_a_non_preemption_group() {
    port::init_logging();
    port::boot::<SystemTraits>();
    assert!(PREEMPTOR_RAN.load(Ordering::Relaxed));
}
