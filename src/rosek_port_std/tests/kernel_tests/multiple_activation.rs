//! Extended-multiple activation counting: N queued activations run the task
//! N times before it becomes suspended again.
use std::sync::atomic::{AtomicU32, Ordering};

use rosek_kernel::{KernelCfg, ResourceCfg, ResultCode, System, TaskCfg, RES_SCHEDULER};
use rosek_port_std as port;

port::use_port!(unsafe struct SystemTraits);
rosek_kernel::configure_kernel!(SystemTraits, CFG);

type K = System<SystemTraits>;

static TASKS: [TaskCfg; 2] = [
    TaskCfg::new(0, feeder).with_autostart(),
    TaskCfg::new(1, consumer).with_max_activations(3),
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

static RUNS: AtomicU32 = AtomicU32::new(0);

fn feeder() {
    // queue up three activations without letting the consumer run
    K::get_resource(RES_SCHEDULER).unwrap();
    for _ in 0..3 {
        K::activate_task(1).unwrap();
    }
    assert_eq!(K::activate_task(1), Err(ResultCode::Limit));
    assert_eq!(RUNS.load(Ordering::Relaxed), 0);

    K::release_resource(RES_SCHEDULER).unwrap();
    // the consumer drained its whole activation queue before we resumed
    assert_eq!(RUNS.load(Ordering::Relaxed), 3);
    K::shutdown().unwrap();
}

fn consumer() {
    RUNS.fetch_add(1, Ordering::Relaxed);
    K::terminate_task().unwrap();
}

#[test]
fn queued_activations_run_back_to_back() {
    port::init_logging();
    port::boot::<SystemTraits>();
    assert_eq!(RUNS.load(Ordering::Relaxed), 3);
}
