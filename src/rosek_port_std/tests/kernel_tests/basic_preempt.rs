//! A low-priority task activates a high-priority one and is preempted until
//! the latter terminates.
use std::sync::Mutex;

use rosek_kernel::{KernelCfg, System, TaskCfg};
use rosek_port_std as port;

port::use_port!(unsafe struct SystemTraits);
rosek_kernel::configure_kernel!(SystemTraits, CFG);

type K = System<SystemTraits>;

static TASKS: [TaskCfg; 2] = [
    TaskCfg::new(0, low_task).with_autostart(),
    TaskCfg::new(1, high_task),
];
static CFG: KernelCfg = KernelCfg::new(&TASKS, 2);

static SEQ: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

fn low_task() {
    SEQ.lock().unwrap().push("low:start");
    assert_eq!(K::current_task(), Some(0));
    K::activate_task(1).unwrap();
    // the high-priority task has run to completion by the time we resume
    SEQ.lock().unwrap().push("low:resumed");
    K::shutdown().unwrap();
    unreachable!();
}

fn high_task() {
    SEQ.lock().unwrap().push("high:run");
    assert_eq!(K::current_task(), Some(1));
    K::terminate_task().unwrap();
    unreachable!();
}

#[test]
fn high_priority_activation_preempts() {
    port::init_logging();
    port::boot::<SystemTraits>();
    assert_eq!(
        *SEQ.lock().unwrap(),
        ["low:start", "high:run", "low:resumed"]
    );
}
