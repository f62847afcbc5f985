//! ChainTask terminates the caller and hands over to the successor.
use std::sync::Mutex;

use rosek_kernel::{KernelCfg, System, TaskCfg};
use rosek_port_std as port;

port::use_port!(unsafe struct SystemTraits);
rosek_kernel::configure_kernel!(SystemTraits, CFG);

type K = System<SystemTraits>;

static TASKS: [TaskCfg; 2] = [
    TaskCfg::new(0, first), // successor has the *lower* priority
    TaskCfg::new(1, second).with_autostart(),
];
static CFG: KernelCfg = KernelCfg {
    tasks: &TASKS,
    resources: &[],
    alarms: &[],
    counter_count: 0,
    priority_count: 2,
    pre_task_hook: None,
    post_task_hook: None,
    error_hook: None,
};

static SEQ: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

fn second() {
    SEQ.lock().unwrap().push("second");
    K::chain_task(0).unwrap();
    unreachable!("ChainTask returned");
}

fn first() {
    // the chain succeeded even though the successor ranks below the caller
    SEQ.lock().unwrap().push("first");
    assert_eq!(K::current_task(), Some(0));
    K::shutdown().unwrap();
}

#[test]
fn chain_hands_over() {
    port::init_logging();
    port::boot::<SystemTraits>();
    assert_eq!(*SEQ.lock().unwrap(), ["second", "first"]);
}
