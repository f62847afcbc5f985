//! Pre-task, post-task, and error hook delivery.
use std::sync::Mutex;

use rosek_kernel::{KernelCfg, ResultCode, System, TaskCfg, TaskId};
use rosek_port_std as port;

port::use_port!(unsafe struct SystemTraits);
rosek_kernel::configure_kernel!(SystemTraits, CFG);

type K = System<SystemTraits>;

static TASKS: [TaskCfg; 2] = [
    TaskCfg::new(0, low_task).with_autostart(),
    TaskCfg::new(1, high_task),
];
static CFG: KernelCfg = KernelCfg {
    tasks: &TASKS,
    resources: &[],
    alarms: &[],
    counter_count: 0,
    priority_count: 2,
    pre_task_hook: Some(pre_hook),
    post_task_hook: Some(post_hook),
    error_hook: Some(error_hook),
};

static SEQ: Mutex<Vec<String>> = Mutex::new(Vec::new());

fn pre_hook(task: TaskId) {
    SEQ.lock().unwrap().push(format!("pre:{task}"));
}

fn post_hook(task: TaskId) {
    SEQ.lock().unwrap().push(format!("post:{task}"));
}

fn error_hook(code: ResultCode) {
    SEQ.lock().unwrap().push(format!("err:{}", code.as_raw()));
}

fn low_task() {
    // an invalid id lands in the error hook, and the service still returns
    assert_eq!(K::activate_task(99), Err(ResultCode::Id));
    K::activate_task(1).unwrap();
    K::shutdown().unwrap();
}

fn high_task() {
    K::terminate_task().unwrap();
}

#[test]
fn hooks_fire_on_every_transition() {
    port::init_logging();
    port::boot::<SystemTraits>();
    assert_eq!(
        *SEQ.lock().unwrap(),
        [
            "pre:0",  // low dispatched
            "err:3",  // E_OS_ID from the bad activation
            "post:0", // low preempted
            "pre:1",  // high dispatched
            "post:1", // high terminated
            "pre:0",  // low resumed
            "post:0", // low pushed back at shutdown
        ]
    );
}
