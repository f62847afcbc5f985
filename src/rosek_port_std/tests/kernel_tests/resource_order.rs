//! Priority-ceiling resource acquisition and strict LIFO release.
use rosek_kernel::{KernelCfg, ResourceCfg, ResultCode, System, TaskCfg};
use rosek_port_std as port;

port::use_port!(unsafe struct SystemTraits);
rosek_kernel::configure_kernel!(SystemTraits, CFG);

type K = System<SystemTraits>;

static TASKS: [TaskCfg; 1] = [TaskCfg::new(1, worker).with_autostart()];
static RESOURCES: [ResourceCfg; 3] = [
    ResourceCfg { ceiling: 2 },
    ResourceCfg { ceiling: 1 },
    ResourceCfg { ceiling: 2 },
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

fn worker() {
    // nested acquisition released in LIFO order succeeds
    assert_eq!(K::get_resource(1), Ok(()));
    assert_eq!(K::get_resource(2), Ok(()));
    assert_eq!(K::release_resource(2), Ok(()));
    assert_eq!(K::release_resource(1), Ok(()));

    // acquiring a resource whose ceiling would lower the priority fails,
    // and out-of-order release is rejected
    assert_eq!(K::get_resource(2), Ok(()));
    assert_eq!(K::get_resource(1), Err(ResultCode::Access));
    assert_eq!(K::release_resource(1), Err(ResultCode::NoFunc));
    assert_eq!(K::release_resource(2), Ok(()));

    K::shutdown().unwrap();
}

#[test]
fn resource_order() {
    port::init_logging();
    port::boot::<SystemTraits>();
}
