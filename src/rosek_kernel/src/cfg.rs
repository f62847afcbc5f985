//! Static kernel configuration.
//!
//! Everything the kernel multiplexes is declared ahead of time: the task
//! table, the resource ceilings, the alarm bindings, and the number of
//! counters and priority levels. A system ties its configuration and its
//! state singleton to a marker type by implementing [`KernelStatic`]
//! (usually through [`configure_kernel!`]).
use crate::{
    CounterId, KernelState, Priority, ResourceId, ResultCode, TaskId, RESOURCE_ID_NONE,
    TASK_ID_NONE,
};

/// Capacity bounds for the statically sized kernel state. A configuration
/// exceeding any of these is rejected at init.
pub const MAX_TASKS: usize = 16;
pub const MAX_PRIORITY_LEVELS: usize = 16;
pub const MAX_RESOURCES: usize = 16;
pub const MAX_ALARMS: usize = 16;
pub const MAX_COUNTERS: usize = 4;

/// Static configuration of one task.
#[derive(Clone, Copy, Debug)]
pub struct TaskCfg {
    /// Fixed base priority. Higher value = higher priority; must be below
    /// the configured priority level count.
    pub priority: Priority,
    /// Entry function. A task must end every activation with
    /// `terminate_task` or `chain_task`.
    pub entry: fn(),
    /// Stack size lent to the task. How this maps to an actual stack is up
    /// to the port.
    pub stack_size: usize,
    /// Ready the task during init.
    pub autostart: bool,
    /// Maximum pending activations. 1 gives the basic-profile behavior.
    pub max_activations: u8,
    /// Internal resource auto-acquired while the task runs, or
    /// [`RESOURCE_ID_NONE`].
    pub internal_resource: ResourceId,
}

impl TaskCfg {
    pub const fn new(priority: Priority, entry: fn()) -> Self {
        Self {
            priority,
            entry,
            stack_size: 1 << 16,
            autostart: false,
            max_activations: 1,
            internal_resource: RESOURCE_ID_NONE,
        }
    }

    pub const fn with_autostart(mut self) -> Self {
        self.autostart = true;
        self
    }

    pub const fn with_max_activations(mut self, max: u8) -> Self {
        self.max_activations = max;
        self
    }

    pub const fn with_internal_resource(mut self, res: ResourceId) -> Self {
        self.internal_resource = res;
        self
    }

    pub const fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }
}

/// Static configuration of one resource: its priority ceiling.
#[derive(Clone, Copy, Debug)]
pub struct ResourceCfg {
    /// The highest base priority among all tasks that may acquire this
    /// resource. The reserved value `priority_count` blocks all tasks.
    pub ceiling: Priority,
}

/// Static configuration of one alarm.
#[derive(Clone, Copy, Debug)]
pub struct AlarmCfg {
    /// The counter driving this alarm.
    pub counter: CounterId,
    /// The task activated on expiry, or [`TASK_ID_NONE`].
    pub task: TaskId,
}

/// The complete static configuration of a system.
pub struct KernelCfg {
    pub tasks: &'static [TaskCfg],
    pub resources: &'static [ResourceCfg],
    pub alarms: &'static [AlarmCfg],
    pub counter_count: usize,
    /// Number of task priority levels. Valid task priorities are
    /// `0..priority_count`; `priority_count` itself is the ceiling value
    /// that blocks all tasks.
    pub priority_count: usize,
    pub pre_task_hook: Option<fn(TaskId)>,
    pub post_task_hook: Option<fn(TaskId)>,
    pub error_hook: Option<fn(ResultCode)>,
}

impl KernelCfg {
    pub const fn new(tasks: &'static [TaskCfg], priority_count: usize) -> Self {
        Self {
            tasks,
            resources: &[],
            alarms: &[],
            counter_count: 0,
            priority_count,
            pre_task_hook: None,
            post_task_hook: None,
            error_hook: None,
        }
    }
}

/// Associates a system type with its static configuration and its state
/// singleton.
///
/// # Safety
///
/// `state()` must return a reference to a `static` used by no other system
/// type, and `cfg()` must return the same configuration on every call.
pub unsafe trait KernelStatic: crate::PortThreading {
    fn cfg() -> &'static KernelCfg;
    fn state() -> &'static KernelState<Self>;
}

/// The bound every kernel entry point requires: a port plus a static
/// configuration.
pub trait KernelTraits: crate::PortThreading + KernelStatic {}
impl<T: crate::PortThreading + KernelStatic> KernelTraits for T {}

/// Implements [`KernelStatic`] for a system type, creating the state
/// singleton.
///
/// ```ignore
/// static CFG: KernelCfg = KernelCfg { /* ... */ };
/// rosek_kernel::configure_kernel!(SystemTraits, CFG);
/// ```
#[macro_export]
macro_rules! configure_kernel {
    ($Ty:ty, $cfg:expr) => {
        unsafe impl $crate::KernelStatic for $Ty {
            fn cfg() -> &'static $crate::KernelCfg {
                &$cfg
            }
            fn state() -> &'static $crate::KernelState<Self> {
                static STATE: $crate::KernelState<$Ty> =
                    <$crate::KernelState<$Ty> as $crate::utils::Init>::INIT;
                &STATE
            }
        }
    };
}

/// Validate the configuration against the capacity bounds and the
/// cross-object constraints. Configuration errors are programming errors
/// and are fatal.
pub(crate) fn validate(cfg: &KernelCfg) {
    assert!(cfg.tasks.len() <= MAX_TASKS, "too many tasks");
    assert!(
        cfg.resources.len() <= MAX_RESOURCES,
        "too many resources"
    );
    assert!(cfg.alarms.len() <= MAX_ALARMS, "too many alarms");
    assert!(cfg.counter_count <= MAX_COUNTERS, "too many counters");
    assert!(
        cfg.priority_count >= 1 && cfg.priority_count <= MAX_PRIORITY_LEVELS,
        "priority level count out of range"
    );

    for (i, task) in cfg.tasks.iter().enumerate() {
        assert!(
            (task.priority as usize) < cfg.priority_count,
            "task {i}: base priority out of range"
        );
        assert!(task.max_activations >= 1, "task {i}: zero max activations");
        let res = task.internal_resource;
        if res != RESOURCE_ID_NONE {
            assert!(
                (res as usize) < cfg.resources.len(),
                "task {i}: invalid internal resource"
            );
            assert!(
                task.priority <= cfg.resources[res as usize].ceiling,
                "task {i}: internal resource ceiling below base priority"
            );
        }
    }

    for (i, res) in cfg.resources.iter().enumerate() {
        assert!(
            (res.ceiling as usize) <= cfg.priority_count,
            "resource {i}: ceiling out of range"
        );
    }
    if let Some(res0) = cfg.resources.first() {
        // Resource 0 is the scheduler lock.
        assert!(
            res0.ceiling as usize == cfg.priority_count,
            "resource 0 must have the blocking ceiling"
        );
    }

    for (i, alarm) in cfg.alarms.iter().enumerate() {
        assert!(
            (alarm.counter as usize) < cfg.counter_count,
            "alarm {i}: invalid counter"
        );
        if alarm.task != TASK_ID_NONE {
            assert!(
                (alarm.task as usize) < cfg.tasks.len(),
                "alarm {i}: invalid task"
            );
        }
    }
}
