use crate::core::context::TaskContext;
use crate::core::pool::TaskPool;

/// The work class of a task.
///
/// Selects which pool or lane a task is routed to and which ordering
/// guarantees apply to it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// CPU-bound, latency-sensitive work. Runs on the small pool.
    Small,
    /// CPU or IO-bound, throughput-oriented work. Runs on the large pool.
    Large,
    /// Work that must run on the thread owning the graphics/UI context.
    /// Queued until the main thread pumps it.
    MainThread,
    /// Per-frame logic. Runs on the small pool, tracked by the drain
    /// barrier the main-thread pump waits on.
    GameLogic,
    /// Background file I/O. Serialized so that at most one runs at a time.
    File,
}

impl TaskType {
    // Only these two classes have dedicated worker threads. The other types
    // are layered on top of them or on the main thread.
    pub(crate) fn is_pool_class(self) -> bool {
        matches!(self, TaskType::Small | TaskType::Large)
    }
}

/// A unit of schedulable work.
///
/// A task has no identity beyond its closure: ownership transfers into a
/// queue at submission and the task is invoked exactly once.
pub type TaskFn = Box<dyn FnOnce(&TaskContext) + Send + 'static>;

/// Boxes a closure into a [`TaskFn`].
pub fn task<F>(f: F) -> TaskFn
where F: FnOnce(&TaskContext) + Send + 'static
{
    Box::new(f)
}

/// What actually sits in the queues: the closure plus the type it was
/// submitted as, so the worker can build the right context for it.
pub(crate) struct ScheduledTask {
    kind: TaskType,
    run: TaskFn,
}

impl ScheduledTask {
    pub fn new(kind: TaskType, run: TaskFn) -> Self {
        ScheduledTask { kind, run }
    }

    /// Execute the task with a freshly constructed context.
    ///
    /// `follow_on` is the pool handed to the task for scheduling more work.
    /// A panic in the task body is fatal: engine state must be assumed
    /// corrupted, so we abort rather than let the fault propagate silently.
    pub fn execute(self, follow_on: &TaskPool) {
        let ctx = TaskContext::new(self.kind, follow_on.clone());
        let guard = FatalOnPanic { kind: self.kind };
        (self.run)(&ctx);
        std::mem::forget(guard);
    }
}

struct FatalOnPanic {
    kind: TaskType,
}

impl Drop for FatalOnPanic {
    fn drop(&mut self) {
        log::error!("{:?} task panicked; aborting", self.kind);
        eprintln!("{:?} task panicked; aborting", self.kind);
        std::process::abort();
    }
}
