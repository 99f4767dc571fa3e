use crate::core::pool::TaskPool;
use crate::core::task::TaskType;

/// Passed into every running task.
///
/// Carries the type the task was scheduled as and a handle to the pool the
/// task may use to fan out follow-on work, so a task can schedule children
/// without needing access to the scheduler. Follow-on tasks run as ordinary
/// tasks of that pool's class: tasks executing on the small or large pool get
/// their own pool, tasks running on the main thread get the small pool.
pub struct TaskContext {
    kind: TaskType,
    pool: TaskPool,
}

impl TaskContext {
    pub(crate) fn new(kind: TaskType, pool: TaskPool) -> Self {
        TaskContext { kind, pool }
    }

    /// The type this task was scheduled as.
    pub fn task_type(&self) -> TaskType {
        self.kind
    }

    /// The pool available for follow-on work.
    pub fn pool(&self) -> &TaskPool {
        &self.pool
    }

    /// Schedule a follow-on task. Does not block; the child runs as a plain
    /// task of the pool's class, with no ordering relative to its parent.
    pub fn schedule<F>(&self, f: F)
    where F: FnOnce(&TaskContext) + Send + 'static
    {
        self.pool.add_task(f);
    }
}

#[test]
fn fan_out() {
    use crate::sync::{Arc, Ordering, AtomicUsize};
    use crate::CompletionGroup;

    let pool = TaskPool::builder(TaskType::Small)
        .with_worker_threads(3)
        .build();

    let group = Arc::new(CompletionGroup::new());
    let count = Arc::new(AtomicUsize::new(0));

    // One parent task that fans out 10 children through its context.
    group.add(11);
    {
        let group = Arc::clone(&group);
        let count = Arc::clone(&count);
        pool.add_task(move |ctx| {
            for _ in 0..10 {
                let group = Arc::clone(&group);
                let count = Arc::clone(&count);
                ctx.schedule(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    group.complete_one();
                });
            }
            count.fetch_add(1, Ordering::SeqCst);
            group.complete_one();
        });
    }

    group.wait();
    assert_eq!(count.load(Ordering::SeqCst), 11);

    pool.shut_down().wait();
}
