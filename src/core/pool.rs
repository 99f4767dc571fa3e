use super::{Shared, WorkerHook};
use super::sync::Arc;
use super::context::TaskContext;
use super::shutdown::{Shutdown, ShutdownHandle};
use super::task::{ScheduledTask, TaskFn, TaskType};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskPoolId(pub(crate) u32);

/// A reference to a task pool.
///
/// Cheap to clone; all clones share the same workers and queue.
#[derive(Clone)]
pub struct TaskPool {
    pub(crate) shared: Arc<Shared>,
}

impl TaskPool {
    pub fn builder(kind: TaskType) -> TaskPoolBuilder {
        assert!(kind.is_pool_class(), "only Small and Large tasks run on dedicated pools");
        TaskPoolBuilder {
            kind,
            num_threads: recommended_worker_count(2),
            start_handler: None,
            exit_handler: None,
            name_handler: Box::new(move |idx| format!("{:?}Worker#{}", kind, idx)),
            stack_size: None,
        }
    }

    /// Append one task to the shared queue and wake a worker.
    ///
    /// Safe to call from any thread; never blocks the caller.
    pub fn add_task<F>(&self, f: F)
    where F: FnOnce(&TaskContext) + Send + 'static
    {
        self.add_scheduled(ScheduledTask::new(self.shared.kind, Box::new(f)));
    }

    /// Append a batch of tasks to the shared queue and wake workers.
    ///
    /// Tasks are dequeued FIFO but may complete out of order across workers;
    /// no ordering is guaranteed between tasks of the same batch.
    pub fn add_tasks<I>(&self, tasks: I)
    where I: IntoIterator<Item = TaskFn>
    {
        let kind = self.shared.kind;
        self.add_scheduled_batch(tasks.into_iter().map(|f| ScheduledTask::new(kind, f)));
    }

    pub(crate) fn add_scheduled(&self, task: ScheduledTask) {
        profiling::scope!("add_task");
        self.shared.injector.push(task);
        self.shared.sleep.wake(1);
    }

    pub(crate) fn add_scheduled_batch<I>(&self, tasks: I)
    where I: IntoIterator<Item = ScheduledTask>
    {
        profiling::scope!("add_tasks");
        let mut n = 0;
        for task in tasks {
            self.shared.injector.push(task);
            n += 1;
        }
        self.shared.sleep.wake(n.min(self.shared.num_workers));
    }

    /// Begin shutting down: workers drain the queue, then exit.
    ///
    /// Call `wait()` on the returned handle to join them.
    pub fn shut_down(&self) -> ShutdownHandle {
        Shutdown::begin_shut_down(Arc::clone(&self.shared))
    }

    /// The work class this pool runs.
    pub fn kind(&self) -> TaskType {
        self.shared.kind
    }

    pub fn id(&self) -> TaskPoolId {
        self.shared.id
    }

    pub fn num_worker_threads(&self) -> u32 { self.shared.num_workers }
}

/// Worker count policy: one worker per core not reserved for a named engine
/// thread (main, render, ...), but never fewer than two so a pool can make
/// progress while one worker is blocked.
///
/// Applied independently to each pool: isolating latency-sensitive work from
/// throughput work costs thread count, deliberately.
pub fn recommended_worker_count(reserved_cores: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    cores.saturating_sub(reserved_cores).max(2)
}

pub struct TaskPoolBuilder {
    pub(crate) kind: TaskType,
    pub(crate) num_threads: usize,
    pub(crate) start_handler: Option<Box<dyn WorkerHook>>,
    pub(crate) exit_handler: Option<Box<dyn WorkerHook>>,
    pub(crate) name_handler: Box<dyn Fn(u32) -> String>,
    pub(crate) stack_size: Option<usize>,
}

impl TaskPoolBuilder {
    /// Run a callback on each worker thread as it starts, before it takes
    /// any work.
    pub fn with_start_handler<F>(self, handler: F) -> Self
    where F: Fn(u32) + Send + Sync + 'static
    {
        TaskPoolBuilder {
            kind: self.kind,
            num_threads: self.num_threads,
            start_handler: Some(Box::new(handler)),
            exit_handler: self.exit_handler,
            name_handler: self.name_handler,
            stack_size: self.stack_size,
        }
    }

    /// Run a callback on each worker thread right before it exits.
    pub fn with_exit_handler<F>(self, handler: F) -> Self
    where F: Fn(u32) + Send + Sync + 'static
    {
        TaskPoolBuilder {
            kind: self.kind,
            num_threads: self.num_threads,
            start_handler: self.start_handler,
            exit_handler: Some(Box::new(handler)),
            name_handler: self.name_handler,
            stack_size: self.stack_size,
        }
    }

    pub fn with_thread_names<F>(self, handler: F) -> Self
    where F: Fn(u32) -> String + 'static
    {
        TaskPoolBuilder {
            kind: self.kind,
            num_threads: self.num_threads,
            start_handler: self.start_handler,
            exit_handler: self.exit_handler,
            name_handler: Box::new(handler),
            stack_size: self.stack_size,
        }
    }

    pub fn with_worker_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);

        // The sleepy-worker bitfield limits each pool to 31 workers, which
        // is far beyond what the sizing policy will ever ask for.
        assert!(self.num_threads < 32);

        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);

        self
    }

    /// Spawns the worker threads. This is the "start" half of the two-phase
    /// lifecycle; `TaskPool::shut_down` is the other half.
    pub fn build(self) -> TaskPool {
        crate::core::init(self)
    }
}
