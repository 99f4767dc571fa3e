use std::collections::VecDeque;
use std::thread::ThreadId;

use crate::sync::Mutex;
use crate::core::context::TaskContext;
use crate::core::pool::TaskPool;
use crate::core::task::{ScheduledTask, TaskFn, TaskType};

/// A FIFO queue with no worker threads, drained only by explicit pumping
/// from the main thread.
///
/// Any thread may enqueue; only the thread that constructed the pool may
/// drain it. Render-affecting mutations and anything else that must not race
/// the render step gets packaged as a task here instead of touching shared
/// state directly.
pub struct MainThreadTaskPool {
    queue: Mutex<VecDeque<ScheduledTask>>,
    /// The constructing thread. The only thread allowed to pump.
    main_thread: ThreadId,
    /// Handed to main-thread tasks as their follow-on pool.
    small_pool: TaskPool,
}

impl MainThreadTaskPool {
    /// Captures the calling thread as the main thread.
    pub fn new(small_pool: TaskPool) -> Self {
        MainThreadTaskPool {
            queue: Mutex::new(VecDeque::new()),
            main_thread: std::thread::current().id(),
            small_pool,
        }
    }

    /// Thread-safe enqueue. Never blocks beyond the queue lock.
    pub fn add_task<F>(&self, f: F)
    where F: FnOnce(&TaskContext) + Send + 'static
    {
        self.queue.lock().unwrap()
            .push_back(ScheduledTask::new(TaskType::MainThread, Box::new(f)));
    }

    pub fn add_tasks<I>(&self, tasks: I)
    where I: IntoIterator<Item = TaskFn>
    {
        let mut queue = self.queue.lock().unwrap();
        queue.extend(tasks.into_iter().map(|f| ScheduledTask::new(TaskType::MainThread, f)));
    }

    /// Drain and execute every task queued at the time of the call, in FIFO
    /// order, synchronously on the calling thread.
    ///
    /// The queue is swapped out under the lock, so tasks enqueued *during*
    /// the drain (including by a running task) are left for the next pump.
    /// That keeps the call bounded by the queue depth at entry instead of
    /// chasing re-entrant submissions forever.
    ///
    /// Calling this from any thread other than the one that constructed the
    /// pool is a programmer error and fails loudly.
    pub fn perform_tasks(&self) {
        assert_eq!(
            std::thread::current().id(), self.main_thread,
            "MainThreadTaskPool::perform_tasks called off the main thread"
        );

        profiling::scope!("main thread tasks");

        let snapshot = std::mem::take(&mut *self.queue.lock().unwrap());
        for task in snapshot {
            task.execute(&self.small_pool);
        }
    }
}
