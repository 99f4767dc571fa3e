use std::thread::ThreadId;

use crate::sync::{Arc, Mutex, Ordering, AtomicUsize};
use crate::completion::CompletionGroup;
use crate::core::context::TaskContext;
use crate::core::pool::{recommended_worker_count, TaskPool};
use crate::core::shutdown::ShutdownHandle;
use crate::core::task::{ScheduledTask, TaskFn, TaskType};
use crate::file_lane::FileTaskLane;
use crate::main_thread::MainThreadTaskPool;

/// Owns the pools and lanes and routes every submission by task type.
///
/// Built once at engine init and handed by handle to every subsystem that
/// schedules work; cloning is cheap and all clones share the same state.
///
/// Usage contract: game-logic tasks may fan out more small work but must
/// never block on the main thread, or the per-frame pump deadlocks waiting
/// for them.
#[derive(Clone)]
pub struct TaskScheduler {
    core: Arc<SchedulerCore>,
}

struct SchedulerCore {
    small: TaskPool,
    large: TaskPool,
    main: MainThreadTaskPool,
    file: FileTaskLane,
    game_logic: CompletionGroup,
    main_thread: ThreadId,
}

impl TaskScheduler {
    pub fn builder() -> TaskSchedulerBuilder {
        TaskSchedulerBuilder {
            reserved_cores: 2,
            small_workers: None,
            large_workers: None,
        }
    }

    /// Route one task to the pool or lane matching its type.
    ///
    /// Never blocks the caller, whatever the type.
    pub fn schedule_task<F>(&self, kind: TaskType, f: F)
    where F: FnOnce(&TaskContext) + Send + 'static
    {
        self.schedule(kind, Box::new(f));
    }

    /// Route a batch of tasks to the pool or lane matching their type.
    pub fn schedule_tasks(&self, kind: TaskType, tasks: Vec<TaskFn>) {
        self.schedule_batch(kind, tasks);
    }

    /// Schedule a batch with a continuation.
    ///
    /// The completion task is scheduled (routed through `kind` again) by
    /// whichever batch member finishes last: it runs exactly once, after
    /// every member has finished, never before. An empty batch is vacuously
    /// complete, so its completion task is scheduled immediately.
    pub fn schedule_tasks_with_completion(&self, kind: TaskType, tasks: Vec<TaskFn>, completion: TaskFn) {
        if tasks.is_empty() {
            self.schedule(kind, completion);
            return;
        }

        let batch = Arc::new(CompletionBatch {
            remaining: AtomicUsize::new(tasks.len()),
            kind,
            completion: Mutex::new(Some(completion)),
            scheduler: self.clone(),
        });

        let wrapped = tasks.into_iter().map(|task| -> TaskFn {
            let batch = Arc::clone(&batch);
            Box::new(move |ctx: &TaskContext| {
                task(ctx);
                batch.member_finished();
            })
        }).collect();

        self.schedule_batch(kind, wrapped);
    }

    /// Schedule a batch and block the calling thread until every member has
    /// run. Intended for threads outside the target pool, typically during
    /// loading; not valid for main-thread tasks since the caller would be
    /// waiting on a pump that cannot happen.
    pub fn schedule_tasks_and_wait(&self, kind: TaskType, tasks: Vec<TaskFn>) {
        assert!(kind != TaskType::MainThread, "waiting on main-thread tasks would deadlock the pump");

        let group = Arc::new(CompletionGroup::new());
        group.add(tasks.len() as u64);

        let wrapped = tasks.into_iter().map(|task| -> TaskFn {
            let group = Arc::clone(&group);
            Box::new(move |ctx: &TaskContext| {
                task(ctx);
                group.complete_one();
            })
        }).collect();

        self.schedule_batch(kind, wrapped);
        group.wait();
    }

    /// The once-per-frame pump.
    ///
    /// First blocks until all in-flight game-logic work has drained, then
    /// drains the main-thread queue. The order is load-bearing: by the time
    /// main-thread tasks run, no game-logic task can still be mutating the
    /// state they read.
    pub fn execute_main_thread_tasks(&self) {
        assert!(self.is_main_thread(), "execute_main_thread_tasks called off the main thread");

        profiling::scope!("execute_main_thread_tasks");

        self.core.game_logic.wait();
        self.core.main.perform_tasks();
    }

    /// Whether the calling thread is the one that called `init`.
    ///
    /// Other subsystems use this to assert correct call-site usage.
    pub fn is_main_thread(&self) -> bool {
        std::thread::current().id() == self.core.main_thread
    }

    pub fn small_pool(&self) -> &TaskPool {
        &self.core.small
    }

    pub fn large_pool(&self) -> &TaskPool {
        &self.core.large
    }

    /// Begin shutting down both pools; `wait()` on the handle joins them.
    ///
    /// Queued pool tasks drain before the workers exit. Tasks still sitting
    /// in the main-thread queue are dropped unexecuted; they hold no pool
    /// state, so this is safe.
    pub fn shut_down(&self) -> SchedulerShutdownHandle {
        log::debug!("task scheduler shutting down");

        SchedulerShutdownHandle {
            small: self.core.small.shut_down(),
            large: self.core.large.shut_down(),
        }
    }
}

impl TaskScheduler {
    fn schedule(&self, kind: TaskType, task: TaskFn) {
        match kind {
            TaskType::Small => self.core.small.add_scheduled(ScheduledTask::new(kind, task)),
            TaskType::Large => self.core.large.add_scheduled(ScheduledTask::new(kind, task)),
            TaskType::MainThread => self.core.main.add_tasks(std::iter::once(task)),
            TaskType::GameLogic => self.schedule_batch(kind, vec![task]),
            TaskType::File => self.core.file.submit_boxed(task),
        }
    }

    fn schedule_batch(&self, kind: TaskType, tasks: Vec<TaskFn>) {
        profiling::scope!("schedule_batch");

        match kind {
            TaskType::Small => {
                self.core.small.add_scheduled_batch(tasks.into_iter().map(|f| ScheduledTask::new(kind, f)));
            }
            TaskType::Large => {
                self.core.large.add_scheduled_batch(tasks.into_iter().map(|f| ScheduledTask::new(kind, f)));
            }
            TaskType::MainThread => self.core.main.add_tasks(tasks),
            TaskType::GameLogic => {
                // The drain barrier counts the whole cohort before any of it
                // becomes visible to a worker; a waiter can never observe a
                // transient zero while tasks are in flight.
                self.core.game_logic.add(tasks.len() as u64);

                let wrapped = tasks.into_iter().map(|task| {
                    let core = Arc::clone(&self.core);
                    ScheduledTask::new(TaskType::GameLogic, Box::new(move |ctx: &TaskContext| {
                        task(ctx);
                        core.game_logic.complete_one();
                    }))
                });
                self.core.small.add_scheduled_batch(wrapped);
            }
            TaskType::File => {
                // Each submission goes through the lane's own ordering
                // rules (newest pending first).
                for task in tasks {
                    self.core.file.submit_boxed(task);
                }
            }
        }
    }
}

struct CompletionBatch {
    remaining: AtomicUsize,
    kind: TaskType,
    completion: Mutex<Option<TaskFn>>,
    scheduler: TaskScheduler,
}

impl CompletionBatch {
    fn member_finished(&self) {
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            // Last one out schedules the continuation.
            let completion = self.completion.lock().unwrap().take()
                .expect("batch completion scheduled twice");
            self.scheduler.schedule(self.kind, completion);
        }
    }
}

pub struct TaskSchedulerBuilder {
    reserved_cores: usize,
    small_workers: Option<usize>,
    large_workers: Option<usize>,
}

impl TaskSchedulerBuilder {
    /// Cores set aside for named engine threads (main, render, ...) when
    /// deriving the default worker count.
    pub fn with_reserved_cores(mut self, n: usize) -> Self {
        self.reserved_cores = n;

        self
    }

    pub fn with_small_workers(mut self, n: usize) -> Self {
        self.small_workers = Some(n);

        self
    }

    pub fn with_large_workers(mut self, n: usize) -> Self {
        self.large_workers = Some(n);

        self
    }

    /// Starts the scheduler: spawns both pools and captures the calling
    /// thread as the main thread. That thread must be the only caller of
    /// `execute_main_thread_tasks` for the life of the process.
    pub fn init(self) -> TaskScheduler {
        let default_count = recommended_worker_count(self.reserved_cores);

        let small = TaskPool::builder(TaskType::Small)
            .with_worker_threads(self.small_workers.unwrap_or(default_count))
            .build();
        let large = TaskPool::builder(TaskType::Large)
            .with_worker_threads(self.large_workers.unwrap_or(default_count))
            .build();

        let main = MainThreadTaskPool::new(small.clone());
        let file = FileTaskLane::new(large.clone());

        let core = Arc::new(SchedulerCore {
            small,
            large,
            main,
            file,
            game_logic: CompletionGroup::new(),
            main_thread: std::thread::current().id(),
        });

        log::info!(
            "task scheduler initialized: {} small + {} large workers",
            core.small.num_worker_threads(),
            core.large.num_worker_threads(),
        );

        TaskScheduler { core }
    }
}

pub struct SchedulerShutdownHandle {
    small: ShutdownHandle,
    large: ShutdownHandle,
}

impl SchedulerShutdownHandle {
    /// Blocks until every worker of both pools has drained and exited.
    pub fn wait(self) {
        self.small.wait();
        self.large.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::AtomicBool;
    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    fn test_scheduler() -> TaskScheduler {
        TaskScheduler::builder()
            .with_small_workers(3)
            .with_large_workers(3)
            .init()
    }

    #[test]
    fn game_logic_drains_before_pump_returns() {
        let scheduler = test_scheduler();

        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let count = Arc::clone(&count);
            scheduler.schedule_task(TaskType::GameLogic, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        scheduler.execute_main_thread_tasks();
        assert_eq!(count.load(Ordering::SeqCst), 100);

        scheduler.shut_down().wait();
    }

    #[test]
    fn idle_pump_returns_immediately() {
        let scheduler = test_scheduler();

        let start = Instant::now();
        scheduler.execute_main_thread_tasks();
        assert!(start.elapsed() < Duration::from_millis(100));

        scheduler.shut_down().wait();
    }

    #[test]
    fn main_thread_tasks_observe_game_logic_effects() {
        let scheduler = test_scheduler();

        let flags: Arc<Vec<AtomicBool>> =
            Arc::new((0..8).map(|_| AtomicBool::new(false)).collect());

        for i in 0..8 {
            let flags = Arc::clone(&flags);
            scheduler.schedule_task(TaskType::GameLogic, move |_| {
                std::thread::sleep(Duration::from_millis(5));
                flags[i].store(true, Ordering::SeqCst);
            });
        }

        let observed = Arc::new(AtomicUsize::new(0));
        {
            let flags = Arc::clone(&flags);
            let observed = Arc::clone(&observed);
            scheduler.schedule_task(TaskType::MainThread, move |_| {
                let seen = flags.iter().filter(|f| f.load(Ordering::SeqCst)).count();
                observed.store(seen, Ordering::SeqCst);
            });
        }

        scheduler.execute_main_thread_tasks();
        assert_eq!(observed.load(Ordering::SeqCst), 8);

        scheduler.shut_down().wait();
    }

    #[test]
    fn batch_completion_runs_once_after_all_members() {
        let scheduler = test_scheduler();

        // Repeated a few hundred times: the property is racy if the batch
        // counter or the wake path is wrong.
        for _ in 0..200 {
            let indices = Arc::new(Mutex::new(HashSet::new()));
            let seen_at_completion = Arc::new(AtomicUsize::new(0));
            let completions = Arc::new(AtomicUsize::new(0));
            let done = Arc::new(CompletionGroup::new());

            let tasks = (0..100).map(|i| -> TaskFn {
                let indices = Arc::clone(&indices);
                Box::new(move |_| {
                    indices.lock().unwrap().insert(i);
                })
            }).collect();

            done.add(1);
            let completion: TaskFn = {
                let indices = Arc::clone(&indices);
                let seen_at_completion = Arc::clone(&seen_at_completion);
                let completions = Arc::clone(&completions);
                let done = Arc::clone(&done);
                Box::new(move |_| {
                    seen_at_completion.store(indices.lock().unwrap().len(), Ordering::SeqCst);
                    completions.fetch_add(1, Ordering::SeqCst);
                    done.complete_one();
                })
            };

            scheduler.schedule_tasks_with_completion(TaskType::Small, tasks, completion);
            done.wait();

            assert_eq!(seen_at_completion.load(Ordering::SeqCst), 100);
            assert_eq!(completions.load(Ordering::SeqCst), 1);
        }

        scheduler.shut_down().wait();
    }

    #[test]
    fn empty_batch_completion_fires() {
        let scheduler = test_scheduler();

        let done = Arc::new(CompletionGroup::new());
        done.add(1);
        let completion: TaskFn = {
            let done = Arc::clone(&done);
            Box::new(move |_| {
                done.complete_one();
            })
        };

        // A batch of zero is vacuously complete.
        scheduler.schedule_tasks_with_completion(TaskType::Small, Vec::new(), completion);
        done.wait();

        scheduler.shut_down().wait();
    }

    #[test]
    fn schedule_and_wait_blocks_until_done() {
        let scheduler = test_scheduler();

        let count = Arc::new(AtomicUsize::new(0));
        let tasks = (0..32).map(|_| {
            let count = Arc::clone(&count);
            crate::task(move |_| {
                std::thread::sleep(Duration::from_millis(1));
                count.fetch_add(1, Ordering::SeqCst);
            })
        }).collect();

        scheduler.schedule_tasks_and_wait(TaskType::Large, tasks);
        assert_eq!(count.load(Ordering::SeqCst), 32);

        scheduler.shut_down().wait();
    }

    #[test]
    fn every_type_routes_and_runs() {
        let scheduler = test_scheduler();

        let done = Arc::new(CompletionGroup::new());
        let count = Arc::new(AtomicUsize::new(0));

        done.add(4);
        for kind in [TaskType::Small, TaskType::Large, TaskType::GameLogic, TaskType::File] {
            let done = Arc::clone(&done);
            let count = Arc::clone(&count);
            scheduler.schedule_task(kind, move |ctx| {
                // The context reports the type the task was submitted as.
                if ctx.task_type() == kind {
                    count.fetch_add(1, Ordering::SeqCst);
                }
                done.complete_one();
            });
        }
        done.wait();

        {
            let count = Arc::clone(&count);
            scheduler.schedule_task(TaskType::MainThread, move |ctx| {
                if ctx.task_type() == TaskType::MainThread {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        scheduler.execute_main_thread_tasks();

        assert_eq!(count.load(Ordering::SeqCst), 5);

        scheduler.shut_down().wait();
    }

    #[test]
    fn main_thread_identity() {
        let scheduler = test_scheduler();

        assert!(scheduler.is_main_thread());

        let off_thread = {
            let scheduler = scheduler.clone();
            std::thread::spawn(move || scheduler.is_main_thread())
        };
        assert!(!off_thread.join().unwrap());

        scheduler.shut_down().wait();
    }

    #[test]
    fn pump_off_main_thread_is_fatal() {
        let scheduler = test_scheduler();

        let off_thread = {
            let scheduler = scheduler.clone();
            std::thread::spawn(move || {
                scheduler.execute_main_thread_tasks();
            })
        };
        assert!(off_thread.join().is_err());

        scheduler.shut_down().wait();
    }
}
