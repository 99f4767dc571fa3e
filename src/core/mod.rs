pub mod pool;
pub mod task;
pub mod context;
pub mod shutdown;
/// basic std::sync types reexported here so that we can hook loom into them for
/// testing.
pub mod sync;

use crossbeam_deque::{Injector, Steal};
use crossbeam_utils::{CachePadded, sync::{Parker, Unparker}};

use sync::{Arc, Ordering, AtomicU32, thread};
use pool::{TaskPool, TaskPoolBuilder, TaskPoolId};
use shutdown::Shutdown;
use task::{ScheduledTask, TaskType};

// Use std's atomic type explicitly here because loom's doesn't support static initialization.
static NEXT_POOL_ID: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

/// Data shared by every handle to a pool and by its workers.
pub(crate) struct Shared {
    /// The work class this pool runs. Fixed at build time.
    pub kind: TaskType,
    /// Number of dedicated worker threads.
    pub num_workers: u32,
    /// The single FIFO queue all workers of the pool consume.
    pub injector: Injector<ScheduledTask>,
    /// State and logic to put worker threads to sleep and wake them up.
    pub sleep: Sleep,
    /// State and logic to handle shutting down.
    pub shutdown: Shutdown,
    /// A unique ID per pool, to tell the two pool instances apart in logs
    /// and profiles.
    pub id: TaskPoolId,
    // A few hooks to register work.
    handlers: PoolHooks,
}

pub(crate) fn init(params: TaskPoolBuilder) -> TaskPool {
    let num_threads = params.num_threads;

    let (sleep, mut parkers) = Sleep::new(num_threads);

    let shared = Arc::new(Shared {
        kind: params.kind,
        num_workers: num_threads as u32,
        injector: Injector::new(),
        sleep,
        shutdown: Shutdown::new(num_threads as u32),
        id: TaskPoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed)),
        handlers: PoolHooks {
            start: params.start_handler,
            exit: params.exit_handler,
        },
    });

    for i in 0..num_threads {
        let worker = Worker {
            index: i as u32,
            pool: TaskPool { shared: Arc::clone(&shared) },
            parker: parkers[i].take().unwrap(),
        };

        let mut builder = thread::Builder::new()
            .name((params.name_handler)(i as u32));

        if let Some(stack_size) = params.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let _ = builder.spawn(move || {
            profiling::register_thread!("Worker");

            worker.run();

        }).unwrap();
    }

    log::debug!("spawned {} workers for {:?} pool {:?}", num_threads, shared.kind, shared.id);

    TaskPool { shared }
}


struct SleepState {
    unparker: Unparker,
}

pub(crate) struct Sleep {
    /// Atomic bitfield. Setting the Nth bit to one means the Nth worker
    /// thread is parked, or about to park.
    sleepy_workers: AtomicU32,
    sleep_states: Vec<CachePadded<SleepState>>,
}

impl Sleep {
    fn new(num_threads: usize) -> (Self, Vec<Option<Parker>>) {
        let mut parkers = Vec::with_capacity(num_threads);
        let mut sleep_states = Vec::with_capacity(num_threads);

        for _ in 0..num_threads {
            let parker = Parker::new();
            sleep_states.push(CachePadded::new(SleepState {
                unparker: parker.unparker().clone(),
            }));
            parkers.push(Some(parker));
        }

        (
            Sleep {
                sleepy_workers: AtomicU32::new(0),
                sleep_states,
            },
            parkers,
        )
    }

    /// Wake up to n worker threads (stop when they are all awake).
    ///
    /// This function is fairly expensive when it causes a thread to
    /// wake up (most of the time is spent dealing with the unpark call).
    /// However it is fairly cheap if all workers are already awake.
    pub fn wake(&self, mut n: u32) {
        while n > 0 {
            let mut sleepy_bits = self.sleepy_workers.load(Ordering::Acquire);

            if sleepy_bits == 0 {
                // Everyone is already awake.
                return;
            }

            for i in 0..(self.sleep_states.len() as u32) {
                let bit = 1 << i;
                if sleepy_bits & bit == 0 {
                    continue;
                }

                let prev = self.sleepy_workers.fetch_and(!bit, Ordering::SeqCst);
                if prev & bit == 0 {
                    // Someone else woke the thread up before we got to it.
                    // A good time to refresh our view of the sleepy bits.
                    sleepy_bits = self.sleepy_workers.load(Ordering::Acquire);

                    if sleepy_bits == 0 {
                        return;
                    }

                    continue;
                }

                self.sleep_states[i as usize].unparker.unpark();

                n -= 1;
                break;
            }
        }
    }

    fn mark_sleepy(&self, worker: u32) {
        let sleepy_bit = 1 << worker;
        self.sleepy_workers.fetch_or(sleepy_bit, Ordering::SeqCst);
    }

    fn clear_sleepy(&self, worker: u32) {
        let sleepy_bit = 1 << worker;
        self.sleepy_workers.fetch_and(!sleepy_bit, Ordering::SeqCst);
    }

    /// Wake all workers.
    ///
    /// This is a bit heavy handed and mostly intended for the shutdown code.
    /// In the majority of cases, using `wake` is better.
    fn wake_all(&self) {
        for state in &self.sleep_states {
            state.unparker.unpark();
        }
    }
}

struct Worker {
    index: u32,
    pool: TaskPool,
    parker: Parker,
}

impl Worker {
    fn run(&self) {
        let shared = Arc::clone(&self.pool.shared);

        if let Some(handler) = &shared.handlers.start {
            handler.run(self.index);
        }

        loop {
            match shared.injector.steal() {
                Steal::Success(task) => {
                    // Once dequeued, the task runs to completion on this
                    // worker; it never migrates.
                    task.execute(&self.pool);
                    continue;
                }
                Steal::Empty => {}
                Steal::Retry => {
                    continue;
                }
            }

            // Workers only act on the shutdown flag once the queue is empty,
            // so pending tasks always drain before the pool goes away.
            if shared.shutdown.is_shutting_down() {
                break;
            }

            shared.sleep.mark_sleepy(self.index);

            // A task submitted between the failed steal above and the mark
            // may have scanned the sleepy bits before our bit was visible and
            // woken nobody. Re-check the queue before parking so that such a
            // submission cannot be lost.
            if !shared.injector.is_empty() || shared.shutdown.is_shutting_down() {
                shared.sleep.clear_sleepy(self.index);
                continue;
            }

            self.parker.park();
        }

        // Shutdown phase.

        if let Some(handler) = &shared.handlers.exit {
            handler.run(self.index);
        }

        shared.shutdown.worker_has_shut_down();
    }
}

pub(crate) struct PoolHooks {
    start: Option<Box<dyn WorkerHook>>,
    exit: Option<Box<dyn WorkerHook>>,
}

pub trait WorkerHook: Send + Sync {
    fn run(&self, worker_id: u32);
}

impl<F> WorkerHook for F where F: Fn(u32) + Send + Sync + 'static {
    fn run(&self, worker_id: u32) { self(worker_id) }
}

#[test]
fn concurrent_producers() {
    use crate::sync::{Arc, AtomicUsize};
    use crate::CompletionGroup;

    let pool = TaskPool::builder(TaskType::Small)
        .with_worker_threads(4)
        .build();

    let group = Arc::new(CompletionGroup::new());
    let count = Arc::new(AtomicUsize::new(0));

    group.add(4 * 1000);

    let producers: Vec<_> = (0..4).map(|_| {
        let pool = pool.clone();
        let group = Arc::clone(&group);
        let count = Arc::clone(&count);
        std::thread::spawn(move || {
            for _ in 0..1000 {
                let group = Arc::clone(&group);
                let count = Arc::clone(&count);
                pool.add_task(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    group.complete_one();
                });
            }
        })
    }).collect();

    for producer in producers {
        producer.join().unwrap();
    }

    group.wait();
    assert_eq!(count.load(Ordering::SeqCst), 4000);

    pool.shut_down().wait();
}
