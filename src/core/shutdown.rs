//! Shutdown
//!
//! Workers learn that the pool is going away by reading an atomic flag that
//! is set when the shutdown starts; they only act on it once the queue is
//! empty, so pending tasks drain before any worker exits. A mutex/condvar
//! pair counts the workers still running so the shutdown handle can block
//! until the last one is gone.

use crate::sync::{Ordering, AtomicBool, Mutex, Condvar, Arc};

use crate::core::Shared;

pub(crate) struct Shutdown {
    pub is_shutting_down: AtomicBool,
    pub remaining_workers: Mutex<u32>,
    pub all_workers_exited: Condvar,
}

impl Shutdown {
    pub fn new(num_workers: u32) -> Self {
        Shutdown {
            is_shutting_down: AtomicBool::new(false),
            remaining_workers: Mutex::new(num_workers),
            all_workers_exited: Condvar::new(),
        }
    }

    pub fn begin_shut_down(shared: Arc<Shared>) -> ShutdownHandle {
        log::debug!("shutting down {:?} pool {:?}", shared.kind, shared.id);

        shared.shutdown.is_shutting_down.store(true, Ordering::SeqCst);

        shared.sleep.wake_all();

        ShutdownHandle { shared }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    pub fn wait_shutdown(&self) {
        let mut remaining = self.remaining_workers.lock().unwrap();
        while *remaining > 0 {
            remaining = self.all_workers_exited.wait(remaining).unwrap();
        }
    }

    pub fn worker_has_shut_down(&self) {
        let mut remaining = self.remaining_workers.lock().unwrap();
        *remaining -= 1;
        if *remaining == 0 {
            self.all_workers_exited.notify_all();
        }
    }
}

/// Joins the pool: `wait` returns once every worker has drained the queue
/// and exited. Destroying pool state before this point would leave in-flight
/// tasks referencing it.
pub struct ShutdownHandle {
    shared: Arc<Shared>
}

impl ShutdownHandle {
    pub fn wait(self) {
        self.shared.shutdown.wait_shutdown();
    }
}

#[test]
fn shutdown_joins_all_workers() {
    use std::sync::atomic::AtomicU32;
    use crate::sync::Arc;
    use crate::{TaskPool, TaskType};
    static INITIALIZED_WORKERS: AtomicU32 = AtomicU32::new(0);
    static EXITED_WORKERS: AtomicU32 = AtomicU32::new(0);

    for _ in 0..20 {
        for num_threads in 1..8 {
            INITIALIZED_WORKERS.store(0, Ordering::SeqCst);
            EXITED_WORKERS.store(0, Ordering::SeqCst);

            let pool = TaskPool::builder(TaskType::Small)
                .with_worker_threads(num_threads)
                .with_start_handler(|_id| { INITIALIZED_WORKERS.fetch_add(1, Ordering::SeqCst); })
                .with_exit_handler(|_id| { EXITED_WORKERS.fetch_add(1, Ordering::SeqCst); })
                .build();

            // Queued work drains before the workers exit.
            let ran = Arc::new(AtomicU32::new(0));
            pool.add_tasks((0..16).map(|_| -> crate::TaskFn {
                let ran = Arc::clone(&ran);
                Box::new(move |_| { ran.fetch_add(1, Ordering::SeqCst); })
            }));

            let handle = pool.shut_down();
            handle.wait();

            assert_eq!(INITIALIZED_WORKERS.load(Ordering::SeqCst), num_threads as u32);
            assert_eq!(EXITED_WORKERS.load(Ordering::SeqCst), num_threads as u32);
            assert_eq!(ran.load(Ordering::SeqCst), 16);
        }
    }
}
