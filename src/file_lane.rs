use std::collections::VecDeque;

use crate::sync::{Arc, Mutex};
use crate::core::context::TaskContext;
use crate::core::pool::TaskPool;
use crate::core::task::{ScheduledTask, TaskFn, TaskType};

/// A strictly serial lane layered on top of the large pool.
///
/// At most one file task is ever executing, system-wide; everything else
/// waits in the lane. This bounds contention on shared file-system handles
/// without dedicating a thread to I/O.
///
/// Pending order is newest-first: a submission made while the lane is busy
/// is the next one to run. This favors latency for the most recently
/// requested asset over strict fairness, and is contract, not accident.
///
/// Cheap to clone; all clones share the same lane state.
#[derive(Clone)]
pub struct FileTaskLane {
    shared: Arc<LaneShared>,
}

struct LaneShared {
    pool: TaskPool,
    state: Mutex<LaneState>,
}

struct LaneState {
    /// Pending tasks, most recently submitted first.
    pending: VecDeque<TaskFn>,
    running: bool,
}

impl FileTaskLane {
    pub fn new(pool: TaskPool) -> Self {
        FileTaskLane {
            shared: Arc::new(LaneShared {
                pool,
                state: Mutex::new(LaneState {
                    pending: VecDeque::new(),
                    running: false,
                }),
            }),
        }
    }

    /// Thread-safe, non-blocking submission.
    ///
    /// If the lane is idle the task is dispatched to the large pool right
    /// away; otherwise it is pushed to the *front* of the pending queue.
    pub fn submit<F>(&self, f: F)
    where F: FnOnce(&TaskContext) + Send + 'static
    {
        self.submit_boxed(Box::new(f));
    }

    pub(crate) fn submit_boxed(&self, task: TaskFn) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.running {
                state.pending.push_front(task);
                return;
            }
            state.running = true;
        }

        self.dispatch(task);
    }

    fn dispatch(&self, task: TaskFn) {
        let lane = self.clone();
        self.shared.pool.add_scheduled(ScheduledTask::new(TaskType::File, Box::new(move |ctx| {
            task(ctx);
            lane.finish_current();
        })));
    }

    // Runs on the large pool worker that just finished a file task. The next
    // pending task goes back through the pool queue rather than running
    // inline, so a long chain of file tasks doesn't pin one worker.
    fn finish_current(&self) {
        let next = {
            let mut state = self.shared.state.lock().unwrap();
            match state.pending.pop_front() {
                Some(task) => Some(task),
                None => {
                    state.running = false;
                    None
                }
            }
        };

        if let Some(task) = next {
            self.dispatch(task);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().unwrap().running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{Ordering, AtomicUsize};
    use crate::CompletionGroup;
    use std::time::Duration;

    fn large_pool() -> TaskPool {
        TaskPool::builder(TaskType::Large).with_worker_threads(3).build()
    }

    #[test]
    fn one_file_task_at_a_time() {
        let pool = large_pool();
        let lane = FileTaskLane::new(pool.clone());

        let group = Arc::new(CompletionGroup::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let ran = Arc::new(AtomicUsize::new(0));

        group.add(8);
        for _ in 0..8 {
            let group = Arc::clone(&group);
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            let ran = Arc::clone(&ran);
            lane.submit(move |_| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_active.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(2));
                active.fetch_sub(1, Ordering::SeqCst);
                ran.fetch_add(1, Ordering::SeqCst);
                group.complete_one();
            });
        }

        group.wait();
        assert_eq!(ran.load(Ordering::SeqCst), 8);
        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(!lane.is_running());

        pool.shut_down().wait();
    }

    #[test]
    fn newest_submission_runs_next() {
        let pool = large_pool();
        let lane = FileTaskLane::new(pool.clone());

        let group = Arc::new(CompletionGroup::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release, gate) = std::sync::mpsc::channel::<()>();

        group.add(4);

        // The first task occupies the lane until released, so the three
        // submissions below all land in the pending queue.
        {
            let group = Arc::clone(&group);
            let order = Arc::clone(&order);
            lane.submit(move |_| {
                gate.recv().unwrap();
                order.lock().unwrap().push(0);
                group.complete_one();
            });
        }

        for i in 1..4 {
            let group = Arc::clone(&group);
            let order = Arc::clone(&order);
            lane.submit(move |_| {
                order.lock().unwrap().push(i);
                group.complete_one();
            });
        }

        release.send(()).unwrap();
        group.wait();

        // LIFO pending order: the latest submission runs first.
        assert_eq!(*order.lock().unwrap(), vec![0, 3, 2, 1]);

        pool.shut_down().wait();
    }
}
