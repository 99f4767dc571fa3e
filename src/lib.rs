//! A multithreaded task scheduler for game engines.
//!
//! What we want:
//! - Keep latency-sensitive per-frame work away from throughput-oriented
//!   background work (two independent fixed-size pools rather than one
//!   shared one, at the cost of thread count).
//! - Strict main-thread affinity for anything touching the graphics/UI
//!   context, via a queue that is only ever drained by an explicit
//!   once-per-frame pump.
//! - At most one background file task in flight at any time, so loaders
//!   never contend on file-system handles.
//! - A drain barrier over the game-logic cohort that the pump waits on
//!   before running main-thread work.
//! - A deterministic two-phase lifecycle: building a pool starts its
//!   threads, shutting it down drains the queue and joins them.
//!
//! Tasks are plain closures run to completion on one thread; there are no
//! coroutines and nothing suspends. A task that needs to wait for other work
//! should instead schedule a continuation (see
//! `TaskScheduler::schedule_tasks_with_completion`).

mod core;
mod completion;
mod file_lane;
mod main_thread;
mod scheduler;

pub use crate::completion::CompletionGroup;
pub use crate::core::context::TaskContext;
pub use crate::core::pool::{recommended_worker_count, TaskPool, TaskPoolBuilder, TaskPoolId};
pub use crate::core::shutdown::ShutdownHandle;
pub use crate::core::sync;
pub use crate::core::task::{task, TaskFn, TaskType};
pub use crate::core::WorkerHook;
pub use crate::file_lane::FileTaskLane;
pub use crate::main_thread::MainThreadTaskPool;
pub use crate::scheduler::{SchedulerShutdownHandle, TaskScheduler, TaskSchedulerBuilder};

pub use crossbeam_utils::CachePadded;
