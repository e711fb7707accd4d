/*
 * Bounded worker pools.
 *
 * Both sides of the copy run on a pool sized by `build_pool`: a core of
 * long-lived threads, extra threads up to a hard maximum, and a bounded
 * queue. When the queue is full and every thread is busy the submitting
 * thread runs the task itself, which throttles the producer instead of
 * buffering without limit. Submitted work is never dropped.
 */

use copy_common::{CopyError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A unit of work submitted to a pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// What happens to a submission when the queue is full and no thread is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackpressurePolicy {
    /// Run the task synchronously on the submitting thread
    CallerRuns,
}

/// Sizing of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSpec {
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    pub queue_capacity: usize,
    pub backpressure: BackpressurePolicy,
    pub keep_alive: Duration,
}

/// Sizes a pool for a concurrency `limit`.
///
/// The core stays strictly below the limit when it can so that a burst
/// past the queue still has a thread to grow into.
pub fn build_pool(limit: usize, configured_core_size: usize, keep_alive: Duration) -> PoolSpec {
    let max_pool_size = limit.max(1);
    let core_pool_size = configured_core_size
        .min(max_pool_size.saturating_sub(1))
        .max(1);

    PoolSpec {
        core_pool_size,
        max_pool_size,
        queue_capacity: max_pool_size,
        backpressure: BackpressurePolicy::CallerRuns,
        keep_alive,
    }
}

/// Counters describing how a pool was used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub submitted: u64,
    pub caller_runs: u64,
    pub completed: u64,
    pub panicked: u64,
    pub workers: usize,
    pub peak_workers: usize,
}

struct PoolState {
    workers: usize,
    peak_workers: usize,
    next_worker_id: usize,
    sender: Option<Sender<Task>>,
    handles: Vec<JoinHandle<()>>,
}

struct Shared {
    name: String,
    spec: PoolSpec,
    state: Mutex<PoolState>,
    submitted: AtomicU64,
    caller_runs: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self, task: Task) {
        match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.panicked.fetch_add(1, Ordering::Relaxed);
                tracing::error!(pool = %self.name, "Task panicked");
            }
        }
    }
}

/// A thread pool with a bounded queue and caller-runs backpressure.
pub struct BoundedPool {
    shared: Arc<Shared>,
    receiver: Receiver<Task>,
}

impl BoundedPool {
    /// Creates a pool. No thread is started until work is submitted.
    pub fn new(name: impl Into<String>, spec: PoolSpec) -> Self {
        let (sender, receiver) = bounded(spec.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            name: name.into(),
            spec,
            state: Mutex::new(PoolState {
                workers: 0,
                peak_workers: 0,
                next_worker_id: 0,
                sender: Some(sender),
                handles: Vec::new(),
            }),
            submitted: AtomicU64::new(0),
            caller_runs: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
        });
        Self { shared, receiver }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn spec(&self) -> &PoolSpec {
        &self.shared.spec
    }

    /// Submits a task.
    ///
    /// Returns once the task has been handed to a thread, queued, or (when
    /// the pool is saturated) run to completion on the calling thread.
    pub fn execute<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let task: Task = Box::new(task);
        let spec = self.shared.spec;
        let mut state = self.shared.lock();

        let sender = match &state.sender {
            Some(sender) => sender.clone(),
            None => {
                return Err(CopyError::Execution(format!(
                    "pool '{}' is shut down",
                    self.shared.name
                )))
            }
        };
        self.shared.submitted.fetch_add(1, Ordering::Relaxed);

        if state.workers < spec.core_pool_size {
            return self.spawn_worker(&mut state, Some(task));
        }

        match sender.try_send(task) {
            Ok(()) => {
                if state.workers == 0 {
                    self.spawn_worker(&mut state, None)?;
                }
                Ok(())
            }
            Err(TrySendError::Full(task)) if state.workers < spec.max_pool_size => {
                self.spawn_worker(&mut state, Some(task))
            }
            Err(TrySendError::Full(task)) => {
                drop(state);
                self.shared.caller_runs.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(pool = %self.shared.name, "Pool saturated, running on caller");
                self.shared.run(task);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(CopyError::Execution(format!(
                "pool '{}' queue disconnected",
                self.shared.name
            ))),
        }
    }

    fn spawn_worker(&self, state: &mut PoolState, first: Option<Task>) -> Result<()> {
        let id = state.next_worker_id;
        state.next_worker_id += 1;

        let shared = self.shared.clone();
        let receiver = self.receiver.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.shared.name, id))
            .spawn(move || worker_loop(shared, receiver, first))
            .map_err(|e| {
                CopyError::Execution(format!(
                    "pool '{}' failed to start a thread: {}",
                    self.shared.name, e
                ))
            })?;

        state.workers += 1;
        state.peak_workers = state.peak_workers.max(state.workers);
        state.handles.push(handle);
        Ok(())
    }

    /// Returns a snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            caller_runs: self.shared.caller_runs.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            panicked: self.shared.panicked.load(Ordering::Relaxed),
            workers: state.workers,
            peak_workers: state.peak_workers,
        }
    }

    /// Stops accepting work, drains the queue and joins every thread.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        let handles = {
            let mut state = self.shared.lock();
            state.sender.take();
            std::mem::take(&mut state.handles)
        };

        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!(pool = %self.shared.name, "Worker thread panicked");
            }
        }
    }
}

impl Drop for BoundedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Idle {
    TimedOut,
    Closed,
}

fn worker_loop(shared: Arc<Shared>, receiver: Receiver<Task>, first: Option<Task>) {
    if let Some(task) = first {
        shared.run(task);
    }

    let spec = shared.spec;
    loop {
        let reclaimable = shared.lock().workers > spec.core_pool_size;
        let next = if reclaimable {
            receiver.recv_timeout(spec.keep_alive).map_err(|e| match e {
                RecvTimeoutError::Timeout => Idle::TimedOut,
                RecvTimeoutError::Disconnected => Idle::Closed,
            })
        } else {
            receiver.recv().map_err(|_| Idle::Closed)
        };

        match next {
            Ok(task) => shared.run(task),
            Err(idle) => {
                let mut state = shared.lock();
                if matches!(idle, Idle::TimedOut) && state.workers <= spec.core_pool_size {
                    continue;
                }
                state.workers -= 1;
                return;
            }
        }
    }
}
