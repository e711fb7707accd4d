/*
 * Completion tracking for work handed to a pool.
 */

use copy_common::{CopyError, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct TrackerState {
    pending: usize,
    first_error: Option<CopyError>,
}

/// Counts outstanding tasks and keeps the first failure.
#[derive(Default)]
pub struct TaskTracker {
    state: Mutex<TrackerState>,
    idle: Condvar,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a task about to be submitted.
    pub fn begin(&self) {
        self.lock().pending += 1;
    }

    /// Records the outcome of a task registered with `begin`.
    pub fn complete(&self, result: Result<()>) {
        let mut state = self.lock();
        if let Err(e) = result {
            if state.first_error.is_none() {
                state.first_error = Some(e);
            }
        }
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.idle.notify_all();
        }
    }

    /// Runs a task registered with `begin` and records its outcome. A panic
    /// is recorded as an execution failure so `wait` still returns.
    pub fn run_task<F>(&self, label: &str, task: F)
    where
        F: FnOnce() -> Result<()>,
    {
        let result = panic::catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|payload| {
            let reason = panic_reason(payload.as_ref());
            tracing::error!("{} panicked: {}", label, reason);
            Err(CopyError::Execution(format!("{} panicked: {}", label, reason)))
        });
        self.complete(result);
    }

    /// Returns true once any task has failed.
    pub fn has_failed(&self) -> bool {
        self.lock().first_error.is_some()
    }

    pub fn pending(&self) -> usize {
        self.lock().pending
    }

    /// Blocks until every registered task has completed, then returns the
    /// first failure, if any. The failure stays recorded.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.lock();
        while state.pending > 0 {
            state = self.idle.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        match &state.first_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown cause".to_string()
    }
}
