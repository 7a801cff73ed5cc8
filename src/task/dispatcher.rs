//! Per-process bookkeeping of submitted tasks.
//!
//! # Responsibilities
//! - Allocate task ids
//! - Park the submitter's callback until the outcome returns
//! - Run the callback exactly once, or drop it if submission failed
//! - Contain panics raised by the callback
//!
//! # Design Decisions
//! - Lives in each event worker; ids are only unique per worker
//! - Callbacks run outside the lock

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::app::panic_message;
use crate::task::{ErrorDescriptor, TaskOutcome};

/// Receives `(result, error)` once the task finishes.
pub type TaskCallback = Box<dyn FnOnce(Option<Value>, Option<ErrorDescriptor>) + Send>;

#[derive(Default)]
pub struct TaskDispatcher {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Option<TaskCallback>>>,
}

impl TaskDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, Option<TaskCallback>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve an id and park `callback` under it.
    pub fn prepare(&self, callback: Option<TaskCallback>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending().insert(id, callback);
        id
    }

    /// Forget a task whose descriptor never left this process.
    pub fn cancel(&self, id: u64) {
        self.pending().remove(&id);
    }

    /// Deliver `outcome` to the callback parked under `id`. Returns false for
    /// unknown or already completed ids. A panicking callback is logged and
    /// still counts as delivered.
    pub fn complete(&self, id: u64, outcome: TaskOutcome) -> bool {
        let Some(callback) = self.pending().remove(&id) else {
            return false;
        };
        if let Some(callback) = callback {
            let deliver = AssertUnwindSafe(move || callback(outcome.result, outcome.error));
            if let Err(payload) = panic::catch_unwind(deliver) {
                tracing::error!(
                    task_id = id,
                    error = %panic_message(payload.as_ref()),
                    "Task callback panicked"
                );
            }
        }
        true
    }

    /// Tasks submitted and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.pending().len()
    }
}

impl std::fmt::Debug for TaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcher")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
