//! Background task execution.
//!
//! # Data Flow
//! ```text
//! Event worker: server.task(class, options, callback)
//!     → dispatcher.rs (park callback under a task id)
//!     → engine queue (TaskDescriptor, by value)
//! Task worker:
//!     → execute() (registry builds the task, run() once)
//!     → TaskOutcome { result, error }
//! Event worker (later loop turn):
//!     → dispatcher.rs (take callback by id) → callback(result, error)
//! ```
//!
//! # Design Decisions
//! - At-most-once: a task lost with its worker is not resubmitted
//! - Construction failures, run errors and panics all become an ErrorDescriptor
//! - No ordering between independently submitted tasks

pub mod dispatcher;

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::Once;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::app::{panic_message, Registry};
use crate::config::Options;
use crate::net::WorkerId;
use crate::server::Server;

pub use dispatcher::{TaskCallback, TaskDispatcher};

/// Unit of background work, built by a registry factory from its options.
pub trait Task: Send {
    fn run(&mut self, server: &Server) -> Result<Value, TaskError>;
}

/// What travels to a task worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: u64,
    pub src_worker: WorkerId,
    pub class: String,
    #[serde(default)]
    pub options: Options,
}

/// Serializable form of a task failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub message: String,
    pub code: i64,
    pub file: String,
    pub line: u32,
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {}) at {}:{}", self.message, self.code, self.file, self.line)
    }
}

/// `(result, error)` pair delivered to the submitter; exactly one is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub result: Option<Value>,
    pub error: Option<ErrorDescriptor>,
}

impl TaskOutcome {
    pub fn success(result: Value) -> Self {
        Self {
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: ErrorDescriptor) -> Self {
        Self {
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Error raised while constructing or running a task. Records where it was
/// created.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TaskError {
    pub message: String,
    pub code: i64,
    location: &'static Location<'static>,
}

impl TaskError {
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code(message, 0)
    }

    #[track_caller]
    pub fn with_code(message: impl Into<String>, code: i64) -> Self {
        Self {
            message: message.into(),
            code,
            location: Location::caller(),
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    pub fn descriptor(&self) -> ErrorDescriptor {
        ErrorDescriptor {
            message: self.message.clone(),
            code: self.code,
            file: self.location.file().to_string(),
            line: self.location.line(),
        }
    }
}

impl From<serde_json::Error> for TaskError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<std::io::Error> for TaskError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::with_code(err.to_string(), err.raw_os_error().map_or(0, i64::from))
    }
}

/// Code reported for tasks that panicked.
pub const PANIC_CODE: i64 = -1;

thread_local! {
    static PANIC_LOCATION: RefCell<Option<(String, u32)>> = const { RefCell::new(None) };
}

/// Record where each panic happened on its thread, then defer to the
/// previously installed hook.
fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let location = info.location().map(|l| (l.file().to_string(), l.line()));
            PANIC_LOCATION.with(|slot| *slot.borrow_mut() = location);
            previous(info);
        }));
    });
}

/// Build and run the task named by `descriptor`. Never panics.
pub fn execute(registry: &Registry, server: &Server, descriptor: &TaskDescriptor) -> TaskOutcome {
    install_panic_hook();
    PANIC_LOCATION.with(|slot| slot.borrow_mut().take());
    let run = || -> Result<Value, TaskError> {
        let mut task = registry.create_task(&descriptor.class, &descriptor.options)?;
        task.run(server)
    };

    let error = match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(Ok(result)) => return TaskOutcome::success(result),
        Ok(Err(err)) => err.descriptor(),
        Err(payload) => {
            let (file, line) = PANIC_LOCATION
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_default();
            ErrorDescriptor {
                message: panic_message(payload.as_ref()),
                code: PANIC_CODE,
                file,
                line,
            }
        }
    };

    tracing::error!(
        task_id = descriptor.id,
        class = %descriptor.class,
        error = %error,
        "Task failed"
    );
    TaskOutcome::failure(error)
}
