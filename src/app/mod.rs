//! Application extension points.
//!
//! # Data Flow
//! ```text
//! ServerConfig.handlers / .workers (class names)
//!     → registry.rs (class name → factory, validation)
//!     → handler.rs instances bound into the Router
//!     → worker.rs instances run by the supervisor
//!     → task::Task instances built inside task workers
//! ```
//!
//! # Design Decisions
//! - Class names resolve through typed factories; no reflection
//! - Every callback returns `Result`; the event router maps errors to
//!   recovery actions
//! - Panics are caught at the same boundary and treated like errors

pub mod builtin;
pub mod handler;
pub mod registry;
pub mod worker;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::engine::RuntimeError;

pub use builtin::{DefaultHandler, EchoHandler, EchoTask};
pub use handler::Handler;
pub use registry::{HandlerFactory, Registry, TaskFactory, WorkerFactory, WorkerRegistration};
pub use worker::{Worker, WorkerContext};

/// Failure inside a handler or worker callback.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Message(String),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("panicked: {0}")]
    Panic(String),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a callback, turning a panic into `HandlerError::Panic`.
pub fn guard<T>(f: impl FnOnce() -> Result<T, HandlerError>) -> Result<T, HandlerError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(HandlerError::Panic(panic_message(payload.as_ref()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_converts_panics() {
        let result: Result<(), _> = guard(|| panic!("kaboom {}", 7));
        match result {
            Err(HandlerError::Panic(msg)) => assert_eq!(msg, "kaboom 7"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn guard_passes_results_through() {
        assert_eq!(guard(|| Ok(5)).unwrap(), 5);
        assert!(matches!(
            guard::<()>(|| Err(HandlerError::msg("nope"))),
            Err(HandlerError::Message(_))
        ));
    }
}
