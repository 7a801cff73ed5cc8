//! The `Worker` trait for custom long-running processes.

use crate::app::HandlerError;
use crate::config::Options;
use crate::server::Server;

/// What a custom worker sees while it runs.
#[derive(Clone, Copy)]
pub struct WorkerContext<'a> {
    pub server: &'a Server,
    /// Resolved registration name.
    pub name: &'a str,
    pub options: &'a Options,
    /// Which of the registration's processes this is, from 0.
    pub index: usize,
}

impl WorkerContext<'_> {
    pub fn option(&self, key: &str) -> Option<&serde_json::Value> {
        self.options.get(key)
    }
}

impl std::fmt::Debug for WorkerContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("name", &self.name)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// User logic driven by the supervisor loop in its own process.
pub trait Worker: Send {
    /// Name used when the configuration does not give one.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Called once before the first `run`.
    fn init(&mut self, _ctx: &WorkerContext<'_>) -> Result<(), HandlerError> {
        Ok(())
    }

    /// One unit of work. `Ok(true)` ends the worker.
    fn run(&mut self, ctx: &WorkerContext<'_>) -> Result<bool, HandlerError>;
}
