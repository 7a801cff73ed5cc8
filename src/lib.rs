//! vicuna: a prefork HTTP/WebSocket application server shell.

// Extension points
pub mod app;
pub mod task;

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;
pub mod server;
pub mod supervisor;

// Process model
pub mod engine;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use app::{Handler, HandlerError, Registry, Worker, WorkerContext};
pub use config::{load_or_default, ServerConfig};
pub use server::{Server, ServerError};
pub use task::{Task, TaskError};
