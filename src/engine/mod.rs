//! Prefork I/O engine.
//!
//! # Data Flow
//! ```text
//! master.rs   bind → (daemonize) → fork manager → on_start → wait for signals
//!   └─ manager.rs   fork N event, M task and K custom processes; reap, respawn
//!        ├─ event_worker.rs   axum on the inherited listener, WebSocket sessions
//!        ├─ task_worker.rs    descriptors from the shared queue → on_task → reply
//!        └─ custom processes  supervisor loop, never respawned
//! ```
//!
//! # Design Decisions
//! - The orchestration layer sees only `ServerEvents` (callbacks in) and
//!   `Runtime` (operations out)
//! - No threads or async runtime exist before a fork; event workers build a
//!   current-thread tokio runtime after forking
//! - Worker ids: event `0..N`, task `N..N+M`, custom after that

pub mod event_worker;
pub mod ipc;
pub mod manager;
pub mod master;
pub mod task_worker;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::http::{Frame, Opcode, Request, Response};
use crate::lifecycle::CancelToken;
use crate::net::{ConnectionId, IdAllocator, WorkerId};
use crate::task::{TaskDescriptor, TaskOutcome};

pub use crate::observability::ProcessRole;
pub use event_worker::{build_app, EventRuntime};

/// Failure of a runtime operation requested by a handler.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no runtime attached in this process")]
    Detached,

    #[error("operation not available in the {0} process")]
    WrongRole(ProcessRole),

    #[error("connection {0} is not open in this worker")]
    UnknownConnection(ConnectionId),

    #[error("connection {conn} belongs to worker {owner}")]
    ForeignConnection { conn: ConnectionId, owner: WorkerId },

    #[error("fragmented frames are not supported")]
    Fragmented,

    #[error("text frame is not valid UTF-8")]
    InvalidText,

    #[error("no task workers configured")]
    NoTaskWorkers,

    #[error("task queue is full")]
    QueueFull,

    #[error("message of {0} bytes exceeds the IPC limit")]
    Oversize(usize),

    #[error("IPC encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Master-level failure. Aborts startup.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("fork failed: {0}")]
    Fork(#[source] nix::Error),

    #[error("startup aborted: {0}")]
    Startup(#[source] io::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Operations the engine offers to the orchestration layer in one process.
pub trait Runtime: Send + Sync {
    fn worker_id(&self) -> WorkerId;

    fn role(&self) -> ProcessRole;

    fn master_pid(&self) -> u32;

    /// Close a connection. `reset` drops it without a close frame.
    fn close(&self, conn: ConnectionId, reset: bool) -> Result<(), RuntimeError>;

    /// Send one frame on a connection.
    fn push(&self, conn: ConnectionId, opcode: Opcode, data: Bytes, finish: bool) -> Result<(), RuntimeError>;

    /// Queue a descriptor for the task-worker pool.
    fn dispatch_task(&self, descriptor: TaskDescriptor) -> Result<(), RuntimeError>;
}

/// Callbacks the engine raises. Implementations must not panic or block
/// indefinitely; they run on the process's only event loop.
pub trait ServerEvents: Send + Sync {
    /// Master, after the manager is forked. An error aborts startup.
    fn on_start(&self, master_pid: u32) -> io::Result<()>;
    fn on_shutdown(&self);
    fn on_manager_start(&self, runtime: Arc<dyn Runtime>);
    fn on_manager_stop(&self);
    fn on_worker_start(&self, runtime: Arc<dyn Runtime>);
    fn on_worker_stop(&self, worker_id: WorkerId);
    /// Manager, when an event or task worker exits with a non-zero status.
    /// Also reclaims the worker's connections.
    fn on_worker_error(&self, worker_id: WorkerId, pid: i32, status: i32);
    /// Manager, when an event worker exits cleanly. Reclaims connections it
    /// still held in the table.
    fn on_worker_exit(&self, worker_id: WorkerId);
    fn on_task(&self, descriptor: TaskDescriptor) -> TaskOutcome;
    fn on_finish(&self, task_id: u64, outcome: TaskOutcome);
    fn on_open(&self, request: &Request);
    fn on_close(&self, conn: ConnectionId);
    fn on_message(&self, frame: &Frame);
    fn on_request(&self, request: &Request, response: &mut Response);
}

/// Engine settings derived from the server configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub host: String,
    pub port: u16,
    pub daemonize: bool,
    pub log_file: PathBuf,
    pub worker_num: usize,
    pub task_worker_num: usize,
    pub max_connections: usize,
}

impl EngineConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn custom_worker_id(&self, index: usize) -> WorkerId {
        (self.worker_num + self.task_worker_num + index) as WorkerId
    }
}

impl From<&ServerConfig> for EngineConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            daemonize: config.daemonize,
            log_file: config
                .log_file
                .clone()
                .unwrap_or_else(|| PathBuf::from("/tmp/server.log")),
            worker_num: config.worker_num,
            task_worker_num: config.task_worker_num,
            max_connections: config.max_connections,
        }
    }
}

/// Entry point of a custom process. The token is set once the process is
/// asked to terminate. Returns the exit status.
pub type ProcessBody = Arc<dyn Fn(Arc<dyn Runtime>, CancelToken) -> i32 + Send + Sync>;

#[derive(Clone)]
pub struct CustomProcess {
    pub name: String,
    pub body: ProcessBody,
}

pub struct Engine {
    config: EngineConfig,
    events: Arc<dyn ServerEvents>,
    processes: Vec<CustomProcess>,
}

impl Engine {
    pub fn new(config: EngineConfig, events: Arc<dyn ServerEvents>) -> Self {
        Self {
            config,
            events,
            processes: Vec::new(),
        }
    }

    /// Register a process forked by the manager alongside the workers.
    pub fn add_process(&mut self, name: impl Into<String>, body: ProcessBody) {
        self.processes.push(CustomProcess {
            name: name.into(),
            body,
        });
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the master. Returns once the whole tree has shut down.
    pub fn run(self) -> Result<(), EngineError> {
        master::run(self)
    }
}

/// Runtime for processes that own no connections (task and custom workers).
#[derive(Debug, Clone)]
pub struct ProcessRuntime {
    role: ProcessRole,
    worker_id: WorkerId,
    master_pid: u32,
}

impl ProcessRuntime {
    pub fn new(role: ProcessRole, worker_id: WorkerId, master_pid: u32) -> Self {
        Self {
            role,
            worker_id,
            master_pid,
        }
    }
}

impl Runtime for ProcessRuntime {
    fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    fn role(&self) -> ProcessRole {
        self.role
    }

    fn master_pid(&self) -> u32 {
        self.master_pid
    }

    fn close(&self, _conn: ConnectionId, _reset: bool) -> Result<(), RuntimeError> {
        Err(RuntimeError::WrongRole(self.role))
    }

    fn push(&self, _conn: ConnectionId, _opcode: Opcode, _data: Bytes, _finish: bool) -> Result<(), RuntimeError> {
        Err(RuntimeError::WrongRole(self.role))
    }

    fn dispatch_task(&self, _descriptor: TaskDescriptor) -> Result<(), RuntimeError> {
        Err(RuntimeError::WrongRole(self.role))
    }
}

/// Runtime of the manager. Closing a connection here means its owner died
/// with the socket, so only the id is returned to the pool.
pub struct ManagerRuntime {
    master_pid: u32,
    ids: Arc<IdAllocator>,
}

impl ManagerRuntime {
    pub fn new(master_pid: u32, ids: Arc<IdAllocator>) -> Self {
        Self { master_pid, ids }
    }
}

impl Runtime for ManagerRuntime {
    fn worker_id(&self) -> WorkerId {
        0
    }

    fn role(&self) -> ProcessRole {
        ProcessRole::Manager
    }

    fn master_pid(&self) -> u32 {
        self.master_pid
    }

    fn close(&self, conn: ConnectionId, _reset: bool) -> Result<(), RuntimeError> {
        self.ids.release(conn);
        Ok(())
    }

    fn push(&self, _conn: ConnectionId, _opcode: Opcode, _data: Bytes, _finish: bool) -> Result<(), RuntimeError> {
        Err(RuntimeError::WrongRole(ProcessRole::Manager))
    }

    fn dispatch_task(&self, _descriptor: TaskDescriptor) -> Result<(), RuntimeError> {
        Err(RuntimeError::WrongRole(ProcessRole::Manager))
    }
}
