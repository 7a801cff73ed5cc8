//! Server orchestration.
//!
//! # Responsibilities
//! - Own the validated configuration, router, worker registrations and
//!   the shared connection table
//! - Start the engine and register one custom process per worker instance
//! - Offer `close`, `push` and `task` to handler code
//! - Control a running master through its PID file (`stop`, `reload`)
//!
//! # Data Flow
//! ```text
//! ServerConfig
//!     → Server::new (on_boot hook, registry builds router + workers)
//!     → Server::start (on_init, engine.run)
//!     → engine raises events → events.rs → Handler callbacks
//!     → Handler calls back into close / push / task → Runtime
//! ```
//!
//! # Design Decisions
//! - Everything is built before the first fork and read-only afterwards
//! - The engine runtime is attached per process when it starts
//! - A connection is only pushed to or closed from the worker that owns it

mod events;

use std::io;
use std::sync::{Arc, PoisonError, RwLock};

use axum::body::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;

use crate::app::{guard, Handler, HandlerError, Registry, WorkerRegistration};
use crate::config::validation::validate_config;
use crate::config::{ConfigError, Hooks, Options, ServerConfig};
use crate::engine::{Engine, EngineConfig, EngineError, Runtime, RuntimeError, ServerEvents};
use crate::http::Opcode;
use crate::lifecycle::{CancelToken, Controller, LifecycleError, PidFile, StopOutcome};
use crate::net::{ConnectionId, ConnectionTable, WorkerId};
use crate::routing::Router;
use crate::supervisor;
use crate::task::{ErrorDescriptor, TaskCallback, TaskDescriptor, TaskDispatcher};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("handler {handler} failed to initialise: {source}")]
    HandlerInit {
        handler: String,
        #[source]
        source: HandlerError,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("failed to map connection table: {0}")]
    SharedMemory(#[source] io::Error),
}

pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
    router: Router,
    workers: Vec<WorkerRegistration>,
    table: ConnectionTable,
    /// Connection id → router index, for connections owned by this process.
    bindings: DashMap<ConnectionId, usize>,
    tasks: TaskDispatcher,
    runtime: RwLock<Option<Arc<dyn Runtime>>>,
    controller: Controller,
}

impl Server {
    /// Build a server with the built-in handlers and tasks only.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ServerError> {
        Self::with_registry(config, Registry::with_builtins())
    }

    /// Validate `config` and build every handler and worker registration.
    /// Nothing is bound or forked yet.
    pub fn with_registry(config: ServerConfig, registry: Registry) -> Result<Arc<Self>, ServerError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let table = ConnectionTable::new(config.max_connections).map_err(ServerError::SharedMemory)?;
        let controller = Controller::new(PidFile::new(config.pid_file.clone()));

        let mut server = Self {
            config,
            registry: Arc::new(registry),
            router: Router::new(),
            workers: Vec::new(),
            table,
            bindings: DashMap::new(),
            tasks: TaskDispatcher::new(),
            runtime: RwLock::new(None),
            controller,
        };

        Hooks::fire(&server.config.hooks.on_boot, &server);

        server.router = server.registry.build_router(&server.config.handlers)?;
        server.workers = server.registry.build_workers(&server.config.workers)?;
        tracing::debug!(
            handlers = server.router.len(),
            workers = server.workers.len(),
            "Server built"
        );
        Ok(Arc::new(server))
    }

    /// Run the server in this process until it is told to stop.
    ///
    /// Fails with [`ConfigError::NoHandlers`] before binding when no handler
    /// is registered.
    pub fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.router.is_empty() {
            return Err(ConfigError::NoHandlers.into());
        }

        Hooks::fire(&self.config.hooks.on_init, self);
        for registration in self.router.iter() {
            let handler = &registration.handler;
            guard(|| handler.on_init(self)).map_err(|source| ServerError::HandlerInit {
                handler: handler.name().to_string(),
                source,
            })?;
        }

        let events: Arc<dyn ServerEvents> = self.clone();
        let mut engine = Engine::new(EngineConfig::from(&self.config), events);
        for registration in &self.workers {
            for index in 0..registration.process_count {
                let server = Arc::clone(self);
                let registration = registration.clone();
                engine.add_process(
                    registration.name.clone(),
                    Arc::new(move |runtime: Arc<dyn Runtime>, terminate: CancelToken| {
                        server.attach_runtime(runtime);
                        supervisor::run_process(&server, &registration, index, &terminate)
                    }),
                );
            }
        }

        engine.run()?;
        Ok(())
    }

    /// Stop the master named by the PID file.
    pub fn stop(&self) -> Result<StopOutcome, ServerError> {
        Ok(self.controller.stop()?)
    }

    /// `stop`, then `start` in this process.
    pub fn restart(self: &Arc<Self>) -> Result<(), ServerError> {
        let outcome = self.stop()?;
        tracing::debug!(?outcome, "Stopped previous master");
        self.start()
    }

    /// Ask the running master to restart its workers. Returns whether a
    /// signal was sent.
    pub fn reload(&self) -> Result<bool, ServerError> {
        Ok(self.controller.reload()?)
    }

    /// Close a connection owned by this worker. `reset` skips the close frame.
    pub fn close(&self, conn: ConnectionId, reset: bool) -> Result<(), RuntimeError> {
        let runtime = self.runtime()?;
        self.check_owner(runtime.as_ref(), conn)?;
        runtime.close(conn, reset)
    }

    /// Send one complete frame.
    pub fn push(&self, conn: ConnectionId, opcode: Opcode, data: impl Into<Bytes>) -> Result<(), RuntimeError> {
        self.push_frame(conn, opcode, data, true)
    }

    /// Send one frame with an explicit finish flag.
    pub fn push_frame(
        &self,
        conn: ConnectionId,
        opcode: Opcode,
        data: impl Into<Bytes>,
        finish: bool,
    ) -> Result<(), RuntimeError> {
        let runtime = self.runtime()?;
        self.check_owner(runtime.as_ref(), conn)?;
        runtime.push(conn, opcode, data.into(), finish)
    }

    fn check_owner(&self, runtime: &dyn Runtime, conn: ConnectionId) -> Result<(), RuntimeError> {
        match self.table.get(conn) {
            Some(owner) if owner != runtime.worker_id() => Err(RuntimeError::ForeignConnection { conn, owner }),
            _ => Ok(()),
        }
    }

    /// Run `class` in the task pool; `callback(result, error)` runs in this
    /// worker once it finishes. Returns the task id.
    pub fn task<F>(&self, class: &str, options: Options, callback: F) -> Result<u64, RuntimeError>
    where
        F: FnOnce(Option<Value>, Option<ErrorDescriptor>) + Send + 'static,
    {
        self.submit(class, options, Some(Box::new(callback)))
    }

    /// Run `class` in the task pool without waiting for its outcome.
    pub fn task_detached(&self, class: &str, options: Options) -> Result<u64, RuntimeError> {
        self.submit(class, options, None)
    }

    fn submit(
        &self,
        class: &str,
        options: Options,
        callback: Option<TaskCallback>,
    ) -> Result<u64, RuntimeError> {
        let runtime = self.runtime()?;
        let id = self.tasks.prepare(callback);
        let descriptor = TaskDescriptor {
            id,
            src_worker: runtime.worker_id(),
            class: class.to_string(),
            options,
        };
        if let Err(e) = runtime.dispatch_task(descriptor) {
            self.tasks.cancel(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Attach the engine runtime of the current process.
    pub fn attach_runtime(&self, runtime: Arc<dyn Runtime>) {
        *self.runtime.write().unwrap_or_else(PoisonError::into_inner) = Some(runtime);
    }

    pub fn runtime(&self) -> Result<Arc<dyn Runtime>, RuntimeError> {
        self.runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(RuntimeError::Detached)
    }

    /// Id of the current process within the tree, 0 before a runtime is attached.
    pub fn worker_id(&self) -> WorkerId {
        self.runtime().map(|r| r.worker_id()).unwrap_or(0)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn workers(&self) -> &[WorkerRegistration] {
        &self.workers
    }

    pub fn connections(&self) -> &ConnectionTable {
        &self.table
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Handler serving `path`, if any.
    pub fn handler_for(&self, path: &str) -> Option<&Arc<dyn Handler>> {
        self.router.match_path(path).map(|(_, r)| &r.handler)
    }

    /// Tasks submitted from this process that have not completed.
    pub fn tasks_in_flight(&self) -> usize {
        self.tasks.in_flight()
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listen", &self.config.listen_address())
            .field("router", &self.router)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}
