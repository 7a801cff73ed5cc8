//! Engine events routed to handlers.
//!
//! Every handler call goes through `guard`, so an error or a panic is logged
//! and mapped to a recovery action instead of unwinding into the engine:
//! failed WebSocket callbacks force-close the connection, failed requests
//! answer 500.

use std::io;
use std::sync::Arc;

use axum::http::StatusCode;

use crate::app::{guard, Handler, HandlerError};
use crate::config::Hooks;
use crate::engine::{ProcessRole, Runtime, ServerEvents};
use crate::http::{Frame, Request, Response};
use crate::lifecycle::startup;
use crate::net::{ConnectionId, WorkerId};
use crate::server::Server;
use crate::task::{self, TaskDescriptor, TaskOutcome};

impl Server {
    fn set_title(&self, role: &str) {
        startup::set_process_title(&startup::process_title(&self.config.process_title, role));
    }

    /// Close without surfacing errors; the connection may already be gone.
    fn force_close(&self, conn: ConnectionId) {
        if let Err(e) = self.close(conn, false) {
            tracing::debug!(conn_id = %conn, error = %e, "Force close skipped");
        }
    }

    fn each_handler(&self, callback: &str, f: impl Fn(&dyn Handler) -> Result<(), HandlerError>) {
        for registration in self.router.iter() {
            let handler = registration.handler.as_ref();
            if let Err(e) = guard(|| f(handler)) {
                tracing::error!(handler = handler.name(), callback, error = %e, "Handler callback failed");
            }
        }
    }
}

impl ServerEvents for Server {
    fn on_start(&self, master_pid: u32) -> io::Result<()> {
        self.set_title("master");
        self.controller.pid_file().write(master_pid)?;

        Hooks::fire(&self.config.hooks.on_start, self);
        self.each_handler("on_start", |h| h.on_start(self));
        tracing::info!("master start (listening on {})", self.config.listen_address());
        Ok(())
    }

    fn on_shutdown(&self) {
        if let Err(e) = self.controller.pid_file().remove() {
            tracing::warn!(error = %e, "Failed to remove pid file");
        }

        Hooks::fire(&self.config.hooks.on_shutdown, self);
        self.each_handler("on_shutdown", |h| h.on_shutdown(self));
        tracing::info!("master shutdown");
    }

    fn on_manager_start(&self, runtime: Arc<dyn Runtime>) {
        self.set_title("manager");
        self.attach_runtime(runtime);
        tracing::info!("manager start");
    }

    fn on_manager_stop(&self) {
        tracing::info!("manager stop");
    }

    fn on_worker_start(&self, runtime: Arc<dyn Runtime>) {
        let worker_id = runtime.worker_id();
        let title = if runtime.role() == ProcessRole::TaskWorker {
            "worker/task"
        } else {
            "worker"
        };
        self.set_title(title);
        self.attach_runtime(runtime);

        Hooks::fire(&self.config.hooks.on_worker_start, self);
        self.each_handler("on_worker_start", |h| h.on_worker_start(self));
        tracing::info!("worker#{} start", worker_id);
    }

    fn on_worker_stop(&self, worker_id: WorkerId) {
        Hooks::fire(&self.config.hooks.on_worker_stop, self);
        self.each_handler("on_worker_stop", |h| h.on_worker_stop(self));
        tracing::info!("worker#{} stop", worker_id);
    }

    fn on_worker_error(&self, worker_id: WorkerId, pid: i32, status: i32) {
        tracing::error!("worker#{} error (pid: {}, status: {})", worker_id, pid, status);
        self.on_worker_exit(worker_id);
    }

    fn on_worker_exit(&self, worker_id: WorkerId) {
        let runtime = match self.runtime() {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(error = %e, "Cannot clean up connections of exited worker");
                return;
            }
        };
        for (conn, owner) in self.table.scan() {
            if owner == worker_id && self.table.delete_if(conn, worker_id) {
                if let Err(e) = runtime.close(conn, false) {
                    tracing::debug!(conn_id = %conn, error = %e, "Close after worker exit failed");
                }
            }
        }
    }

    fn on_task(&self, descriptor: TaskDescriptor) -> TaskOutcome {
        task::execute(&self.registry, self, &descriptor)
    }

    fn on_finish(&self, task_id: u64, outcome: TaskOutcome) {
        if !self.tasks.complete(task_id, outcome) {
            tracing::debug!(task_id, "Outcome for unknown task ignored");
        }
    }

    fn on_open(&self, request: &Request) {
        let conn = request.conn_id();
        if let Err(e) = self.table.set(conn, self.worker_id()) {
            tracing::error!(conn_id = %conn, error = %e, "Cannot track connection");
            self.force_close(conn);
            return;
        }

        let path = request.path();
        let Some((index, registration)) = self.router.match_path(path) else {
            self.force_close(conn);
            tracing::error!(
                "websocket handler not exist on open callback (conn: {}, path: {})",
                conn,
                path
            );
            return;
        };
        self.bindings.insert(conn, index);

        if let Err(e) = guard(|| registration.handler.on_open(self, request)) {
            self.force_close(conn);
            tracing::error!(conn_id = %conn, handler = registration.handler.name(), error = %e, "on_open failed");
        }
    }

    fn on_close(&self, conn: ConnectionId) {
        self.table.delete(conn);

        let Some((_, index)) = self.bindings.remove(&conn) else {
            return;
        };
        let Some(registration) = self.router.get(index) else {
            return;
        };
        if let Err(e) = guard(|| registration.handler.on_close(self, conn)) {
            self.force_close(conn);
            tracing::error!(conn_id = %conn, handler = registration.handler.name(), error = %e, "on_close failed");
        }
    }

    fn on_message(&self, frame: &Frame) {
        let conn = frame.conn_id;
        let registration = self
            .bindings
            .get(&conn)
            .and_then(|index| self.router.get(*index));
        let Some(registration) = registration else {
            self.force_close(conn);
            tracing::error!(
                "websocket handler not exist on message callback (conn: {}, data: {})",
                conn,
                String::from_utf8_lossy(&frame.data)
            );
            return;
        };

        if let Err(e) = guard(|| registration.handler.on_message(self, frame)) {
            self.force_close(conn);
            tracing::error!(conn_id = %conn, handler = registration.handler.name(), error = %e, "on_message failed");
        }
    }

    fn on_request(&self, request: &Request, response: &mut Response) {
        let Some((_, registration)) = self.router.match_path(request.path()) else {
            response.error(StatusCode::NOT_FOUND);
            return;
        };

        if let Err(e) = guard(|| registration.handler.on_request(self, request, response)) {
            response.error(StatusCode::INTERNAL_SERVER_ERROR);
            tracing::error!(
                handler = registration.handler.name(),
                path = request.path(),
                request_id = %request.unique_id(),
                error = %e,
                "on_request failed"
            );
        }
    }
}
