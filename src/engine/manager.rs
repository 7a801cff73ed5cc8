//! Manager process: spawns, reaps and respawns children.
//!
//! # Responsibilities
//! - Fork event workers, task workers and custom processes
//! - Reap exits every 100 ms and report crashes through `on_worker_error`
//! - Reclaim table entries of every event worker that exits
//! - Respawn event and task workers under their old id
//! - SIGUSR1: restart event and task workers one signal at a time
//! - SIGTERM: stop every child and wait for it
//!
//! # Design Decisions
//! - Custom processes are never respawned
//! - Shared memory and task sockets are created here, before any child exists
//! - Shutdown waits for children without a deadline and never sends SIGKILL
//! - Children keep the manager's SIGTERM flag; it covers the window before
//!   they install their own handling

use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::engine::event_worker::{self, EventWorkerContext};
use crate::engine::ipc::TaskChannels;
use crate::engine::task_worker::{self, TaskWorkerContext};
use crate::engine::{Engine, ManagerRuntime, ProcessRole, ProcessRuntime, Runtime};
use crate::lifecycle::signals::{self, SignalFlags};
use crate::lifecycle::CancelToken;
use crate::net::{IdAllocator, WorkerId};
use crate::observability::set_process_identity;

const REAP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChildKind {
    Event(WorkerId),
    Task(WorkerId),
    Custom(usize),
}

struct Manager<'a> {
    engine: &'a Engine,
    listener: TcpListener,
    master_pid: u32,
    ids: Arc<IdAllocator>,
    channels: Option<TaskChannels>,
    terminate: CancelToken,
    children: HashMap<Pid, ChildKind>,
}

/// Process entry. Returns the exit status.
pub(crate) fn run(engine: &Engine, listener: TcpListener, master_pid: u32) -> i32 {
    set_process_identity(ProcessRole::Manager, 0);
    if let Err(e) = signals::ignore_interrupt() {
        tracing::warn!(error = %e, "Failed to ignore SIGINT");
    }
    let flags = match SignalFlags::for_manager() {
        Ok(flags) => flags,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return 1;
        }
    };

    let config = engine.config();
    let ids = match IdAllocator::new(config.max_connections) {
        Ok(ids) => Arc::new(ids),
        Err(e) => {
            tracing::error!(error = %e, "Failed to map connection id pool");
            return 1;
        }
    };
    let channels = if config.task_worker_num > 0 {
        match TaskChannels::new(config.worker_num) {
            Ok(channels) => Some(channels),
            Err(e) => {
                tracing::error!(error = %e, "Failed to create task channels");
                return 1;
            }
        }
    } else {
        None
    };

    engine
        .events
        .on_manager_start(Arc::new(ManagerRuntime::new(master_pid, ids.clone())));

    let mut manager = Manager {
        engine,
        listener,
        master_pid,
        ids,
        channels,
        terminate: flags.terminate.clone(),
        children: HashMap::new(),
    };
    manager.spawn_all();

    while !flags.terminate.is_cancelled() {
        if flags.take_reload() {
            manager.reload();
        }
        manager.reap(&flags);
        thread::sleep(REAP_INTERVAL);
    }

    manager.shutdown();
    engine.events.on_manager_stop();
    0
}

/// Shell-style exit code of a terminated child; signals map to 128 + n.
fn exit_code(status: WaitStatus) -> Option<(Pid, i32)> {
    match status {
        WaitStatus::Exited(pid, code) => Some((pid, code)),
        WaitStatus::Signaled(pid, signal, _) => Some((pid, 128 + signal as i32)),
        _ => None,
    }
}

impl Manager<'_> {
    fn spawn_all(&mut self) {
        let config = self.engine.config();
        for id in 0..config.worker_num {
            self.spawn(ChildKind::Event(id as WorkerId));
        }
        for offset in 0..config.task_worker_num {
            self.spawn(ChildKind::Task((config.worker_num + offset) as WorkerId));
        }
        for index in 0..self.engine.processes.len() {
            self.spawn(ChildKind::Custom(index));
        }
    }

    fn spawn(&mut self, kind: ChildKind) {
        // SAFETY: the manager is single-threaded; the child runs its entry
        // point and exits without returning here.
        match unsafe { fork() } {
            Ok(ForkResult::Parent { child }) => {
                tracing::debug!(pid = child.as_raw(), ?kind, "Spawned child");
                self.children.insert(child, kind);
            }
            Ok(ForkResult::Child) => {
                let status = self.run_child(kind);
                std::process::exit(status);
            }
            Err(e) => tracing::error!(error = %e, ?kind, "Failed to fork child"),
        }
    }

    fn run_child(&self, kind: ChildKind) -> i32 {
        let config = self.engine.config();
        let events = self.engine.events.clone();
        match kind {
            ChildKind::Event(worker_id) => {
                set_process_identity(ProcessRole::EventWorker, worker_id);
                let listener = match self.listener.try_clone() {
                    Ok(listener) => listener,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to take over listener");
                        return 1;
                    }
                };
                let queue = self.channels.as_ref().and_then(|c| c.queue.tx.try_clone().ok());
                let replies = self
                    .channels
                    .as_ref()
                    .and_then(|c| c.reply_rx(worker_id))
                    .and_then(|rx| rx.try_clone().ok());
                event_worker::run(EventWorkerContext {
                    worker_id,
                    master_pid: self.master_pid,
                    events,
                    listener,
                    ids: self.ids.clone(),
                    queue,
                    replies,
                    terminate: self.terminate.clone(),
                })
            }
            ChildKind::Task(worker_id) => {
                set_process_identity(ProcessRole::TaskWorker, worker_id);
                let Some(channels) = self.channels.as_ref() else {
                    tracing::error!("Task worker started without task channels");
                    return 1;
                };
                task_worker::run(TaskWorkerContext {
                    worker_id,
                    master_pid: self.master_pid,
                    events,
                    queue: &channels.queue.rx,
                    replies: channels.replies.iter().map(|c| &c.tx).collect(),
                    terminate: self.terminate.clone(),
                })
            }
            ChildKind::Custom(index) => {
                let worker_id = config.custom_worker_id(index);
                set_process_identity(ProcessRole::Custom, worker_id);
                let Some(process) = self.engine.processes.get(index) else {
                    return 1;
                };
                let runtime: Arc<dyn Runtime> =
                    Arc::new(ProcessRuntime::new(ProcessRole::Custom, worker_id, self.master_pid));
                (process.body)(runtime, self.terminate.clone())
            }
        }
    }

    fn reap(&mut self, flags: &SignalFlags) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return,
                Ok(status) => {
                    if let Some((pid, code)) = exit_code(status) {
                        self.on_exit(pid, code, flags);
                    }
                }
                Err(Errno::EINTR) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "waitpid failed");
                    return;
                }
            }
        }
    }

    fn on_exit(&mut self, pid: Pid, status: i32, flags: &SignalFlags) {
        let Some(kind) = self.children.remove(&pid) else {
            return;
        };
        match kind {
            ChildKind::Event(worker_id) | ChildKind::Task(worker_id) => {
                if status != 0 {
                    self.engine.events.on_worker_error(worker_id, pid.as_raw(), status);
                } else if matches!(kind, ChildKind::Event(_)) {
                    self.engine.events.on_worker_exit(worker_id);
                }
                if !flags.terminate.is_cancelled() {
                    tracing::info!(worker_id, pid = pid.as_raw(), status, "Respawning worker");
                    self.spawn(kind);
                }
            }
            ChildKind::Custom(index) => {
                let name = self
                    .engine
                    .processes
                    .get(index)
                    .map(|p| p.name.as_str())
                    .unwrap_or("?");
                tracing::info!(name, pid = pid.as_raw(), status, "Custom worker exited");
            }
        }
    }

    /// SIGTERM every event and task worker; the reaper respawns them.
    fn reload(&self) {
        tracing::info!("Reloading workers");
        for (pid, kind) in &self.children {
            if matches!(kind, ChildKind::Event(_) | ChildKind::Task(_)) {
                let _ = kill(*pid, Signal::SIGTERM);
            }
        }
    }

    fn shutdown(&mut self) {
        for pid in self.children.keys() {
            let _ = kill(*pid, Signal::SIGTERM);
        }
        for (pid, kind) in self.children.drain() {
            match waitpid(pid, None) {
                Ok(status) => tracing::debug!(?kind, ?status, "Child stopped"),
                Err(e) => tracing::warn!(?kind, error = %e, "Failed to wait for child"),
            }
        }
    }
}
