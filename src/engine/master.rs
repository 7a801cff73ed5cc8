//! Master process.
//!
//! Binds the listener, optionally detaches, forks the manager and then only
//! waits: SIGTERM/SIGINT stop the tree, SIGUSR1 is forwarded to the manager.

use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use crate::engine::{manager, Engine, EngineError, ProcessRole};
use crate::lifecycle::{startup, SignalFlags};
use crate::observability::set_process_identity;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) fn run(engine: Engine) -> Result<(), EngineError> {
    let addr = engine.config().listen_address();
    let listener = TcpListener::bind(&addr).map_err(|source| EngineError::Bind {
        addr: addr.clone(),
        source,
    })?;

    if engine.config().daemonize {
        startup::daemonize(&engine.config().log_file)?;
    }
    set_process_identity(ProcessRole::Master, 0);
    let master_pid = std::process::id();

    // SAFETY: no threads exist yet; the child enters the manager loop and exits.
    let manager_pid = match unsafe { fork() }.map_err(EngineError::Fork)? {
        ForkResult::Parent { child } => child,
        ForkResult::Child => {
            let status = manager::run(&engine, listener, master_pid);
            std::process::exit(status);
        }
    };
    drop(listener);

    let flags = match SignalFlags::for_master() {
        Ok(flags) => flags,
        Err(e) => {
            stop_manager(manager_pid);
            return Err(EngineError::Startup(e));
        }
    };

    if let Err(e) = engine.events.on_start(master_pid) {
        tracing::error!(error = %e, "Startup failed, stopping manager");
        stop_manager(manager_pid);
        return Err(EngineError::Startup(e));
    }

    let mut manager_alive = true;
    while !flags.terminate.is_cancelled() {
        if flags.take_reload() {
            tracing::info!(manager_pid = manager_pid.as_raw(), "Forwarding reload to manager");
            let _ = kill(manager_pid, Signal::SIGUSR1);
        }
        match waitpid(manager_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => {}
            Ok(status) => {
                tracing::error!(?status, "Manager exited unexpectedly");
                manager_alive = false;
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Lost track of manager");
                manager_alive = false;
                break;
            }
        }
        thread::sleep(POLL_INTERVAL);
    }

    if manager_alive {
        stop_manager(manager_pid);
    }
    engine.events.on_shutdown();
    Ok(())
}

fn stop_manager(pid: Pid) {
    if kill(pid, Signal::SIGTERM).is_err() {
        return;
    }
    loop {
        match waitpid(pid, None) {
            Err(Errno::EINTR) => continue,
            Ok(status) => {
                tracing::debug!(?status, "Manager stopped");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to wait for manager");
                return;
            }
        }
    }
}
