//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers that only flip atomic flags
//! - Translate SIGTERM/SIGINT into shutdown and SIGUSR1 into reload
//! - Deliver signals to other processes by pid
//!
//! # Design Decisions
//! - Flag handlers only; no signal iterator threads, so forking stays safe
//! - Flags are polled at well-defined points by the owning loop
//! - Children ignore SIGINT; the master alone turns Ctrl-C into an ordered stop

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};

/// Cooperative cancellation flag, set from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag on SIGTERM.
    pub fn on_terminate() -> io::Result<Self> {
        let token = Self::new();
        signal_hook::flag::register(SIGTERM, token.0.clone())?;
        Ok(token)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Flags polled by the master and manager loops.
#[derive(Debug, Clone)]
pub struct SignalFlags {
    pub terminate: CancelToken,
    pub reload: Arc<AtomicBool>,
}

impl SignalFlags {
    /// SIGTERM and SIGINT request shutdown, SIGUSR1 requests a reload.
    pub fn for_master() -> io::Result<Self> {
        let flags = Self::for_manager()?;
        signal_hook::flag::register(SIGINT, flags.terminate.0.clone())?;
        Ok(flags)
    }

    /// Like the master, but SIGINT is left to the master.
    pub fn for_manager() -> io::Result<Self> {
        let terminate = CancelToken::on_terminate()?;
        let reload = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGUSR1, reload.clone())?;
        Ok(Self { terminate, reload })
    }

    /// Consume a pending reload request.
    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }
}

/// Ignore SIGINT in this process and every child forked from it.
pub fn ignore_interrupt() -> nix::Result<()> {
    use nix::sys::signal::{signal, SigHandler};
    // SAFETY: SIG_IGN installs no Rust code as a handler.
    unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) }.map(|_| ())
}

/// Send `signal` to `pid`. `Ok(false)` means no such process.
pub fn send_signal(pid: i32, signal: Signal) -> nix::Result<bool> {
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Whether a process with `pid` exists.
pub fn is_alive(pid: i32) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
